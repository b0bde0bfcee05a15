//! Standard X9.143 version-D key blocks (AES key block protection key)
//!
//! The KEK acts as the key block protection key (KBPK). Two session keys
//! are derived from it with AES-CMAC:
//!
//! ```text
//! KBEK = CMAC(KBPK, 01 0000 00 <alg> <bits>)    encryption
//! KBAK = CMAC(KBPK, 01 0001 00 <alg> <bits>)    authentication
//! ```
//!
//! The payload `bit_length(2, BE) || key || pad` is authenticated first,
//! then encrypted with AES-CBC under KBEK using the tag as IV:
//!
//! ```text
//! tag   = CMAC(KBAK, header || payload)
//! block = header || HEX(CBC(KBEK, iv = tag, payload)) || HEX(tag)
//! ```

use crate::cipher::{BlockPrimitive, ChainingMode, CipherSpec, AES_BLOCK_SIZE};
use crate::codec::serialize_upper_hex;
use crate::error::{Result, Tr31Error};
use crate::header::{Header, HEADER_LEN};
use crate::kek::{AesVariant, KeyEncryptionKey};
use crate::mac::{cmac_with, compute_tag, verify_tag, MacAlgorithm};
use crate::options::EncodeOptions;
use aes::{Aes128, Aes192, Aes256};
use cmac::Cmac;
use rand::Rng;
use serde::Serialize;
use tracing::{debug, instrument};
use zeroize::{Zeroize, Zeroizing};

/// Version id of the standard AES key block
pub const STANDARD_VERSION_ID: char = 'D';

/// Tag length of a standard AES key block
pub const STANDARD_TAG_LEN: usize = 16;

/// Length prefix width in the payload (key length in bits, big-endian)
const LENGTH_PREFIX_LEN: usize = 2;

#[derive(Debug, Clone, Copy)]
enum DerivedKeyUsage {
    Encryption,
    Authentication,
}

impl DerivedKeyUsage {
    fn code(self) -> u16 {
        match self {
            DerivedKeyUsage::Encryption => 0x0000,
            DerivedKeyUsage::Authentication => 0x0001,
        }
    }
}

/// Verified, unwrapped standard key block
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct StandardKeyBlock {
    header: Header,
    #[serde(serialize_with = "serialize_upper_hex")]
    key: Vec<u8>,
}

impl StandardKeyBlock {
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Exact key bytes, length taken from the payload prefix
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn key_hex(&self) -> String {
        hex::encode_upper(&self.key)
    }
}

impl std::fmt::Debug for StandardKeyBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StandardKeyBlock")
            .field("header", &self.header)
            .field("key_len", &self.key.len())
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl Drop for StandardKeyBlock {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Wrap `key` with random padding
pub(crate) fn wrap(kek: &KeyEncryptionKey, key: &[u8], options: &EncodeOptions) -> Result<String> {
    let mut padding = Zeroizing::new(vec![0u8; pad_len(key.len())]);
    rand::rng().fill(padding.as_mut_slice());
    wrap_with_padding(kek, key, options, &padding)
}

/// Wrap `key` using the caller's padding bytes
#[instrument(skip_all, fields(key_len = key.len(), key_usage = %options.key_usage))]
pub(crate) fn wrap_with_padding(
    kek: &KeyEncryptionKey,
    key: &[u8],
    options: &EncodeOptions,
    padding: &[u8],
) -> Result<String> {
    let options = options.to_ascii_uppercase();
    if options.version_id != STANDARD_VERSION_ID {
        return Err(Tr31Error::UnsupportedVersion(options.version_id));
    }
    if options.algorithm != 'A' {
        return Err(Tr31Error::UnsupportedAlgorithm(options.algorithm));
    }
    if key.is_empty() {
        return Err(Tr31Error::EmptyInput);
    }
    if padding.len() != pad_len(key.len()) {
        return Err(Tr31Error::MalformedPayload(format!(
            "expected {} padding bytes, got {}",
            pad_len(key.len()),
            padding.len()
        )));
    }

    let bits = key
        .len()
        .checked_mul(8)
        .and_then(|bits| u16::try_from(bits).ok())
        .ok_or(Tr31Error::LengthOverflow(key.len()))?;

    let mut payload = Zeroizing::new(Vec::with_capacity(
        LENGTH_PREFIX_LEN + key.len() + padding.len(),
    ));
    payload.extend_from_slice(&bits.to_be_bytes());
    payload.extend_from_slice(key);
    payload.extend_from_slice(padding);

    let total_len = HEADER_LEN + 2 * payload.len() + 2 * STANDARD_TAG_LEN;
    let header = Header::for_key_block(&options, total_len)?.build()?;

    let session = SessionKeys::derive(kek)?;
    let tag = compute_tag(
        &authenticated_message(header.as_bytes(), &payload),
        &session.kbak,
        STANDARD_TAG_LEN,
        MacAlgorithm::Cmac,
    )?;
    let ciphertext = session.kbek.cbc_encrypt_with_iv(&tag, &payload)?;

    debug!(length = total_len, "wrapped standard key block");

    Ok(format!(
        "{header}{}{}",
        hex::encode_upper(&ciphertext),
        hex::encode_upper(&tag)
    ))
}

/// Verify and unwrap a standard key block
#[instrument(skip_all, fields(len = key_block.len()))]
pub(crate) fn unwrap(kek: &KeyEncryptionKey, key_block: &str) -> Result<StandardKeyBlock> {
    if key_block.is_empty() {
        return Err(Tr31Error::EmptyInput);
    }
    let char_len = key_block.chars().count();
    if char_len < HEADER_LEN {
        return Err(Tr31Error::TooShort { len: char_len });
    }

    let header = Header::parse(key_block)?;
    if header.version_id != STANDARD_VERSION_ID {
        return Err(Tr31Error::UnsupportedVersion(header.version_id));
    }
    if header.algorithm != 'A' {
        return Err(Tr31Error::UnsupportedAlgorithm(header.algorithm));
    }
    if header.has_optional_blocks() {
        return Err(Tr31Error::UnsupportedOptionalBlocks(header.optional_blocks.clone()));
    }
    if header.declared_length() != Some(key_block.len()) {
        return Err(Tr31Error::MalformedHeader(format!(
            "declared length {:?} but key block has {} characters",
            header.length,
            key_block.len()
        )));
    }

    let remaining = hex::decode(&key_block[HEADER_LEN..])?;
    if remaining.len() <= STANDARD_TAG_LEN {
        return Err(Tr31Error::MalformedPayload(
            "no encrypted payload before the tag".to_string(),
        ));
    }
    let (ciphertext, tag) = remaining.split_at(remaining.len() - STANDARD_TAG_LEN);

    let session = SessionKeys::derive(kek)?;
    let payload = Zeroizing::new(session.kbek.cbc_decrypt_with_iv(tag, ciphertext)?);
    verify_tag(
        &authenticated_message(key_block[..HEADER_LEN].as_bytes(), &payload),
        &session.kbak,
        tag,
        MacAlgorithm::Cmac,
    )?;

    let key = extract_key(&payload)?;
    debug!(key_len = key.len(), "unwrapped standard key block");

    Ok(StandardKeyBlock { header, key })
}

/// Random padding needed to bring `prefix || key` to a block boundary
fn pad_len(key_len: usize) -> usize {
    let used = (LENGTH_PREFIX_LEN + key_len) % AES_BLOCK_SIZE;
    (AES_BLOCK_SIZE - used) % AES_BLOCK_SIZE
}

fn authenticated_message(header: &[u8], payload: &[u8]) -> Zeroizing<Vec<u8>> {
    let mut message = Zeroizing::new(Vec::with_capacity(header.len() + payload.len()));
    message.extend_from_slice(header);
    message.extend_from_slice(payload);
    message
}

fn extract_key(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() < LENGTH_PREFIX_LEN {
        return Err(Tr31Error::MalformedPayload("missing key length".to_string()));
    }

    let bits = usize::from(u16::from_be_bytes([payload[0], payload[1]]));
    if bits == 0 || bits % 8 != 0 {
        return Err(Tr31Error::MalformedPayload(format!(
            "key length {bits} bits is not a positive whole number of bytes"
        )));
    }

    let key_len = bits / 8;
    let body = &payload[LENGTH_PREFIX_LEN..];
    if key_len > body.len() {
        return Err(Tr31Error::MalformedPayload(format!(
            "key length {key_len} bytes exceeds payload of {} bytes",
            body.len()
        )));
    }

    Ok(body[..key_len].to_vec())
}

struct SessionKeys {
    kbek: CipherSpec,
    kbak: CipherSpec,
}

impl SessionKeys {
    fn derive(kbpk: &KeyEncryptionKey) -> Result<Self> {
        let variant = kbpk.aes_variant();
        let primitive = BlockPrimitive::Aes(variant);

        Ok(Self {
            kbek: CipherSpec::from_parts(
                primitive,
                ChainingMode::Cbc,
                derive_key(kbpk, DerivedKeyUsage::Encryption)?,
            ),
            kbak: CipherSpec::from_parts(
                primitive,
                ChainingMode::Cbc,
                derive_key(kbpk, DerivedKeyUsage::Authentication)?,
            ),
        })
    }
}

fn derivation_data(counter: u8, usage: DerivedKeyUsage, variant: AesVariant) -> [u8; 8] {
    let algorithm: u16 = match variant {
        AesVariant::Aes128 => 0x0002,
        AesVariant::Aes192 => 0x0003,
        AesVariant::Aes256 => 0x0004,
    };

    let mut data = [0u8; 8];
    data[0] = counter;
    data[1..3].copy_from_slice(&usage.code().to_be_bytes());
    data[4..6].copy_from_slice(&algorithm.to_be_bytes());
    data[6..8].copy_from_slice(&variant.key_bits().to_be_bytes());
    data
}

/// Counter-mode CMAC KDF, output as long as the KBPK
fn derive_key(kbpk: &KeyEncryptionKey, usage: DerivedKeyUsage) -> Result<Zeroizing<Vec<u8>>> {
    let variant = kbpk.aes_variant();
    let key_len = kbpk.len();
    let mut derived = Zeroizing::new(Vec::with_capacity(key_len + AES_BLOCK_SIZE));

    let mut counter = 1u8;
    while derived.len() < key_len {
        let data = derivation_data(counter, usage, variant);
        let block = Zeroizing::new(match variant {
            AesVariant::Aes128 => cmac_with::<Cmac<Aes128>>(kbpk.as_bytes(), &data)?,
            AesVariant::Aes192 => cmac_with::<Cmac<Aes192>>(kbpk.as_bytes(), &data)?,
            AesVariant::Aes256 => cmac_with::<Cmac<Aes256>>(kbpk.as_bytes(), &data)?,
        });
        derived.extend_from_slice(&block);
        counter += 1;
    }

    derived.truncate(key_len);
    Ok(derived)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEK_16: &str = "000102030405060708090A0B0C0D0E0F";
    const VECTOR: &str = "D0112D0AD00E000037E35A44A7A52B4C0E49AD9E39D0136625EF8BBCD8861AE9\
                          7C1AB8E5862E8B791F982ED0A61AF0293968644A3B0B6FA4";
    const VECTOR_KEY: &str = "79A5688BAD48066D585DFCACC8BF4A2B";
    const VECTOR_PAD: &str = "E73D9FD44E75AA500DF31AE807E5";

    fn kek() -> KeyEncryptionKey {
        KeyEncryptionKey::from_hex(KEK_16).unwrap()
    }

    fn vector_options() -> EncodeOptions {
        EncodeOptions::default().with_mode_of_use('D')
    }

    #[test]
    fn test_derivation_data_layout() {
        let data = derivation_data(1, DerivedKeyUsage::Encryption, AesVariant::Aes128);
        assert_eq!(hex::encode_upper(data), "0100000000020080");

        let data = derivation_data(2, DerivedKeyUsage::Authentication, AesVariant::Aes256);
        assert_eq!(hex::encode_upper(data), "0200010000040100");

        let data = derivation_data(1, DerivedKeyUsage::Encryption, AesVariant::Aes192);
        assert_eq!(hex::encode_upper(data), "01000000000300C0");
    }

    #[test]
    fn test_derived_keys_match_kek_length() {
        for len in [16usize, 24, 32] {
            let kbpk = KeyEncryptionKey::from_bytes(&vec![0x5C; len]).unwrap();
            let kbek = derive_key(&kbpk, DerivedKeyUsage::Encryption).unwrap();
            let kbak = derive_key(&kbpk, DerivedKeyUsage::Authentication).unwrap();

            assert_eq!(kbek.len(), len);
            assert_eq!(kbak.len(), len);
            assert_ne!(kbek.as_slice(), kbak.as_slice());
        }
    }

    #[test]
    fn test_pad_len() {
        assert_eq!(pad_len(16), 14);
        assert_eq!(pad_len(14), 0);
        assert_eq!(pad_len(24), 6);
        assert_eq!(pad_len(32), 14);
        assert_eq!(pad_len(1), 13);
    }

    #[test]
    fn test_unwrap_known_vector() {
        let block = unwrap(&kek(), VECTOR).unwrap();

        assert_eq!(block.key_hex(), VECTOR_KEY);
        assert_eq!(block.header().mode_of_use, 'D');
        assert_eq!(block.header().declared_length(), Some(112));
    }

    #[test]
    fn test_wrap_with_known_padding_reproduces_vector() {
        let key = hex::decode(VECTOR_KEY).unwrap();
        let padding = hex::decode(VECTOR_PAD).unwrap();

        let block = wrap_with_padding(&kek(), &key, &vector_options(), &padding).unwrap();
        assert_eq!(block, VECTOR);
    }

    #[test]
    fn test_wrap_random_padding_roundtrip() {
        for key_len in [1usize, 14, 16, 24, 32] {
            let key: Vec<u8> = (0..key_len as u8).collect();
            let first = wrap(&kek(), &key, &EncodeOptions::default()).unwrap();
            let second = wrap(&kek(), &key, &EncodeOptions::default()).unwrap();

            assert_eq!(unwrap(&kek(), &first).unwrap().key(), key.as_slice());
            assert_eq!(unwrap(&kek(), &second).unwrap().key(), key.as_slice());
            if pad_len(key_len) > 0 {
                assert_ne!(first, second);
            }
        }
    }

    #[test]
    fn test_wrap_lowercase_options_match_vector() {
        let key = hex::decode(VECTOR_KEY).unwrap();
        let padding = hex::decode(VECTOR_PAD).unwrap();
        let options = EncodeOptions::default()
            .with_version_id('d')
            .with_algorithm('a')
            .with_key_usage("d0")
            .with_mode_of_use('d');

        let block = wrap_with_padding(&kek(), &key, &options, &padding).unwrap();
        assert_eq!(block, VECTOR);
    }

    #[test]
    fn test_wrap_rejects_non_standard_options() {
        let key = [0x11u8; 16];
        assert_eq!(
            wrap(&kek(), &key, &EncodeOptions::default().with_version_id('B')).unwrap_err(),
            Tr31Error::UnsupportedVersion('B')
        );
        assert_eq!(
            wrap(&kek(), &key, &EncodeOptions::default().with_algorithm('T')).unwrap_err(),
            Tr31Error::UnsupportedAlgorithm('T')
        );
        assert_eq!(
            wrap(&kek(), &[], &EncodeOptions::default()).unwrap_err(),
            Tr31Error::EmptyInput
        );
        assert!(matches!(
            wrap_with_padding(&kek(), &key, &EncodeOptions::default(), &[0u8; 3]),
            Err(Tr31Error::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_unwrap_tampered_block() {
        let mut tampered = VECTOR.to_string();
        // flip one ciphertext character
        tampered.replace_range(20..21, "0");
        assert_ne!(tampered, VECTOR);

        assert_eq!(unwrap(&kek(), &tampered).unwrap_err(), Tr31Error::TagMismatch);
    }

    #[test]
    fn test_unwrap_wrong_kek() {
        let other = KeyEncryptionKey::from_hex("0F0E0D0C0B0A09080706050403020100").unwrap();
        assert_eq!(unwrap(&other, VECTOR).unwrap_err(), Tr31Error::TagMismatch);
    }

    #[test]
    fn test_unwrap_header_checks() {
        let k = kek();
        assert_eq!(unwrap(&k, "").unwrap_err(), Tr31Error::EmptyInput);
        assert_eq!(unwrap(&k, "D0112").unwrap_err(), Tr31Error::TooShort { len: 5 });

        let legacy = format!("B{}", &VECTOR[1..]);
        assert_eq!(unwrap(&k, &legacy).unwrap_err(), Tr31Error::UnsupportedVersion('B'));

        let optional = format!("{}01{}", &VECTOR[..12], &VECTOR[14..]);
        assert_eq!(
            unwrap(&k, &optional).unwrap_err(),
            Tr31Error::UnsupportedOptionalBlocks("01".to_string())
        );

        let truncated = &VECTOR[..VECTOR.len() - 2];
        assert!(matches!(unwrap(&k, truncated), Err(Tr31Error::MalformedHeader(_))));
    }

    #[test]
    fn test_extract_key_rejects_bad_prefix() {
        let bad: [&[u8]; 4] = [&[0x00], &[0x00, 0x00, 1, 2], &[0x00, 0x09, 1, 2], &[0x00, 0x80, 1, 2]];
        for payload in bad {
            assert!(matches!(extract_key(payload), Err(Tr31Error::MalformedPayload(_))));
        }
        assert_eq!(extract_key(&[0x00, 0x10, 1, 2, 3]).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_debug_redacts_key() {
        let block = unwrap(&kek(), VECTOR).unwrap();
        let debug_str = format!("{:?}", block);

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains(VECTOR_KEY));
    }
}
