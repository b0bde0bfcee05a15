//! Key block tag computation
//!
//! Two algorithms are supported, both keyed with the [`CipherSpec`] key
//! material so the tag is bound to the same cipher as the payload:
//!
//! - [`MacAlgorithm::LegacyCbcMac`]: CBC with a zero IV over the
//!   method-2-padded message, keeping the trailing `tag_len` bytes of the
//!   output. There is no CMAC subkey step, so this is not the MAC the TR-31
//!   standard defines. It is the default because existing blocks use it.
//! - [`MacAlgorithm::Cmac`]: NIST SP 800-38B CMAC, truncated to the leftmost
//!   `tag_len` bytes.
//!
//! ## Usage Pattern
//!
//! 1. Encrypt the padded key
//! 2. Compute the tag over `header || ciphertext`
//! 3. Append the tag
//!
//! On read, recompute and compare with [`verify_tag`] before trusting the split.

use crate::cipher::{BlockPrimitive, CipherSpec};
use crate::error::{Result, Tr31Error};
use crate::kek::AesVariant;
use crate::padding::pad;
use aes::{Aes128, Aes192, Aes256};
use cipher::KeyInit;
use cmac::{Cmac, Mac};
use des::TdesEde3;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

/// Tag lengths accepted for new key blocks, in bytes
pub const TAG_LENGTHS: [usize; 3] = [4, 8, 16];

/// Tag algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MacAlgorithm {
    /// Plain CBC-MAC, trailing bytes kept
    #[default]
    LegacyCbcMac,

    /// SP 800-38B CMAC, leftmost bytes kept
    Cmac,
}

impl MacAlgorithm {
    /// Name for logging
    pub fn name(self) -> &'static str {
        match self {
            MacAlgorithm::LegacyCbcMac => "cbc-mac",
            MacAlgorithm::Cmac => "cmac",
        }
    }
}

/// Check `tag_len` is one of 4, 8 or 16
pub fn validate_tag_length(tag_len: usize) -> Result<()> {
    if TAG_LENGTHS.contains(&tag_len) {
        Ok(())
    } else {
        Err(Tr31Error::InvalidTagLength(tag_len))
    }
}

/// Compute a `tag_len`-byte tag over `message`
///
/// # Arguments
/// * `message` - Authenticated bytes, normally `header || ciphertext`
/// * `spec` - Cipher whose key material keys the MAC
/// * `tag_len` - Tag length in bytes
/// * `algorithm` - Legacy CBC-MAC or CMAC
///
/// # Returns
/// The truncated tag: trailing bytes for CBC-MAC, leftmost bytes for CMAC
///
/// # Errors
///
/// `InvalidTagLength` if `tag_len` is not 4, 8 or 16, or if CMAC is asked
/// for more bytes than the cipher block holds.
pub fn compute_tag(
    message: &[u8],
    spec: &CipherSpec,
    tag_len: usize,
    algorithm: MacAlgorithm,
) -> Result<Vec<u8>> {
    validate_tag_length(tag_len)?;

    match algorithm {
        MacAlgorithm::LegacyCbcMac => cbc_mac(message, spec, tag_len),
        MacAlgorithm::Cmac => cmac(message, spec, tag_len),
    }
}

/// Recompute the tag and compare it with `tag` in constant time
///
/// # Arguments
/// * `message` - Authenticated bytes, normally `header || ciphertext`
/// * `spec` - Cipher whose key material keys the MAC
/// * `tag` - Stored tag; its length selects the truncation
/// * `algorithm` - Legacy CBC-MAC or CMAC
///
/// # Returns
/// `Ok(())` when the tags match, `TagMismatch` otherwise. Errors from
/// [`compute_tag`] are passed through.
pub fn verify_tag(
    message: &[u8],
    spec: &CipherSpec,
    tag: &[u8],
    algorithm: MacAlgorithm,
) -> Result<()> {
    let computed = compute_tag(message, spec, tag.len(), algorithm)?;

    if constant_time_eq(&computed, tag) {
        Ok(())
    } else {
        Err(Tr31Error::TagMismatch)
    }
}

fn cbc_mac(message: &[u8], spec: &CipherSpec, tag_len: usize) -> Result<Vec<u8>> {
    let padded = pad(message, spec.block_size());
    let output = spec.cbc_encrypt(&padded)?;

    // With 8-byte blocks a 16-byte tag spans the last two output blocks.
    if output.len() < tag_len {
        return Err(Tr31Error::InvalidTagLength(tag_len));
    }
    Ok(output[output.len() - tag_len..].to_vec())
}

fn cmac(message: &[u8], spec: &CipherSpec, tag_len: usize) -> Result<Vec<u8>> {
    if tag_len > spec.block_size() {
        return Err(Tr31Error::InvalidTagLength(tag_len));
    }

    let key = spec.key_material();
    let mut full = match spec.primitive() {
        BlockPrimitive::Aes(AesVariant::Aes128) => cmac_with::<Cmac<Aes128>>(key, message)?,
        BlockPrimitive::Aes(AesVariant::Aes192) => cmac_with::<Cmac<Aes192>>(key, message)?,
        BlockPrimitive::Aes(AesVariant::Aes256) => cmac_with::<Cmac<Aes256>>(key, message)?,
        BlockPrimitive::TdesEde3 => cmac_with::<Cmac<TdesEde3>>(key, message)?,
    };
    full.truncate(tag_len);
    Ok(full)
}

/// Full-width CMAC of `message` under `key`
pub(crate) fn cmac_with<M>(key: &[u8], message: &[u8]) -> Result<Vec<u8>>
where
    M: Mac + KeyInit,
{
    let mut mac = <M as Mac>::new_from_slice(key)?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    bool::from(a.ct_eq(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kek::KeyEncryptionKey;

    const KEK_16: &str = "000102030405060708090A0B0C0D0E0F";

    fn spec(kek_hex: &str, algorithm: char, version_id: char) -> CipherSpec {
        let kek = KeyEncryptionKey::from_hex(kek_hex).unwrap();
        CipherSpec::select(&kek, algorithm, version_id).unwrap()
    }

    #[test]
    fn test_validate_tag_length() {
        for len in TAG_LENGTHS {
            assert!(validate_tag_length(len).is_ok());
        }
        for len in [0usize, 1, 3, 5, 6, 7, 12, 20, 32] {
            assert_eq!(validate_tag_length(len), Err(Tr31Error::InvalidTagLength(len)));
        }
    }

    #[test]
    fn test_legacy_tag_is_tail_of_cbc_output() {
        let s = spec(KEK_16, 'A', 'D');
        let message = b"D0064D0AE00E0000 some ciphertext";

        let full = s.cbc_encrypt(&pad(message, 16)).unwrap();
        for len in TAG_LENGTHS {
            let tag = compute_tag(message, &s, len, MacAlgorithm::LegacyCbcMac).unwrap();
            assert_eq!(tag.len(), len);
            assert_eq!(tag.as_slice(), &full[full.len() - len..]);
        }
    }

    #[test]
    fn test_legacy_tag_ignores_chaining_mode() {
        let message = b"header and ciphertext";
        let cbc = compute_tag(message, &spec(KEK_16, 'T', 'D'), 8, MacAlgorithm::LegacyCbcMac);
        let ecb = compute_tag(message, &spec(KEK_16, 'T', 'B'), 8, MacAlgorithm::LegacyCbcMac);
        assert_eq!(cbc.unwrap(), ecb.unwrap());
    }

    #[test]
    fn test_legacy_tdes_sixteen_byte_tag() {
        let s = spec(KEK_16, 'T', 'B');
        let tag = compute_tag(&[0x11; 24], &s, 16, MacAlgorithm::LegacyCbcMac).unwrap();
        assert_eq!(tag.len(), 16);
    }

    #[test]
    fn test_cmac_rfc4493_vectors() {
        let s = spec("2B7E151628AED2A6ABF7158809CF4F3C", 'A', 'D');

        let empty = compute_tag(&[], &s, 16, MacAlgorithm::Cmac).unwrap();
        assert_eq!(hex::encode(empty), "bb1d6929e95937287fa37d129b756746");

        let block = hex::decode("6BC1BEE22E409F96E93D7E117393172A").unwrap();
        let tag = compute_tag(&block, &s, 16, MacAlgorithm::Cmac).unwrap();
        assert_eq!(hex::encode(tag), "070a16b46b4d4144f79bdd9dd04a287c");

        let short = compute_tag(&block, &s, 4, MacAlgorithm::Cmac).unwrap();
        assert_eq!(hex::encode(short), "070a16b4");
    }

    #[test]
    fn test_cmac_tdes_sp800_38b_vector() {
        let s = spec("8AA83BF8CBDA10620BC1BF19FBB6CD58BC313D4A371CA8B5", 'T', 'D');
        let tag = compute_tag(&[], &s, 8, MacAlgorithm::Cmac).unwrap();
        assert_eq!(hex::encode(tag), "b7a688e122ffaf95");
    }

    #[test]
    fn test_cmac_rejects_tag_wider_than_block() {
        let s = spec(KEK_16, 'T', 'D');
        let err = compute_tag(b"message", &s, 16, MacAlgorithm::Cmac).unwrap_err();
        assert_eq!(err, Tr31Error::InvalidTagLength(16));
    }

    #[test]
    fn test_algorithms_differ() {
        let s = spec(KEK_16, 'A', 'D');
        let message = b"same message, different algorithm";
        let legacy = compute_tag(message, &s, 8, MacAlgorithm::LegacyCbcMac).unwrap();
        let cmac = compute_tag(message, &s, 8, MacAlgorithm::Cmac).unwrap();
        assert_ne!(legacy, cmac);
    }

    #[test]
    fn test_verify_tag() {
        let s = spec(KEK_16, 'A', 'D');
        let message = b"authenticated header and ciphertext";

        for algorithm in [MacAlgorithm::LegacyCbcMac, MacAlgorithm::Cmac] {
            let tag = compute_tag(message, &s, 8, algorithm).unwrap();
            assert!(verify_tag(message, &s, &tag, algorithm).is_ok());

            let mut tampered = message.to_vec();
            tampered[0] ^= 1;
            assert_eq!(verify_tag(&tampered, &s, &tag, algorithm), Err(Tr31Error::TagMismatch));
        }
    }

    #[test]
    fn test_verify_tag_wrong_key() {
        let message = b"authenticated header and ciphertext";
        let tag = compute_tag(message, &spec(KEK_16, 'A', 'D'), 8, MacAlgorithm::Cmac).unwrap();

        let other = spec("0F0E0D0C0B0A09080706050403020100", 'A', 'D');
        assert_eq!(
            verify_tag(message, &other, &tag, MacAlgorithm::Cmac),
            Err(Tr31Error::TagMismatch)
        );
    }

    #[test]
    fn test_verify_tag_rejects_odd_length() {
        let s = spec(KEK_16, 'A', 'D');
        assert_eq!(
            verify_tag(b"msg", &s, &[0u8; 6], MacAlgorithm::LegacyCbcMac),
            Err(Tr31Error::InvalidTagLength(6))
        );
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(&[1, 2, 3], &[1, 2, 3]));
        assert!(!constant_time_eq(&[1, 2, 3], &[1, 2, 4]));
        assert!(!constant_time_eq(&[1, 2, 3], &[1, 2]));
    }
}
