//! Key block encode / decode
//!
//! A [`KeyBlockCodec`] owns one KEK for its lifetime and is otherwise
//! stateless: every call resolves a fresh [`CipherSpec`] from the header and
//! allocates its own buffers, so one codec can be shared across threads.
//!
//! ## Wire Format
//!
//! ```text
//! header (16 ASCII) || HEX(ciphertext) || HEX(tag)
//! ```
//!
//! The tag length is not recorded anywhere in the block. `decode` recovers it
//! by trying candidate lengths in the order `[4, 8, 16, 6]`, see
//! [`SplitStrategy`].

use crate::cipher::CipherSpec;
use crate::error::{Result, Tr31Error};
use crate::header::{Header, HEADER_LEN};
use crate::kek::KeyEncryptionKey;
use crate::mac::{compute_tag, validate_tag_length, verify_tag, MacAlgorithm};
use crate::options::{EncodeOptions, SplitStrategy};
use crate::padding::{pad, unpad};
use crate::x9143::{self, StandardKeyBlock};
use serde::{Serialize, Serializer};
use tracing::{debug, instrument, warn};
use zeroize::{Zeroize, Zeroizing};

/// Tag lengths tried by `decode`, in priority order
///
/// 6 is not a valid length for new blocks but is kept as a last resort for
/// blocks written by older producers.
pub const CANDIDATE_TAG_LENGTHS: [usize; 4] = [4, 8, 16, 6];

/// Key block codec bound to a single KEK
#[derive(Debug, Clone)]
pub struct KeyBlockCodec {
    kek: KeyEncryptionKey,
    mac: MacAlgorithm,
    split: SplitStrategy,
}

/// Result of [`KeyBlockCodec::decode`]
///
/// `decrypted_data` is still padded; use [`DecodedKeyBlock::key`] or
/// [`crate::padding::unpad`] for the key bytes. Serializes to JSON as
/// `{ header, rawEncryptedData, decryptedData, decryptedDataAscii, tag }`
/// with upper-case hex.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedKeyBlock {
    header: Header,
    #[serde(serialize_with = "serialize_upper_hex")]
    raw_encrypted_data: Vec<u8>,
    #[serde(serialize_with = "serialize_upper_hex")]
    decrypted_data: Vec<u8>,
    decrypted_data_ascii: String,
    #[serde(serialize_with = "serialize_upper_hex")]
    tag: Vec<u8>,
}

struct Split<'a> {
    ciphertext: &'a [u8],
    tag: &'a [u8],
    plaintext: Vec<u8>,
}

impl KeyBlockCodec {
    /// Create a codec from a hex-encoded KEK
    ///
    /// # Errors
    /// `MissingKek` for an empty string, `InvalidHex` or `InvalidKekLength`
    /// when it does not decode to 16, 24 or 32 bytes.
    pub fn new(kek_hex: &str) -> Result<Self> {
        Ok(Self::from_kek(KeyEncryptionKey::from_hex(kek_hex)?))
    }

    pub fn from_kek(kek: KeyEncryptionKey) -> Self {
        Self {
            kek,
            mac: MacAlgorithm::default(),
            split: SplitStrategy::default(),
        }
    }

    /// Create a codec from the `TR31_KEK` environment variable
    pub fn from_env() -> Result<Self> {
        Ok(Self::from_kek(KeyEncryptionKey::from_env()?))
    }

    pub fn with_mac_algorithm(mut self, mac: MacAlgorithm) -> Self {
        self.mac = mac;
        self
    }

    pub fn with_split_strategy(mut self, split: SplitStrategy) -> Self {
        self.split = split;
        self
    }

    pub fn mac_algorithm(&self) -> MacAlgorithm {
        self.mac
    }

    pub fn split_strategy(&self) -> SplitStrategy {
        self.split
    }

    /// Wrap a hex-encoded key
    ///
    /// # Arguments
    /// * `key_hex` - Key to wrap, hex (either case)
    /// * `options` - Header fields and tag length
    ///
    /// # Returns
    /// The upper-case key block string. See [`KeyBlockCodec::encode_bytes`]
    /// for the error cases; `InvalidHex` is added for a bad `key_hex`.
    pub fn encode(&self, key_hex: &str, options: &EncodeOptions) -> Result<String> {
        if key_hex.is_empty() {
            return Err(Tr31Error::EmptyInput);
        }
        let key = Zeroizing::new(hex::decode(key_hex)?);
        self.encode_bytes(&key, options)
    }

    /// Wrap raw key bytes
    ///
    /// The key is padded to the cipher block size, encrypted, and
    /// authenticated together with the header. Header fields are upper-cased
    /// before the cipher is selected, so `version_id = 'd'` encrypts in CBC
    /// exactly as the emitted `'D'` header says.
    ///
    /// # Arguments
    /// * `key` - Key bytes to wrap
    /// * `options` - Header fields and tag length
    ///
    /// # Returns
    /// `header || HEX(ciphertext) || HEX(tag)`, upper-case
    ///
    /// # Errors
    /// `EmptyInput`, `InvalidTagLength`, `UnsupportedAlgorithm`,
    /// `MalformedHeader` for option fields of the wrong width, and
    /// `LengthOverflow` when the block would exceed 9999 characters.
    #[instrument(
        skip_all,
        fields(
            algorithm = %options.algorithm,
            version_id = %options.version_id,
            tag_length = options.tag_length,
            mac = self.mac.name(),
        )
    )]
    pub fn encode_bytes(&self, key: &[u8], options: &EncodeOptions) -> Result<String> {
        if key.is_empty() {
            return Err(Tr31Error::EmptyInput);
        }
        validate_tag_length(options.tag_length)?;

        let options = options.to_ascii_uppercase();
        let spec = CipherSpec::select(&self.kek, options.algorithm, options.version_id)?;
        if self.mac == MacAlgorithm::Cmac && options.tag_length > spec.block_size() {
            return Err(Tr31Error::InvalidTagLength(options.tag_length));
        }

        let padded = Zeroizing::new(pad(key, spec.block_size()));
        let ciphertext = spec.encrypt(&padded)?;

        let total_len = HEADER_LEN + 2 * ciphertext.len() + 2 * options.tag_length;
        let header = Header::for_key_block(&options, total_len)?.build()?;

        let mut message = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        message.extend_from_slice(header.as_bytes());
        message.extend_from_slice(&ciphertext);
        let tag = compute_tag(&message, &spec, options.tag_length, self.mac)?;

        debug!(
            cipher = spec.primitive().name(),
            length = total_len,
            "encoded key block"
        );

        Ok(format!(
            "{header}{}{}",
            hex::encode_upper(&ciphertext),
            hex::encode_upper(&tag)
        ))
    }

    /// Unwrap a key block
    ///
    /// # Arguments
    /// * `key_block` - Key block string as produced by [`KeyBlockCodec::encode`]
    ///
    /// # Returns
    /// The parsed header, ciphertext, tag and still-padded plaintext.
    ///
    /// With [`SplitStrategy::Authenticated`] (the default) a split is only
    /// accepted when the recomputed tag matches. With
    /// [`SplitStrategy::Structural`] the first block-aligned split wins and
    /// a wrong KEK produces garbage instead of an error.
    ///
    /// # Errors
    /// `EmptyInput`, `TooShort`, `MalformedHeader`, `InvalidHex`,
    /// `UnsupportedAlgorithm`, `UndeterminedTagLength` when no candidate is
    /// block-aligned, and `TagMismatch` when none authenticates.
    #[instrument(skip_all, fields(len = key_block.len(), split = ?self.split, mac = self.mac.name()))]
    pub fn decode(&self, key_block: &str) -> Result<DecodedKeyBlock> {
        if key_block.is_empty() {
            return Err(Tr31Error::EmptyInput);
        }
        let char_len = key_block.chars().count();
        if char_len < HEADER_LEN {
            return Err(Tr31Error::TooShort { len: char_len });
        }

        let header = Header::parse(key_block)?;
        let header_text = &key_block[..HEADER_LEN];
        let remaining = hex::decode(&key_block[HEADER_LEN..])?;

        if header.declared_length() != Some(key_block.len()) {
            warn!(
                declared = %header.length,
                actual = key_block.len(),
                "header length does not match key block length"
            );
        }
        if header.has_optional_blocks() {
            warn!(
                count = %header.optional_blocks,
                "optional blocks are not processed"
            );
        }

        let spec = CipherSpec::select(&self.kek, header.algorithm, header.version_id)?;
        let split = match self.split {
            SplitStrategy::Authenticated => {
                self.split_authenticated(&spec, header_text.as_bytes(), &remaining)?
            }
            SplitStrategy::Structural => split_structural(&spec, &remaining)?,
        };

        debug!(
            cipher = spec.primitive().name(),
            tag_length = split.tag.len(),
            "decoded key block"
        );

        Ok(DecodedKeyBlock {
            header,
            raw_encrypted_data: split.ciphertext.to_vec(),
            decrypted_data_ascii: readable_ascii(&split.plaintext),
            decrypted_data: split.plaintext,
            tag: split.tag.to_vec(),
        })
    }

    /// Wrap a key in the standard X9.143 version-D layout
    ///
    /// Requires `version_id = 'D'` and `algorithm = 'A'`. `tag_length` is
    /// ignored; the tag is always a full 16-byte CMAC.
    pub fn encode_standard(&self, key_hex: &str, options: &EncodeOptions) -> Result<String> {
        if key_hex.is_empty() {
            return Err(Tr31Error::EmptyInput);
        }
        let key = Zeroizing::new(hex::decode(key_hex)?);
        x9143::wrap(&self.kek, &key, options)
    }

    /// Verify and unwrap a standard X9.143 version-D key block
    pub fn decode_standard(&self, key_block: &str) -> Result<StandardKeyBlock> {
        x9143::unwrap(&self.kek, key_block)
    }

    fn mac_supports(&self, spec: &CipherSpec, tag_len: usize) -> bool {
        if validate_tag_length(tag_len).is_err() {
            return false;
        }
        !(self.mac == MacAlgorithm::Cmac && tag_len > spec.block_size())
    }

    fn split_authenticated<'a>(
        &self,
        spec: &CipherSpec,
        header: &[u8],
        remaining: &'a [u8],
    ) -> Result<Split<'a>> {
        let mut aligned = false;
        let mut last_error = None;

        for tag_len in CANDIDATE_TAG_LENGTHS {
            if !self.mac_supports(spec, tag_len) {
                debug!(tag_len, "skipping tag length the MAC cannot produce");
                continue;
            }
            let Some((ciphertext, tag)) = aligned_split(spec, remaining, tag_len) else {
                continue;
            };
            aligned = true;

            let mut message = Vec::with_capacity(header.len() + ciphertext.len());
            message.extend_from_slice(header);
            message.extend_from_slice(ciphertext);

            match verify_tag(&message, spec, tag, self.mac) {
                Ok(()) => {
                    debug!(tag_len, "tag verified");
                    let plaintext = spec.decrypt(ciphertext)?;
                    return Ok(Split {
                        ciphertext,
                        tag,
                        plaintext,
                    });
                }
                Err(Tr31Error::TagMismatch) => {
                    debug!(tag_len, "tag mismatch, trying next length");
                }
                Err(err) => {
                    debug!(tag_len, error = %err, "tag computation failed");
                    last_error = Some(err.to_string());
                }
            }
        }

        if aligned {
            Err(Tr31Error::TagMismatch)
        } else {
            Err(Tr31Error::UndeterminedTagLength { last_error })
        }
    }
}

fn split_structural<'a>(spec: &CipherSpec, remaining: &'a [u8]) -> Result<Split<'a>> {
    let mut last_error = None;

    for tag_len in CANDIDATE_TAG_LENGTHS {
        let Some((ciphertext, tag)) = aligned_split(spec, remaining, tag_len) else {
            continue;
        };

        match spec.decrypt(ciphertext) {
            Ok(plaintext) => {
                debug!(tag_len, "accepted block-aligned split without tag check");
                return Ok(Split {
                    ciphertext,
                    tag,
                    plaintext,
                });
            }
            Err(err) => {
                debug!(tag_len, error = %err, "candidate failed to decrypt");
                last_error = Some(err.to_string());
            }
        }
    }

    Err(Tr31Error::UndeterminedTagLength { last_error })
}

/// `(ciphertext, tag)` if `tag_len` leaves a non-empty block-aligned ciphertext
fn aligned_split<'a>(
    spec: &CipherSpec,
    remaining: &'a [u8],
    tag_len: usize,
) -> Option<(&'a [u8], &'a [u8])> {
    let cipher_len = remaining.len().checked_sub(tag_len).filter(|&len| len > 0);
    match cipher_len {
        Some(len) if len % spec.block_size() == 0 => Some(remaining.split_at(len)),
        Some(len) => {
            debug!(tag_len, cipher_len = len, "candidate not block-aligned");
            None
        }
        None => {
            debug!(tag_len, "candidate leaves no ciphertext");
            None
        }
    }
}

impl DecodedKeyBlock {
    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn raw_encrypted_data(&self) -> &[u8] {
        &self.raw_encrypted_data
    }

    /// Decrypted payload, padding included
    pub fn decrypted_data(&self) -> &[u8] {
        &self.decrypted_data
    }

    /// Decrypted payload as printable ASCII, other bytes shown as `.`
    pub fn decrypted_data_ascii(&self) -> &str {
        &self.decrypted_data_ascii
    }

    pub fn tag(&self) -> &[u8] {
        &self.tag
    }

    pub fn tag_length(&self) -> usize {
        self.tag.len()
    }

    /// Decrypted payload with padding removed
    pub fn key(&self) -> &[u8] {
        unpad(&self.decrypted_data)
    }

    pub fn raw_encrypted_data_hex(&self) -> String {
        hex::encode_upper(&self.raw_encrypted_data)
    }

    pub fn decrypted_data_hex(&self) -> String {
        hex::encode_upper(&self.decrypted_data)
    }

    pub fn tag_hex(&self) -> String {
        hex::encode_upper(&self.tag)
    }

    pub fn key_hex(&self) -> String {
        hex::encode_upper(self.key())
    }
}

impl std::fmt::Debug for DecodedKeyBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedKeyBlock")
            .field("header", &self.header)
            .field("raw_encrypted_data", &self.raw_encrypted_data_hex())
            .field("decrypted_data", &"[REDACTED]")
            .field("decrypted_data_ascii", &"[REDACTED]")
            .field("tag", &self.tag_hex())
            .finish()
    }
}

impl Drop for DecodedKeyBlock {
    fn drop(&mut self) {
        self.decrypted_data.zeroize();
        self.decrypted_data_ascii.zeroize();
    }
}

/// Printable ASCII (0x20..=0x7E) kept, everything else replaced by `.`
fn readable_ascii(data: &[u8]) -> String {
    data.iter()
        .map(|&b| if (0x20..0x7F).contains(&b) { char::from(b) } else { '.' })
        .collect()
}

pub(crate) fn serialize_upper_hex<S: Serializer>(
    bytes: &[u8],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode_upper(bytes))
}
