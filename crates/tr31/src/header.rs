//! Fixed-width key block header
//!
//! ```text
//! offset  width  field
//! 0       1      version id          ('D' = CBC, 'B' = ECB)
//! 1       4      length              total key block characters, decimal
//! 5       2      key usage
//! 7       1      algorithm           ('A' = AES, 'T' = TDES)
//! 8       1      mode of use
//! 9       2      key version
//! 11      1      exportability
//! 12      2      optional block count
//! 14      2      reserved
//! ```
//!
//! Parsing only checks shape. Unknown algorithm or version codes are passed
//! through and rejected later by cipher selection.

use crate::error::{Result, Tr31Error};
use crate::options::EncodeOptions;
use serde::{Deserialize, Serialize};

/// Header length in characters
pub const HEADER_LEN: usize = 16;

/// Largest value the 4-digit length field can carry
pub const MAX_BLOCK_LEN: usize = 9999;

/// Parsed or to-be-built key block header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    pub version_id: char,
    pub length: String,
    pub key_usage: String,
    pub algorithm: char,
    pub mode_of_use: char,
    pub key_version: String,
    pub exportability: char,
    pub optional_blocks: String,
    pub reserved: String,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            version_id: 'D',
            length: "0000".to_string(),
            key_usage: "D0".to_string(),
            algorithm: 'A',
            mode_of_use: 'E',
            key_version: "00".to_string(),
            exportability: 'E',
            optional_blocks: "00".to_string(),
            reserved: "00".to_string(),
        }
    }
}

impl Header {
    /// Header for a new key block of `total_len` characters
    ///
    /// Optional blocks are never emitted, so the count is pinned to `"00"`.
    pub fn for_key_block(options: &EncodeOptions, total_len: usize) -> Result<Self> {
        Ok(Self {
            version_id: options.version_id,
            length: format_length(total_len)?,
            key_usage: options.key_usage.clone(),
            algorithm: options.algorithm,
            mode_of_use: options.mode_of_use,
            key_version: options.key_version.clone(),
            exportability: options.exportability,
            optional_blocks: "00".to_string(),
            reserved: "00".to_string(),
        })
    }

    /// Serialize to the 16-character wire form
    ///
    /// Every field must be ASCII and exactly its fixed width.
    pub fn build(&self) -> Result<String> {
        let mut out = String::with_capacity(HEADER_LEN);

        push_field(&mut out, "version id", &self.version_id.to_string(), 1)?;
        push_field(&mut out, "length", &self.length, 4)?;
        push_field(&mut out, "key usage", &self.key_usage, 2)?;
        push_field(&mut out, "algorithm", &self.algorithm.to_string(), 1)?;
        push_field(&mut out, "mode of use", &self.mode_of_use.to_string(), 1)?;
        push_field(&mut out, "key version", &self.key_version, 2)?;
        push_field(&mut out, "exportability", &self.exportability.to_string(), 1)?;
        push_field(&mut out, "optional blocks", &self.optional_blocks, 2)?;
        push_field(&mut out, "reserved", &self.reserved, 2)?;

        debug_assert_eq!(out.len(), HEADER_LEN);
        Ok(out)
    }

    /// Parse the first 16 characters of `input`
    ///
    /// Anything past the header is ignored.
    pub fn parse(input: &str) -> Result<Self> {
        let raw = input.as_bytes();
        if raw.len() < HEADER_LEN {
            return Err(Tr31Error::MalformedHeader(format!(
                "expected {HEADER_LEN} characters, got {}",
                input.chars().count()
            )));
        }

        let raw = &raw[..HEADER_LEN];
        if !raw.is_ascii() {
            return Err(Tr31Error::MalformedHeader(
                "header contains non-ASCII characters".to_string(),
            ));
        }

        // All ASCII, so byte offsets are char offsets.
        let text = &input[..HEADER_LEN];
        let at = |i: usize| char::from(raw[i]);

        Ok(Self {
            version_id: at(0),
            length: text[1..5].to_string(),
            key_usage: text[5..7].to_string(),
            algorithm: at(7),
            mode_of_use: at(8),
            key_version: text[9..11].to_string(),
            exportability: at(11),
            optional_blocks: text[12..14].to_string(),
            reserved: text[14..16].to_string(),
        })
    }

    /// Length field as a number, if it is one
    pub fn declared_length(&self) -> Option<usize> {
        if self.length.bytes().all(|b| b.is_ascii_digit()) {
            self.length.parse().ok()
        } else {
            None
        }
    }

    /// Whether the header announces optional blocks
    pub fn has_optional_blocks(&self) -> bool {
        self.optional_blocks != "00"
    }
}

fn format_length(total_len: usize) -> Result<String> {
    if total_len > MAX_BLOCK_LEN {
        return Err(Tr31Error::LengthOverflow(total_len));
    }
    Ok(format!("{total_len:04}"))
}

fn push_field(out: &mut String, name: &str, value: &str, width: usize) -> Result<()> {
    if !value.is_ascii() || value.len() != width {
        return Err(Tr31Error::MalformedHeader(format!(
            "{name} must be {width} ASCII character(s), got {value:?}"
        )));
    }
    out.push_str(value);
    Ok(())
}
