use thiserror::Error;

/// Key block errors
///
/// Messages describe what was wrong with the input without echoing key
/// material, so they are safe to surface in logs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Tr31Error {
    /// Key encryption key errors
    #[error("Key encryption key is required")]
    MissingKek,

    #[error("Invalid KEK length: expected 16, 24 or 32 bytes, got {actual}")]
    InvalidKekLength { actual: usize },

    /// Input errors
    #[error("Input is empty")]
    EmptyInput,

    #[error("Key block too short: {len} characters, header alone needs 16")]
    TooShort { len: usize },

    #[error("Invalid hex: {0}")]
    InvalidHex(String),

    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    #[error("Key block length {0} does not fit the 4-digit header field")]
    LengthOverflow(usize),

    /// Algorithm selection errors
    #[error("Unsupported algorithm: {0:?}")]
    UnsupportedAlgorithm(char),

    #[error("Unsupported key block version: {0:?}")]
    UnsupportedVersion(char),

    #[error("Optional blocks are not supported (count {0})")]
    UnsupportedOptionalBlocks(String),

    /// Cipher errors
    #[error("Data length {len} is not a multiple of the {block_size}-byte block size")]
    BlockMisaligned { len: usize, block_size: usize },

    #[error("Cipher error: {0}")]
    CipherFailure(String),

    /// Authentication errors
    #[error("Invalid tag length: {0} (expected 4, 8 or 16)")]
    InvalidTagLength(usize),

    #[error("Could not determine tag length{}", .last_error.as_ref().map(|e| format!(": {e}")).unwrap_or_default())]
    UndeterminedTagLength { last_error: Option<String> },

    #[error("Integrity verification failed: tag mismatch")]
    TagMismatch,

    #[error("Malformed key payload: {0}")]
    MalformedPayload(String),
}

/// Result type alias for key block operations
pub type Result<T> = std::result::Result<T, Tr31Error>;

impl From<hex::FromHexError> for Tr31Error {
    fn from(err: hex::FromHexError) -> Self {
        Tr31Error::InvalidHex(err.to_string())
    }
}

impl From<cipher::InvalidLength> for Tr31Error {
    fn from(err: cipher::InvalidLength) -> Self {
        Tr31Error::CipherFailure(err.to_string())
    }
}
