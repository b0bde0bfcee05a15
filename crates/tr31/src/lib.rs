//! # TR-31 Key Block Codec
//!
//! Wraps and unwraps symmetric keys in TR-31 style key blocks under a
//! key encryption key (KEK).
//!
//! ## Features
//!
//! - **AES and TDES**: AES-128/192/256 by KEK length, TDES EDE3 with
//!   two-key expansion for 16-byte KEKs
//! - **CBC / ECB**: selected by the header version id (`'D'` / `'B'`)
//! - **Legacy CBC-MAC or CMAC tags**: 4, 8 or 16 bytes
//! - **Authenticated decode**: the ciphertext/tag split is only accepted
//!   when the recomputed tag matches
//! - **X9.143 version D**: standard AES key blocks with CMAC-derived session
//!   keys, for interchange with HSM-generated blocks
//!
//! ## Usage Example
//!
//! ```rust
//! use tr31::{EncodeOptions, KeyBlockCodec};
//!
//! let codec = KeyBlockCodec::new("000102030405060708090A0B0C0D0E0F")?;
//!
//! let options = EncodeOptions::default().with_algorithm('T').with_version_id('B');
//! let block = codec.encode("0123456789ABCDEF", &options)?;
//!
//! let decoded = codec.decode(&block)?;
//! assert_eq!(decoded.key_hex(), "0123456789ABCDEF");
//! # Ok::<(), tr31::Tr31Error>(())
//! ```
//!
//! ## Security Considerations
//!
//! - **Zero IVs**: legacy blocks use a fixed all-zero CBC IV; integrity
//!   rests on the tag
//! - **Legacy MAC**: the default tag is plain CBC-MAC without CMAC subkeys,
//!   kept for byte compatibility with existing blocks. Prefer
//!   [`MacAlgorithm::Cmac`] or the X9.143 profile for new deployments
//! - **Structural decode**: [`SplitStrategy::Structural`] skips tag
//!   verification and returns garbage for a wrong KEK instead of failing
//! - **Key hygiene**: KEKs and decrypted payloads are zeroized on drop and
//!   never logged
//!
//! ## Layout
//!
//! ```text
//! codec (KeyBlockCodec)
//!     ↓ (uses)
//! header, padding, cipher (CipherSpec), mac
//!     ↓ (keyed by)
//! kek (KeyEncryptionKey)
//! ```

// Module declarations
pub mod cipher;
pub mod codec;
pub mod error;
pub mod header;
pub mod kek;
pub mod mac;
pub mod options;
pub mod padding;
pub mod x9143;

// Re-exports for convenience
pub use cipher::{BlockPrimitive, ChainingMode, CipherSpec};
pub use codec::{DecodedKeyBlock, KeyBlockCodec, CANDIDATE_TAG_LENGTHS};
pub use error::{Result, Tr31Error};
pub use header::{Header, HEADER_LEN, MAX_BLOCK_LEN};
pub use kek::{AesVariant, KeyEncryptionKey, KEK_ENV_VAR};
pub use mac::{compute_tag, verify_tag, MacAlgorithm, TAG_LENGTHS};
pub use options::{EncodeOptions, SplitStrategy};
pub use padding::{pad, unpad};
pub use x9143::StandardKeyBlock;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default tag length for new key blocks, in bytes
pub const DEFAULT_TAG_LENGTH: usize = 8;
