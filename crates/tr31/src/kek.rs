//! Key Encryption Key
//!
//! The KEK is validated once at construction and then only read. Its length
//! picks the AES variant and drives the TDES keying option.
//!
//! ## Security Model
//!
//! - Bytes are zeroized on drop
//! - `Debug` output is redacted
//! - Derived TDES keys are handed out in `Zeroizing` buffers

use crate::error::{Result, Tr31Error};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Accepted KEK lengths in bytes
pub const KEK_LENGTHS: [usize; 3] = [16, 24, 32];

/// Environment variable consulted by [`KeyEncryptionKey::from_env`]
pub const KEK_ENV_VAR: &str = "TR31_KEK";

/// Three-key TDES key length
pub const TDES_KEY_SIZE: usize = 24;

/// AES key size selected by the KEK length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AesVariant {
    Aes128,
    Aes192,
    Aes256,
}

impl AesVariant {
    pub fn key_bits(self) -> u16 {
        match self {
            AesVariant::Aes128 => 128,
            AesVariant::Aes192 => 192,
            AesVariant::Aes256 => 256,
        }
    }
}

/// Immutable 16, 24 or 32 byte key encryption key
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyEncryptionKey {
    bytes: Vec<u8>,
}

impl KeyEncryptionKey {
    /// Create from raw bytes
    ///
    /// # Errors
    /// `MissingKek` for an empty slice, `InvalidKekLength` for any length
    /// other than 16, 24 or 32.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Tr31Error::MissingKek);
        }
        if !KEK_LENGTHS.contains(&bytes.len()) {
            return Err(Tr31Error::InvalidKekLength {
                actual: bytes.len(),
            });
        }

        Ok(Self {
            bytes: bytes.to_vec(),
        })
    }

    /// Create from a hex string
    pub fn from_hex(kek_hex: &str) -> Result<Self> {
        let kek_hex = kek_hex.trim();
        if kek_hex.is_empty() {
            return Err(Tr31Error::MissingKek);
        }

        let bytes = Zeroizing::new(hex::decode(kek_hex)?);
        Self::from_bytes(&bytes)
    }

    /// Create from the `TR31_KEK` environment variable (hex-encoded)
    ///
    /// # Errors
    /// `MissingKek` when the variable is unset or empty, otherwise the same
    /// errors as [`KeyEncryptionKey::from_hex`].
    pub fn from_env() -> Result<Self> {
        let hex_key =
            Zeroizing::new(std::env::var(KEK_ENV_VAR).map_err(|_| Tr31Error::MissingKek)?);
        Self::from_hex(hex_key.as_str())
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false; an empty KEK cannot be constructed
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn aes_variant(&self) -> AesVariant {
        match self.bytes.len() {
            16 => AesVariant::Aes128,
            24 => AesVariant::Aes192,
            _ => AesVariant::Aes256,
        }
    }

    /// Three-key TDES key derived from the KEK
    ///
    /// - 16 bytes: `K1 || K2 || K1` (two-key TDES)
    /// - 24 bytes: the KEK itself
    /// - 32 bytes: the first 24 bytes
    pub fn tdes_key(&self) -> Zeroizing<Vec<u8>> {
        let mut key = Zeroizing::new(Vec::with_capacity(TDES_KEY_SIZE));
        match self.bytes.len() {
            16 => {
                key.extend_from_slice(&self.bytes);
                key.extend_from_slice(&self.bytes[..8]);
            }
            _ => key.extend_from_slice(&self.bytes[..TDES_KEY_SIZE]),
        }
        key
    }
}

impl std::fmt::Debug for KeyEncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyEncryptionKey")
            .field("len", &self.bytes.len())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEK_16: &str = "000102030405060708090A0B0C0D0E0F";

    #[test]
    fn test_accepts_valid_lengths() {
        for len in KEK_LENGTHS {
            let kek = KeyEncryptionKey::from_bytes(&vec![0x42; len]).unwrap();
            assert_eq!(kek.len(), len);
            assert!(!kek.is_empty());
        }
    }

    #[test]
    fn test_rejects_invalid_lengths() {
        for len in [1usize, 8, 10, 15, 17, 23, 25, 31, 33, 48, 64] {
            let result = KeyEncryptionKey::from_bytes(&vec![0x42; len]);
            assert_eq!(result.unwrap_err(), Tr31Error::InvalidKekLength { actual: len });
        }
    }

    #[test]
    fn test_missing_kek() {
        assert_eq!(KeyEncryptionKey::from_bytes(&[]).unwrap_err(), Tr31Error::MissingKek);
        assert_eq!(KeyEncryptionKey::from_hex("").unwrap_err(), Tr31Error::MissingKek);
        assert_eq!(KeyEncryptionKey::from_hex("   ").unwrap_err(), Tr31Error::MissingKek);
    }

    #[test]
    fn test_from_hex() {
        let kek = KeyEncryptionKey::from_hex(KEK_16).unwrap();
        assert_eq!(kek.as_bytes()[15], 0x0F);

        // 10 bytes
        let err = KeyEncryptionKey::from_hex("0123456789ABCDEF0123").unwrap_err();
        assert_eq!(err, Tr31Error::InvalidKekLength { actual: 10 });

        let err = KeyEncryptionKey::from_hex("XYZ0").unwrap_err();
        assert!(matches!(err, Tr31Error::InvalidHex(_)));
    }

    #[test]
    fn test_aes_variant() {
        let cases = [
            (16, AesVariant::Aes128, 128),
            (24, AesVariant::Aes192, 192),
            (32, AesVariant::Aes256, 256),
        ];
        for (len, variant, bits) in cases {
            let kek = KeyEncryptionKey::from_bytes(&vec![1; len]).unwrap();
            assert_eq!(kek.aes_variant(), variant);
            assert_eq!(variant.key_bits(), bits);
        }
    }

    #[test]
    fn test_tdes_key_two_key_form() {
        let kek = KeyEncryptionKey::from_hex(KEK_16).unwrap();
        let key = kek.tdes_key();

        assert_eq!(key.len(), TDES_KEY_SIZE);
        assert_eq!(&key[..16], kek.as_bytes());
        assert_eq!(&key[16..], &kek.as_bytes()[..8]);
    }

    #[test]
    fn test_tdes_key_from_longer_keks() {
        let bytes: Vec<u8> = (0u8..32).collect();

        let kek24 = KeyEncryptionKey::from_bytes(&bytes[..24]).unwrap();
        assert_eq!(kek24.tdes_key().as_slice(), &bytes[..24]);

        let kek32 = KeyEncryptionKey::from_bytes(&bytes).unwrap();
        assert_eq!(kek32.tdes_key().as_slice(), &bytes[..24]);
    }

    #[test]
    fn test_debug_redacts() {
        let kek = KeyEncryptionKey::from_bytes(&[0xAB; 16]).unwrap();
        let debug_str = format!("{:?}", kek);

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("171"));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var(KEK_ENV_VAR, KEK_16);
        let kek = KeyEncryptionKey::from_env().unwrap();
        assert_eq!(kek.len(), 16);

        std::env::remove_var(KEK_ENV_VAR);
        assert_eq!(KeyEncryptionKey::from_env().unwrap_err(), Tr31Error::MissingKek);
    }
}
