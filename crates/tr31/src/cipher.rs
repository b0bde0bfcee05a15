//! Cipher selection and block-mode encryption
//!
//! A [`CipherSpec`] is resolved once per call from `(KEK length, algorithm id,
//! version id)` and then drives encryption, decryption and tag computation,
//! so the three paths cannot disagree about key material or mode.
//!
//! ## Rules
//!
//! - `'A'`: AES-128/192/256 chosen by KEK length, KEK used as-is, 16-byte blocks
//! - `'T'`: TDES EDE3 with the KEK-derived three-key form, 8-byte blocks
//! - version `'D'` selects CBC with an all-zero IV, anything else ECB
//!
//! The zero IV is part of the key block format. Integrity comes from the tag.
//!
//! No padding is applied here. Input that is not block-aligned is rejected
//! with [`Tr31Error::BlockMisaligned`].

use crate::error::{Result, Tr31Error};
use crate::kek::{AesVariant, KeyEncryptionKey};
use aes::{Aes128, Aes192, Aes256};
use cipher::block_padding::NoPadding;
use cipher::{BlockCipher, BlockDecryptMut, BlockEncryptMut, BlockSizeUser, KeyInit, KeyIvInit};
use des::TdesEde3;
use zeroize::Zeroizing;

/// AES block size (128 bits / 16 bytes)
pub const AES_BLOCK_SIZE: usize = 16;

/// TDES block size (64 bits / 8 bytes)
pub const TDES_BLOCK_SIZE: usize = 8;

/// Underlying block cipher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockPrimitive {
    Aes(AesVariant),
    TdesEde3,
}

impl BlockPrimitive {
    pub fn block_size(self) -> usize {
        match self {
            BlockPrimitive::Aes(_) => AES_BLOCK_SIZE,
            BlockPrimitive::TdesEde3 => TDES_BLOCK_SIZE,
        }
    }

    /// Name for logging
    pub fn name(self) -> &'static str {
        match self {
            BlockPrimitive::Aes(AesVariant::Aes128) => "aes-128",
            BlockPrimitive::Aes(AesVariant::Aes192) => "aes-192",
            BlockPrimitive::Aes(AesVariant::Aes256) => "aes-256",
            BlockPrimitive::TdesEde3 => "tdes-ede3",
        }
    }
}

/// Block chaining mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainingMode {
    Cbc,
    Ecb,
}

impl ChainingMode {
    pub fn for_version(version_id: char) -> Self {
        if version_id == 'D' {
            ChainingMode::Cbc
        } else {
            ChainingMode::Ecb
        }
    }
}

/// Resolved cipher: primitive, mode and key material
#[derive(Clone)]
pub struct CipherSpec {
    primitive: BlockPrimitive,
    mode: ChainingMode,
    key_material: Zeroizing<Vec<u8>>,
}

impl CipherSpec {
    /// Resolve the cipher for a header's algorithm and version id
    ///
    /// # Arguments
    /// * `kek` - Key encryption key; its length picks the AES variant
    /// * `algorithm` - `'A'` for AES, `'T'` for three-key TDES (see [`KeyEncryptionKey::tdes_key`])
    /// * `version_id` - `'D'` selects CBC with a zero IV, anything else ECB
    ///
    /// # Returns
    /// A [`CipherSpec`] owning a copy of the key material
    ///
    /// # Errors
    /// `UnsupportedAlgorithm` for any algorithm id other than `'A'` or `'T'`.
    pub fn select(kek: &KeyEncryptionKey, algorithm: char, version_id: char) -> Result<Self> {
        let (primitive, key_material) = match algorithm {
            'A' => (
                BlockPrimitive::Aes(kek.aes_variant()),
                Zeroizing::new(kek.as_bytes().to_vec()),
            ),
            'T' => (BlockPrimitive::TdesEde3, kek.tdes_key()),
            other => return Err(Tr31Error::UnsupportedAlgorithm(other)),
        };

        Ok(Self {
            primitive,
            mode: ChainingMode::for_version(version_id),
            key_material,
        })
    }

    /// Cipher over already-derived key material
    pub(crate) fn from_parts(
        primitive: BlockPrimitive,
        mode: ChainingMode,
        key_material: Zeroizing<Vec<u8>>,
    ) -> Self {
        Self {
            primitive,
            mode,
            key_material,
        }
    }

    pub fn primitive(&self) -> BlockPrimitive {
        self.primitive
    }

    pub fn mode(&self) -> ChainingMode {
        self.mode
    }

    pub fn block_size(&self) -> usize {
        self.primitive.block_size()
    }

    /// IV length: one block for CBC, none for ECB
    pub fn iv_len(&self) -> usize {
        match self.mode {
            ChainingMode::Cbc => self.block_size(),
            ChainingMode::Ecb => 0,
        }
    }

    pub(crate) fn key_material(&self) -> &[u8] {
        &self.key_material
    }

    /// Encrypt block-aligned data in the selected mode
    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let iv = self.zero_iv();
        self.encrypt_in(self.mode, &iv, data)
    }

    /// Decrypt block-aligned data in the selected mode
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let iv = self.zero_iv();
        self.decrypt_in(self.mode, &iv, data)
    }

    /// CBC with a zero IV, whatever the selected mode (tag computation)
    pub(crate) fn cbc_encrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let iv = self.zero_iv();
        self.encrypt_in(ChainingMode::Cbc, &iv, data)
    }

    /// CBC under an explicit IV (the X9.143 payload uses the tag)
    pub(crate) fn cbc_encrypt_with_iv(&self, iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        self.encrypt_in(ChainingMode::Cbc, iv, data)
    }

    pub(crate) fn cbc_decrypt_with_iv(&self, iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        self.decrypt_in(ChainingMode::Cbc, iv, data)
    }

    fn zero_iv(&self) -> Vec<u8> {
        vec![0u8; self.block_size()]
    }

    fn encrypt_in(&self, mode: ChainingMode, iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        let key = self.key_material.as_slice();
        match self.primitive {
            BlockPrimitive::Aes(AesVariant::Aes128) => encrypt_with::<Aes128>(mode, key, iv, data),
            BlockPrimitive::Aes(AesVariant::Aes192) => encrypt_with::<Aes192>(mode, key, iv, data),
            BlockPrimitive::Aes(AesVariant::Aes256) => encrypt_with::<Aes256>(mode, key, iv, data),
            BlockPrimitive::TdesEde3 => encrypt_with::<TdesEde3>(mode, key, iv, data),
        }
    }

    fn decrypt_in(&self, mode: ChainingMode, iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        let key = self.key_material.as_slice();
        match self.primitive {
            BlockPrimitive::Aes(AesVariant::Aes128) => decrypt_with::<Aes128>(mode, key, iv, data),
            BlockPrimitive::Aes(AesVariant::Aes192) => decrypt_with::<Aes192>(mode, key, iv, data),
            BlockPrimitive::Aes(AesVariant::Aes256) => decrypt_with::<Aes256>(mode, key, iv, data),
            BlockPrimitive::TdesEde3 => decrypt_with::<TdesEde3>(mode, key, iv, data),
        }
    }
}

impl std::fmt::Debug for CipherSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherSpec")
            .field("primitive", &self.primitive)
            .field("mode", &self.mode)
            .field("key_material", &"[REDACTED]")
            .finish()
    }
}

fn misaligned<C: BlockSizeUser>(len: usize) -> Tr31Error {
    Tr31Error::BlockMisaligned {
        len,
        block_size: C::block_size(),
    }
}

// Cipher contexts live only for the duration of one call, so no chaining
// state carries over between operations. `iv` is ignored in ECB mode.
fn encrypt_with<C>(mode: ChainingMode, key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>>
where
    C: BlockCipher + BlockEncryptMut + KeyInit,
{
    let mut buf = data.to_vec();
    let written = match mode {
        ChainingMode::Cbc => cbc::Encryptor::<C>::new_from_slices(key, iv)?
            .encrypt_padded_mut::<NoPadding>(&mut buf, data.len())
            .map_err(|_| misaligned::<C>(data.len()))?
            .len(),
        ChainingMode::Ecb => ecb::Encryptor::<C>::new_from_slice(key)?
            .encrypt_padded_mut::<NoPadding>(&mut buf, data.len())
            .map_err(|_| misaligned::<C>(data.len()))?
            .len(),
    };
    buf.truncate(written);
    Ok(buf)
}

fn decrypt_with<C>(mode: ChainingMode, key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>>
where
    C: BlockCipher + BlockDecryptMut + KeyInit,
{
    let mut buf = data.to_vec();
    let written = match mode {
        ChainingMode::Cbc => cbc::Decryptor::<C>::new_from_slices(key, iv)?
            .decrypt_padded_mut::<NoPadding>(&mut buf)
            .map_err(|_| misaligned::<C>(data.len()))?
            .len(),
        ChainingMode::Ecb => ecb::Decryptor::<C>::new_from_slice(key)?
            .decrypt_padded_mut::<NoPadding>(&mut buf)
            .map_err(|_| misaligned::<C>(data.len()))?
            .len(),
    };
    buf.truncate(written);
    Ok(buf)
}
