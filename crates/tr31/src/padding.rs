//! ISO/IEC 9797-1 padding method 2
//!
//! A single `0x80` marker byte followed by `0x00` bytes up to the next block
//! boundary. Padding is never empty: block-aligned input gains a full block.
//!
//! [`unpad`] is deliberately permissive. It strips a trailing marker run when
//! one is present and otherwise hands the input back untouched, so it is safe
//! to call on data that was never padded.

use cipher::block_padding::{Iso7816, RawPadding};

/// Padding marker byte
pub const PAD_MARKER: u8 = 0x80;

/// Pad `data` to a multiple of `block_size`
///
/// # Arguments
/// * `data` - Bytes to pad, any length
/// * `block_size` - Cipher block size in bytes (8 for TDES, 16 for AES)
///
/// # Returns
/// `data` followed by `0x80` and enough `0x00` bytes to reach the next
/// block boundary
///
/// # Panics
///
/// Panics if `block_size` is zero.
pub fn pad(data: &[u8], block_size: usize) -> Vec<u8> {
    assert!(block_size > 0, "block size must be non-zero");

    let used = data.len() % block_size;
    let padded_len = data.len() - used + block_size;
    let mut padded = Vec::with_capacity(padded_len);
    padded.extend_from_slice(data);
    padded.resize(padded_len, 0x00);

    let last_block = padded_len - block_size;
    Iso7816::raw_pad(&mut padded[last_block..], used);
    padded
}

/// Strip method-2 padding if present
///
/// Scans backwards for the last `0x80` that is followed only by `0x00`
/// bytes and returns everything before it. Without such a marker the whole
/// input is returned.
pub fn unpad(data: &[u8]) -> &[u8] {
    match data.iter().rposition(|&b| b != 0x00) {
        Some(idx) if data[idx] == PAD_MARKER => &data[..idx],
        _ => data,
    }
}
