//! Poison filling and canary stamping for tracked blocks.
//!
//! Every tracked block is over-allocated by [`PAD_WIDTH`] bytes. The whole block, padding included, is first filled
//! with [`POISON_BYTE`] so that code relying on zeroed memory reads garbage instead, and then the padding directly
//! after the requested size is stamped with [`CANARY_BYTE`]. Any write past the requested size disturbs the canary,
//! which [`verify_canary`] picks up later.
//!
//! All functions here operate on raw block pointers handed out by the underlying allocator, so they are `unsafe` and
//! expect the caller to vouch for the block being at least `size + PAD_WIDTH` bytes long.

/// Number of canary bytes appended after the requested size of every tracked block.
pub const PAD_WIDTH: usize = 32;

/// Byte value stamped across the canary region.
pub const CANARY_BYTE: u8 = 132;

/// Byte value written across freshly allocated memory.
pub const POISON_BYTE: u8 = CANARY_BYTE + 1;

/// Fills `len` bytes starting at `block` with [`POISON_BYTE`].
///
/// # Safety
///
/// `block` must be valid for writes of `len` bytes.
pub unsafe fn poison_fill(block: *mut u8, len: usize) {
    std::ptr::write_bytes(block, POISON_BYTE, len);
}

/// Stamps the [`PAD_WIDTH`] bytes that follow the first `size` bytes of `block` with [`CANARY_BYTE`].
///
/// # Safety
///
/// `block` must be valid for writes of `size + PAD_WIDTH` bytes.
pub unsafe fn stamp_canary(block: *mut u8, size: usize) {
    std::ptr::write_bytes(block.add(size), CANARY_BYTE, PAD_WIDTH);
}

/// Returns `true` if every canary byte after the first `size` bytes of `block` is still intact.
///
/// # Safety
///
/// `block` must be valid for reads of `size + PAD_WIDTH` bytes.
pub unsafe fn verify_canary(block: *const u8, size: usize) -> bool {
    let pad = std::slice::from_raw_parts(block.add(size), PAD_WIDTH);
    pad.iter().all(|byte| *byte == CANARY_BYTE)
}
