//! Single-byte text mapping used on the serial link.
//!
//! Each `char` in U+0000..=U+00FF maps to the byte with the same value, so
//! binary payloads survive a trip through text unchanged.

/// Substitute for characters that have no single-byte form.
pub const REPLACEMENT: u8 = b'?';

pub fn encode(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(REPLACEMENT))
        .collect()
}

pub fn decode(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}
