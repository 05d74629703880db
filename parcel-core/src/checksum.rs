//! Rolling CRC-64 (ECMA-182, reflected) used for end-to-end part verification
//!
//! The server reports the same checksum in the `x-tos-hash-crc64ecma` header
//! as a decimal `u64`. The lookup table is built once per process and shared
//! read-only by every accumulator.

use once_cell::sync::Lazy;

/// Reflected ECMA-182 polynomial
pub const ECMA_POLY: u64 = 0xC96C_5795_D787_0F42;

/// Seed of a fresh accumulator, and the checksum of zero-length input
pub const CRC64_SEED: u64 = 0;

static ECMA_TABLE: Lazy<[u64; 256]> = Lazy::new(|| build_table(ECMA_POLY));

fn build_table(poly: u64) -> [u64; 256] {
    let mut table = [0u64; 256];
    for (i, slot) in table.iter_mut().enumerate() {
        let mut crc = i as u64;
        for _ in 0..8 {
            crc = if crc & 1 == 1 { (crc >> 1) ^ poly } else { crc >> 1 };
        }
        *slot = crc;
    }
    table
}

/// Incremental CRC-64 accumulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crc64 {
    value: u64,
}

impl Crc64 {
    /// Create an accumulator seeded with [`CRC64_SEED`]
    pub fn new() -> Self {
        Self::with_seed(CRC64_SEED)
    }

    /// Create an accumulator continuing from a previous checksum value
    pub fn with_seed(seed: u64) -> Self {
        Crc64 { value: seed }
    }

    /// Feed the next range of bytes, in stream order
    pub fn update(&mut self, data: &[u8]) {
        let table = &*ECMA_TABLE;
        let mut crc = !self.value;
        for &byte in data {
            crc = table[((crc as u8) ^ byte) as usize] ^ (crc >> 8);
        }
        self.value = !crc;
    }

    /// Current checksum value
    pub fn value(&self) -> u64 {
        self.value
    }

    /// Start over from the seed
    pub fn reset(&mut self) {
        self.value = CRC64_SEED;
    }
}

impl Default for Crc64 {
    fn default() -> Self {
        Self::new()
    }
}

impl std::hash::Hasher for Crc64 {
    fn write(&mut self, bytes: &[u8]) {
        self.update(bytes);
    }

    fn finish(&self) -> u64 {
        self.value
    }
}

/// One-shot checksum of a byte slice
pub fn crc64(data: &[u8]) -> u64 {
    let mut crc = Crc64::new();
    crc.update(data);
    crc.value()
}

/// Parse a checksum header value (decimal `u64`)
pub fn parse_crc64(value: &str) -> crate::Result<u64> {
    value.trim().parse::<u64>().map_err(|_| {
        crate::ParcelError::InvalidResponse(format!("malformed crc64 value '{}'", value))
    })
}
