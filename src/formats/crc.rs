//! CRC-32 checksum over serialized edge-based node records.
//!
//! Standard reversed polynomial 0xEDB88320 (ISO-HDLC), matching what the
//! query engine recomputes when it loads the artifacts.

use crc::{Crc, CRC_32_ISO_HDLC};

pub const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Compute the CRC-32 checksum of a byte slice.
pub fn checksum(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

/// Incremental CRC-32 digest.
pub struct Digest {
    digest: crc::Digest<'static, u32>,
}

impl Digest {
    pub fn new() -> Self {
        Self {
            digest: CRC32.digest(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.digest.update(data);
    }

    pub fn finalize(self) -> u32 {
        self.digest.finalize()
    }
}

impl Default for Digest {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        // Standard check value for CRC-32/ISO-HDLC.
        assert_eq!(checksum(b"123456789"), 0xCBF43926);
    }

    #[test]
    fn incremental_matches_oneshot() {
        let data = b"edge based node records";
        let mut digest = Digest::new();
        digest.update(&data[..7]);
        digest.update(&data[7..]);
        assert_eq!(digest.finalize(), checksum(data));
    }
}
