//! CRC-32 integrity checksum for persisted record blocks.
//!
//! CRC-32/ISO-HDLC, the variant used by zlib and Ethernet, so stored images
//! can be checked with off-the-shelf tools.

use crc::{CRC_32_ISO_HDLC, Crc};

const BLOCK_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Compute the CRC-32 of a whole block in one call.
pub fn crc32(bytes: &[u8]) -> u32 {
    BLOCK_CRC.checksum(bytes)
}
