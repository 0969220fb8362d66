//! CRC-16/CCITT-FALSE as used by the BR Code `63` field.
//!
//! Polynomial `0x1021`, initial value `0xFFFF`, MSB first, no reflection, no
//! final XOR. The catalogue name in the `crc` crate is `CRC_16_IBM_3740`.

use crc::{Crc, CRC_16_IBM_3740};

const CCITT_FALSE: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Checksum of `data`.
#[must_use]
pub fn crc16(data: &[u8]) -> u16 {
    CCITT_FALSE.checksum(data)
}

/// Checksum rendered the way the payload carries it: 4 upper-case hex digits.
#[must_use]
pub fn crc16_hex(data: &[u8]) -> String {
    format!("{:04X}", crc16(data))
}
