//! CRC16 checksum used to authenticate registration key material.
//!
//! CRC-16/XMODEM: polynomial 0x1021, init 0x0000, no reflection, no xorout.
//! The deployed firmware computes the same parameters; the algorithm is a
//! wire contract and must not be substituted for another CRC-16 variant.

/// Polynomial for CRC-16/XMODEM.
const POLY: u16 = 0x1021;

/// Compute the CRC16 of a byte slice.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0x0000;

    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ POLY;
            } else {
                crc <<= 1;
            }
        }
    }

    crc
}
