//! STM32 USART system-bootloader command set.
//!
//! The boards speak the stock STM32 serial bootloader (AN3155): a `0x7F`
//! autobaud byte opens the session, every command is sent as the command
//! byte followed by its complement, and multi-byte payloads carry an XOR
//! checksum. The device answers each step with ACK or NACK.
//!
//! ```text
//! Command:  +------+-------+          Address:  +----+----+----+----+-----+
//!           | CMD  | ~CMD  |                    | A3 | A2 | A1 | A0 | XOR |
//!           +------+-------+                    +----+----+----+----+-----+
//!
//! Data:     +-------+------------------+-----+
//!           | N - 1 |   DATA (N bytes) | XOR |
//!           +-------+------------------+-----+
//! ```

/// Autobaud / session-open byte.
pub const INIT: u8 = 0x7F;

/// Positive acknowledge.
pub const ACK: u8 = 0x79;

/// Negative acknowledge.
pub const NACK: u8 = 0x1F;

/// Maximum payload per read/write transaction.
pub const MAX_CHUNK: usize = 256;

/// Bootloader command bytes.
pub mod commands {
    pub const GET: u8 = 0x00;
    pub const GET_VERSION: u8 = 0x01;
    pub const GET_ID: u8 = 0x02;
    pub const READ_MEMORY: u8 = 0x11;
    pub const GO: u8 = 0x21;
    pub const WRITE_MEMORY: u8 = 0x31;
    pub const EXTENDED_ERASE: u8 = 0x44;
    pub const WRITE_PROTECT: u8 = 0x63;
    pub const WRITE_UNPROTECT: u8 = 0x73;
    pub const READOUT_PROTECT: u8 = 0x82;
    pub const READOUT_UNPROTECT: u8 = 0x92;
}

/// Frame a command byte with its complement.
pub fn command_frame(cmd: u8) -> [u8; 2] {
    [cmd, !cmd]
}

/// Frame a 32-bit address, big-endian, with XOR checksum.
pub fn address_frame(addr: u32) -> [u8; 5] {
    let b = addr.to_be_bytes();
    [b[0], b[1], b[2], b[3], b[0] ^ b[1] ^ b[2] ^ b[3]]
}

/// Frame a data block for WRITE_MEMORY: `N-1 | data | XOR` where the
/// checksum covers the length byte and all data bytes.
///
/// `data` must be 1..=256 bytes.
pub fn data_frame(data: &[u8]) -> Vec<u8> {
    debug_assert!(!data.is_empty() && data.len() <= MAX_CHUNK);

    let n = (data.len() - 1) as u8;
    let mut buf = Vec::with_capacity(data.len() + 2);
    buf.push(n);
    buf.extend_from_slice(data);
    buf.push(data.iter().fold(n, |acc, &b| acc ^ b));
    buf
}

/// Frame the byte-count request for READ_MEMORY: `N-1 | ~(N-1)`.
pub fn read_length_frame(len: usize) -> [u8; 2] {
    debug_assert!(len >= 1 && len <= MAX_CHUNK);
    let n = (len - 1) as u8;
    [n, !n]
}

/// Frame the sector list for EXTENDED_ERASE: `count-1 (u16 BE) | sector
/// ids (u16 BE each) | XOR` over all preceding bytes.
pub fn erase_frame(sectors: &[u16]) -> Vec<u8> {
    debug_assert!(!sectors.is_empty());

    let mut buf = Vec::with_capacity(2 + sectors.len() * 2 + 1);
    buf.extend_from_slice(&((sectors.len() - 1) as u16).to_be_bytes());
    for &s in sectors {
        buf.extend_from_slice(&s.to_be_bytes());
    }
    let xor = buf.iter().fold(0u8, |acc, &b| acc ^ b);
    buf.push(xor);
    buf
}

/// Frame the sector list for WRITE_PROTECT: `count-1 | sector codes | XOR`.
pub fn protect_frame(sectors: &[u8]) -> Vec<u8> {
    debug_assert!(!sectors.is_empty());

    let mut buf = Vec::with_capacity(sectors.len() + 2);
    buf.push((sectors.len() - 1) as u8);
    buf.extend_from_slice(sectors);
    let xor = buf.iter().fold(0u8, |acc, &b| acc ^ b);
    buf.push(xor);
    buf
}
