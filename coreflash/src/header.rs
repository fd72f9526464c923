//! Device identity header.
//!
//! Each board carries up to four 32-byte header slots in a dedicated flash
//! sector. A slot holds a 29-byte record identifying the board variant,
//! firmware-visible version, serial id, and an optional 16-byte secret key
//! whose integrity is guarded by a CRC16. Registration is write-once: a
//! slot is only written while still in the erased (or zeroed) state.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};
use crate::protocol::crc16;

/// Size of one header slot in flash.
pub const SLOT_SIZE: usize = 32;
/// Bytes of a slot actually occupied by the record.
pub const RECORD_SIZE: usize = 29;
/// Length of the secret key in bytes.
pub const KEY_SIZE: usize = 16;

/// Header layout revision written by this tool.
const CURRENT_HEADER_VERSION: u8 = 0x02;
/// Revisions this tool can read.
const KNOWN_HEADER_VERSIONS: [u8; 2] = [0x01, 0x02];

const OFF_HEADER_VERSION: usize = 0;
const OFF_BOARD_TYPE: usize = 1;
const OFF_VERSION: usize = 2;
const OFF_SERIAL: usize = 6;
const OFF_KEY_PRESENT: usize = 10;
const OFF_KEY: usize = 11;
const OFF_KEY_CRC: usize = 27;

/// Board variant identifier stored in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardType {
    Mini,
    Core2,
    Pro,
}

impl BoardType {
    pub fn code(self) -> u8 {
        match self {
            BoardType::Mini => 1,
            BoardType::Core2 => 2,
            BoardType::Pro => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(BoardType::Mini),
            2 => Some(BoardType::Core2),
            3 => Some(BoardType::Pro),
            _ => None,
        }
    }
}

impl std::fmt::Display for BoardType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BoardType::Mini => "mini",
            BoardType::Core2 => "core2",
            BoardType::Pro => "pro",
        };
        f.write_str(name)
    }
}

/// Pack a four-component version into the header word, 8 bits per component.
///
/// Components must each fit in a byte and at least one must be nonzero.
pub fn pack_version(a: u32, b: u32, c: u32, d: u32) -> Result<u32> {
    for component in [a, b, c, d] {
        if component > 0xFF {
            return Err(Error::InvalidVersion(format!(
                "version component {component} exceeds 255"
            )));
        }
    }
    if a == 0 && b == 0 && c == 0 && d == 0 {
        return Err(Error::InvalidVersion("version must not be 0.0.0.0".into()));
    }
    Ok((a << 24) | (b << 16) | (c << 8) | d)
}

/// Inverse of [`pack_version`].
pub fn unpack_version(packed: u32) -> (u32, u32, u32, u32) {
    (
        (packed >> 24) & 0xFF,
        (packed >> 16) & 0xFF,
        (packed >> 8) & 0xFF,
        packed & 0xFF,
    )
}

/// Parse a registration version string, `a.b.c` or `a.b.c.d`.
pub fn parse_version(text: &str) -> Result<u32> {
    let parts: Vec<&str> = text.split('.').collect();
    if parts.len() != 3 && parts.len() != 4 {
        return Err(Error::InvalidVersion(format!(
            "expected a.b.c or a.b.c.d, got {text:?}"
        )));
    }
    let mut components = [0u32; 4];
    for (slot, part) in components.iter_mut().zip(&parts) {
        *slot = part
            .parse()
            .map_err(|_| Error::InvalidVersion(format!("bad version component {part:?}")))?;
    }
    pack_version(components[0], components[1], components[2], components[3])
}

/// Decode a 32-hex-character registration key string into its 16 raw bytes.
pub fn parse_key(text: &str) -> Result<[u8; KEY_SIZE]> {
    if text.len() != KEY_SIZE * 2 {
        return Err(Error::InvalidKey(format!(
            "key must be {} hex characters, got {}",
            KEY_SIZE * 2,
            text.len()
        )));
    }
    let decoded =
        hex::decode(text).map_err(|e| Error::InvalidKey(format!("key is not hex: {e}")))?;
    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&decoded);
    Ok(key)
}

/// One decoded header slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHeader {
    pub header_version: u8,
    pub board_type: u8,
    pub version: u32,
    pub serial: u32,
    pub key: Option<[u8; KEY_SIZE]>,
    raw: [u8; SLOT_SIZE],
}

impl DeviceHeader {
    /// Build a fresh header record for registration.
    pub fn new(board_type: BoardType, version: u32, serial: u32, key: Option<[u8; KEY_SIZE]>) -> Self {
        let mut header = DeviceHeader {
            header_version: CURRENT_HEADER_VERSION,
            board_type: board_type.code(),
            version,
            serial,
            key,
            raw: [0u8; SLOT_SIZE],
        };
        header.raw = header.encode();
        header
    }

    /// Decode a raw 32-byte slot as read from flash.
    pub fn decode(slot: &[u8; SLOT_SIZE]) -> Self {
        let key = if slot[OFF_KEY_PRESENT] == 1 {
            let mut key = [0u8; KEY_SIZE];
            key.copy_from_slice(&slot[OFF_KEY..OFF_KEY + KEY_SIZE]);
            Some(key)
        } else {
            None
        };
        DeviceHeader {
            header_version: slot[OFF_HEADER_VERSION],
            board_type: slot[OFF_BOARD_TYPE],
            version: LittleEndian::read_u32(&slot[OFF_VERSION..OFF_VERSION + 4]),
            serial: LittleEndian::read_u32(&slot[OFF_SERIAL..OFF_SERIAL + 4]),
            key,
            raw: *slot,
        }
    }

    /// Encode the record into a full slot image. Unused tail bytes are zero.
    pub fn encode(&self) -> [u8; SLOT_SIZE] {
        let mut slot = [0u8; SLOT_SIZE];
        slot[OFF_HEADER_VERSION] = self.header_version;
        slot[OFF_BOARD_TYPE] = self.board_type;
        LittleEndian::write_u32(&mut slot[OFF_VERSION..OFF_VERSION + 4], self.version);
        LittleEndian::write_u32(&mut slot[OFF_SERIAL..OFF_SERIAL + 4], self.serial);
        if let Some(key) = &self.key {
            slot[OFF_KEY_PRESENT] = 1;
            slot[OFF_KEY..OFF_KEY + KEY_SIZE].copy_from_slice(key);
            LittleEndian::write_u16(&mut slot[OFF_KEY_CRC..OFF_KEY_CRC + 2], crc16(key));
        }
        slot
    }

    /// True when the slot has never been written: still erased flash
    /// (all `0xFF`) or explicitly zeroed (all `0x00`).
    pub fn is_clear(&self) -> bool {
        self.raw.iter().all(|&b| b == 0xFF) || self.raw.iter().all(|&b| b == 0x00)
    }

    /// True when the slot decodes to a coherent record: a known layout
    /// revision, a presence byte of exactly 0 or 1, and key material
    /// consistent with it. A keyed record must carry a matching key CRC; a
    /// keyless record must leave the key and CRC bytes in the written-zero
    /// or erased state, so clearing the presence byte cannot silently
    /// discard a key.
    pub fn is_valid(&self) -> bool {
        if !KNOWN_HEADER_VERSIONS.contains(&self.header_version) {
            return false;
        }
        match self.raw[OFF_KEY_PRESENT] {
            1 => {
                let key = &self.raw[OFF_KEY..OFF_KEY + KEY_SIZE];
                let stored = LittleEndian::read_u16(&self.raw[OFF_KEY_CRC..OFF_KEY_CRC + 2]);
                stored == crc16(key)
            }
            0 => {
                let tail = &self.raw[OFF_KEY..OFF_KEY_CRC + 2];
                tail.iter().all(|&b| b == 0x00) || tail.iter().all(|&b| b == 0xFF)
            }
            _ => false,
        }
    }

    pub fn board(&self) -> Option<BoardType> {
        BoardType::from_code(self.board_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_key() -> [u8; KEY_SIZE] {
        let mut key = [0u8; KEY_SIZE];
        for (i, b) in key.iter_mut().enumerate() {
            *b = i as u8;
        }
        key
    }

    #[test]
    fn version_packs_and_unpacks() {
        let packed = pack_version(1, 2, 3, 4).unwrap();
        assert_eq!(packed, 0x0102_0304);
        assert_eq!(unpack_version(packed), (1, 2, 3, 4));
    }

    #[test]
    fn version_rejects_oversized_component() {
        assert!(matches!(
            pack_version(1, 256, 0, 0),
            Err(Error::InvalidVersion(_))
        ));
    }

    #[test]
    fn version_rejects_all_zero() {
        assert!(pack_version(0, 0, 0, 0).is_err());
    }

    #[test]
    fn version_string_accepts_three_or_four_components() {
        assert_eq!(parse_version("1.6.2").unwrap(), 0x0106_0200);
        assert_eq!(parse_version("1.6.2.9").unwrap(), 0x0106_0209);
        assert!(parse_version("1.6").is_err());
        assert!(parse_version("1.6.x").is_err());
    }

    #[test]
    fn key_must_be_32_hex_chars() {
        assert!(parse_key("00112233445566778899AABBCCDDEEFF").is_ok());
        assert!(parse_key("00112233445566778899aabbccddeeff").is_ok());
        assert!(matches!(parse_key("0011"), Err(Error::InvalidKey(_))));
        assert!(parse_key("00112233445566778899AABBCCDDEEGG").is_err());
    }

    #[test]
    fn round_trips_through_a_slot() {
        let header = DeviceHeader::new(BoardType::Core2, 0x0106_0200, 12345, Some(sample_key()));
        let decoded = DeviceHeader::decode(&header.encode());
        assert_eq!(decoded.header_version, 0x02);
        assert_eq!(decoded.board(), Some(BoardType::Core2));
        assert_eq!(decoded.version, 0x0106_0200);
        assert_eq!(decoded.serial, 12345);
        assert_eq!(decoded.key, Some(sample_key()));
        assert!(decoded.is_valid());
        assert!(!decoded.is_clear());
    }

    #[test]
    fn erased_and_zeroed_slots_are_clear() {
        assert!(DeviceHeader::decode(&[0xFF; SLOT_SIZE]).is_clear());
        assert!(DeviceHeader::decode(&[0x00; SLOT_SIZE]).is_clear());
        let mut mixed = [0xFF; SLOT_SIZE];
        mixed[5] = 0;
        assert!(!DeviceHeader::decode(&mixed).is_clear());
    }

    #[test]
    fn key_crc_mismatch_invalidates() {
        let header = DeviceHeader::new(BoardType::Mini, 0x0100_0000, 7, Some(sample_key()));
        let mut slot = header.encode();
        slot[11] ^= 0x01;
        assert!(!DeviceHeader::decode(&slot).is_valid());
    }

    #[test]
    fn any_key_region_byte_flip_invalidates() {
        let header = DeviceHeader::new(BoardType::Core2, 0x0106_0200, 9, Some(sample_key()));
        let clean = header.encode();
        // Presence byte, the 16 key bytes, and both CRC bytes.
        for off in OFF_KEY_PRESENT..OFF_KEY_CRC + 2 {
            let mut slot = clean;
            slot[off] ^= 0x01;
            assert!(
                !DeviceHeader::decode(&slot).is_valid(),
                "flip at offset {off} accepted"
            );
        }
    }

    #[test]
    fn presence_byte_outside_zero_or_one_invalidates() {
        let header = DeviceHeader::new(BoardType::Mini, 0x0100_0000, 7, None);
        let mut slot = header.encode();
        slot[10] = 0x02;
        assert!(!DeviceHeader::decode(&slot).is_valid());
    }

    #[test]
    fn unknown_layout_revision_invalidates() {
        let header = DeviceHeader::new(BoardType::Mini, 0x0100_0000, 7, None);
        let mut slot = header.encode();
        slot[0] = 0x7E;
        assert!(!DeviceHeader::decode(&slot).is_valid());
    }

    #[test]
    fn keyless_header_is_valid() {
        let header = DeviceHeader::new(BoardType::Pro, 0x0203_0000, 42, None);
        let decoded = DeviceHeader::decode(&header.encode());
        assert!(decoded.is_valid());
        assert_eq!(decoded.key, None);
    }
}
