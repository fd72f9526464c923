//! Flash geography and board-variant constants.
//!
//! Both hardware generations carry the same STM32F4-class flash layout: the
//! bootloader owns sectors 0-1, the identity header slots live in sector 2,
//! sector 3 is the emulated-EEPROM backing store, and the application image
//! occupies sectors 4 and up. Erase and program never touch sectors 0-3
//! unless a region is explicitly unprotected and targeted.

/// Base address of on-chip flash.
pub const FLASH_BASE: u32 = 0x0800_0000;

/// First address of the application region (sector 4).
pub const APP_BASE: u32 = 0x0801_0000;

/// One-past-the-end of the application region (sector 11).
pub const APP_END: u32 = 0x0810_0000;

/// Base address of the identity header slots (sector 2).
pub const HEADER_BASE: u32 = 0x0800_8000;

/// Number of identity header slots.
pub const HEADER_SLOTS: usize = 4;

/// Base address of the emulated-EEPROM region (sector 3).
pub const EEPROM_BASE: u32 = 0x0800_C000;

/// Size of the emulated-EEPROM region in bytes.
pub const EEPROM_SIZE: usize = 0x4000;

/// Option-byte block address.
pub const OPTION_BYTES: u32 = 0x1FFF_C000;

/// Length of the option-byte block read during setup.
pub const OPTION_BYTES_LEN: usize = 16;

/// Option bytes that must hold fixed values for the boards to boot
/// reliably: readout protection level 0 and the expected user byte.
pub const OPTION_BYTES_EXPECTED: [(usize, u8); 2] = [(0, 0xAA), (8, 0xEF)];

/// Application-region flash sectors, erased before programming.
pub const APP_SECTORS: [u16; 8] = [4, 5, 6, 7, 8, 9, 10, 11];

/// Bootloader flash sectors, guarded by the hardware write-protect flag.
pub const BOOT_SECTORS: [u8; 2] = [0, 1];

/// Emulated-EEPROM flash sector.
pub const EEPROM_SECTORS: [u16; 1] = [3];

/// Default baud rate for flashing operations.
pub const DEFAULT_FLASH_BAUD: u32 = 460_800;

/// Default baud rate for the serial console.
pub const DEFAULT_CONSOLE_BAUD: u32 = 230_400;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regions_do_not_overlap() {
        assert!(HEADER_BASE >= FLASH_BASE);
        assert!(HEADER_BASE + (HEADER_SLOTS * 32) as u32 <= EEPROM_BASE);
        assert!(EEPROM_BASE + EEPROM_SIZE as u32 <= APP_BASE);
        assert!(APP_BASE < APP_END);
    }

    #[test]
    fn app_sectors_exclude_reserved_regions() {
        assert!(!APP_SECTORS.contains(&0));
        assert!(!APP_SECTORS.contains(&2));
        assert!(!APP_SECTORS.contains(&3));
    }
}
