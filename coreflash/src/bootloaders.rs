//! Compiled-in bootloader payloads.
//!
//! Raw binaries linked to the bootloader base address, keyed by the name
//! derived from the device's registered identity. The table is gated by
//! the `embedded-bootloaders` feature so size-sensitive builds can drop
//! the blobs.

#[cfg(feature = "embedded-bootloaders")]
const TABLE: &[(&str, &[u8])] = &[
    (
        "bootloader_1_0_0_mini",
        include_bytes!("../payloads/bootloader_1_0_0_mini.bin"),
    ),
    (
        "bootloader_1_0_0_big",
        include_bytes!("../payloads/bootloader_1_0_0_big.bin"),
    ),
    (
        "bootloader_1_0_0_pro",
        include_bytes!("../payloads/bootloader_1_0_0_pro.bin"),
    ),
];

#[cfg(not(feature = "embedded-bootloaders"))]
const TABLE: &[(&str, &[u8])] = &[];

/// Look up a payload by exact name.
pub fn find(name: &str) -> Option<&'static [u8]> {
    TABLE
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, data)| *data)
}

/// Names of all embedded payloads.
pub fn names() -> impl Iterator<Item = &'static str> {
    TABLE.iter().map(|(n, _)| *n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_name_yields_none() {
        assert!(find("bootloader_0_0_0_none").is_none());
    }

    #[cfg(feature = "embedded-bootloaders")]
    #[test]
    fn embedded_payloads_are_present() {
        assert!(find("bootloader_1_0_0_big").is_some());
        assert_eq!(names().count(), 3);
    }
}
