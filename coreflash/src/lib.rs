//! # coreflash
//!
//! Library for flashing CORE-family controller boards over their serial
//! bootloader.
//!
//! Provides:
//!
//! - Intel-HEX image decoding into a contiguous flashable image
//! - The fixed-layout device identity header with CRC-guarded key material
//! - The USART system-bootloader protocol (handshake, erase, program,
//!   verify, protect, identity and emulated-EEPROM access)
//! - A retry driver that survives a physically unreliable link by
//!   restarting the session from the handshake
//! - USB bridge control-line routing for boards that multiplex one
//!   USB-serial bridge across several on-board chips
//!
//! ## Example
//!
//! ```rust,no_run
//! use coreflash::{Action, BootloaderSession, FlashDriver, SerialLink};
//!
//! fn main() -> coreflash::Result<()> {
//!     let link = SerialLink::open("/dev/ttyUSB0", 460_800)?;
//!     let mut session = BootloaderSession::new(link, true);
//!     session.load("firmware.hex")?;
//!
//!     let mut driver = FlashDriver::new(session, false, true);
//!     let report = driver.run(&Action::Flash { unprotect: false })?;
//!     println!("flashed {} bytes", report.bytes);
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod board;
pub mod bootloaders;
pub mod driver;
pub mod error;
pub mod header;
pub mod image;
pub mod link;
pub mod protocol;
pub mod session;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications).
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupt_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

pub use {
    driver::{Action, FlashDriver, Registration, Report, SessionOps},
    error::{Error, Result},
    header::{BoardType, DeviceHeader, pack_version, parse_key, parse_version, unpack_version},
    image::HexImage,
    link::{Link, PortInfo, SerialLink, Target, bridge, list_ports},
    protocol::crc16,
    session::{BootloaderSession, DeviceInfo, PROGRESS_RESET, StartOutcome},
};
