//! Transport link abstraction.
//!
//! Protocol code talks to the target through the [`Link`] trait so the
//! session layer stays I/O-agnostic and testable against scripted
//! transports. The production implementation is [`SerialLink`], backed by
//! the `serialport` crate. Boards with an on-board USB bridge additionally
//! get the control-line helpers in [`bridge`].

pub mod bridge;
pub mod serial;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Byte-level channel to the target device.
///
/// Implementations must make `close` idempotent. I/O on a closed link
/// fails with `NotConnected` rather than panicking.
pub trait Link: Read + Write + Send {
    /// Set the read/write timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Current timeout.
    fn timeout(&self) -> Duration;

    /// Change the line speed.
    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()>;

    /// Current line speed.
    fn baud_rate(&self) -> u32;

    /// Discard pending input and output.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Port name or path.
    fn name(&self) -> &str;

    /// Drive the DTR control line.
    fn set_dtr(&mut self, level: bool) -> Result<()>;

    /// Drive the RTS control line.
    fn set_rts(&mut self, level: bool) -> Result<()>;

    /// Release the underlying port. Safe to call more than once.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes and flush.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        Write::write_all(self, buf)?;
        Write::flush(self)?;
        Ok(())
    }
}

/// Downstream chip the USB bridge can route the serial lines to.
///
/// At most one target is electrically connected at a time. Switching is
/// destructive to any in-flight bootloader exchange, so it is only offered
/// at the link level, never through an open session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Host SoC, with the controller held in reset.
    Edison,
    /// Host SoC alone, controller left running.
    EdisonOnly,
    /// The controller MCU (flashing target).
    Stm32,
    /// Auxiliary radio module.
    Esp,
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Target::Edison => "edison",
            Target::EdisonOnly => "edison-only",
            Target::Stm32 => "stm32",
            Target::Esp => "esp",
        };
        f.write_str(name)
    }
}

/// Enumerated serial port with optional USB identity.
#[derive(Debug, Clone)]
pub struct PortInfo {
    pub name: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
}

pub use serial::{SerialLink, list_ports};
