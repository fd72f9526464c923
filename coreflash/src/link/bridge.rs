//! USB bridge control-line operations.
//!
//! Second-generation boards route one USB-serial bridge to several on-board
//! chips. The routing mux and the controller's BOOT0/reset pins hang off the
//! bridge's DTR and RTS lines, so target selection and bootloader entry are
//! pure control-line sequences. None of these operations exchange bytes with
//! a bootloader; the caller must not have a session open on the link.

use std::thread;
use std::time::Duration;

use log::{debug, info};

use crate::error::Result;
use crate::link::{Link, Target};

/// Known USB bridge chips, by VID/PID.
pub const KNOWN_BRIDGES: [(u16, u16, &str); 2] = [
    (0x0403, 0x6015, "FTDI FT231X"),
    (0x10c4, 0xea60, "CP210x"),
];

/// True when a VID/PID pair matches one of the on-board bridge chips.
pub fn is_known_bridge(vid: u16, pid: u16) -> bool {
    KNOWN_BRIDGES.iter().any(|&(v, p, _)| v == vid && p == pid)
}

/// Hold time for mux latching and reset pulses.
const SETTLE: Duration = Duration::from_millis(50);

/// Route the serial lines to the requested chip.
///
/// DTR drives the mux select, RTS drives the controller reset while
/// switching. Selection latches on the falling edge of the reset pulse.
pub fn select_target(link: &mut dyn Link, target: Target) -> Result<()> {
    info!("switching serial mux to {target}");
    match target {
        Target::Edison => {
            // Route to the host SoC and hold the controller in reset so it
            // cannot drive the shared lines.
            link.set_dtr(true)?;
            link.set_rts(true)?;
            thread::sleep(SETTLE);
            link.set_rts(false)?;
        }
        Target::EdisonOnly => {
            link.set_dtr(true)?;
            thread::sleep(SETTLE);
        }
        Target::Stm32 => {
            link.set_dtr(false)?;
            link.set_rts(true)?;
            thread::sleep(SETTLE);
            link.set_rts(false)?;
        }
        Target::Esp => {
            link.set_dtr(false)?;
            link.set_rts(false)?;
            thread::sleep(SETTLE);
        }
    }
    link.clear_buffers()?;
    Ok(())
}

/// Put the controller into its system bootloader.
///
/// BOOT0 is sampled on the rising edge of reset, so the sequence is
/// BOOT0 high, reset pulse, BOOT0 release.
pub fn enter_bootloader(link: &mut dyn Link) -> Result<()> {
    debug!("asserting BOOT0 and pulsing reset");
    link.set_dtr(true)?;
    thread::sleep(SETTLE);
    link.set_rts(true)?;
    thread::sleep(SETTLE);
    link.set_rts(false)?;
    thread::sleep(SETTLE);
    link.set_dtr(false)?;
    link.clear_buffers()?;
    Ok(())
}

/// Pulse the controller reset with BOOT0 low so it boots the application.
pub fn reset_target(link: &mut dyn Link) -> Result<()> {
    debug!("pulsing reset");
    link.set_dtr(false)?;
    link.set_rts(true)?;
    thread::sleep(SETTLE);
    link.set_rts(false)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_bridge_chips() {
        assert!(is_known_bridge(0x0403, 0x6015));
        assert!(is_known_bridge(0x10c4, 0xea60));
        assert!(!is_known_bridge(0x1234, 0x5678));
    }
}
