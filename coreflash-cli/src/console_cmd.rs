//! Interactive serial console passthrough.
//!
//! Single-threaded loop alternating between short serial reads and
//! keyboard polling (crossterm raw mode). Ctrl+C leaves the console,
//! Ctrl+R pulses the target reset.

use std::io::{self, Read as _, Write as _};
use std::time::Duration;

use anyhow::{Context, Result};
use console::style;
use coreflash::SerialLink;
use coreflash::link::{Link, bridge};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal;
use log::debug;

/// RAII guard so raw mode is dropped on every exit path.
struct RawMode;

impl RawMode {
    fn enable() -> Result<Self> {
        terminal::enable_raw_mode().context("failed to enable raw terminal mode")?;
        Ok(RawMode)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

fn key_bytes(key: &KeyEvent) -> Option<Vec<u8>> {
    match key.code {
        KeyCode::Char(c) => {
            if key.modifiers.contains(KeyModifiers::CONTROL) {
                let c = c.to_ascii_lowercase();
                if c.is_ascii_lowercase() {
                    return Some(vec![c as u8 - b'a' + 1]);
                }
                None
            } else {
                Some(c.to_string().into_bytes())
            }
        }
        KeyCode::Enter => Some(vec![b'\r']),
        KeyCode::Backspace => Some(vec![0x08]),
        KeyCode::Tab => Some(vec![b'\t']),
        KeyCode::Esc => Some(vec![0x1B]),
        KeyCode::Up => Some(b"\x1b[A".to_vec()),
        KeyCode::Down => Some(b"\x1b[B".to_vec()),
        KeyCode::Right => Some(b"\x1b[C".to_vec()),
        KeyCode::Left => Some(b"\x1b[D".to_vec()),
        _ => None,
    }
}

/// Run the console until the user presses Ctrl+C.
pub fn run_console(device: &str, speed: u32) -> Result<()> {
    let mut link =
        SerialLink::open(device, speed).with_context(|| format!("failed to open {device}"))?;
    link.set_timeout(Duration::from_millis(10))?;

    eprintln!(
        "{}",
        style(format!(
            "Console on {device} at {speed} baud. Ctrl+C exits, Ctrl+R resets."
        ))
        .dim()
    );

    let _raw = RawMode::enable()?;
    let mut buf = [0u8; 256];

    loop {
        // Serial to terminal.
        match link.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                let mut out = io::stdout();
                out.write_all(&buf[..n])?;
                out.flush()?;
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
            Err(e) => {
                debug!("console read error: {e}");
                return Err(e.into());
            }
        }

        // Keyboard to serial.
        if !event::poll(Duration::from_millis(10))? {
            continue;
        }
        if let Event::Key(key) = event::read()? {
            if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
                break;
            }
            if key.code == KeyCode::Char('r') && key.modifiers.contains(KeyModifiers::CONTROL) {
                bridge::reset_target(&mut link)?;
                continue;
            }
            if let Some(bytes) = key_bytes(&key) {
                link.write_all_bytes(&bytes)?;
            }
        }
    }

    eprintln!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_chars_map_to_low_bytes() {
        let key = KeyEvent::new(KeyCode::Char('a'), KeyModifiers::CONTROL);
        assert_eq!(key_bytes(&key), Some(vec![0x01]));
    }

    #[test]
    fn enter_sends_carriage_return() {
        let key = KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE);
        assert_eq!(key_bytes(&key), Some(vec![b'\r']));
    }

    #[test]
    fn arrows_send_escape_sequences() {
        let key = KeyEvent::new(KeyCode::Up, KeyModifiers::NONE);
        assert_eq!(key_bytes(&key), Some(b"\x1b[A".to_vec()));
    }
}
