//! Serial port selection.
//!
//! Resolves the device path to flash through, preferring an explicit
//! `--device` argument, then the config file, then auto-detection of the
//! known on-board USB bridge chips, falling back to an interactive pick
//! when several candidates remain.

use anyhow::{Result, bail};
use console::style;
use coreflash::link::bridge::is_known_bridge;
use coreflash::{PortInfo, list_ports};
use dialoguer::{Select, theme::ColorfulTheme};
use log::{debug, info};
use std::io::IsTerminal;

use crate::config::Config;

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub device: Option<String>,
    /// Never prompt; fail unless the choice is unambiguous.
    pub non_interactive: bool,
}

fn is_known_device(port: &PortInfo, config: &Config) -> bool {
    match (port.vid, port.pid) {
        (Some(vid), Some(pid)) => {
            is_known_bridge(vid, pid)
                || config
                    .port
                    .usb_device
                    .iter()
                    .any(|d| d.matches(vid, pid))
        }
        _ => false,
    }
}

fn describe(port: &PortInfo) -> String {
    match (&port.manufacturer, &port.product) {
        (Some(m), Some(p)) => format!("{} ({m} {p})", port.name),
        (_, Some(p)) => format!("{} ({p})", port.name),
        _ => port.name.clone(),
    }
}

/// Resolve the serial device to use.
pub fn select_serial_port(options: &SerialOptions, config: &mut Config) -> Result<String> {
    if let Some(device) = &options.device {
        return Ok(device.clone());
    }

    if let Some(device) = &config.port.connection.serial {
        debug!("using port from config: {device}");
        return Ok(device.clone());
    }

    let ports = list_ports()?;
    if ports.is_empty() {
        bail!("no serial ports found");
    }

    // Prefer ports that look like a board bridge.
    let known: Vec<&PortInfo> = ports.iter().filter(|p| is_known_device(p, config)).collect();
    let candidates: Vec<&PortInfo> = if known.is_empty() {
        ports.iter().collect()
    } else {
        known
    };

    if candidates.len() == 1 {
        let port = candidates[0];
        info!("auto-selected port {}", port.name);
        return Ok(port.name.clone());
    }

    if options.non_interactive || !std::io::stderr().is_terminal() {
        bail!(
            "multiple serial ports found ({}), pass --device",
            candidates
                .iter()
                .map(|p| p.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    let labels: Vec<String> = candidates.iter().map(|p| describe(p)).collect();
    eprintln!("{}", style("Multiple serial ports found:").bold());
    let picked = Select::with_theme(&ColorfulTheme::default())
        .items(&labels)
        .default(0)
        .interact()?;

    let chosen = candidates[picked].name.clone();
    // Remember the chosen adapter so the next run auto-detects it.
    if let (Some(vid), Some(pid)) = (candidates[picked].vid, candidates[picked].pid) {
        if let Err(e) = config.remember_usb_device(vid, pid) {
            debug!("could not persist USB device: {e}");
        }
    }

    Ok(chosen)
}
