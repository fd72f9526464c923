//! Operation driver.
//!
//! Maps one requested [`Action`] to a sequence of session calls and owns
//! the retry policy: the handshake is reattempted until it succeeds, turns
//! fatal, or the user interrupts; a retryable failure in any later step
//! restarts the whole session from the handshake. The driver is generic
//! over [`SessionOps`] so the policy is testable against a scripted
//! session.

use std::time::{Duration, Instant};

use log::{debug, info};

use crate::bootloaders;
use crate::error::{Error, Result};
use crate::header::{BoardType, DeviceHeader, KEY_SIZE, unpack_version};
use crate::is_interrupt_requested;
use crate::link::Link;
use crate::session::{BootloaderSession, DeviceInfo, StartOutcome};

/// Everything the driver needs from a session.
pub trait SessionOps {
    fn init(&mut self) -> Result<()>;
    fn start(&mut self, init_bootloader: bool) -> StartOutcome;
    fn setup(&mut self, skip_checks: bool) -> Result<()>;
    fn erase(&mut self) -> Result<()>;
    fn erase_bootloader(&mut self) -> Result<()>;
    fn flash(&mut self) -> Result<()>;
    fn reset(&mut self) -> Result<()>;
    fn protect(&mut self) -> Result<()>;
    fn unprotect(&mut self) -> Result<()>;
    fn dump(&mut self) -> Result<DeviceInfo>;
    fn dump_emulated_eeprom(&mut self) -> Result<Vec<u8>>;
    fn erase_emulated_eeprom(&mut self) -> Result<()>;
    fn read_header(&mut self, slot: usize) -> Result<DeviceHeader>;
    fn write_header(&mut self, slot: usize, header: &DeviceHeader) -> Result<()>;
    fn load_data(&mut self, bytes: &[u8], base: u32);
    fn image_len(&self) -> u32;
    fn cleanup(&mut self, reset: bool);
}

impl<L: Link> SessionOps for BootloaderSession<L> {
    fn init(&mut self) -> Result<()> {
        BootloaderSession::init(self)
    }
    fn start(&mut self, init_bootloader: bool) -> StartOutcome {
        BootloaderSession::start(self, init_bootloader)
    }
    fn setup(&mut self, skip_checks: bool) -> Result<()> {
        BootloaderSession::setup(self, skip_checks)
    }
    fn erase(&mut self) -> Result<()> {
        BootloaderSession::erase(self)
    }
    fn erase_bootloader(&mut self) -> Result<()> {
        BootloaderSession::erase_bootloader(self)
    }
    fn flash(&mut self) -> Result<()> {
        BootloaderSession::flash(self)
    }
    fn reset(&mut self) -> Result<()> {
        BootloaderSession::reset(self)
    }
    fn protect(&mut self) -> Result<()> {
        BootloaderSession::protect(self)
    }
    fn unprotect(&mut self) -> Result<()> {
        BootloaderSession::unprotect(self)
    }
    fn dump(&mut self) -> Result<DeviceInfo> {
        BootloaderSession::dump(self)
    }
    fn dump_emulated_eeprom(&mut self) -> Result<Vec<u8>> {
        BootloaderSession::dump_emulated_eeprom(self)
    }
    fn erase_emulated_eeprom(&mut self) -> Result<()> {
        BootloaderSession::erase_emulated_eeprom(self)
    }
    fn read_header(&mut self, slot: usize) -> Result<DeviceHeader> {
        BootloaderSession::read_header(self, slot)
    }
    fn write_header(&mut self, slot: usize, header: &DeviceHeader) -> Result<()> {
        BootloaderSession::write_header(self, slot, header)
    }
    fn load_data(&mut self, bytes: &[u8], base: u32) {
        BootloaderSession::load_data(self, bytes, base)
    }
    fn image_len(&self) -> u32 {
        self.image().map_or(0, |i| i.total_length())
    }
    fn cleanup(&mut self, reset: bool) {
        BootloaderSession::cleanup(self, reset)
    }
}

/// Registration request for a header slot.
#[derive(Debug, Clone)]
pub struct Registration {
    pub board_type: BoardType,
    pub version: u32,
    pub serial: u32,
    pub key: Option<[u8; KEY_SIZE]>,
    pub slot: usize,
}

/// One requested operation, validated and resolved by the caller.
#[derive(Debug, Clone)]
pub enum Action {
    /// Program the attached image. With `unprotect`, the bootloader region
    /// protection is lifted first (and restored afterwards), which costs an
    /// extra handshake because the lift only applies after a device reset.
    Flash { unprotect: bool },
    /// Handshake only, to verify the device answers.
    Test,
    Setup,
    Protect,
    Unprotect,
    Dump,
    DumpEeprom,
    EraseEeprom,
    Register(Registration),
    /// Replace the resident bootloader with the embedded payload matching
    /// the device's registered identity.
    FlashBootloader,
}

/// Two-pass state for flows that must re-handshake mid-operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    First,
    Second,
}

/// What an operation produced.
#[derive(Debug, Default)]
pub struct Report {
    pub elapsed: Duration,
    pub bytes: u32,
    pub device: Option<DeviceInfo>,
    pub eeprom: Option<Vec<u8>>,
}

impl Report {
    /// Mean programming throughput in KiB per second.
    pub fn throughput_kbps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        f64::from(self.bytes) / secs / 1024.0
    }
}

pub struct FlashDriver<S: SessionOps> {
    session: S,
    /// Skip option-byte correction during `setup`.
    skip_checks: bool,
    /// Whether `start` should force the target into its bootloader first.
    init_bootloader: bool,
}

impl<S: SessionOps> FlashDriver<S> {
    pub fn new(session: S, skip_checks: bool, init_bootloader: bool) -> Self {
        FlashDriver {
            session,
            skip_checks,
            init_bootloader,
        }
    }

    /// Run the action to completion, retrying through link failures until
    /// it succeeds, hits a fatal condition, or the user interrupts. The
    /// session is released on every exit path.
    pub fn run(&mut self, action: &Action) -> Result<Report> {
        let result = self.run_inner(action);
        self.session.cleanup(false);
        result
    }

    fn run_inner(&mut self, action: &Action) -> Result<Report> {
        self.session.init()?;

        let mut stage = Stage::First;
        loop {
            if is_interrupt_requested() {
                return Err(Error::Cancelled);
            }
            match self.session.start(self.init_bootloader) {
                StartOutcome::Ready => {}
                StartOutcome::Retry(reason) => {
                    debug!("handshake failed ({reason}), retrying");
                    continue;
                }
                StartOutcome::Fatal(reason) => {
                    return Err(Error::ProtocolFatal(reason));
                }
            }

            match self.execute(action, &mut stage) {
                Ok(Some(report)) => return Ok(report),
                // Mid-operation device reset, handshake again.
                Ok(None) => continue,
                Err(e) if e.is_retryable() => {
                    info!("operation failed ({e}), restarting session");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One pass over the action with a live session. `Ok(None)` asks the
    /// outer loop for a fresh handshake with `stage` advanced.
    fn execute(&mut self, action: &Action, stage: &mut Stage) -> Result<Option<Report>> {
        let started = Instant::now();
        match action {
            Action::Test => Ok(Some(Report::default())),
            Action::Setup => {
                self.session.setup(self.skip_checks)?;
                Ok(Some(Report::default()))
            }
            Action::Protect => {
                self.session.protect()?;
                Ok(Some(Report::default()))
            }
            Action::Unprotect => {
                self.session.unprotect()?;
                Ok(Some(Report::default()))
            }
            Action::Dump => {
                let device = self.session.dump()?;
                Ok(Some(Report {
                    device: Some(device),
                    ..Report::default()
                }))
            }
            Action::DumpEeprom => {
                let eeprom = self.session.dump_emulated_eeprom()?;
                Ok(Some(Report {
                    eeprom: Some(eeprom),
                    ..Report::default()
                }))
            }
            Action::EraseEeprom => {
                self.session.erase_emulated_eeprom()?;
                Ok(Some(Report::default()))
            }
            Action::Register(reg) => {
                let header =
                    DeviceHeader::new(reg.board_type, reg.version, reg.serial, reg.key);
                self.session.write_header(reg.slot, &header)?;
                Ok(Some(Report::default()))
            }
            Action::Flash { unprotect } => self.run_flash(*unprotect, stage, started),
            Action::FlashBootloader => self.run_flash_bootloader(stage, started),
        }
    }

    fn run_flash(
        &mut self,
        unprotect: bool,
        stage: &mut Stage,
        started: Instant,
    ) -> Result<Option<Report>> {
        if unprotect && *stage == Stage::First {
            self.session.setup(self.skip_checks)?;
            self.session.unprotect()?;
            // Protection change applies after the device-side reset.
            *stage = Stage::Second;
            return Ok(None);
        }

        if !unprotect {
            self.session.setup(self.skip_checks)?;
        }
        self.session.erase()?;
        self.session.flash()?;
        if unprotect {
            self.session.protect()?;
        }
        self.session.reset()?;

        Ok(Some(Report {
            elapsed: started.elapsed(),
            bytes: self.session.image_len(),
            ..Report::default()
        }))
    }

    fn run_flash_bootloader(
        &mut self,
        stage: &mut Stage,
        started: Instant,
    ) -> Result<Option<Report>> {
        if *stage == Stage::First {
            let header = self.session.read_header(0)?;
            if header.is_clear() {
                return Err(Error::NotRegistered);
            }
            if !header.is_valid() {
                return Err(Error::HeaderCorrupt);
            }
            let board = header
                .board()
                .ok_or_else(|| Error::Unsupported(format!("board type {}", header.board_type)))?;

            let name = payload_name(board, header.version);
            let payload = bootloaders::find(&name)
                .ok_or_else(|| Error::BootloaderNotFound(name.clone()))?;
            info!("using embedded payload {name}");

            self.session.load_data(payload, crate::board::FLASH_BASE);
            self.session.setup(self.skip_checks)?;
            self.session.unprotect()?;
            *stage = Stage::Second;
            return Ok(None);
        }

        // The payload lands in the bootloader region, so erase the sectors
        // it covers rather than the application region.
        self.session.erase_bootloader()?;
        self.session.flash()?;
        self.session.protect()?;
        self.session.reset()?;

        Ok(Some(Report {
            elapsed: started.elapsed(),
            bytes: self.session.image_len(),
            ..Report::default()
        }))
    }
}

/// Name of the embedded bootloader payload for a registered device.
pub fn payload_name(board: BoardType, version: u32) -> String {
    let (a, b, c, _) = unpack_version(version);
    let suffix = match board {
        BoardType::Mini => "mini",
        BoardType::Core2 => "big",
        BoardType::Pro => "pro",
    };
    format!("bootloader_{a}_{b}_{c}_{suffix}")
}
