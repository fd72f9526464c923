//! Bootloader session state machine.
//!
//! A session owns a [`Link`] and speaks the target's USART system-bootloader
//! command set over it. The session itself is deliberately dumb about
//! failure: any I/O or protocol hiccup surfaces as a retryable error and the
//! driver restarts the whole session from the handshake, because a failure
//! mid-protocol usually means the byte stream is desynchronized and only a
//! fresh autobaud sync recovers it.
//!
//! No destructive operation runs before the handshake has produced
//! [`StartOutcome::Ready`].

use std::time::Duration;

use byteorder::{BigEndian, ByteOrder};
use log::{debug, info, trace, warn};

use crate::board;
use crate::error::{Error, Result};
use crate::header::{DeviceHeader, SLOT_SIZE};
use crate::image::HexImage;
use crate::is_interrupt_requested;
use crate::link::{Link, bridge};
use crate::protocol::stm32::{self, commands};

/// Progress callback, `(bytes_done, total_bytes)`.
///
/// `bytes_done == u32::MAX` is a display-reset sentinel, never a byte count.
pub type ProgressFn = dyn FnMut(u32, u32) + Send;

/// Sentinel value telling the UI to clear and redraw its progress line.
pub const PROGRESS_RESET: u32 = u32::MAX;

/// Outcome of a handshake attempt.
#[derive(Debug)]
pub enum StartOutcome {
    /// Device answered, session is live.
    Ready,
    /// No or garbled answer. Worth another attempt.
    Retry(String),
    /// Stop now. User interrupt or an unrecoverable mismatch.
    Fatal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Idle,
    Ready,
    Aborted,
}

/// Identity and diagnostic fields reported by `dump`.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub chip_id: u16,
    pub bootloader_version: u8,
    pub header: DeviceHeader,
    pub option_bytes: Vec<u8>,
}

/// Erase commands can take seconds on large sectors.
const ERASE_TIMEOUT: Duration = Duration::from_secs(30);
const IO_TIMEOUT: Duration = Duration::from_millis(500);

pub struct BootloaderSession<L: Link> {
    link: L,
    state: SessionState,
    image: Option<HexImage>,
    progress: Option<Box<ProgressFn>>,
    /// Board has the USB bridge wired to BOOT0/reset, so the session can
    /// put the target into bootloader mode itself.
    hardware_bridge: bool,
}

impl<L: Link> BootloaderSession<L> {
    pub fn new(link: L, hardware_bridge: bool) -> Self {
        BootloaderSession {
            link,
            state: SessionState::Idle,
            image: None,
            progress: None,
            hardware_bridge,
        }
    }

    /// Install the progress callback used by `flash`.
    pub fn set_progress(&mut self, progress: Box<ProgressFn>) {
        self.progress = Some(progress);
    }

    /// Attach the image to program from a hex file.
    pub fn load<P: AsRef<std::path::Path>>(&mut self, path: P) -> Result<()> {
        self.image = Some(HexImage::load(path)?);
        Ok(())
    }

    /// Attach an already decoded image.
    pub fn set_image(&mut self, image: HexImage) {
        self.image = Some(image);
    }

    /// Attach a raw binary payload at the given base address.
    pub fn load_data(&mut self, bytes: &[u8], base: u32) {
        self.image = Some(HexImage::load_data(bytes, base));
    }

    pub fn image(&self) -> Option<&HexImage> {
        self.image.as_ref()
    }

    /// Prepare the session without touching the target.
    pub fn init(&mut self) -> Result<()> {
        self.link.set_timeout(IO_TIMEOUT)?;
        self.link.clear_buffers()?;
        Ok(())
    }

    /// Attempt the handshake.
    ///
    /// With `init_bootloader` set and a hardware bridge present, the target
    /// is first forced into its bootloader via the control lines. The
    /// autobaud byte is then sent and a single reply byte decides the
    /// outcome. A NACK reply means the bootloader is already synchronized
    /// from an earlier attempt and counts as success.
    pub fn start(&mut self, init_bootloader: bool) -> StartOutcome {
        if is_interrupt_requested() {
            self.state = SessionState::Aborted;
            return StartOutcome::Fatal("interrupted".into());
        }
        if self.state == SessionState::Aborted {
            return StartOutcome::Fatal("session aborted".into());
        }

        match self.handshake(init_bootloader) {
            Ok(()) => {
                info!("bootloader answered on {}", self.link.name());
                self.state = SessionState::Ready;
                StartOutcome::Ready
            }
            Err(e) if e.is_retryable() => {
                self.state = SessionState::Idle;
                StartOutcome::Retry(e.to_string())
            }
            Err(e) => {
                self.state = SessionState::Aborted;
                StartOutcome::Fatal(e.to_string())
            }
        }
    }

    fn handshake(&mut self, init_bootloader: bool) -> Result<()> {
        if init_bootloader && self.hardware_bridge {
            bridge::enter_bootloader(&mut self.link)?;
        }
        self.link.clear_buffers()?;
        self.link.write_all_bytes(&[stm32::INIT])?;

        let mut reply = [0u8; 1];
        self.read_reply(&mut reply)?;
        match reply[0] {
            stm32::ACK => Ok(()),
            // Already synced from a previous attempt.
            stm32::NACK => Ok(()),
            other => Err(Error::Protocol(format!(
                "unexpected handshake reply 0x{other:02X}"
            ))),
        }
    }

    /// Read exactly `buf.len()` reply bytes, turning a link timeout into
    /// [`Error::Timeout`] so the caller sees what stalled.
    fn read_reply(&mut self, buf: &mut [u8]) -> Result<()> {
        self.link.read_exact(buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                Error::Timeout(format!("no reply from {}", self.link.name()))
            } else {
                Error::Io(e)
            }
        })
    }

    fn require_ready(&self) -> Result<()> {
        if self.state != SessionState::Ready {
            return Err(Error::Protocol("session not ready".into()));
        }
        Ok(())
    }

    fn read_ack(&mut self) -> Result<()> {
        let mut reply = [0u8; 1];
        self.read_reply(&mut reply)?;
        match reply[0] {
            stm32::ACK => Ok(()),
            stm32::NACK => Err(Error::Protocol("device NACKed".into())),
            other => Err(Error::Protocol(format!("unexpected reply 0x{other:02X}"))),
        }
    }

    fn command(&mut self, cmd: u8) -> Result<()> {
        trace!("command 0x{cmd:02X}");
        self.link.write_all_bytes(&stm32::command_frame(cmd))?;
        self.read_ack()
    }

    fn send_address(&mut self, addr: u32) -> Result<()> {
        self.link.write_all_bytes(&stm32::address_frame(addr))?;
        self.read_ack()
    }

    /// Product id of the target, two big-endian bytes.
    pub fn chip_id(&mut self) -> Result<u16> {
        self.require_ready()?;
        self.command(commands::GET_ID)?;
        let mut len = [0u8; 1];
        self.read_reply(&mut len)?;
        let mut id = vec![0u8; usize::from(len[0]) + 1];
        self.read_reply(&mut id)?;
        self.read_ack()?;
        Ok(BigEndian::read_u16(&id[..2]))
    }

    /// Bootloader protocol version byte.
    pub fn bootloader_version(&mut self) -> Result<u8> {
        self.require_ready()?;
        self.command(commands::GET_VERSION)?;
        let mut reply = [0u8; 3];
        self.read_reply(&mut reply)?;
        self.read_ack()?;
        Ok(reply[0])
    }

    /// Read an arbitrary memory range in bounded chunks.
    pub fn read_memory(&mut self, addr: u32, len: usize) -> Result<Vec<u8>> {
        self.require_ready()?;
        let mut out = Vec::with_capacity(len);
        let mut offset = 0usize;
        while offset < len {
            let chunk = (len - offset).min(stm32::MAX_CHUNK);
            self.command(commands::READ_MEMORY)?;
            self.send_address(addr + offset as u32)?;
            self.link
                .write_all_bytes(&stm32::read_length_frame(chunk))?;
            self.read_ack()?;
            let mut buf = vec![0u8; chunk];
            self.read_reply(&mut buf)?;
            out.extend_from_slice(&buf);
            offset += chunk;
        }
        Ok(out)
    }

    /// Write an arbitrary memory range in bounded chunks.
    pub fn write_memory(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        self.require_ready()?;
        for (i, chunk) in data.chunks(stm32::MAX_CHUNK).enumerate() {
            self.command(commands::WRITE_MEMORY)?;
            self.send_address(addr + (i * stm32::MAX_CHUNK) as u32)?;
            self.link.write_all_bytes(&stm32::data_frame(chunk))?;
            self.read_ack()?;
        }
        Ok(())
    }

    fn erase_sectors(&mut self, sectors: &[u16]) -> Result<()> {
        self.require_ready()?;
        self.command(commands::EXTENDED_ERASE)?;
        self.link.write_all_bytes(&stm32::erase_frame(sectors))?;
        let saved = self.link.timeout();
        self.link.set_timeout(ERASE_TIMEOUT)?;
        let ack = self.read_ack();
        self.link.set_timeout(saved)?;
        ack
    }

    /// Erase the application sectors. Idempotent: erasing erased flash
    /// succeeds. The bootloader, header, and EEPROM sectors are untouched.
    pub fn erase(&mut self) -> Result<()> {
        info!("erasing application sectors");
        self.erase_sectors(&board::APP_SECTORS)
    }

    /// Erase the bootloader sectors. NOR programming only clears bits, so
    /// these must be erased before a replacement bootloader is written.
    /// Fails unless write protection was lifted first.
    pub fn erase_bootloader(&mut self) -> Result<()> {
        info!("erasing bootloader sectors");
        let sectors: Vec<u16> = board::BOOT_SECTORS.iter().map(|&s| u16::from(s)).collect();
        self.erase_sectors(&sectors)
    }

    /// Program the attached image and verify it by readback.
    ///
    /// Progress is reported after every chunk. A failure mid-transfer emits
    /// the display-reset sentinel and bubbles up retryable so the driver can
    /// restart the session; there is no partial resume.
    pub fn flash(&mut self) -> Result<()> {
        self.require_ready()?;
        let image = self
            .image
            .clone()
            .ok_or_else(|| Error::InvalidArgument("no image loaded".into()))?;

        let start = image.start_address();
        let end = start + image.total_length();
        if start < board::FLASH_BASE || end > board::APP_END {
            return Err(Error::InvalidArgument(format!(
                "image range 0x{start:08X}..0x{end:08X} outside device flash"
            )));
        }

        let total = image.total_length();
        match self.flash_inner(&image, total) {
            Ok(()) => Ok(()),
            Err(e) => {
                if let Some(cb) = self.progress.as_mut() {
                    cb(PROGRESS_RESET, total);
                }
                Err(e)
            }
        }
    }

    fn flash_inner(&mut self, image: &HexImage, total: u32) -> Result<()> {
        let start = image.start_address();
        let mut done: u32 = 0;
        while done < total {
            if is_interrupt_requested() {
                self.state = SessionState::Aborted;
                return Err(Error::Cancelled);
            }
            let chunk = image.chunk(done, stm32::MAX_CHUNK);
            let addr = start + done;
            self.write_memory(addr, chunk)?;
            let readback = self.read_memory(addr, chunk.len())?;
            if readback != chunk {
                return Err(Error::Protocol(format!(
                    "verify mismatch at 0x{addr:08X}"
                )));
            }
            done += chunk.len() as u32;
            if let Some(cb) = self.progress.as_mut() {
                cb(done, total);
            }
        }
        debug!("programmed and verified {total} bytes at 0x{start:08X}");
        Ok(())
    }

    /// Leave the bootloader and run the application.
    pub fn reset(&mut self) -> Result<()> {
        self.require_ready()?;
        self.command(commands::GO)?;
        self.send_address(board::APP_BASE)?;
        self.state = SessionState::Idle;
        Ok(())
    }

    /// Write-protect the bootloader sectors.
    ///
    /// The bootloader ACKs and then resets the device to apply the option
    /// bytes, so anything the caller does next may time out and fall into
    /// the normal retry path.
    pub fn protect(&mut self) -> Result<()> {
        self.require_ready()?;
        self.command(commands::WRITE_PROTECT)?;
        self.link
            .write_all_bytes(&stm32::protect_frame(&board::BOOT_SECTORS))?;
        let saved = self.link.timeout();
        self.link.set_timeout(ERASE_TIMEOUT)?;
        let ack = self.read_ack();
        self.link.set_timeout(saved)?;
        ack
    }

    /// Remove write protection from the bootloader sectors.
    ///
    /// The change only takes effect after the device-side reset, so the
    /// caller must re-handshake before erase or program can touch the
    /// unprotected sectors.
    pub fn unprotect(&mut self) -> Result<()> {
        self.require_ready()?;
        self.command(commands::WRITE_UNPROTECT)?;
        // Second ACK arrives once the option bytes are rewritten.
        let saved = self.link.timeout();
        self.link.set_timeout(ERASE_TIMEOUT)?;
        let ack = self.read_ack();
        self.link.set_timeout(saved)?;
        ack
    }

    /// Read identity and diagnostic fields. No mutation.
    pub fn dump(&mut self) -> Result<DeviceInfo> {
        let chip_id = self.chip_id()?;
        let bootloader_version = self.bootloader_version()?;
        let header = self.read_header(0)?;
        let option_bytes =
            self.read_memory(board::OPTION_BYTES, board::OPTION_BYTES_LEN)?;
        Ok(DeviceInfo {
            chip_id,
            bootloader_version,
            header,
            option_bytes,
        })
    }

    /// Check the option bytes and correct them unless `skip_checks`.
    pub fn setup(&mut self, skip_checks: bool) -> Result<()> {
        let bytes = self.read_memory(board::OPTION_BYTES, board::OPTION_BYTES_LEN)?;
        let mismatch = board::OPTION_BYTES_EXPECTED
            .iter()
            .any(|&(off, val)| bytes.get(off).copied() != Some(val));
        if !mismatch {
            return Ok(());
        }
        if skip_checks {
            warn!("option bytes differ from expected values, leaving them");
            return Ok(());
        }
        info!("correcting option bytes");
        let mut fixed = bytes;
        for &(off, val) in &board::OPTION_BYTES_EXPECTED {
            fixed[off] = val;
        }
        self.write_memory(board::OPTION_BYTES, &fixed)?;
        // Option byte reload resets the device.
        self.state = SessionState::Idle;
        Ok(())
    }

    /// Read one identity header slot.
    pub fn read_header(&mut self, slot: usize) -> Result<DeviceHeader> {
        if slot >= board::HEADER_SLOTS {
            return Err(Error::InvalidArgument(format!("header slot {slot}")));
        }
        let addr = board::HEADER_BASE + (slot * SLOT_SIZE) as u32;
        let bytes = self.read_memory(addr, SLOT_SIZE)?;
        let mut raw = [0u8; SLOT_SIZE];
        raw.copy_from_slice(&bytes);
        Ok(DeviceHeader::decode(&raw))
    }

    /// Write an identity header, refusing unless the slot is still clear.
    pub fn write_header(&mut self, slot: usize, header: &DeviceHeader) -> Result<()> {
        let existing = self.read_header(slot)?;
        if !existing.is_clear() {
            return if existing.is_valid() {
                Err(Error::AlreadyRegistered)
            } else {
                Err(Error::HeaderCorrupt)
            };
        }
        let addr = board::HEADER_BASE + (slot * SLOT_SIZE) as u32;
        self.write_memory(addr, &header.encode())
    }

    /// Read the full emulated EEPROM region.
    pub fn dump_emulated_eeprom(&mut self) -> Result<Vec<u8>> {
        self.read_memory(board::EEPROM_BASE, board::EEPROM_SIZE)
    }

    /// Erase the emulated EEPROM sector.
    pub fn erase_emulated_eeprom(&mut self) -> Result<()> {
        info!("erasing emulated EEPROM");
        self.erase_sectors(&board::EEPROM_SECTORS)
    }

    /// Release the session. With `reset` set, a best-effort target reset is
    /// issued first. Safe to call whether or not the handshake ever
    /// succeeded; the link close is idempotent.
    pub fn cleanup(&mut self, reset: bool) {
        if reset && self.state == SessionState::Ready {
            if let Err(e) = self.reset() {
                warn!("reset during cleanup failed: {e}");
            }
        }
        if let Err(e) = self.link.close() {
            warn!("closing {} failed: {e}", self.link.name());
        }
        self.state = SessionState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::{self, Read, Write};

    /// Link that replays a scripted byte stream and records writes.
    struct ScriptedLink {
        replies: VecDeque<u8>,
        written: Vec<u8>,
        timeout: Duration,
        baud: u32,
    }

    impl ScriptedLink {
        fn new(replies: &[u8]) -> Self {
            ScriptedLink {
                replies: replies.iter().copied().collect(),
                written: Vec::new(),
                timeout: Duration::from_millis(100),
                baud: 460_800,
            }
        }
    }

    impl Read for ScriptedLink {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.replies.pop_front() {
                Some(b) => {
                    buf[0] = b;
                    Ok(1)
                }
                None => Err(io::Error::new(io::ErrorKind::TimedOut, "script exhausted")),
            }
        }
    }

    impl Write for ScriptedLink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Link for ScriptedLink {
        fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
            self.timeout = timeout;
            Ok(())
        }
        fn timeout(&self) -> Duration {
            self.timeout
        }
        fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
            self.baud = baud;
            Ok(())
        }
        fn baud_rate(&self) -> u32 {
            self.baud
        }
        fn clear_buffers(&mut self) -> Result<()> {
            Ok(())
        }
        fn name(&self) -> &str {
            "scripted"
        }
        fn set_dtr(&mut self, _level: bool) -> Result<()> {
            Ok(())
        }
        fn set_rts(&mut self, _level: bool) -> Result<()> {
            Ok(())
        }
        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn session(replies: &[u8]) -> BootloaderSession<ScriptedLink> {
        BootloaderSession::new(ScriptedLink::new(replies), false)
    }

    #[test]
    fn handshake_ack_reaches_ready() {
        let mut s = session(&[stm32::ACK]);
        assert!(matches!(s.start(true), StartOutcome::Ready));
    }

    #[test]
    fn handshake_nack_counts_as_synced() {
        let mut s = session(&[stm32::NACK]);
        assert!(matches!(s.start(true), StartOutcome::Ready));
    }

    #[test]
    fn handshake_garbage_is_retryable() {
        let mut s = session(&[0x42]);
        assert!(matches!(s.start(true), StartOutcome::Retry(_)));
    }

    #[test]
    fn handshake_timeout_is_retryable() {
        let mut s = session(&[]);
        assert!(matches!(s.start(true), StartOutcome::Retry(_)));
    }

    #[test]
    fn destructive_op_refused_before_ready() {
        let mut s = session(&[]);
        match s.erase() {
            Err(Error::Protocol(msg)) => assert!(msg.contains("not ready")),
            other => panic!("expected refusal, got {other:?}"),
        }
    }

    #[test]
    fn erase_sends_expected_frame() {
        // handshake, command ack, erase ack
        let mut s = session(&[stm32::ACK, stm32::ACK, stm32::ACK]);
        assert!(matches!(s.start(true), StartOutcome::Ready));
        s.erase().unwrap();

        let written = &s.link.written;
        // init byte, then EXTENDED_ERASE + complement, then the sector list
        assert_eq!(written[0], stm32::INIT);
        assert_eq!(written[1], commands::EXTENDED_ERASE);
        assert_eq!(written[2], !commands::EXTENDED_ERASE);
        assert_eq!(&written[3..], &stm32::erase_frame(&board::APP_SECTORS)[..]);
    }

    #[test]
    fn bootloader_erase_names_boot_sectors() {
        let mut s = session(&[stm32::ACK, stm32::ACK, stm32::ACK]);
        assert!(matches!(s.start(true), StartOutcome::Ready));
        s.load_data(&[0u8; 512], board::FLASH_BASE);
        assert_eq!(s.image().unwrap().start_address(), board::FLASH_BASE);
        s.erase_bootloader().unwrap();

        let written = &s.link.written;
        assert_eq!(written[1], commands::EXTENDED_ERASE);
        // count-1 = 0x0001, then sectors 0x0000 and 0x0001
        assert_eq!(&written[3..], &stm32::erase_frame(&[0, 1])[..]);
    }

    #[test]
    fn erase_twice_succeeds() {
        let mut s = session(&[
            stm32::ACK, // handshake
            stm32::ACK, stm32::ACK, // first erase
            stm32::ACK, stm32::ACK, // second erase
        ]);
        assert!(matches!(s.start(true), StartOutcome::Ready));
        s.erase().unwrap();
        s.erase().unwrap();
    }

    #[test]
    fn reset_issues_go_at_app_base() {
        let mut s = session(&[stm32::ACK, stm32::ACK, stm32::ACK]);
        assert!(matches!(s.start(true), StartOutcome::Ready));
        s.reset().unwrap();

        let written = &s.link.written;
        assert_eq!(written[1], commands::GO);
        assert_eq!(&written[3..8], &stm32::address_frame(board::APP_BASE)[..]);
    }

    #[test]
    fn protect_targets_boot_sectors() {
        let mut s = session(&[stm32::ACK, stm32::ACK, stm32::ACK]);
        assert!(matches!(s.start(true), StartOutcome::Ready));
        s.protect().unwrap();

        let written = &s.link.written;
        assert_eq!(written[1], commands::WRITE_PROTECT);
        assert_eq!(
            &written[3..],
            &stm32::protect_frame(&board::BOOT_SECTORS)[..]
        );
    }

    #[test]
    fn unprotect_waits_for_second_ack() {
        let mut s = session(&[stm32::ACK, stm32::ACK, stm32::ACK]);
        assert!(matches!(s.start(true), StartOutcome::Ready));
        s.unprotect().unwrap();
        assert!(s.link.replies.is_empty());
    }

    #[test]
    fn write_header_refuses_registered_slot() {
        let mut s = session(&[]);
        s.state = SessionState::Ready;
        // Script a valid, non-clear slot as the readback.
        let existing = DeviceHeader::new(
            crate::header::BoardType::Core2,
            0x0100_0000,
            1,
            None,
        );
        let slot = existing.encode();
        let mut replies = vec![stm32::ACK, stm32::ACK, stm32::ACK];
        replies.extend_from_slice(&slot);
        s.link.replies = replies.into_iter().collect();

        let fresh = DeviceHeader::new(crate::header::BoardType::Core2, 0x0200_0000, 2, None);
        assert!(matches!(
            s.write_header(0, &fresh),
            Err(Error::AlreadyRegistered)
        ));
    }

    #[test]
    fn write_header_reports_corrupt_slot() {
        let mut s = session(&[]);
        s.state = SessionState::Ready;
        let mut slot = [0xFFu8; SLOT_SIZE];
        slot[0] = 0x7E; // unknown layout revision, not clear
        let mut replies = vec![stm32::ACK, stm32::ACK, stm32::ACK];
        replies.extend_from_slice(&slot);
        s.link.replies = replies.into_iter().collect();

        let fresh = DeviceHeader::new(crate::header::BoardType::Mini, 0x0100_0000, 3, None);
        assert!(matches!(s.write_header(0, &fresh), Err(Error::HeaderCorrupt)));
    }

    #[test]
    fn header_slot_index_is_bounded() {
        let mut s = session(&[]);
        s.state = SessionState::Ready;
        assert!(matches!(
            s.read_header(board::HEADER_SLOTS),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn flash_requires_an_image() {
        let mut s = session(&[stm32::ACK]);
        assert!(matches!(s.start(true), StartOutcome::Ready));
        assert!(matches!(s.flash(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn flash_rejects_out_of_range_image() {
        let mut s = session(&[stm32::ACK]);
        assert!(matches!(s.start(true), StartOutcome::Ready));
        s.load_data(&[0u8; 16], 0x2000_0000);
        assert!(matches!(s.flash(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn flash_programs_verifies_and_reports_progress() {
        let payload = [0xA5u8; 4];
        // handshake; write: cmd ack, addr ack, data ack; read: cmd ack,
        // addr ack, len ack, then the 4 readback bytes.
        let mut replies = vec![
            stm32::ACK, // handshake
            stm32::ACK, stm32::ACK, stm32::ACK, // write chunk
            stm32::ACK, stm32::ACK, stm32::ACK, // read chunk setup
        ];
        replies.extend_from_slice(&payload);

        let mut s = session(&replies);
        assert!(matches!(s.start(true), StartOutcome::Ready));
        s.load_data(&payload, board::APP_BASE);

        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        s.set_progress(Box::new(move |done, total| {
            seen2.lock().unwrap().push((done, total));
        }));

        s.flash().unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![(4, 4)]);
    }

    #[test]
    fn flash_verify_mismatch_emits_reset_sentinel() {
        let payload = [0xA5u8; 4];
        let mut replies = vec![
            stm32::ACK,
            stm32::ACK, stm32::ACK, stm32::ACK,
            stm32::ACK, stm32::ACK, stm32::ACK,
        ];
        replies.extend_from_slice(&[0xA5, 0xA5, 0xA5, 0x00]); // corrupted readback

        let mut s = session(&replies);
        assert!(matches!(s.start(true), StartOutcome::Ready));
        s.load_data(&payload, board::APP_BASE);

        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        s.set_progress(Box::new(move |done, total| {
            seen2.lock().unwrap().push((done, total));
        }));

        assert!(matches!(s.flash(), Err(Error::Protocol(_))));
        assert_eq!(*seen.lock().unwrap(), vec![(PROGRESS_RESET, 4)]);
    }

    #[test]
    fn cleanup_is_safe_without_handshake() {
        let mut s = session(&[]);
        s.cleanup(true);
        s.cleanup(false);
    }
}
