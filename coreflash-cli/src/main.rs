//! coreflash CLI - flash and manage CORE-family controller boards.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use console::style;
use coreflash::{
    Action, BoardType, BootloaderSession, DeviceInfo, FlashDriver, PROGRESS_RESET, Registration,
    Report, SerialLink, Target, bridge, parse_key, parse_version, unpack_version,
};
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;

mod config;
mod console_cmd;
mod serial;
mod udev;

use config::Config;
use serial::{SerialOptions, select_serial_port};

use coreflash::board::{DEFAULT_CONSOLE_BAUD, DEFAULT_FLASH_BAUD};

/// coreflash - flash and manage CORE-family controller boards.
///
/// Environment variables:
///   COREFLASH_PORT   - Default serial port
///   COREFLASH_SPEED  - Default baud rate
#[derive(Parser, Debug)]
#[command(name = "coreflash")]
#[command(disable_help_flag = true, disable_version_flag = true)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Intel-HEX file to flash.
    file: Option<PathBuf>,

    /// Flash through the on-board USB bridge (default).
    #[arg(long)]
    hard: bool,
    /// Flash through a plain serial adapter, target already in bootloader.
    #[arg(long)]
    soft: bool,

    /// Test the connection to the board.
    #[arg(long)]
    test: bool,
    /// Flash the positional hex file (implied when a file is given).
    #[arg(long)]
    flash: bool,
    /// Replace the resident bootloader with the embedded payload.
    #[arg(long)]
    flash_bootloader: bool,
    /// Remove bootloader write protection.
    #[arg(long)]
    unprotect: bool,
    /// Write-protect the bootloader.
    #[arg(long)]
    protect: bool,
    /// Dump device identity and diagnostics.
    #[arg(long)]
    dump: bool,
    /// Dump the emulated EEPROM region.
    #[arg(long)]
    dump_eeprom: bool,
    /// Erase the emulated EEPROM region.
    #[arg(long)]
    erase_eeprom: bool,
    /// Check and correct the option bytes.
    #[arg(long)]
    setup: bool,
    /// Register the board identity (requires --id, --ver and a variant).
    #[arg(long)]
    register: bool,

    /// Serial id for --register.
    #[arg(long)]
    id: Option<u32>,
    /// Version for --register, a.b.c or a.b.c.d.
    #[arg(long, alias = "version")]
    ver: Option<String>,
    /// Register as the mini variant.
    #[arg(long)]
    mini: bool,
    /// Register as the core2 variant.
    #[arg(long, alias = "big")]
    core2: bool,
    /// Register as the pro variant.
    #[arg(long)]
    pro: bool,
    /// Header slot for --register.
    #[arg(long, default_value_t = 0)]
    header_id: usize,
    /// 32-hex-character board key for --register.
    #[arg(long)]
    key: Option<String>,

    /// Route the USB bridge to the host SoC, controller held in reset.
    #[arg(long)]
    switch_to_edison: bool,
    /// Route the USB bridge to the host SoC only.
    #[arg(long)]
    switch_to_edison_only: bool,
    /// Route the USB bridge to the controller.
    #[arg(long)]
    switch_to_stm32: bool,
    /// Route the USB bridge to the radio module.
    #[arg(long)]
    switch_to_esp: bool,

    /// Serial device path.
    #[arg(short, long, env = "COREFLASH_PORT")]
    device: Option<String>,
    /// Baud rate override.
    #[arg(short, long, env = "COREFLASH_SPEED")]
    speed: Option<u32>,
    /// Open the serial console (after flashing, or standalone).
    #[arg(long)]
    console: bool,
    /// Install udev rules for the board bridges (Linux).
    #[arg(long)]
    fix_permissions: bool,
    /// Verbose protocol logging.
    #[arg(long)]
    debug: bool,
    /// Skip option-byte checks during setup.
    #[arg(long)]
    no_settings_check: bool,
    /// Never prompt for port selection.
    #[arg(long)]
    non_interactive: bool,
}

/// The single operation this invocation performs.
enum Op {
    Session(Action),
    Switch(Target),
    FixPermissions,
    ConsoleOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UsageError {
    TooMany,
    Invalid,
}

impl std::fmt::Display for UsageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UsageError::TooMany => f.write_str("only one action is allowed"),
            UsageError::Invalid => f.write_str("invalid action"),
        }
    }
}

impl std::error::Error for UsageError {}

fn usage() {
    let exe = "coreflash";
    eprintln!("Usage:");
    eprintln!();
    eprintln!("Flashing a board:");
    eprintln!("  {exe} [--hard] [--speed speed] file.hex");
    eprintln!("  {exe} --soft --device /dev/ttyUSB0 file.hex");
    eprintln!();
    eprintln!("Flashing bootloader:");
    eprintln!("  {exe} --flash-bootloader");
    eprintln!();
    eprintln!("Registering a board:");
    eprintln!("  {exe} --register --id N --ver a.b.c[.d] --mini|--core2|--pro [--key HEX32]");
    eprintln!();
    eprintln!("Other commands:");
    eprintln!("  {exe} <other options>");
    eprintln!();
    eprintln!("other options:");
    eprintln!("       --help, --usage    prints this message");
    eprintln!("       --test             tests connection to the board");
    eprintln!("       --setup            checks and corrects option bits");
    eprintln!("       --protect          protects bootloader against");
    eprintln!("                          unintended modifications (only valid with --hard)");
    eprintln!("       --unprotect        unprotects bootloader against");
    eprintln!("                          unintended modifications (only valid with --hard)");
    eprintln!("       --dump             dumps device info (only valid with --hard)");
    eprintln!("       --dump-eeprom      dumps the emulated EEPROM region");
    eprintln!("       --erase-eeprom     erases the emulated EEPROM region");
    eprintln!("       --switch-to-edison, --switch-to-edison-only,");
    eprintln!("       --switch-to-stm32, --switch-to-esp");
    eprintln!("                          route the USB bridge to an on-board chip");
    eprintln!("       --console          opens a serial console");
    eprintln!("       --fix-permissions  installs udev rules (Linux)");
}

impl Cli {
    fn registration(&self) -> Result<Option<Registration>> {
        let variants = [
            (self.mini, BoardType::Mini),
            (self.core2, BoardType::Core2),
            (self.pro, BoardType::Pro),
        ];
        let picked: Vec<BoardType> = variants
            .iter()
            .filter(|(flag, _)| *flag)
            .map(|(_, t)| *t)
            .collect();

        let (Some(id), Some(ver), [board_type]) = (self.id, self.ver.as_deref(), picked.as_slice())
        else {
            return Ok(None);
        };

        let version = parse_version(ver)?;
        let key = match self.key.as_deref() {
            Some(text) => Some(parse_key(text)?),
            None => None,
        };
        Ok(Some(Registration {
            board_type: *board_type,
            version,
            serial: id,
            key,
            slot: self.header_id,
        }))
    }

    /// Apply the action-resolution rules: at most one action, flash implied
    /// by a bare hex file, `--unprotect file.hex` meaning flash with the
    /// protection lifted first. Malformed `--register` parameters surface
    /// with their own message before any device access.
    fn resolve(&self) -> Result<Op> {
        if self.hard && self.soft {
            return Err(UsageError::Invalid.into());
        }

        let mut ops: Vec<Op> = Vec::new();

        if self.flash {
            ops.push(Op::Session(Action::Flash { unprotect: false }));
        }
        if self.test {
            ops.push(Op::Session(Action::Test));
        }
        if self.setup {
            ops.push(Op::Session(Action::Setup));
        }
        if self.protect {
            ops.push(Op::Session(Action::Protect));
        }
        if self.unprotect {
            if self.file.is_some() {
                ops.push(Op::Session(Action::Flash { unprotect: true }));
            } else {
                ops.push(Op::Session(Action::Unprotect));
            }
        }
        if self.dump {
            ops.push(Op::Session(Action::Dump));
        }
        if self.dump_eeprom {
            ops.push(Op::Session(Action::DumpEeprom));
        }
        if self.erase_eeprom {
            ops.push(Op::Session(Action::EraseEeprom));
        }
        if self.register {
            match self.registration()? {
                Some(reg) => ops.push(Op::Session(Action::Register(reg))),
                // Missing --id/--ver/variant.
                None => return Err(UsageError::Invalid.into()),
            }
        }
        if self.flash_bootloader {
            ops.push(Op::Session(Action::FlashBootloader));
        }
        if self.switch_to_edison {
            ops.push(Op::Switch(Target::Edison));
        }
        if self.switch_to_edison_only {
            ops.push(Op::Switch(Target::EdisonOnly));
        }
        if self.switch_to_stm32 {
            ops.push(Op::Switch(Target::Stm32));
        }
        if self.switch_to_esp {
            ops.push(Op::Switch(Target::Esp));
        }
        if self.fix_permissions {
            ops.push(Op::FixPermissions);
        }

        if ops.len() > 1 {
            return Err(UsageError::TooMany.into());
        }
        let op = match ops.into_iter().next() {
            Some(op) => op,
            // No explicit action: a hex file means flash, a lone --console
            // is the console, anything else is a usage error.
            None if self.file.is_some() => Op::Session(Action::Flash { unprotect: false }),
            None if self.console => Op::ConsoleOnly,
            None => return Err(UsageError::Invalid.into()),
        };

        // Flashing needs a hex file, and soft flashing an explicit port.
        if let Op::Session(Action::Flash { .. }) = &op {
            if self.file.is_none() {
                return Err(UsageError::Invalid.into());
            }
            if self.soft && self.device.is_none() {
                return Err(UsageError::Invalid.into());
            }
        }
        Ok(op)
    }
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e:#}", style("error:").red().bold());
            1
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let raw_args: Vec<String> = env::args().collect();
    let wants_help = raw_args
        .iter()
        .any(|a| a == "-h" || a == "--help" || a == "--usage");
    if wants_help || raw_args.len() <= 1 {
        usage();
        return Ok(1);
    }

    let cli = Cli::parse();

    let log_level = if cli.debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.debug)
        .format_timestamp(None)
        .init();

    debug!("coreflash v{}", env!("CARGO_PKG_VERSION"));

    // Ctrl+C sets a flag the library polls between protocol steps; the link
    // itself is closed by scope, not by the handler.
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let flag = interrupted.clone();
        coreflash::set_interrupt_checker(move || flag.load(Ordering::Relaxed));
        let flag = interrupted.clone();
        ctrlc::set_handler(move || {
            flag.store(true, Ordering::Relaxed);
        })
        .context("failed to install interrupt handler")?;
    }

    let mut config = Config::load();

    let op = match cli.resolve() {
        Ok(op) => op,
        Err(e) => {
            if let Some(usage_err) = e.downcast_ref::<UsageError>() {
                eprintln!("{usage_err}");
                eprintln!();
                usage();
                return Ok(1);
            }
            return Err(e);
        }
    };

    match op {
        Op::FixPermissions => {
            udev::fix_permissions()?;
            return Ok(0);
        }
        Op::ConsoleOnly => {
            let device = resolve_device(&cli, &mut config)?;
            let speed = console_speed(&cli, &config);
            console_cmd::run_console(&device, speed)?;
            return Ok(0);
        }
        Op::Switch(target) => {
            let device = resolve_device(&cli, &mut config)?;
            let mut link = SerialLink::open(&device, console_speed(&cli, &config))
                .with_context(|| format!("failed to open {device}"))?;
            bridge::select_target(&mut link, target)?;
            eprintln!("Switched to {target}");
            return Ok(0);
        }
        Op::Session(action) => {
            let device = resolve_device(&cli, &mut config)?;
            run_session(&cli, &config, &device, &action)?;
            if cli.console {
                console_cmd::run_console(&device, console_speed(&cli, &config))?;
            }
        }
    }

    Ok(0)
}

fn resolve_device(cli: &Cli, config: &mut Config) -> Result<String> {
    let options = SerialOptions {
        device: cli.device.clone(),
        non_interactive: cli.non_interactive,
    };
    select_serial_port(&options, config)
}

fn flash_speed(cli: &Cli, config: &Config) -> u32 {
    cli.speed
        .filter(|&s| s > 0)
        .or(config.port.connection.speed)
        .unwrap_or(DEFAULT_FLASH_BAUD)
}

fn console_speed(cli: &Cli, config: &Config) -> u32 {
    cli.speed
        .filter(|&s| s > 0)
        .or(config.port.connection.console_speed)
        .unwrap_or(DEFAULT_CONSOLE_BAUD)
}

fn run_session(cli: &Cli, config: &Config, device: &str, action: &Action) -> Result<()> {
    let speed = flash_speed(cli, config);

    // Decode the image before any device contact so a bad hex file aborts
    // without opening the port.
    let image = if matches!(action, Action::Flash { .. }) {
        let file = cli
            .file
            .as_ref()
            .ok_or_else(|| anyhow!("no hex file given"))?;
        let image = coreflash::HexImage::load(file)
            .with_context(|| format!("unable to load hex file {}", file.display()))?;
        eprintln!(
            "Flashing {} to {} at {} baud",
            file.display(),
            device,
            speed
        );
        Some(image)
    } else {
        None
    };

    let link = SerialLink::open(device, speed)
        .with_context(|| format!("failed to open {device} at {speed} baud"))?;

    // Soft flashing talks to a target already sitting in its bootloader
    // through a plain adapter; hard flashing drives the on-board bridge.
    let hard = !cli.soft;
    let mut session = BootloaderSession::new(link, hard);
    if let Some(image) = image {
        session.set_image(image);
    }

    let bar = make_progress_bar();
    {
        let bar = bar.clone();
        session.set_progress(Box::new(move |done, total| {
            if done == PROGRESS_RESET {
                bar.reset();
                return;
            }
            if bar.length() != Some(u64::from(total)) {
                bar.set_length(u64::from(total));
            }
            bar.set_position(u64::from(done));
        }));
    }

    let skip_checks = cli.no_settings_check || config.flash.no_settings_check;
    let mut driver = FlashDriver::new(session, skip_checks, hard);
    let report = driver.run(action);
    bar.finish_and_clear();
    let report = report?;

    print_report(action, &report);
    Ok(())
}

fn make_progress_bar() -> ProgressBar {
    let bar = ProgressBar::hidden();
    bar.set_style(
        ProgressStyle::default_bar()
            .template("Programming device... [{bar:30}] {bytes}/{total_bytes} {percent:>3}%")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("= "),
    );
    bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    bar
}

fn print_report(action: &Action, report: &Report) {
    match action {
        Action::Flash { .. } | Action::FlashBootloader => {
            let millis = report.elapsed.as_millis();
            let kbps = report.throughput_kbps();
            println!("==== Summary ====");
            println!("Time: {millis} ms");
            println!("Speed: {kbps:.2} KBps ({} bps)", (kbps * 8.0 * 1024.0) as u64);
        }
        Action::Test => println!("Device answered."),
        Action::Dump => {
            if let Some(info) = &report.device {
                print_device_info(info);
            }
        }
        Action::DumpEeprom => {
            if let Some(eeprom) = &report.eeprom {
                hexdump(eeprom);
            }
        }
        Action::Register(_) => println!("Registered."),
        Action::Setup => println!("Configuration OK."),
        Action::Protect => println!("Bootloader protected."),
        Action::Unprotect => println!("Bootloader unprotected, reset the board."),
        Action::EraseEeprom => println!("Emulated EEPROM erased."),
    }
}

fn print_device_info(info: &DeviceInfo) {
    println!("Chip id:            0x{:04X}", info.chip_id);
    println!(
        "Bootloader version: {}.{}",
        info.bootloader_version >> 4,
        info.bootloader_version & 0x0F
    );
    let header = &info.header;
    if header.is_clear() {
        println!("Header:             not registered");
    } else if !header.is_valid() {
        println!("Header:             corrupt");
    } else {
        let board = header
            .board()
            .map_or_else(|| format!("unknown ({})", header.board_type), |b| b.to_string());
        let (a, b, c, d) = unpack_version(header.version);
        println!("Board type:         {board}");
        println!("Version:            {a}.{b}.{c}.{d}");
        println!("Serial id:          {}", header.serial);
        println!(
            "Key:                {}",
            if header.key.is_some() { "present" } else { "none" }
        );
    }
    print!("Option bytes:      ");
    for byte in &info.option_bytes {
        print!(" {byte:02X}");
    }
    println!();
}

fn hexdump(data: &[u8]) {
    for (i, row) in data.chunks(16).enumerate() {
        print!("{:08X}: ", i * 16);
        for byte in row {
            print!("{byte:02X} ");
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("coreflash").chain(args.iter().copied())).unwrap()
    }

    fn usage_kind(result: Result<Op>) -> Option<UsageError> {
        result
            .err()
            .and_then(|e| e.downcast_ref::<UsageError>().copied())
    }

    #[test]
    fn bare_file_resolves_to_flash() {
        let cli = parse(&["firmware.hex"]);
        match cli.resolve() {
            Ok(Op::Session(Action::Flash { unprotect: false })) => {}
            _ => panic!("expected flash"),
        }
    }

    #[test]
    fn unprotect_with_file_lifts_protection_first() {
        let cli = parse(&["--unprotect", "firmware.hex"]);
        match cli.resolve() {
            Ok(Op::Session(Action::Flash { unprotect: true })) => {}
            _ => panic!("expected flash with unprotect"),
        }
    }

    #[test]
    fn two_actions_are_rejected() {
        let cli = parse(&["--dump", "--protect"]);
        assert_eq!(usage_kind(cli.resolve()), Some(UsageError::TooMany));
    }

    #[test]
    fn explicit_flash_plus_other_action_is_rejected() {
        let cli = parse(&["--flash", "--dump", "firmware.hex"]);
        assert_eq!(usage_kind(cli.resolve()), Some(UsageError::TooMany));
    }

    #[test]
    fn explicit_flash_without_file_is_invalid() {
        let cli = parse(&["--flash"]);
        assert_eq!(usage_kind(cli.resolve()), Some(UsageError::Invalid));
    }

    #[test]
    fn version_flag_aliases_ver() {
        let cli = parse(&["--register", "--id", "3", "--version", "2.0.0", "--pro"]);
        match cli.resolve() {
            Ok(Op::Session(Action::Register(reg))) => {
                assert_eq!(unpack_version(reg.version), (2, 0, 0, 0));
                assert_eq!(reg.board_type, BoardType::Pro);
            }
            _ => panic!("expected register"),
        }
    }

    #[test]
    fn no_action_is_invalid() {
        let cli = parse(&["--device", "/dev/ttyUSB0"]);
        assert_eq!(usage_kind(cli.resolve()), Some(UsageError::Invalid));
    }

    #[test]
    fn register_requires_id_ver_and_variant() {
        let cli = parse(&["--register", "--id", "42"]);
        assert_eq!(usage_kind(cli.resolve()), Some(UsageError::Invalid));

        let cli = parse(&["--register", "--id", "42", "--ver", "1.2.3", "--core2"]);
        match cli.resolve() {
            Ok(Op::Session(Action::Register(reg))) => {
                assert_eq!(reg.serial, 42);
                assert_eq!(unpack_version(reg.version), (1, 2, 3, 0));
                assert_eq!(reg.board_type, BoardType::Core2);
            }
            _ => panic!("expected register"),
        }
    }

    #[test]
    fn register_with_two_variants_is_invalid() {
        let cli = parse(&[
            "--register", "--id", "1", "--ver", "1.0.0", "--mini", "--pro",
        ]);
        assert_eq!(usage_kind(cli.resolve()), Some(UsageError::Invalid));
    }

    #[test]
    fn console_alone_is_valid() {
        let cli = parse(&["--console"]);
        assert!(matches!(cli.resolve(), Ok(Op::ConsoleOnly)));
    }

    #[test]
    fn switch_targets_resolve() {
        let cli = parse(&["--switch-to-stm32"]);
        assert!(matches!(cli.resolve(), Ok(Op::Switch(Target::Stm32))));
    }
}
