//! stm32bl CLI - Command-line tool for the STM32 serial bootloader.
//!
//! ## Features
//!
//! - Write, verify and read back application flash
//! - Erase, reset and jump control commands
//! - Word-aligned and compact frame layouts
//! - Configuration files and environment variable support

use anyhow::Result;
use clap::{Parser, ValueEnum};
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use stm32bl::{DEFAULT_ADDRESS, DEFAULT_READ_SIZE, FrameLayout, MismatchPolicy, Profile};

mod commands;
mod config;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Default capture file for read commands.
pub(crate) const DEFAULT_READ_FILE: &str = "read_file.bin";

/// Check if emoji/animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl-C was pressed.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Errors with a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid invocation, detected before the port is opened.
    #[error("{0}")]
    Usage(String),
    /// Interrupted by the user.
    #[error("{0}")]
    Cancelled(String),
}

/// Map an error to the process exit code.
fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => 2,
            CliError::Cancelled(_) => 130,
        };
    }
    match err.downcast_ref::<stm32bl::Error>() {
        Some(stm32bl::Error::Cancelled { .. }) => 130,
        _ => 1,
    }
}

/// stm32bl - Program STM32 flash through the '$'-framed serial bootloader.
///
/// Environment variables:
///   STM32BL_PROFILE             - Frame layout (word-aligned, compact)
///   STM32BL_ADDRESS             - Application base address
///   STM32BL_SIZE                - Bytes captured by read commands
///   STM32BL_BLOCK_SIZE          - Block payload size
#[derive(Parser)]
#[command(name = "stm32bl")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "Run `stm32bl <PORT> <BAUD> help` for a summary of bootloader commands.")]
struct Cli {
    /// Serial port (e.g. /dev/ttyUSB0 or COM3).
    port: String,

    /// Baud rate.
    baud: u32,

    /// Bootloader command to run.
    #[arg(value_enum)]
    command: Action,

    /// Image for write/verify; capture file for read/fast-read.
    file: Option<PathBuf>,

    /// Frame layout spoken by the bootloader.
    #[arg(long, value_enum, env = "STM32BL_PROFILE")]
    profile: Option<Layout>,

    /// Application base address (hex).
    #[arg(short, long, value_parser = parse_hex_u32, env = "STM32BL_ADDRESS")]
    address: Option<u32>,

    /// Number of bytes to read.
    #[arg(short, long, env = "STM32BL_SIZE")]
    size: Option<usize>,

    /// Block payload size.
    #[arg(long, env = "STM32BL_BLOCK_SIZE")]
    block_size: Option<usize>,

    /// Require the CONNECT handshake.
    #[arg(long, overrides_with = "no_handshake")]
    handshake: bool,

    /// Skip the CONNECT handshake.
    #[arg(long, overrides_with = "handshake")]
    no_handshake: bool,

    /// Number of CONNECT attempts.
    #[arg(long, env = "STM32BL_CONNECT_ATTEMPTS")]
    connect_attempts: Option<u32>,

    /// Acknowledgment timeout in milliseconds.
    #[arg(long, env = "STM32BL_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    /// ERASE timeout in milliseconds.
    #[arg(long, env = "STM32BL_ERASE_TIMEOUT_MS")]
    erase_timeout_ms: Option<u64>,

    /// Re-request a READ block this many times on checksum mismatch (0 aborts).
    #[arg(long, env = "STM32BL_CHECKSUM_RETRIES")]
    checksum_retries: Option<u32>,

    /// Path to a configuration file.
    #[arg(long = "config", value_name = "PATH", env = "STM32BL_CONFIG")]
    config_path: Option<PathBuf>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long)]
    quiet: bool,
}

/// Bootloader commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Action {
    /// Write an application image to flash.
    Write,
    /// Read flash into a capture file, one block per request.
    Read,
    /// Erase the application area.
    Erase,
    /// Reset the microcontroller.
    Reset,
    /// Jump to the user application.
    Jump,
    /// Compare an image against flash.
    Verify,
    /// Read flash with a single streamed request (compact layout).
    #[value(alias = "fread")]
    FastRead,
    /// Query the bootloader version (word-aligned layout).
    Version,
    /// Print the command summary.
    Help,
}

/// Frame layouts selectable on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Layout {
    /// Size byte and padding before the address.
    WordAligned,
    /// Address first, no padding.
    Compact,
}

impl From<Layout> for FrameLayout {
    fn from(layout: Layout) -> Self {
        match layout {
            Layout::WordAligned => FrameLayout::WordAligned,
            Layout::Compact => FrameLayout::Compact,
        }
    }
}

/// Parse hexadecimal address (supports 0x prefix and underscores).
pub(crate) fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    let s: String = s.chars().filter(|c| *c != '_').collect();
    u32::from_str_radix(&s, 16).map_err(|e| format!("Invalid hex address: {e}"))
}

/// Everything a command needs after flags, environment and files are merged.
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub(crate) profile: Profile,
    pub(crate) address: u32,
    pub(crate) read_size: usize,
    pub(crate) read_file: PathBuf,
}

impl Settings {
    /// Merge the command line over the loaded configuration.
    fn resolve(cli: &Cli, config: &Config) -> Result<Self> {
        let layout = match (cli.profile, config.protocol.profile.as_deref()) {
            (Some(layout), _) => FrameLayout::from(layout),
            (None, Some(name)) => FrameLayout::from_name(name).ok_or_else(|| {
                CliError::Usage(format!("Unknown profile '{name}' in configuration"))
            })?,
            (None, None) => FrameLayout::default(),
        };

        let mut profile = Profile::new(layout);
        if let Some(block_size) = cli.block_size.or(config.protocol.block_size) {
            profile = profile.with_block_size(block_size);
        }
        let handshake = if cli.no_handshake {
            Some(false)
        } else if cli.handshake {
            Some(true)
        } else {
            config.protocol.handshake
        };
        if let Some(handshake) = handshake {
            profile = profile.with_handshake(handshake);
        }
        if let Some(attempts) = cli.connect_attempts.or(config.protocol.connect_attempts) {
            profile = profile.with_connect_attempts(attempts);
        }
        if let Some(ms) = cli.timeout_ms.or(config.protocol.ack_timeout_ms) {
            let timeout = Duration::from_millis(ms);
            profile = profile
                .with_ack_timeout(timeout)
                .with_connect_timeout(timeout);
        }
        if let Some(ms) = cli.erase_timeout_ms.or(config.protocol.erase_timeout_ms) {
            profile = profile.with_erase_timeout(Duration::from_millis(ms));
        }
        if let Some(retries) = cli.checksum_retries.or(config.protocol.checksum_retries) {
            profile = profile.with_mismatch_policy(MismatchPolicy::from_retries(retries));
        }
        profile
            .validate()
            .map_err(|e| CliError::Usage(e.to_string()))?;

        let address = match (cli.address, &config.target.address) {
            (Some(address), _) => address,
            (None, Some(address)) => address
                .value()
                .map_err(|e| CliError::Usage(format!("target.address: {e}")))?,
            (None, None) => DEFAULT_ADDRESS,
        };

        let read_file = cli
            .file
            .clone()
            .or_else(|| config.output.read_file.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_READ_FILE));

        Ok(Self {
            profile,
            address,
            read_size: cli
                .size
                .or(config.target.read_size)
                .unwrap_or(DEFAULT_READ_SIZE),
            read_file,
        })
    }
}

fn main() {
    let cli = Cli::parse();

    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);
    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "stm32bl v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    // Ctrl-C stops transfers at the next block boundary.
    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    stm32bl::set_interrupt_checker(was_interrupted);

    if let Err(err) = run(&cli) {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        std::process::exit(exit_code(&err));
    }
}

fn run(cli: &Cli) -> Result<()> {
    if cli.command == Action::Help {
        commands::print_command_summary();
        return Ok(());
    }

    // Load configuration
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };
    let settings = Settings::resolve(cli, &config)?;
    debug!("Resolved settings: {settings:?}");

    match cli.command {
        Action::Write => commands::transfer::cmd_write(cli, &settings, required_file(cli)?),
        Action::Verify => commands::transfer::cmd_verify(cli, &settings, required_file(cli)?),
        Action::Read => commands::transfer::cmd_read(cli, &settings),
        Action::FastRead => commands::transfer::cmd_fast_read(cli, &settings),
        Action::Erase => commands::control::cmd_erase(cli, &settings),
        Action::Reset => commands::control::cmd_reset(cli, &settings),
        Action::Jump => commands::control::cmd_jump(cli, &settings),
        Action::Version => commands::control::cmd_version(cli, &settings),
        Action::Help => Ok(()),
    }
}

fn required_file(cli: &Cli) -> Result<&PathBuf> {
    cli.file.as_ref().ok_or_else(|| {
        CliError::Usage(format!(
            "'{}' requires an image FILE",
            cli.command
                .to_possible_value()
                .map_or_else(String::new, |v| v.get_name().to_string())
        ))
        .into()
    })
}
