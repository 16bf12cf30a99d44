//! Command implementations.
//!
//! Data transfers live in `transfer`, single-frame commands in `control`.

pub(crate) mod control;
pub(crate) mod transfer;

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use stm32bl::{Command, Flasher, NativePort, NativePortEnumerator, PortEnumerator};

use crate::{Cli, CliError, Settings, use_fancy_output, was_interrupted};

/// Print the bootloader command summary.
pub(crate) fn print_command_summary() {
    println!("Usage: stm32bl <PORT> <BAUD> <COMMAND> [FILE]");
    println!();
    println!("Commands:");
    println!("  write <FILE>        Write an application image to flash");
    println!("  verify <FILE>       Compare an image against flash");
    println!("  read [FILE]         Read flash into FILE (default read_file.bin)");
    println!("  fast-read [FILE]    Streamed read, compact layout only (alias: fread)");
    println!("  erase               Erase the application area");
    println!("  reset               Reset the microcontroller");
    println!("  jump                Start the user application");
    println!("  version             Query the bootloader version, word-aligned layout only");
    println!("  help                Show this summary");
}

pub(crate) fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("Interrupted by user".to_string()).into())
    } else {
        Ok(())
    }
}

/// Refuse commands the selected layout cannot express, before the port is opened.
pub(crate) fn require_support(settings: &Settings, command: Command) -> Result<()> {
    if settings.profile.layout.supports(command) {
        Ok(())
    } else {
        Err(CliError::Usage(format!(
            "{command} is not available with the {} layout",
            settings.profile.layout
        ))
        .into())
    }
}

/// Open the port and run the handshake.
///
/// The port is closed again if the handshake fails.
pub(crate) fn open_session(cli: &Cli, settings: &Settings) -> Result<Flasher<NativePort>> {
    if !cli.quiet {
        eprintln!(
            "{} Using port {} at {} baud ({} layout)",
            style("🔌").cyan(),
            cli.port,
            cli.baud,
            settings.profile.layout
        );
    }

    let mut flasher = Flasher::open(&cli.port, cli.baud, settings.profile.clone())
        .with_context(|| format!("Failed to open {}{}", cli.port, available_ports_hint()))?;

    if settings.profile.handshake {
        if !cli.quiet {
            eprintln!("{} Waiting for the bootloader...", style("⏳").yellow());
        }
        if let Err(err) = flasher.connect() {
            let _ = flasher.close();
            return Err(err.into());
        }
        if !cli.quiet {
            eprintln!("{} Connected", style("✓").green());
        }
    }

    if let Err(err) = ensure_not_interrupted() {
        let _ = flasher.close();
        return Err(err);
    }
    Ok(flasher)
}

/// Names of the ports present on this machine, for the open-failure message.
fn available_ports_hint() -> String {
    match NativePortEnumerator::list_ports() {
        Ok(ports) if !ports.is_empty() => {
            let names: Vec<_> = ports.into_iter().map(|p| p.name).collect();
            format!(" (available: {})", names.join(", "))
        },
        Ok(_) => " (no serial ports found)".to_string(),
        Err(e) => {
            debug!("Port enumeration failed: {e}");
            String::new()
        },
    }
}

/// Byte progress bar on stderr, hidden in quiet or plain mode.
pub(crate) fn progress_bar(cli: &Cli, total: usize) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total as u64);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
            )
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb
}
