//! Erase, reset, jump and version command implementations.

use anyhow::{Context, Result};
use console::style;
use stm32bl::{Command, Flasher, NativePort};

use super::{open_session, require_support};
use crate::{Cli, Settings};

/// Run a single control command, closing the port afterwards.
fn run_control<T>(
    cli: &Cli,
    settings: &Settings,
    command: Command,
    op: impl FnOnce(&mut Flasher<NativePort>) -> stm32bl::Result<T>,
) -> Result<T> {
    require_support(settings, command)?;
    let mut flasher = open_session(cli, settings)?;
    let result = op(&mut flasher);
    let closed = flasher.close();
    let value = result.with_context(|| format!("{command} failed"))?;
    closed?;
    Ok(value)
}

/// Erase command implementation.
pub(crate) fn cmd_erase(cli: &Cli, settings: &Settings) -> Result<()> {
    if !cli.quiet {
        eprintln!(
            "{} Erasing application area (timeout {:.1}s)...",
            style("🗑").red(),
            settings.profile.erase_timeout.as_secs_f64()
        );
    }
    run_control(cli, settings, Command::Erase, Flasher::erase)?;
    if !cli.quiet {
        eprintln!("{} Erase complete", style("✓").green().bold());
    }
    Ok(())
}

/// Reset command implementation.
pub(crate) fn cmd_reset(cli: &Cli, settings: &Settings) -> Result<()> {
    run_control(cli, settings, Command::Reset, Flasher::reset)?;
    if !cli.quiet {
        eprintln!("{} Device reset", style("🔄").cyan());
    }
    Ok(())
}

/// Jump command implementation.
pub(crate) fn cmd_jump(cli: &Cli, settings: &Settings) -> Result<()> {
    run_control(cli, settings, Command::Jump, Flasher::jump)?;
    if !cli.quiet {
        eprintln!("{} Application started", style("🚀").green());
    }
    Ok(())
}

/// Version command implementation.
///
/// The version goes to stdout so it can be captured by scripts.
pub(crate) fn cmd_version(cli: &Cli, settings: &Settings) -> Result<()> {
    let [major, minor, patch] =
        run_control(cli, settings, Command::GetVersion, Flasher::get_version)?;
    println!("{major}.{minor}.{patch}");
    Ok(())
}
