//! Write, verify and read command implementations.

use anyhow::{Context, Result};
use console::style;
use indicatif::ProgressBar;
use std::path::Path;
use stm32bl::{Command, FirmwareImage, Flasher, NativePort, Progress, TransferSummary};

use super::{open_session, progress_bar, require_support};
use crate::{Cli, CliError, Settings};

fn load_image(cli: &Cli, path: &Path) -> Result<FirmwareImage> {
    let image = FirmwareImage::from_file(path)?;
    if image.is_empty() {
        return Err(CliError::Usage(format!("Image {} is empty", path.display())).into());
    }
    if !cli.quiet {
        eprintln!(
            "{} Loaded {} ({} bytes)",
            style("📦").cyan(),
            path.display(),
            image.len()
        );
    }
    Ok(image)
}

fn print_summary(cli: &Cli, verb: &str, summary: &TransferSummary) {
    if cli.quiet {
        return;
    }
    let rate = summary
        .throughput_kbps()
        .map_or_else(|| "n/a".to_string(), |kbps| format!("{kbps:.1} KB/s"));
    eprintln!(
        "{} {verb} {} bytes in {} blocks ({:.2}s, {rate})",
        style("✓").green().bold(),
        summary.bytes,
        summary.blocks,
        summary.elapsed.as_secs_f64()
    );
}

/// Run one transfer on an open session, closing the port whatever happens.
fn run_session<T>(
    cli: &Cli,
    settings: &Settings,
    total: usize,
    message: &str,
    op: impl FnOnce(&mut Flasher<NativePort>, &mut dyn FnMut(&Progress)) -> stm32bl::Result<T>,
) -> Result<T> {
    let mut flasher = open_session(cli, settings)?;

    let pb = progress_bar(cli, total);
    pb.set_message(message.to_string());
    let result = op(&mut flasher, &mut |p: &Progress| {
        pb.set_position(p.done as u64);
    });
    let closed = flasher.close();
    settle(result, closed, &pb)
}

/// Combine the transfer outcome with the close result.
///
/// Ctrl-C is only honoured between blocks by the library; once every block
/// is acknowledged the result stands.
fn settle<T>(
    result: stm32bl::Result<T>,
    closed: stm32bl::Result<()>,
    pb: &ProgressBar,
) -> Result<T> {
    match result {
        Ok(value) => {
            pb.finish_and_clear();
            closed?;
            Ok(value)
        },
        Err(err) => {
            pb.abandon();
            Err(err.into())
        },
    }
}

/// Write command implementation.
pub(crate) fn cmd_write(cli: &Cli, settings: &Settings, file: &Path) -> Result<()> {
    let image = load_image(cli, file)?;
    let address = settings.address;

    let summary = run_session(cli, settings, image.len(), "Writing", |flasher, progress| {
        flasher.write(address, image.data(), progress)
    })
    .with_context(|| format!("Write of {} failed", file.display()))?;

    print_summary(cli, "Wrote", &summary);
    Ok(())
}

/// Verify command implementation.
pub(crate) fn cmd_verify(cli: &Cli, settings: &Settings, file: &Path) -> Result<()> {
    let image = load_image(cli, file)?;
    let address = settings.address;

    let summary = run_session(cli, settings, image.len(), "Verifying", |flasher, progress| {
        flasher.verify(address, image.data(), progress)
    })
    .with_context(|| format!("Verify of {} failed", file.display()))?;

    print_summary(cli, "Verified", &summary);
    Ok(())
}

/// Read command implementation.
pub(crate) fn cmd_read(cli: &Cli, settings: &Settings) -> Result<()> {
    read_into_file(cli, settings, Command::Read)
}

/// Fast-read command implementation.
pub(crate) fn cmd_fast_read(cli: &Cli, settings: &Settings) -> Result<()> {
    require_support(settings, Command::FastRead)?;
    read_into_file(cli, settings, Command::FastRead)
}

fn read_into_file(cli: &Cli, settings: &Settings, command: Command) -> Result<()> {
    let address = settings.address;
    let len = settings.read_size;

    let (data, summary) = run_session(cli, settings, len, "Reading", |flasher, progress| {
        if command == Command::FastRead {
            flasher.fast_read(address, len, progress)
        } else {
            flasher.read(address, len, progress)
        }
    })
    .with_context(|| format!("{command} of {len} bytes at 0x{address:08X} failed"))?;

    stm32bl::save_capture(&settings.read_file, &data)
        .with_context(|| format!("Failed to save {}", settings.read_file.display()))?;

    print_summary(cli, "Read", &summary);
    if !cli.quiet {
        eprintln!(
            "{} Saved to {}",
            style("💾").cyan(),
            settings.read_file.display()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use stm32bl::{FrameLayout, Profile};

    fn settings(layout: FrameLayout) -> Settings {
        Settings {
            profile: Profile::new(layout),
            address: 0x0800_8000,
            read_size: 16,
            read_file: PathBuf::from("read_file.bin"),
        }
    }

    #[test]
    fn test_fast_read_requires_compact_layout() {
        assert!(require_support(&settings(FrameLayout::Compact), Command::FastRead).is_ok());
        let err =
            require_support(&settings(FrameLayout::WordAligned), Command::FastRead).unwrap_err();
        assert!(err.downcast_ref::<CliError>().is_some());
    }

    #[test]
    fn test_completed_transfer_survives_late_interrupt() {
        // Ctrl-C arriving while the last block is acknowledged.
        crate::INTERRUPTED.store(true, Ordering::Relaxed);
        let kept = settle(Ok(vec![0xAA; 16]), Ok(()), &ProgressBar::hidden());
        crate::INTERRUPTED.store(false, Ordering::Relaxed);

        assert_eq!(kept.unwrap(), vec![0xAA; 16]);
    }

    #[test]
    fn test_cancelled_transfer_keeps_exit_code() {
        let err = settle::<()>(
            Err(stm32bl::Error::Cancelled {
                address: Some(0x0800_80F0),
            }),
            Ok(()),
            &ProgressBar::hidden(),
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<stm32bl::Error>(),
            Some(stm32bl::Error::Cancelled { .. })
        ));
    }

    #[test]
    fn test_summary_without_elapsed_time() {
        let summary = TransferSummary {
            bytes: 0,
            blocks: 0,
            elapsed: Duration::ZERO,
        };
        assert!(summary.throughput_kbps().is_none());
    }
}
