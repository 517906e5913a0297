//! Programmer firmware update.

use anyhow::{Context, Result};
use console::style;
use simmflash::{FirmwareFlashStatus, ProgrammerEvent};
use std::fs::File;
use std::path::Path;

use super::{failure, resolve_settings};
use crate::Cli;
use crate::config::Config;
use crate::runner::Runner;

/// Firmware command implementation.
pub(crate) fn cmd_firmware(cli: &Cli, config: &Config, file: &Path) -> Result<()> {
    let image = File::open(file)
        .with_context(|| format!("Failed to open firmware image {}", file.display()))?;
    let settings = resolve_settings(cli, config, None)?;

    if !cli.quiet {
        eprintln!(
            "{} Updating programmer firmware from {}",
            style("📦").cyan(),
            file.display()
        );
    }

    let mut runner = Runner::connect(&settings)?;
    runner.programmer().begin_firmware_flash(image)?;

    let outcome = runner.run()?;
    if outcome.event != ProgrammerEvent::FirmwareFlash(FirmwareFlashStatus::Complete) {
        return Err(failure(outcome.event));
    }
    if !cli.quiet {
        eprintln!(
            "{} Firmware updated. The programmer restarts into the new firmware.",
            style("✓").green()
        );
    }
    Ok(())
}
