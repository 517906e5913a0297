//! simmflash CLI - Command-line tool for the USB ROM SIMM programmer.
//!
//! ## Features
//!
//! - Write, read and verify ROM SIMMs (whole, ranged or per chip)
//! - Identify the flash chips and run the shorted-pin electrical test
//! - Update the programmer board firmware
//! - Automatic board detection, including across bootloader reboots
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

mod commands;
mod config;
mod runner;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if progress bars should be drawn (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether the user pressed Ctrl-C.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Failures with a dedicated exit code.
#[derive(Debug, Error)]
pub(crate) enum CliError {
    /// Bad arguments or an impossible request.
    #[error("{0}")]
    Usage(String),
    /// Invalid configuration values.
    #[error("{0}")]
    Config(String),
    /// No programmer board could be found.
    #[error("{0}")]
    DeviceNotFound(String),
    /// Interrupted by the user.
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => 2,
            Self::Config(_) => 3,
            Self::DeviceNotFound(_) => 4,
            Self::Cancelled(_) => 130,
        }
    }
}

/// Map an error chain to the process exit code.
fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return cli_err.exit_code();
    }
    match err.downcast_ref::<simmflash::Error>() {
        Some(simmflash::Error::DeviceNotFound) => 4,
        Some(simmflash::Error::Config(_)) => 3,
        _ => 1,
    }
}

/// simmflash - Program ROM SIMMs with the USB SIMM programmer board.
///
/// Environment variables:
///   SIMMFLASH_PORT        - Serial port of the programmer
///   SIMMFLASH_CAPACITY    - SIMM capacity (e.g. 2M, 8M)
///   SIMMFLASH_CHIP_TYPE   - Chip type (plcc-x8, tsop-x8, tsop-x16)
#[derive(Parser)]
#[command(name = "simmflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// Serial port of the programmer (auto-detected if not specified).
    #[arg(short, long, global = true, env = "SIMMFLASH_PORT")]
    pub port: Option<String>,

    /// SIMM capacity, e.g. 2M, 8M or 2097152.
    #[arg(short, long, global = true, env = "SIMMFLASH_CAPACITY")]
    pub capacity: Option<String>,

    /// Flash chip type (plcc-x8, tsop-x8, tsop-x16).
    #[arg(long, global = true, env = "SIMMFLASH_CHIP_TYPE")]
    pub chip_type: Option<String>,

    /// Seconds without board activity before an operation is abandoned.
    #[arg(long, global = true, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Erase and write an image to the SIMM.
    Write {
        /// Combined SIMM image.
        #[arg(required_unless_present = "chip", conflicts_with = "chip")]
        file: Option<PathBuf>,

        /// Per-chip image as POSITION=FILE (0-3, can be repeated).
        #[arg(long, value_name = "POS=FILE", value_parser = commands::simm::parse_chip_file)]
        chip: Vec<(usize, PathBuf)>,

        /// Start offset (must be a multiple of 256 KiB).
        #[arg(long, value_parser = parse_number)]
        offset: Option<u32>,

        /// Length of the region to erase (must be a multiple of 256 KiB).
        #[arg(long, value_parser = parse_number)]
        length: Option<u32>,

        /// Only write these chip positions, as a 4-bit mask (e.g. 0x3).
        #[arg(long, value_parser = parse_number)]
        chips: Option<u32>,

        /// Verification: none, while-writing or after-write.
        #[arg(long)]
        verify: Option<String>,
    },

    /// Read the SIMM into a file.
    Read {
        /// Output file.
        file: PathBuf,

        /// Start offset.
        #[arg(long, value_parser = parse_number)]
        offset: Option<u32>,

        /// Number of bytes to read.
        #[arg(long, value_parser = parse_number)]
        length: Option<u32>,

        /// Also write one file per chip (FILE.chip0 .. FILE.chip3).
        #[arg(long)]
        split: bool,
    },

    /// Read the manufacturer and device IDs of the chips.
    Identify {
        /// Try both straight and shifted unlock addresses.
        #[arg(long)]
        all_layouts: bool,

        /// Output IDs as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Run the shorted-pin electrical test.
    Test,

    /// Update the programmer board firmware.
    Firmware {
        /// Firmware image.
        file: PathBuf,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Parse a decimal or `0x` hexadecimal number (underscores allowed).
fn parse_number(s: &str) -> Result<u32, String> {
    let s: String = s.trim().chars().filter(|c| *c != '_').collect();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex number: {e}"))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {e}"))
    }
}

fn main() {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);
    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

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
        "simmflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(err) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Cannot install Ctrl-C handler: {err}");
    }

    if let Err(err) = run(&cli) {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        std::process::exit(exit_code(&err));
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Write {
            file,
            chip,
            offset,
            length,
            chips,
            verify,
        } => {
            let image = commands::simm::WriteImage::new(file.as_deref(), chip)?;
            commands::simm::cmd_write(
                cli,
                &config,
                &image,
                &commands::simm::WriteArgs {
                    offset: *offset,
                    length: *length,
                    chips: *chips,
                    verify: verify.as_deref(),
                },
            )
        },
        Commands::Read {
            file,
            offset,
            length,
            split,
        } => commands::simm::cmd_read(cli, &config, file, *offset, *length, *split),
        Commands::Identify { all_layouts, json } => {
            commands::simm::cmd_identify(cli, &config, *all_layouts, *json)
        },
        Commands::Test => commands::simm::cmd_test(cli, &config),
        Commands::Firmware { file } => commands::firmware::cmd_firmware(cli, &config, file),
        Commands::ListPorts { json } => commands::ports::cmd_list_ports(*json),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("4096"), Ok(4096));
        assert_eq!(parse_number("0x40000"), Ok(0x40000));
        assert_eq!(parse_number("0X00_04_00_00"), Ok(0x40000));
        assert!(parse_number("0xZZ").is_err());
        assert!(parse_number("ten").is_err());
    }

    #[test]
    fn test_exit_codes() {
        let usage: anyhow::Error = CliError::Usage("bad".into()).into();
        assert_eq!(exit_code(&usage), 2);
        let config: anyhow::Error = CliError::Config("bad".into()).into();
        assert_eq!(exit_code(&config), 3);
        let cancelled: anyhow::Error = CliError::Cancelled("stop".into()).into();
        assert_eq!(exit_code(&cancelled), 130);

        let not_found: anyhow::Error = simmflash::Error::DeviceNotFound.into();
        assert_eq!(exit_code(&not_found), 4);
        let other = anyhow::anyhow!("boom");
        assert_eq!(exit_code(&other), 1);
    }

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
