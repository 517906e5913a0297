//! Command implementations.

pub(crate) mod completions;
pub(crate) mod firmware;
pub(crate) mod ports;
pub(crate) mod simm;

use anyhow::{Result, anyhow};
use simmflash::{
    ChipType, FirmwareFlashStatus, ProgrammerEvent, ReadStatus, SimmConfig, VerifyMode,
    WriteStatus, parse_capacity,
};
use std::time::Duration;

use crate::config::Config;
use crate::runner::{DEFAULT_TIMEOUT, Settings};
use crate::{Cli, CliError};

/// Merge the command line (and its environment variables) over the config file.
pub(crate) fn resolve_settings(
    cli: &Cli,
    config: &Config,
    verify: Option<&str>,
) -> Result<Settings> {
    let capacity = match cli.capacity.as_deref().or(config.simm.capacity.as_deref()) {
        Some(text) => parse_capacity(text).map_err(|e| CliError::Config(e.to_string()))?,
        None => SimmConfig::default().capacity,
    };
    let chip_type = match cli.chip_type.as_deref().or(config.simm.chip_type.as_deref()) {
        Some(text) => text
            .parse::<ChipType>()
            .map_err(|e| CliError::Config(e.to_string()))?,
        None => SimmConfig::default().chip_type,
    };
    let verify = match verify.or(config.write.verify.as_deref()) {
        Some(text) => text
            .parse::<VerifyMode>()
            .map_err(|e| CliError::Config(e.to_string()))?,
        None => VerifyMode::default(),
    };
    let timeout = cli
        .timeout
        .or(config.connection.timeout_secs)
        .map_or(DEFAULT_TIMEOUT, Duration::from_secs);

    Ok(Settings {
        port: cli.port.clone().or_else(|| config.connection.port.clone()),
        simm: SimmConfig::new(capacity, chip_type),
        verify,
        timeout,
        quiet: cli.quiet,
    })
}

/// Turn a terminal event that is not a success into an error.
pub(crate) fn failure(event: ProgrammerEvent) -> anyhow::Error {
    match event {
        ProgrammerEvent::Write(WriteStatus::Cancelled | WriteStatus::VerifyCancelled)
        | ProgrammerEvent::Read(ReadStatus::Cancelled)
        | ProgrammerEvent::FirmwareFlash(FirmwareFlashStatus::Cancelled) => {
            CliError::Cancelled("Cancelled".to_string()).into()
        },
        ProgrammerEvent::Write(
            status @ (WriteStatus::FileTooBig | WriteStatus::EraseBlockWrongSize),
        ) => CliError::Usage(capitalize(&status.to_string())).into(),
        ProgrammerEvent::BoardDisconnectedDuringOperation => {
            anyhow!("Programmer disconnected during the operation")
        },
        ProgrammerEvent::Write(status) => anyhow!("{}", capitalize(&status.to_string())),
        ProgrammerEvent::Read(status) => anyhow!("{}", capitalize(&status.to_string())),
        ProgrammerEvent::Identification(status) => {
            anyhow!("{}", capitalize(&status.to_string()))
        },
        ProgrammerEvent::ElectricalTest(status) => {
            anyhow!("{}", capitalize(&status.to_string()))
        },
        ProgrammerEvent::FirmwareFlash(status) => anyhow!("{}", capitalize(&status.to_string())),
        other => anyhow!("Unexpected result: {other:?}"),
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Commands;
    use simmflash::ChipMask;

    fn cli() -> Cli {
        Cli {
            port: None,
            capacity: None,
            chip_type: None,
            timeout: None,
            verbose: 0,
            quiet: false,
            config_path: None,
            command: Commands::Test,
        }
    }

    #[test]
    fn test_resolve_defaults() {
        let settings = resolve_settings(&cli(), &Config::default(), None).unwrap();
        assert_eq!(settings.simm, SimmConfig::default());
        assert_eq!(settings.verify, VerifyMode::None);
        assert_eq!(settings.timeout, DEFAULT_TIMEOUT);
        assert!(settings.port.is_none());
    }

    #[test]
    fn test_resolve_cli_overrides_config() {
        let mut config = Config::default();
        config.simm.capacity = Some("2M".to_string());
        config.simm.chip_type = Some("plcc".to_string());
        config.connection.port = Some("/dev/ttyACM1".to_string());
        config.connection.timeout_secs = Some(10);
        config.write.verify = Some("while-writing".to_string());

        let mut cli = cli();
        cli.capacity = Some("8M".to_string());
        cli.port = Some("/dev/ttyACM0".to_string());

        let settings = resolve_settings(&cli, &config, Some("after-write")).unwrap();
        assert_eq!(settings.simm, SimmConfig::new(8 * 1024 * 1024, ChipType::PlccX8));
        assert_eq!(settings.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(settings.verify, VerifyMode::AfterWrite);
        assert_eq!(settings.timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_resolve_rejects_bad_values() {
        let mut bad_capacity = cli();
        bad_capacity.capacity = Some("lots".to_string());
        let err = resolve_settings(&bad_capacity, &Config::default(), None).unwrap_err();
        assert!(matches!(err.downcast_ref::<CliError>(), Some(CliError::Config(_))));

        let mut bad_chip = cli();
        bad_chip.chip_type = Some("dip".to_string());
        assert!(resolve_settings(&bad_chip, &Config::default(), None).is_err());

        assert!(resolve_settings(&cli(), &Config::default(), Some("sometimes")).is_err());
    }

    #[test]
    fn test_failure_classification() {
        let cancelled = failure(ProgrammerEvent::Read(ReadStatus::Cancelled));
        assert!(matches!(
            cancelled.downcast_ref::<CliError>(),
            Some(CliError::Cancelled(_))
        ));

        let too_big = failure(ProgrammerEvent::Write(WriteStatus::FileTooBig));
        assert!(matches!(too_big.downcast_ref::<CliError>(), Some(CliError::Usage(_))));

        let verify = failure(ProgrammerEvent::Write(WriteStatus::VerificationFailure(
            ChipMask::new(0x02),
        )));
        assert_eq!(verify.to_string(), "Verification failed (bad chip mask 0x02)");
        assert!(verify.downcast_ref::<CliError>().is_none());
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("write failed"), "Write failed");
        assert_eq!(capitalize(""), "");
    }
}
