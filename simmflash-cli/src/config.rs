//! Configuration file support for simmflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (SIMMFLASH_*)
//! 3. Local config file (./simmflash.toml)
//! 4. Global config file (~/.config/simmflash/config.toml)

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Local configuration file name.
const LOCAL_CONFIG: &str = "simmflash.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyACM0" or "COM3").
    pub port: Option<String>,
    /// Seconds without board activity before an operation is abandoned.
    pub timeout_secs: Option<u64>,
}

/// SIMM configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimmSection {
    /// Capacity, e.g. "8M".
    pub capacity: Option<String>,
    /// Chip type, e.g. "tsop-x16".
    pub chip_type: Option<String>,
}

/// Write configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriteConfig {
    /// Default verify mode.
    pub verify: Option<String>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection configuration.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// SIMM configuration.
    #[serde(default)]
    pub simm: SimmSection,
    /// Write configuration.
    #[serde(default)]
    pub write: WriteConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Local config overrides global
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "simmflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.connection.port.is_some() {
            self.connection.port = other.connection.port;
        }
        if other.connection.timeout_secs.is_some() {
            self.connection.timeout_secs = other.connection.timeout_secs;
        }
        if other.simm.capacity.is_some() {
            self.simm.capacity = other.simm.capacity;
        }
        if other.simm.chip_type.is_some() {
            self.simm.chip_type = other.simm.chip_type;
        }
        if other.write.verify.is_some() {
            self.write.verify = other.write.verify;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.connection.port.is_none());
        assert!(config.connection.timeout_secs.is_none());
        assert!(config.simm.capacity.is_none());
        assert!(config.simm.chip_type.is_none());
        assert!(config.write.verify.is_none());
    }

    #[test]
    fn test_config_merge_overrides() {
        let mut base = Config::default();
        base.connection.port = Some("/dev/ttyACM0".to_string());
        base.simm.capacity = Some("2M".to_string());

        let mut other = Config::default();
        other.connection.port = Some("/dev/ttyACM1".to_string());
        other.simm.chip_type = Some("tsop-x16".to_string());
        other.write.verify = Some("after-write".to_string());

        base.merge(other);

        assert_eq!(base.connection.port.as_deref(), Some("/dev/ttyACM1"));
        assert_eq!(base.simm.capacity.as_deref(), Some("2M"));
        assert_eq!(base.simm.chip_type.as_deref(), Some("tsop-x16"));
        assert_eq!(base.write.verify.as_deref(), Some("after-write"));
    }

    #[test]
    fn test_config_merge_does_not_overwrite_with_none() {
        let mut base = Config::default();
        base.connection.port = Some("/dev/ttyACM0".to_string());
        base.connection.timeout_secs = Some(30);

        base.merge(Config::default());

        assert_eq!(base.connection.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(base.connection.timeout_secs, Some(30));
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[connection]
port = "/dev/ttyACM0"
timeout_secs = 90

[simm]
capacity = "8M"
chip_type = "tsop-x8"

[write]
verify = "while-writing"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.connection.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.connection.timeout_secs, Some(90));
        assert_eq!(config.simm.capacity.as_deref(), Some("8M"));
        assert_eq!(config.simm.chip_type.as_deref(), Some("tsop-x8"));
        assert_eq!(config.write.verify.as_deref(), Some("while-writing"));
    }

    #[test]
    fn test_config_partial_toml() {
        let config: Config = toml::from_str("[simm]\ncapacity = \"4M\"\n").unwrap();
        assert_eq!(config.simm.capacity.as_deref(), Some("4M"));
        assert!(config.connection.port.is_none());
        assert!(config.write.verify.is_none());
    }

    #[test]
    fn test_config_roundtrip_toml() {
        let mut config = Config::default();
        config.connection.port = Some("COM3".to_string());
        config.simm.capacity = Some("8M".to_string());

        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.connection.port.as_deref(), Some("COM3"));
        assert_eq!(parsed.simm.capacity.as_deref(), Some("8M"));
    }

    #[test]
    fn test_load_from_path_valid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[connection]\nport = \"/dev/ttyACM7\"").unwrap();

        let config = Config::load_from_path(file.path());
        assert_eq!(config.connection.port.as_deref(), Some("/dev/ttyACM7"));
    }

    #[test]
    fn test_load_from_path_invalid_toml_falls_back() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[connection\nport = ").unwrap();

        let config = Config::load_from_path(file.path());
        assert!(config.connection.port.is_none());
    }

    #[test]
    fn test_load_from_path_missing_file() {
        let config = Config::load_from_path(Path::new("/nonexistent/simmflash.toml"));
        assert!(config.connection.port.is_none());
    }

    #[test]
    fn test_global_config_path_file_name() {
        if let Some(path) = Config::global_config_path() {
            assert!(path.ends_with("config.toml"));
        }
    }
}
