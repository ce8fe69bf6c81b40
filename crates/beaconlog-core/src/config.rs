//! Application configuration management.
//!
//! Configuration is read from a TOML file and then overlaid with
//! `BEACONLOG__SECTION__KEY` environment variables, e.g.
//! `BEACONLOG__SCAN__SCAN_PERIOD_MS=2000`. Every key has a default, so an
//! empty or missing file yields a working configuration.
//!
//! Sections:
//! - `storage` - where the live database lives and what it is called
//! - `scan` - ranging periods and the region filter
//! - `clock` - network time source
//! - `session` - start/stop policy and the foreground notification
//! - `server` - HTTP control surface

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::bluetooth::Region;
use crate::storage::default_data_dir;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "BEACONLOG_CONFIG";

/// Prefix for per-key environment overrides.
pub const ENV_PREFIX: &str = "BEACONLOG";

/// Title of the notification shown while scanning.
pub const DEFAULT_NOTIFICATION_TITLE: &str = "Scanning for Beacons";

static DATABASE_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.-]{0,63}$").expect("valid regex"));

static HOSTNAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?(\.[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*$")
        .expect("valid regex")
});

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested config file does not exist.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The config file could not be written.
    #[error("Failed to write {path}: {source}")]
    WriteError {
        /// File path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The file or an environment override did not parse.
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] config::ConfigError),

    /// The configuration could not be rendered as TOML.
    #[error("Failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// A single field is invalid.
    #[error("Invalid {field}: {message}")]
    ValidationError {
        /// Dotted key of the offending field.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields are invalid.
    #[error("{} configuration errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Storage location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the live file and its backups.
    #[schema(value_type = Option<String>)]
    pub data_dir: Option<PathBuf>,

    /// File name of the live database. Backups append epoch millis to it.
    pub database_name: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            database_name: "beaconlog".to_string(),
        }
    }
}

/// Ranging parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct ScanConfig {
    /// Length of one scan period; one batch is delivered per period.
    pub scan_period_ms: u64,

    /// Pause between scan periods.
    pub between_scan_period_ms: u64,

    /// Only log beacons with this proximity UUID. Unset means all beacons.
    pub region_uuid: Option<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            scan_period_ms: 1000,
            between_scan_period_ms: 0,
            region_uuid: None,
        }
    }
}

/// Network time source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct ClockConfig {
    /// Whether to sync against `ntp_server` at startup.
    pub enabled: bool,

    /// SNTP server host name.
    pub ntp_server: String,

    /// How long to wait for the server's reply.
    pub timeout_secs: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ntp_server: "time.google.com".to_string(),
            timeout_secs: 5,
        }
    }
}

/// Scan session policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct SessionConfig {
    /// Back up and clear the live table when a session stops.
    pub persist: bool,

    /// Refuse to start unless every preflight step passed.
    pub require_prerequisites: bool,

    /// Title of the notification shown while scanning.
    pub notification_title: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            persist: true,
            require_prerequisites: false,
            notification_title: DEFAULT_NOTIFICATION_TITLE.to_string(),
        }
    }
}

/// HTTP control surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct Config {
    /// Storage location.
    pub storage: StorageConfig,
    /// Ranging parameters.
    pub scan: ScanConfig,
    /// Network time source.
    pub clock: ClockConfig,
    /// Session policy.
    pub session: SessionConfig,
    /// HTTP control surface.
    pub server: ServerConfig,
}

impl Config {
    /// Load from the default path, falling back to defaults when the file
    /// does not exist. Environment overrides apply either way.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or an override does not parse, or if the
    /// result fails validation.
    pub fn load() -> ConfigResult<Self> {
        let path = default_config_path();
        Self::build(&path, false)
    }

    /// Load from `path`, which must exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if `path` is missing, or a parse or
    /// validation error.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        Self::build(path, true)
    }

    /// Load, or log the problem and use defaults.
    #[must_use]
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Invalid configuration, using defaults");
            Self::default()
        })
    }

    fn build(path: &Path, required: bool) -> ConfigResult<Self> {
        tracing::debug!(path = %path.display(), "Loading configuration");
        let settings = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(required),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration to `path` as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let write_err = |source| ConfigError::WriteError {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(write_err)
    }

    /// Check every field, reporting all failures at once.
    ///
    /// # Errors
    ///
    /// Returns the single failure, or [`ConfigError::MultipleValidationErrors`].
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        let mut invalid = |field: &str, message: String| {
            errors.push(ConfigError::ValidationError {
                field: field.to_string(),
                message,
            });
        };

        if !DATABASE_NAME_REGEX.is_match(&self.storage.database_name) {
            invalid(
                "storage.database_name",
                format!(
                    "'{}' must be a plain file name starting with a letter or underscore",
                    self.storage.database_name
                ),
            );
        }

        if !(100..=600_000).contains(&self.scan.scan_period_ms) {
            invalid(
                "scan.scan_period_ms",
                format!("{} is outside 100..=600000", self.scan.scan_period_ms),
            );
        }
        if self.scan.between_scan_period_ms > 3_600_000 {
            invalid(
                "scan.between_scan_period_ms",
                format!("{} exceeds one hour", self.scan.between_scan_period_ms),
            );
        }
        if let Some(uuid) = &self.scan.region_uuid {
            if Uuid::parse_str(uuid).is_err() {
                invalid("scan.region_uuid", format!("'{uuid}' is not a UUID"));
            }
        }

        if self.clock.enabled && !is_valid_hostname(&self.clock.ntp_server) {
            invalid(
                "clock.ntp_server",
                format!("'{}' is not a host name", self.clock.ntp_server),
            );
        }
        if !(1..=60).contains(&self.clock.timeout_secs) {
            invalid(
                "clock.timeout_secs",
                format!("{} is outside 1..=60", self.clock.timeout_secs),
            );
        }

        if self.session.notification_title.trim().is_empty() {
            invalid("session.notification_title", "must not be empty".into());
        }

        if self.server.bind.parse::<SocketAddr>().is_err() {
            invalid(
                "server.bind",
                format!("'{}' is not a socket address", self.server.bind),
            );
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }

    /// Full path of the live database file.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .data_dir
            .clone()
            .unwrap_or_else(default_data_dir)
            .join(&self.storage.database_name)
    }

    /// Ranging region derived from `scan.region_uuid`.
    #[must_use]
    pub fn region(&self) -> Region {
        let mut region = Region::all("beaconlog");
        region.id1 = self
            .scan
            .region_uuid
            .as_deref()
            .and_then(|u| Uuid::parse_str(u).ok());
        region
    }
}

/// Whether `host` looks like a DNS name or IP literal.
#[must_use]
pub fn is_valid_hostname(host: &str) -> bool {
    host.len() <= 253 && (HOSTNAME_REGEX.is_match(host) || host.parse::<std::net::IpAddr>().is_ok())
}

/// Get the configuration file path.
///
/// `BEACONLOG_CONFIG` wins. Otherwise `/etc/beaconlog/config.toml` on Linux
/// and the platform config directory elsewhere.
#[must_use]
pub fn default_config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/etc/beaconlog/config.toml")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "beaconlog")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scan.scan_period_ms, 1000);
        assert_eq!(config.scan.between_scan_period_ms, 0);
        assert_eq!(config.clock.ntp_server, "time.google.com");
        assert!(config.session.persist);
        assert!(!config.session.require_prerequisites);
        assert_eq!(config.session.notification_title, "Scanning for Beacons");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[storage]\ndata_dir = \"/tmp/bl\"\n\n[session]\npersist = false\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert!(!config.session.persist);
        assert_eq!(config.storage.database_name, "beaconlog");
        assert_eq!(config.database_path(), PathBuf::from("/tmp/bl/beaconlog"));
        assert_eq!(config.scan, ScanConfig::default());
    }

    #[test]
    fn test_missing_explicit_file_is_not_found() {
        let dir = tempdir().unwrap();
        let err = Config::load_from(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.scan.region_uuid = Some("f7826da6-4fa2-4e98-8024-bc5b71e0893e".into());
        config.save(&path).unwrap();

        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_validation_collects_every_failure() {
        let mut config = Config::default();
        config.storage.database_name = "../etc/passwd".into();
        config.scan.scan_period_ms = 5;
        config.server.bind = "nowhere".into();

        match config.validate() {
            Err(ConfigError::MultipleValidationErrors(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("expected multiple errors, got {other:?}"),
        }
    }

    #[test]
    fn test_single_failure_is_reported_directly() {
        let mut config = Config::default();
        config.scan.region_uuid = Some("not-a-uuid".into());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError { field, .. }) if field == "scan.region_uuid"
        ));
    }

    #[test]
    fn test_disabled_clock_skips_server_check() {
        let mut config = Config::default();
        config.clock.ntp_server = String::new();
        assert!(config.validate().is_err());
        config.clock.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_region_from_uuid() {
        let mut config = Config::default();
        assert_eq!(config.region().id1, None);
        config.scan.region_uuid = Some("F7826DA6-4FA2-4E98-8024-BC5B71E0893E".into());
        assert_eq!(
            config.region().id1.unwrap().to_string(),
            "f7826da6-4fa2-4e98-8024-bc5b71e0893e"
        );
    }

    #[test]
    fn test_hostnames() {
        assert!(is_valid_hostname("time.google.com"));
        assert!(is_valid_hostname("pool.ntp.org"));
        assert!(is_valid_hostname("192.168.1.1"));
        assert!(is_valid_hostname("::1"));
        assert!(!is_valid_hostname(""));
        assert!(!is_valid_hostname("bad host"));
        assert!(!is_valid_hostname("-leading.dash"));
    }
}
