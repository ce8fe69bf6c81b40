//! Unified error types for the beaconlog core library.
//!
//! Configuration, storage and Bluetooth each have their own error type
//! (`ConfigError`, `StorageError`, `BluetoothError`). They fold into
//! [`BeaconLogError`], which carries an HTTP status code and a stable
//! machine-readable code for the control surface.
//!
//! # Example
//!
//! ```rust
//! use beaconlog_core::error::{BeaconLogError, Result};
//! use beaconlog_core::session::ScanState;
//!
//! fn require_idle(state: ScanState) -> Result<()> {
//!     if state == ScanState::Scanning {
//!         return Err(BeaconLogError::AlreadyScanning);
//!     }
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// The unified error type for all beaconlog operations.
#[derive(Debug, Error)]
pub enum BeaconLogError {
    // =========================================================================
    // BLUETOOTH ERRORS
    // =========================================================================
    /// No Bluetooth adapter was found on this system.
    #[error(
        "No Bluetooth adapter found. Ensure Bluetooth hardware is present and drivers are loaded."
    )]
    BluetoothAdapterNotFound,

    /// The Bluetooth adapter exists but is powered off.
    #[error("Bluetooth adapter is powered off. Run 'bluetoothctl power on' to enable.")]
    BluetoothAdapterPoweredOff,

    /// The ranging stack refused to start or failed while running.
    #[error("Unable to start beacon ranging: {0}")]
    RangingFailed(String),

    // =========================================================================
    // SESSION ERRORS
    // =========================================================================
    /// `start` was called while a session is active.
    #[error("A scan session is already running")]
    AlreadyScanning,

    /// `stop` was called with no active session.
    #[error("No scan session is running")]
    NotScanning,

    /// Preflight failed and the configuration requires it to pass.
    #[error("Scan prerequisites not met: {}", .0.join(", "))]
    PrerequisitesNotMet(Vec<String>),

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // STORAGE & I/O ERRORS
    // =========================================================================
    /// The observation database failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A requested backup does not exist.
    #[error("Backup not found: '{0}'")]
    BackupNotFound(String),

    /// An error occurred while persisting or reading data.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for beaconlog operations.
pub type Result<T> = std::result::Result<T, BeaconLogError>;

impl BeaconLogError {
    /// Returns `true` if this error is related to Bluetooth operations.
    #[inline]
    #[must_use]
    pub fn is_bluetooth_error(&self) -> bool {
        matches!(
            self,
            Self::BluetoothAdapterNotFound
                | Self::BluetoothAdapterPoweredOff
                | Self::RangingFailed(_)
        )
    }

    /// Returns `true` if this error is about the session state machine.
    #[inline]
    #[must_use]
    pub fn is_session_error(&self) -> bool {
        matches!(
            self,
            Self::AlreadyScanning | Self::NotScanning | Self::PrerequisitesNotMet(_)
        )
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if this error is related to I/O or persistence.
    #[inline]
    #[must_use]
    pub fn is_io_error(&self) -> bool {
        matches!(
            self,
            Self::DatabaseError(_) | Self::PersistenceError(_) | Self::IoError(_)
        )
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            // 404 Not Found
            Self::ConfigNotFound(_) | Self::BackupNotFound(_) => 404,

            // 409 Conflict - wrong state for the request
            Self::AlreadyScanning | Self::NotScanning => 409,

            // 412 Precondition Failed
            Self::PrerequisitesNotMet(_) => 412,

            // 422 Unprocessable Entity - semantic errors
            Self::ConfigParseError(_) | Self::ConfigValidationError(_) => 422,

            // 500 Internal Server Error - server-side issues
            Self::DatabaseError(_) | Self::PersistenceError(_) | Self::IoError(_) => 500,

            // 503 Service Unavailable - Bluetooth hardware or stack
            Self::BluetoothAdapterNotFound
            | Self::BluetoothAdapterPoweredOff
            | Self::RangingFailed(_) => 503,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BluetoothAdapterNotFound => "BLUETOOTH_ADAPTER_NOT_FOUND",
            Self::BluetoothAdapterPoweredOff => "BLUETOOTH_ADAPTER_POWERED_OFF",
            Self::RangingFailed(_) => "RANGING_FAILED",
            Self::AlreadyScanning => "ALREADY_SCANNING",
            Self::NotScanning => "NOT_SCANNING",
            Self::PrerequisitesNotMet(_) => "PREREQUISITES_NOT_MET",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::DatabaseError(_) => "DATABASE_ERROR",
            Self::BackupNotFound(_) => "BACKUP_NOT_FOUND",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for BeaconLogError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path),
            ConfigError::WriteError { path, source } => {
                Self::PersistenceError(format!("Failed to write {path}: {source}"))
            }
            ConfigError::ParseError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.into_iter().map(|e| e.to_string()).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

impl From<crate::storage::StorageError> for BeaconLogError {
    fn from(err: crate::storage::StorageError) -> Self {
        use crate::storage::StorageError;
        match err {
            StorageError::Database(e) => Self::DatabaseError(e.to_string()),
            StorageError::CreateDirectory { path, source } => Self::PersistenceError(format!(
                "Failed to create directory {}: {source}",
                path.display()
            )),
            e @ StorageError::Copy { .. } => Self::PersistenceError(e.to_string()),
            StorageError::Io(e) => Self::IoError(e),
        }
    }
}

impl From<crate::bluetooth::BluetoothError> for BeaconLogError {
    fn from(err: crate::bluetooth::BluetoothError) -> Self {
        use crate::bluetooth::BluetoothError;
        match err {
            BluetoothError::AdapterNotFound => Self::BluetoothAdapterNotFound,
            BluetoothError::AdapterPoweredOff => Self::BluetoothAdapterPoweredOff,
            BluetoothError::SessionInitFailed { message }
            | BluetoothError::RangingFailed { message }
            | BluetoothError::Internal { message } => Self::RangingFailed(message),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoErr, ErrorKind};

    #[test]
    fn test_bluetooth_error_classification() {
        assert!(BeaconLogError::BluetoothAdapterNotFound.is_bluetooth_error());
        assert!(BeaconLogError::BluetoothAdapterPoweredOff.is_bluetooth_error());
        assert!(BeaconLogError::RangingFailed("busy".into()).is_bluetooth_error());

        assert!(!BeaconLogError::AlreadyScanning.is_bluetooth_error());
    }

    #[test]
    fn test_session_error_classification() {
        assert!(BeaconLogError::AlreadyScanning.is_session_error());
        assert!(BeaconLogError::NotScanning.is_session_error());
        assert!(BeaconLogError::PrerequisitesNotMet(vec!["radio_on".into()]).is_session_error());

        assert!(!BeaconLogError::BluetoothAdapterNotFound.is_session_error());
    }

    #[test]
    fn test_config_error_classification() {
        assert!(BeaconLogError::ConfigNotFound(PathBuf::from("/test")).is_config_error());
        assert!(BeaconLogError::ConfigParseError("syntax error".into()).is_config_error());
        assert!(BeaconLogError::ConfigValidationError("invalid value".into()).is_config_error());

        assert!(!BeaconLogError::BluetoothAdapterNotFound.is_config_error());
    }

    #[test]
    fn test_io_error_classification() {
        assert!(BeaconLogError::PersistenceError("disk full".into()).is_io_error());
        assert!(BeaconLogError::DatabaseError("locked".into()).is_io_error());
        assert!(BeaconLogError::IoError(IoErr::new(ErrorKind::NotFound, "test")).is_io_error());

        assert!(!BeaconLogError::BluetoothAdapterNotFound.is_io_error());
    }

    #[test]
    fn test_http_status_codes() {
        assert_eq!(BeaconLogError::BackupNotFound("x".into()).http_status_code(), 404);
        assert_eq!(BeaconLogError::AlreadyScanning.http_status_code(), 409);
        assert_eq!(
            BeaconLogError::PrerequisitesNotMet(vec![]).http_status_code(),
            412
        );
        assert_eq!(
            BeaconLogError::ConfigParseError("error".into()).http_status_code(),
            422
        );
        assert_eq!(
            BeaconLogError::DatabaseError("error".into()).http_status_code(),
            500
        );
        assert_eq!(
            BeaconLogError::RangingFailed("error".into()).http_status_code(),
            503
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            BeaconLogError::BluetoothAdapterNotFound.error_code(),
            "BLUETOOTH_ADAPTER_NOT_FOUND"
        );
        assert_eq!(BeaconLogError::NotScanning.error_code(), "NOT_SCANNING");
        assert_eq!(
            BeaconLogError::BackupNotFound("x".into()).error_code(),
            "BACKUP_NOT_FOUND"
        );
    }

    #[test]
    fn test_from_module_errors() {
        use crate::bluetooth::BluetoothError;
        use crate::config::ConfigError;

        let err: BeaconLogError = BluetoothError::RangingFailed {
            message: "no adapter".into(),
        }
        .into();
        assert!(matches!(err, BeaconLogError::RangingFailed(ref m) if m == "no adapter"));

        let err: BeaconLogError = ConfigError::MultipleValidationErrors(vec![
            ConfigError::ValidationError {
                field: "a".into(),
                message: "bad".into(),
            },
            ConfigError::ValidationError {
                field: "b".into(),
                message: "worse".into(),
            },
        ])
        .into();
        assert_eq!(
            err.to_string(),
            "Configuration validation failed: Invalid a: bad; Invalid b: worse"
        );

        let err: BeaconLogError =
            crate::storage::StorageError::Io(IoErr::new(ErrorKind::Other, "boom")).into();
        assert!(err.is_io_error());
    }

    #[test]
    fn test_error_display_messages() {
        let err = BeaconLogError::PrerequisitesNotMet(vec!["radio_on".into(), "location".into()]);
        assert_eq!(
            err.to_string(),
            "Scan prerequisites not met: radio_on, location"
        );

        let err = BeaconLogError::BackupNotFound("beaconlog1".into());
        assert!(err.to_string().contains("beaconlog1"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<BeaconLogError>();
        assert_sync::<BeaconLogError>();
    }
}
