//! Error types and Result aliases for openwrt-vm-setup

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::ConfigError;

/// Result type alias for openwrt-vm-setup operations
pub type Result<T> = std::result::Result<T, Error>;

/// Exit status for a clean run or a user interrupt
pub const EXIT_OK: i32 = 0;

/// Exit status for launch, boot and console failures
pub const EXIT_FAILURE: i32 = 1;

/// Exit status for configuration problems detected before launch
pub const EXIT_CONFIG: i32 = 2;

/// Main error type for openwrt-vm-setup
#[derive(Debug)]
pub enum Error {
    // === Launch errors ===
    /// The emulator executable could not be started
    LaunchFailed {
        command: String,
        reason: String,
    },

    /// Failed to create the pseudoterminal for the emulator
    PtyCreationFailed {
        command: String,
        reason: String,
    },

    /// Failed to clone PTY reader
    PtyReaderCloneFailed {
        reason: String,
    },

    /// Failed to take PTY writer
    PtyWriterTakeFailed {
        reason: String,
    },

    /// Failed to send input to PTY
    PtyInputSendFailed {
        reason: String,
    },

    // === Console errors ===
    /// The boot-completion marker did not appear in time
    BootTimeout {
        marker: String,
        timeout: Duration,
    },

    /// A post-boot wait (shell prompt) did not complete in time
    ConsoleTimeout {
        pattern: String,
        timeout: Duration,
    },

    /// The console stream ended before the expected marker appeared
    ProcessEndedUnexpectedly {
        context: String,
    },

    /// The operator cancelled the run
    UserInterrupted,

    // === Process control errors ===
    /// Failed to send signal to process
    SignalSendFailed {
        signal: String,
        reason: String,
    },

    // === Configuration errors ===
    /// Explicitly requested configuration file does not exist
    ConfigNotFound {
        path: PathBuf,
    },

    /// Failed to load configuration file
    ConfigLoadFailed {
        path: PathBuf,
        reason: String,
    },

    /// Configuration validation failed
    ConfigValidationFailed(ConfigError),

    // === I/O and serialization errors ===
    /// I/O errors
    Io(std::io::Error),

    /// Malformed JSON configuration
    Serde(serde_json::Error),

    /// Malformed TOML configuration
    Toml(toml::de::Error),

    /// Regex compilation errors
    Regex(regex::Error),
}

impl Error {
    /// Process exit status the binary reports for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::UserInterrupted => EXIT_OK,
            Error::ConfigNotFound { .. }
            | Error::ConfigLoadFailed { .. }
            | Error::ConfigValidationFailed(_)
            | Error::Serde(_)
            | Error::Toml(_) => EXIT_CONFIG,
            _ => EXIT_FAILURE,
        }
    }

    /// Whether this error is one of the scripted-wait timeouts
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::BootTimeout { .. } | Error::ConsoleTimeout { .. })
    }

    /// Whether the error came from the emulator never starting
    pub fn is_launch_failure(&self) -> bool {
        matches!(
            self,
            Error::LaunchFailed { .. }
                | Error::PtyCreationFailed { .. }
                | Error::PtyReaderCloneFailed { .. }
                | Error::PtyWriterTakeFailed { .. }
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Launch errors
            Error::LaunchFailed { command, reason } => {
                write!(f, "Failed to launch '{}': {}", command, reason)
            }
            Error::PtyCreationFailed { command, reason } => {
                write!(f, "Failed to create PTY for '{}': {}", command, reason)
            }
            Error::PtyReaderCloneFailed { reason } => {
                write!(f, "Failed to clone PTY reader: {}", reason)
            }
            Error::PtyWriterTakeFailed { reason } => {
                write!(f, "Failed to take PTY writer: {}", reason)
            }
            Error::PtyInputSendFailed { reason } => {
                write!(f, "Failed to send input to PTY: {}", reason)
            }

            // Console errors
            Error::BootTimeout { marker, timeout } => {
                write!(
                    f,
                    "Timeout waiting for boot: '{}' not seen within {}s",
                    marker,
                    timeout.as_secs()
                )
            }
            Error::ConsoleTimeout { pattern, timeout } => {
                write!(
                    f,
                    "Timeout waiting for console: '{}' not seen within {}s",
                    pattern,
                    timeout.as_secs()
                )
            }
            Error::ProcessEndedUnexpectedly { context } => {
                write!(f, "QEMU exited unexpectedly {}", context)
            }
            Error::UserInterrupted => write!(f, "Interrupted by user"),

            // Process control errors
            Error::SignalSendFailed { signal, reason } => {
                write!(f, "Failed to send signal '{}': {}", signal, reason)
            }

            // Configuration errors
            Error::ConfigNotFound { path } => {
                write!(f, "Configuration file '{}' not found", path.display())
            }
            Error::ConfigLoadFailed { path, reason } => {
                write!(f, "Failed to load config from '{}': {}", path.display(), reason)
            }
            Error::ConfigValidationFailed(err) => {
                write!(f, "Configuration validation failed: {}", err)
            }

            // I/O and serialization errors
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Serde(err) => write!(f, "Failed to parse JSON config: {}", err),
            Error::Toml(err) => write!(f, "Failed to parse TOML config: {}", err),
            Error::Regex(err) => write!(f, "Regex compilation error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::ConfigValidationFailed(err) => Some(err),
            Error::Io(err) => Some(err),
            Error::Serde(err) => Some(err),
            Error::Toml(err) => Some(err),
            Error::Regex(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err)
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Toml(err)
    }
}

impl From<regex::Error> for Error {
    fn from(err: regex::Error) -> Self {
        Error::Regex(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::ConfigValidationFailed(err)
    }
}
