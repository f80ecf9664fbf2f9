//! Error types for the incident scanner.

/// Failure of a scan run.
///
/// Every step of the pipeline reports through this type; `main` collapses it
/// into a single `Error processing emails: ...` line.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Connection to {server} failed: {reason}")]
    Connection { server: String, reason: String },

    #[error("Authentication failed for {user}: {reason}")]
    Authentication { user: String, reason: String },

    #[error("Protocol error during {command}: {reason}")]
    Protocol { command: String, reason: String },
}

impl ScanError {
    pub(crate) fn protocol(command: &str, reason: impl Into<String>) -> Self {
        Self::Protocol {
            command: command.to_string(),
            reason: reason.into(),
        }
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to load configuration file: {0}")]
    File(String),
}

/// Result type alias for scan operations.
pub type Result<T> = std::result::Result<T, ScanError>;
