//! Configuration types.
//!
//! Built once at process start from an optional JSON file
//! (`INCIDENT_SCANNER_CONFIG`) overlaid with environment variables.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use secrecy::SecretString;
use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_IMAP_PORT: u16 = 993;
pub const DEFAULT_SENDER_FILTER: &str = "noreply@statuspage.io";
pub const DEFAULT_DAYS_BACK: u32 = 10;
pub const DEFAULT_MAILBOX: &str = "INBOX";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Environment variable naming the optional JSON config file.
pub const CONFIG_FILE_VAR: &str = "INCIDENT_SCANNER_CONFIG";

/// Scanner configuration.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// IMAP server host name.
    pub server: String,
    /// IMAPS port (implicit TLS).
    pub port: u16,
    /// Login user.
    pub user: String,
    /// Login password.
    pub password: SecretString,
    /// Only messages from this sender are scanned.
    pub sender_filter: String,
    /// How many calendar days back the search reaches.
    pub days_back: u32,
    /// Mailbox to select.
    pub mailbox: String,
    /// Connect, read and write timeout for the session socket.
    pub timeout: Duration,
}

impl ScannerConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from any key lookup (file referenced by
    /// `INCIDENT_SCANNER_CONFIG` first, then variable overrides).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = match lookup(CONFIG_FILE_VAR) {
            Some(path) => FileConfig::load(Path::new(&path))
                .map_err(|e| ConfigError::File(format!("{e:#}")))?,
            None => FileConfig::default(),
        };

        let server = lookup("INCIDENT_IMAP_HOST")
            .or(file.server)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingRequired {
                key: "INCIDENT_IMAP_HOST".into(),
                hint: format!("Set it in the environment or as `server` in {CONFIG_FILE_VAR}."),
            })?;

        let port = match lookup("INCIDENT_IMAP_PORT") {
            Some(raw) => parse_value("INCIDENT_IMAP_PORT", &raw)?,
            None => file.port.unwrap_or(DEFAULT_IMAP_PORT),
        };

        let days_back = match lookup("INCIDENT_DAYS_BACK") {
            Some(raw) => parse_value("INCIDENT_DAYS_BACK", &raw)?,
            None => file.days_back.unwrap_or(DEFAULT_DAYS_BACK),
        };

        let timeout_secs: u64 = match lookup("INCIDENT_IMAP_TIMEOUT_SECS") {
            Some(raw) => parse_value("INCIDENT_IMAP_TIMEOUT_SECS", &raw)?,
            None => file.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
        };
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "INCIDENT_IMAP_TIMEOUT_SECS".into(),
                message: "timeout must be at least one second".into(),
            });
        }

        let user = lookup("INCIDENT_IMAP_USER")
            .or(file.user)
            .unwrap_or_default();
        let password = lookup("INCIDENT_IMAP_PASSWORD")
            .or(file.password)
            .unwrap_or_default();
        let sender_filter = lookup("INCIDENT_SENDER_FILTER")
            .or(file.sender_filter)
            .unwrap_or_else(|| DEFAULT_SENDER_FILTER.to_string());
        let mailbox = lookup("INCIDENT_MAILBOX")
            .or(file.mailbox)
            .unwrap_or_else(|| DEFAULT_MAILBOX.to_string());

        Ok(Self {
            server,
            port,
            user,
            password: SecretString::from(password),
            sender_filter,
            days_back,
            mailbox,
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{raw:?}: {e}"),
    })
}

/// On-disk config. Unknown keys are ignored so older templates still load.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    server: Option<String>,
    port: Option<u16>,
    user: Option<String>,
    password: Option<String>,
    sender_filter: Option<String>,
    days_back: Option<u32>,
    mailbox: Option<String>,
    timeout_secs: Option<u64>,
}

impl FileConfig {
    fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}
