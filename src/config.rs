//! Configuration management for sheetwatch
//!
//! This module provides the layered file configuration (defaults, TOML file,
//! environment overrides), SMTP credential resolution, and the validated
//! `MonitorConfig` value handed to the monitor loop.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::refresh::RefresherKind;

/// Polling intervals offered to the user, in minutes.
pub const ALLOWED_INTERVALS: [u64; 5] = [1, 5, 10, 30, 60];

pub const ENV_SMTP_HOST: &str = "SHEETWATCH_SMTP_HOST";
pub const ENV_SMTP_PORT: &str = "SHEETWATCH_SMTP_PORT";
pub const ENV_SENDER: &str = "SHEETWATCH_SENDER";
pub const ENV_SMTP_USER: &str = "SHEETWATCH_SMTP_USER";
pub const ENV_SMTP_PASSWORD: &str = "SHEETWATCH_SMTP_PASSWORD";

/// Time between the end of one cycle and the start of the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct PollInterval(u64);

impl PollInterval {
    pub fn minutes(self) -> u64 {
        self.0
    }

    pub fn duration(self) -> Duration {
        Duration::from_secs(self.0 * 60)
    }
}

impl Default for PollInterval {
    fn default() -> Self {
        Self(5)
    }
}

impl TryFrom<u64> for PollInterval {
    type Error = ConfigurationError;

    fn try_from(minutes: u64) -> Result<Self, Self::Error> {
        if ALLOWED_INTERVALS.contains(&minutes) {
            Ok(Self(minutes))
        } else {
            Err(ConfigurationError::InvalidInterval(minutes))
        }
    }
}

impl From<PollInterval> for u64 {
    fn from(interval: PollInterval) -> Self {
        interval.0
    }
}

impl fmt::Display for PollInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} min", self.0)
    }
}

/// Validated inputs for one monitoring run. Immutable once built.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    files: Vec<PathBuf>,
    recipients: Vec<String>,
    output_dir: PathBuf,
    interval: PollInterval,
    retry_failed_delivery: bool,
}

impl MonitorConfig {
    /// Build a config, rejecting empty inputs.
    ///
    /// Recipients are trimmed and blank entries dropped. Duplicate files are
    /// collapsed, keeping the first occurrence so visit order stays stable.
    pub fn new(
        files: Vec<PathBuf>,
        recipients: Vec<String>,
        output_dir: PathBuf,
        interval: PollInterval,
    ) -> Result<Self, ConfigurationError> {
        let mut seen = HashSet::new();
        let files: Vec<PathBuf> = files
            .into_iter()
            .filter(|path| seen.insert(path.clone()))
            .collect();
        if files.is_empty() {
            return Err(ConfigurationError::NoFiles);
        }

        let recipients: Vec<String> = recipients
            .iter()
            .map(|r| r.trim())
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .collect();
        if recipients.is_empty() {
            return Err(ConfigurationError::NoRecipients);
        }

        if output_dir.as_os_str().is_empty() {
            return Err(ConfigurationError::NoOutputDirectory);
        }

        Ok(Self {
            files,
            recipients,
            output_dir,
            interval,
            retry_failed_delivery: false,
        })
    }

    /// Keep the fingerprint unrecorded when no recipient got the table.
    pub fn with_retry_failed_delivery(mut self, retry: bool) -> Self {
        self.retry_failed_delivery = retry;
        self
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn interval(&self) -> PollInterval {
        self.interval
    }

    pub fn retry_failed_delivery(&self) -> bool {
        self.retry_failed_delivery
    }
}

/// Split raw user text into trimmed, non-empty addresses.
pub fn parse_recipients(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Settings loaded from the optional TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetwatchConfig {
    /// Mail relay
    pub smtp: SmtpConfig,
    /// Message content
    pub mail: MailConfig,
    /// Table export
    pub export: ExportConfig,
    /// Monitor defaults
    pub monitor: MonitorSection,
}

/// Relay connection settings (no secrets)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    /// Sender address; defaults to the SMTP user
    pub sender: Option<String>,
}

/// Subject and body of every notification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub subject: String,
    pub body: String,
}

/// Which part of the workbook gets exported
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Sheet name; the first sheet when unset
    pub sheet: Option<String>,
}

/// Defaults for values the command line may override
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSection {
    pub interval_minutes: PollInterval,
    pub retry_failed_delivery: bool,
    pub refresher: RefresherKind,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: "smtp.gmail.com".to_string(),
            port: 587,
            sender: None,
        }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            subject: "Monitored CSV File".to_string(),
            body: "Attached is the updated CSV file from the monitored Excel file.".to_string(),
        }
    }
}

impl SheetwatchConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Load from `path` if given, otherwise use defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Override relay settings with environment variables if present
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigurationError> {
        if let Ok(host) = std::env::var(ENV_SMTP_HOST) {
            self.smtp.host = host;
        }

        if let Ok(val) = std::env::var(ENV_SMTP_PORT) {
            self.smtp.port = val.parse::<u16>().map_err(|e| ConfigurationError::InvalidValue {
                key: ENV_SMTP_PORT,
                reason: e.to_string(),
            })?;
        }

        if let Ok(sender) = std::env::var(ENV_SENDER) {
            self.smtp.sender = Some(sender);
        }

        Ok(self)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.smtp.host.trim().is_empty() {
            return Err(ConfigurationError::InvalidValue {
                key: "smtp.host",
                reason: "must not be empty".to_string(),
            });
        }

        if self.smtp.port == 0 {
            return Err(ConfigurationError::InvalidValue {
                key: "smtp.port",
                reason: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

/// Relay settings plus credentials, resolved at startup.
#[derive(Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub sender: String,
    pub username: String,
    pub password: String,
}

impl SmtpSettings {
    /// Resolve credentials from the process environment.
    pub fn resolve(config: &SmtpConfig) -> Result<Self, ConfigurationError> {
        Self::resolve_with(config, |key| std::env::var(key).ok())
    }

    /// Resolve credentials through `lookup`, which maps a variable name to its value.
    pub fn resolve_with<F>(config: &SmtpConfig, lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let username = lookup(ENV_SMTP_USER)
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigurationError::MissingEnv(ENV_SMTP_USER))?;
        let password = lookup(ENV_SMTP_PASSWORD)
            .filter(|v| !v.is_empty())
            .ok_or(ConfigurationError::MissingEnv(ENV_SMTP_PASSWORD))?;
        let sender = config.sender.clone().unwrap_or_else(|| username.clone());

        Ok(Self {
            host: config.host.clone(),
            port: config.port,
            sender,
            username,
            password,
        })
    }
}

impl fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("sender", &self.sender)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
