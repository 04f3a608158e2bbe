use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};

use crate::config::{parse_recipients, MonitorConfig, PollInterval, SheetwatchConfig};
use crate::error::ConfigurationError;
use crate::filter::collect_watched_files;
use crate::refresh::RefresherKind;

#[derive(Parser)]
#[command(name = "sheetwatch")]
#[command(version)]
#[command(about = "Refreshes reporting spreadsheets on a schedule and mails changed ones as CSV")]
#[command(long_about = "sheetwatch polls a set of workbooks, forces their external data connections to refresh, \
and when a workbook's content changed since the last check converts it to CSV and mails the table to every recipient. \
SMTP credentials are read from SHEETWATCH_SMTP_USER and SHEETWATCH_SMTP_PASSWORD.")]
pub struct Cli {
    /// Workbooks to watch
    #[arg(value_name = "FILE", help = "Spreadsheet files to watch")]
    pub files: Vec<PathBuf>,

    /// Folder whose workbooks are watched as well
    #[arg(short, long, value_name = "DIR", help = "Also watch every workbook in this folder")]
    pub folder: Option<PathBuf>,

    /// Recipient addresses, comma separated; may be repeated
    #[arg(short, long = "to", value_name = "ADDRESSES", help = "Recipient addresses (comma separated)")]
    pub to: Vec<String>,

    /// Where CSV tables are written
    #[arg(short, long, value_name = "DIR", help = "Folder to save CSV files in")]
    pub output_dir: Option<PathBuf>,

    /// Minutes between cycles
    #[arg(short, long, value_parser = parse_interval, help = "Polling interval in minutes (1, 5, 10, 30 or 60)")]
    pub interval: Option<PollInterval>,

    /// TOML configuration file
    #[arg(short, long, value_name = "PATH", help = "Configuration file")]
    pub config: Option<PathBuf>,

    /// How workbooks are refreshed before inspection
    #[arg(long, help = "Refresh method")]
    pub refresher: Option<RefresherKind>,

    /// Sheet to export instead of the first one
    #[arg(long, help = "Sheet name to export")]
    pub sheet: Option<String>,

    /// Re-send next cycle when nobody received a table
    #[arg(long, help = "Retry delivery next cycle when every recipient failed")]
    pub retry_failed_delivery: bool,

    /// Run a single cycle and exit
    #[arg(long, help = "Check once and exit")]
    pub once: bool,

    /// Report format on stdout
    #[arg(long, default_value = "text", help = "Output format")]
    pub output: OutputFormat,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,

    /// Disable colors in output
    #[arg(long, help = "Disable colored output")]
    pub no_color: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable lines (default)
    Text,
    /// JSON event per line for scripting
    Json,
    /// One letter and path per file
    Compact,
}

fn parse_interval(value: &str) -> Result<PollInterval, String> {
    let minutes = value
        .trim()
        .parse::<u64>()
        .map_err(|e| format!("not a number of minutes: {e}"))?;
    PollInterval::try_from(minutes).map_err(|e| e.to_string())
}

impl Cli {
    pub fn recipients(&self) -> Vec<String> {
        self.to.iter().flat_map(|raw| parse_recipients(raw)).collect()
    }

    pub fn setup_logging(&self) {
        let level = if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        };

        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .with_ansi(!self.no_color)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init();
    }

    /// Check that the required inputs were given at all.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.files.is_empty() && self.folder.is_none() {
            return Err(ConfigurationError::NoFiles);
        }

        if self.recipients().is_empty() {
            return Err(ConfigurationError::NoRecipients);
        }

        if self.output_dir.is_none() {
            return Err(ConfigurationError::NoOutputDirectory);
        }

        Ok(())
    }

    /// Config file, then environment, then command-line flags.
    pub fn load_settings(&self) -> Result<SheetwatchConfig> {
        let mut settings =
            SheetwatchConfig::load_or_default(self.config.as_deref())?.with_env_overrides()?;

        if let Some(interval) = self.interval {
            settings.monitor.interval_minutes = interval;
        }
        if let Some(refresher) = self.refresher {
            settings.monitor.refresher = refresher;
        }
        if let Some(sheet) = &self.sheet {
            settings.export.sheet = Some(sheet.clone());
        }
        if self.retry_failed_delivery {
            settings.monitor.retry_failed_delivery = true;
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn monitor_config(&self, settings: &SheetwatchConfig) -> Result<MonitorConfig> {
        let files = collect_watched_files(&self.files, self.folder.as_deref())?;
        let output_dir = self
            .output_dir
            .clone()
            .ok_or(ConfigurationError::NoOutputDirectory)?;

        let config = MonitorConfig::new(
            files,
            self.recipients(),
            output_dir,
            settings.monitor.interval_minutes,
        )?
        .with_retry_failed_delivery(settings.monitor.retry_failed_delivery);
        Ok(config)
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            folder: None,
            to: Vec::new(),
            output_dir: None,
            interval: None,
            config: None,
            refresher: None,
            sheet: None,
            retry_failed_delivery: false,
            once: false,
            output: OutputFormat::Text,
            verbose: false,
            no_color: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_command_line() {
        let cli = Cli::try_parse_from([
            "sheetwatch",
            "/data/A.xlsx",
            "/data/B.xlsx",
            "--to",
            "a@x.com, b@x.com",
            "--to",
            "c@x.com",
            "-o",
            "/exports",
            "-i",
            "30",
            "--refresher",
            "none",
            "--output",
            "json",
        ])
        .unwrap();

        assert_eq!(cli.files.len(), 2);
        assert_eq!(cli.recipients(), vec!["a@x.com", "b@x.com", "c@x.com"]);
        assert_eq!(cli.interval.map(PollInterval::minutes), Some(30));
        assert_eq!(cli.refresher, Some(RefresherKind::None));
        assert_eq!(cli.output, OutputFormat::Json);
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_interval_outside_fixed_set_is_rejected() {
        let result = Cli::try_parse_from(["sheetwatch", "A.xlsx", "-i", "15"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_reports_first_missing_input() {
        let mut cli = Cli::default();
        assert_eq!(cli.validate(), Err(ConfigurationError::NoFiles));

        cli.files.push(PathBuf::from("/data/A.xlsx"));
        assert_eq!(cli.validate(), Err(ConfigurationError::NoRecipients));

        cli.to.push(" , ".to_string());
        assert_eq!(cli.validate(), Err(ConfigurationError::NoRecipients));

        cli.to.push("a@x.com".to_string());
        assert_eq!(cli.validate(), Err(ConfigurationError::NoOutputDirectory));

        cli.output_dir = Some(PathBuf::from("/exports"));
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_flags_override_settings() {
        let cli = Cli {
            files: vec![PathBuf::from("/data/A.xlsx")],
            to: vec!["a@x.com".to_string()],
            output_dir: Some(PathBuf::from("/exports")),
            interval: Some(PollInterval::try_from(60).unwrap()),
            sheet: Some("Summary".to_string()),
            retry_failed_delivery: true,
            ..Default::default()
        };

        let settings = cli.load_settings().unwrap();
        assert_eq!(settings.monitor.interval_minutes.minutes(), 60);
        assert_eq!(settings.export.sheet.as_deref(), Some("Summary"));

        let config = cli.monitor_config(&settings).unwrap();
        assert_eq!(config.files(), &[PathBuf::from("/data/A.xlsx")]);
        assert_eq!(config.interval().minutes(), 60);
        assert!(config.retry_failed_delivery());
    }
}
