//! Error types for the monitoring pipeline.
//!
//! Each pipeline step has its own error so the monitor can decide per file
//! whether to skip, retry next cycle, or advance the stored fingerprint.

use std::path::PathBuf;
use thiserror::Error;

/// Failure forcing a workbook to recompute its external data.
#[derive(Error, Debug)]
pub enum RefreshError {
    #[error("Spreadsheet host unavailable: {reason}")]
    HostUnavailable { reason: String },

    #[error("Refresh of {path} failed (exit code {code:?}): {stderr}")]
    HostFailed {
        path: PathBuf,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Workbook not found: {path}")]
    NotFound { path: PathBuf },
}

/// Failure converting a workbook into a delimited table.
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("Failed to open workbook {path}: {reason}")]
    Open { path: PathBuf, reason: String },

    #[error("Workbook {path} has no sheets")]
    NoSheets { path: PathBuf },

    #[error("Sheet '{sheet}' not found in {path}")]
    SheetNotFound { path: PathBuf, sheet: String },

    #[error("Failed to read sheet '{sheet}' in {path}: {reason}")]
    Read {
        path: PathBuf,
        sheet: String,
        reason: String,
    },

    #[error("Workbook path has no file name: {path}")]
    NoFileName { path: PathBuf },

    #[error("Failed to write table {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure delivering an exported table.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Invalid address '{address}': {reason}")]
    Address { address: String, reason: String },

    #[error("Failed to read attachment {path}: {source}")]
    Attachment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to build message: {reason}")]
    Message { reason: String },

    #[error("Mail transport error: {reason}")]
    Transport { reason: String },
}

/// Missing or invalid input detected before monitoring starts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("No spreadsheet files selected")]
    NoFiles,

    #[error("No recipient addresses given")]
    NoRecipients,

    #[error("No output directory given")]
    NoOutputDirectory,

    #[error("Polling interval {0} is not one of 1, 5, 10, 30, 60 minutes")]
    InvalidInterval(u64),

    #[error("Unsupported spreadsheet format: {0}")]
    UnsupportedFile(PathBuf),

    #[error("Folder to monitor does not exist: {0}")]
    MissingFolder(PathBuf),

    #[error("Environment variable {0} must be set")]
    MissingEnv(&'static str),

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

/// Failure of the monitor itself (not of a single file).
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Cannot create output directory {path}: {source}")]
    OutputDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn monitor worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Monitor is already {0}")]
    InvalidState(&'static str),

    #[error("Monitor worker panicked")]
    WorkerPanicked,
}
