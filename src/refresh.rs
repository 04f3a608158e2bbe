//! Forcing workbooks to recompute their external data connections.
//!
//! The desktop spreadsheet host is the only thing that can re-run a
//! workbook's queries, so refreshing sits behind the `Refresher` trait:
//! `ExcelRefresher` scripts the host through PowerShell, `NoopRefresher`
//! leaves the file untouched.

use std::path::Path;
use std::process::{Command, Stdio};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::RefreshError;

/// Recomputes a workbook's external data and saves it in place.
pub trait Refresher: Send {
    fn refresh(&self, path: &Path) -> Result<(), RefreshError>;

    /// Short name used in log lines
    fn name(&self) -> &'static str;
}

/// Which refresher to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RefresherKind {
    /// Excel on Windows, no refresh elsewhere
    #[default]
    Auto,
    /// Drive a hidden Excel instance
    Excel,
    /// Leave files untouched
    None,
}

impl RefresherKind {
    /// Resolve `Auto` for the current platform
    pub fn resolve(self) -> Self {
        match self {
            Self::Auto if cfg!(windows) => Self::Excel,
            Self::Auto => Self::None,
            other => other,
        }
    }

    pub fn build(self) -> Box<dyn Refresher> {
        match self.resolve() {
            Self::Excel => Box::new(ExcelRefresher::new()),
            _ => Box::new(NoopRefresher),
        }
    }
}

/// Leaves the workbook as it is.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRefresher;

impl Refresher for NoopRefresher {
    fn refresh(&self, path: &Path) -> Result<(), RefreshError> {
        if !path.exists() {
            return Err(RefreshError::NotFound {
                path: path.to_path_buf(),
            });
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

/// Environment variable carrying the workbook path into the script, so the
/// path never has to be quoted inside PowerShell source.
const WORKBOOK_ENV: &str = "SHEETWATCH_WORKBOOK";

/// Opens the workbook in a hidden Excel instance, runs `RefreshAll`, waits
/// for background queries, saves, closes and quits the host.
const REFRESH_SCRIPT: &str = r#"
$ErrorActionPreference = 'Stop'
$excel = New-Object -ComObject Excel.Application
try {
    $excel.Visible = $false
    $excel.DisplayAlerts = $false
    $workbook = $excel.Workbooks.Open($env:SHEETWATCH_WORKBOOK)
    try {
        $workbook.RefreshAll()
        $excel.CalculateUntilAsyncQueriesDone()
        $workbook.Save()
    } finally {
        $workbook.Close($true)
    }
} finally {
    $excel.Quit()
    [System.Runtime.InteropServices.Marshal]::ReleaseComObject($excel) | Out-Null
}
"#;

/// Refreshes through Excel's COM automation surface via PowerShell.
///
/// One host instance per call; it is released before `refresh` returns, so
/// only one workbook is ever open at a time.
#[derive(Debug, Clone)]
pub struct ExcelRefresher {
    shell: String,
}

impl ExcelRefresher {
    pub fn new() -> Self {
        Self::with_shell("powershell.exe")
    }

    /// Use a different PowerShell executable (e.g. `pwsh`)
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for ExcelRefresher {
    fn default() -> Self {
        Self::new()
    }
}

impl Refresher for ExcelRefresher {
    fn refresh(&self, path: &Path) -> Result<(), RefreshError> {
        if !path.exists() {
            return Err(RefreshError::NotFound {
                path: path.to_path_buf(),
            });
        }

        tracing::debug!("Refreshing {} via {}", path.display(), self.shell);

        let output = Command::new(&self.shell)
            .args([
                "-NoProfile",
                "-NonInteractive",
                "-ExecutionPolicy",
                "Bypass",
                "-Command",
                REFRESH_SCRIPT,
            ])
            .env(WORKBOOK_ENV, path)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| RefreshError::HostUnavailable {
                reason: format!("cannot start {}: {}", self.shell, e),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(RefreshError::HostFailed {
                path: path.to_path_buf(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    fn name(&self) -> &'static str {
        "excel"
    }
}
