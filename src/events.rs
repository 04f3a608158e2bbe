use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::detector::Fingerprint;
use crate::export::ExportedTable;
use crate::notifier::DeliveryReport;

/// What happened to one watched file in one cycle.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FileOutcome {
    /// Content matches the recorded fingerprint; nothing exported or sent
    Unchanged { fingerprint: Fingerprint },
    /// Exported and handed to the notifier; `delivery` lists per-recipient results
    Changed {
        fingerprint: Fingerprint,
        table: ExportedTable,
        delivery: DeliveryReport,
        recorded: bool,
    },
    /// Exported, but the send step failed before any recipient was tried
    DeliveryFailed {
        fingerprint: Fingerprint,
        table: ExportedTable,
        error: String,
        recorded: bool,
    },
    RefreshFailed { error: String },
    /// The refreshed file could not be read for fingerprinting
    ReadFailed { error: String },
    /// Conversion failed; the fingerprint was not advanced
    ExportFailed { fingerprint: Fingerprint, error: String },
}

impl FileOutcome {
    /// Single-letter code for compact output
    pub fn code(&self) -> char {
        match self {
            Self::Unchanged { .. } => 'U',
            Self::Changed { delivery, .. } if delivery.failed.is_empty() => 'C',
            Self::Changed { .. } | Self::DeliveryFailed { .. } => 'D',
            Self::RefreshFailed { .. } | Self::ReadFailed { .. } => 'R',
            Self::ExportFailed { .. } => 'E',
        }
    }

    pub fn is_failure(&self) -> bool {
        self.code() != 'U' && self.code() != 'C'
    }

    pub fn was_exported(&self) -> bool {
        matches!(self, Self::Changed { .. } | Self::DeliveryFailed { .. })
    }

    /// Whether the new fingerprint was stored for the next cycle
    pub fn recorded(&self) -> bool {
        match self {
            Self::Changed { recorded, .. } | Self::DeliveryFailed { recorded, .. } => *recorded,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: FileOutcome,
}

impl FileReport {
    pub fn new(path: PathBuf, outcome: FileOutcome) -> Self {
        Self {
            path,
            timestamp: Utc::now(),
            outcome,
        }
    }
}

/// One pass over the watched files.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub files: Vec<FileReport>,
    /// Stop was requested before every file was visited
    pub interrupted: bool,
}

impl CycleReport {
    pub fn changed_count(&self) -> usize {
        self.files.iter().filter(|f| f.outcome.was_exported()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.files.iter().filter(|f| f.outcome.is_failure()).count()
    }
}

/// Totals for a whole run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MonitorSummary {
    pub cycles: u64,
    pub files_changed: u64,
    pub failures: u64,
}

impl MonitorSummary {
    pub fn add_cycle(&mut self, report: &CycleReport) {
        self.cycles += 1;
        self.files_changed += report.changed_count() as u64;
        self.failures += report.failure_count() as u64;
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MonitorEvent {
    CycleStarted { cycle: u64, timestamp: DateTime<Utc> },
    FileProcessed(FileReport),
    CycleFinished(CycleReport),
    Stopped(MonitorSummary),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ExportedTable {
        ExportedTable {
            source: PathBuf::from("/data/A.xlsx"),
            path: PathBuf::from("/out/A.csv"),
            sheet: "Sheet1".to_string(),
            rows: 3,
            columns: 2,
        }
    }

    fn changed(failed: bool) -> FileOutcome {
        let mut delivery = DeliveryReport {
            attachment: PathBuf::from("/out/A.csv"),
            delivered: vec!["b@x.com".to_string()],
            failed: vec![],
        };
        if failed {
            delivery.failed.push(crate::notifier::RecipientFailure {
                recipient: "a@x.com".to_string(),
                error: "refused".to_string(),
            });
        }
        FileOutcome::Changed {
            fingerprint: Fingerprint::of_bytes(b"v1"),
            table: table(),
            delivery,
            recorded: true,
        }
    }

    #[test]
    fn test_outcome_codes() {
        let unchanged = FileOutcome::Unchanged {
            fingerprint: Fingerprint::of_bytes(b"v1"),
        };
        assert_eq!(unchanged.code(), 'U');
        assert!(!unchanged.is_failure());
        assert!(!unchanged.was_exported());

        assert_eq!(changed(false).code(), 'C');
        assert!(!changed(false).is_failure());
        assert_eq!(changed(true).code(), 'D');
        assert!(changed(true).is_failure());
        assert!(changed(true).recorded());

        let export_failed = FileOutcome::ExportFailed {
            fingerprint: Fingerprint::of_bytes(b"v1"),
            error: "bad zip".to_string(),
        };
        assert_eq!(export_failed.code(), 'E');
        assert!(!export_failed.recorded());

        let refresh_failed = FileOutcome::RefreshFailed {
            error: "locked".to_string(),
        };
        assert_eq!(refresh_failed.code(), 'R');
    }

    #[test]
    fn test_summary_accumulates_cycles() {
        let now = Utc::now();
        let report = CycleReport {
            cycle: 1,
            started_at: now,
            finished_at: now,
            files: vec![
                FileReport::new(PathBuf::from("/data/A.xlsx"), changed(false)),
                FileReport::new(
                    PathBuf::from("/data/B.xlsx"),
                    FileOutcome::RefreshFailed {
                        error: "locked".to_string(),
                    },
                ),
            ],
            interrupted: false,
        };

        let mut summary = MonitorSummary::default();
        summary.add_cycle(&report);
        summary.add_cycle(&report);

        assert_eq!(
            summary,
            MonitorSummary {
                cycles: 2,
                files_changed: 2,
                failures: 2,
            }
        );
    }

    #[test]
    fn test_json_shape() {
        let report = FileReport::new(PathBuf::from("/data/A.xlsx"), changed(false));
        let json = serde_json::to_value(MonitorEvent::FileProcessed(report)).unwrap();

        assert_eq!(json["event"], "file_processed");
        assert_eq!(json["outcome"], "changed");
        assert_eq!(json["path"], "/data/A.xlsx");
        assert_eq!(json["table"]["path"], "/out/A.csv");
        assert_eq!(json["fingerprint"].as_str().unwrap().len(), 64);
    }
}
