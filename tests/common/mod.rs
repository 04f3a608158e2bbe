#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use lettre::Message;
use sheetwatch::config::{MailConfig, MonitorConfig, PollInterval};
use sheetwatch::export::TableExporter;
use sheetwatch::monitor::MonitorWorker;
use sheetwatch::notifier::{Mailer, Notifier};
use sheetwatch::refresh::Refresher;
use sheetwatch::{DeliveryError, RefreshError};

/// Write a one-sheet workbook with `rows` as string cells.
pub fn write_workbook(path: &Path, rows: &[&[&str]]) {
    let mut book = umya_spreadsheet::new_file();
    let sheet = book
        .get_sheet_by_name_mut("Sheet1")
        .expect("new workbook has Sheet1");
    for (r, row) in rows.iter().enumerate() {
        for (c, value) in row.iter().enumerate() {
            sheet
                .get_cell_mut(((c + 1) as u32, (r + 1) as u32))
                .set_value(*value);
        }
    }
    umya_spreadsheet::writer::xlsx::write(&book, path).expect("Failed to write workbook");
}

/// Write a workbook whose first column is a `Stamp` header followed by
/// `serials` as date-formatted numbers.
pub fn write_date_workbook(path: &Path, serials: &[f64]) {
    let mut book = umya_spreadsheet::new_file();
    let sheet = book
        .get_sheet_by_name_mut("Sheet1")
        .expect("new workbook has Sheet1");
    sheet.get_cell_mut((1, 1)).set_value("Stamp");
    for (i, serial) in serials.iter().enumerate() {
        let row = (i + 2) as u32;
        sheet.get_cell_mut((1, row)).set_value_number(*serial);
        sheet
            .get_style_mut((1, row))
            .get_number_format_mut()
            .set_format_code("yyyy-mm-dd");
    }
    umya_spreadsheet::writer::xlsx::write(&book, path).expect("Failed to write workbook");
}

/// Counts refreshes and leaves the workbook untouched.
#[derive(Clone, Default)]
pub struct CountingRefresher {
    pub calls: Arc<AtomicUsize>,
}

impl CountingRefresher {
    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Refresher for CountingRefresher {
    fn refresh(&self, path: &Path) -> Result<(), RefreshError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if path.exists() {
            Ok(())
        } else {
            Err(RefreshError::NotFound {
                path: path.to_path_buf(),
            })
        }
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}

/// Captures sent messages; refuses the addresses in `reject`.
#[derive(Clone, Default)]
pub struct RecordingMailer {
    sent: Arc<Mutex<Vec<String>>>,
    reject: Arc<Mutex<Vec<String>>>,
}

impl RecordingMailer {
    pub fn rejecting(addresses: &[&str]) -> Self {
        let mailer = Self::default();
        mailer.set_rejected(addresses);
        mailer
    }

    pub fn set_rejected(&self, addresses: &[&str]) {
        *self.reject.lock().unwrap() = addresses.iter().map(|a| a.to_string()).collect();
    }

    /// Recipients of every accepted message, in send order
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

impl Mailer for RecordingMailer {
    fn send(&self, message: &Message) -> Result<(), DeliveryError> {
        let to = message.envelope().to()[0].to_string();
        if self.reject.lock().unwrap().contains(&to) {
            return Err(DeliveryError::Transport {
                reason: "550 mailbox unavailable".to_string(),
            });
        }
        self.sent.lock().unwrap().push(to);
        Ok(())
    }
}

pub struct Harness {
    pub worker: MonitorWorker,
    pub refresher: CountingRefresher,
    pub mailer: RecordingMailer,
}

pub fn harness(
    files: Vec<PathBuf>,
    recipients: &[&str],
    output_dir: &Path,
    retry_failed_delivery: bool,
    mailer: RecordingMailer,
) -> Harness {
    let config = MonitorConfig::new(
        files,
        recipients.iter().map(|r| r.to_string()).collect(),
        output_dir.to_path_buf(),
        PollInterval::try_from(1).expect("1 minute is allowed"),
    )
    .expect("valid config")
    .with_retry_failed_delivery(retry_failed_delivery);

    let refresher = CountingRefresher::default();
    let notifier = Notifier::new(
        Box::new(mailer.clone()),
        "reports@example.com",
        MailConfig::default(),
    )
    .expect("valid sender");

    let worker = MonitorWorker::new(
        Arc::new(config),
        Box::new(refresher.clone()),
        TableExporter::default(),
        notifier,
    );

    Harness {
        worker,
        refresher,
        mailer,
    }
}
