//! The polling loop.
//!
//! Each cycle visits the watched files in configured order and runs
//! refresh, fingerprint, export and notify for each one. A failure stays
//! with its file: the outcome is recorded and the cycle moves on. Between
//! cycles the worker sleeps on the `StopSignal`, which wakes it as soon as
//! a stop is requested.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::config::MonitorConfig;
use crate::detector::{ChangeDetector, Fingerprint};
use crate::error::MonitorError;
use crate::events::{CycleReport, FileOutcome, FileReport, MonitorEvent, MonitorSummary};
use crate::export::TableExporter;
use crate::notifier::Notifier;
use crate::refresh::Refresher;

/// Cooperative stop flag shared between the controlling thread and the worker.
///
/// Cloning shares the flag. Once set it stays set.
#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

#[derive(Default)]
struct StopInner {
    stopped: AtomicBool,
    lock: Mutex<()>,
    wakeup: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        // Taking the lock orders this notify after any waiter's flag check
        let _guard = self.inner.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.inner.wakeup.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Sleep for up to `timeout`. Returns `true` if woken by a stop.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.lock.lock().unwrap_or_else(PoisonError::into_inner);

        while !self.is_stopped() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, _) = self
                .inner
                .wakeup
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            guard = next;
        }

        true
    }
}

impl std::fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopSignal")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Runs cycles. Owns the fingerprint map and every pipeline component, so
/// nothing here is shared with the controlling thread.
pub struct MonitorWorker {
    config: Arc<MonitorConfig>,
    refresher: Box<dyn Refresher>,
    detector: ChangeDetector,
    exporter: TableExporter,
    notifier: Notifier,
    events: Option<Sender<MonitorEvent>>,
    cycles: u64,
}

impl MonitorWorker {
    pub fn new(
        config: Arc<MonitorConfig>,
        refresher: Box<dyn Refresher>,
        exporter: TableExporter,
        notifier: Notifier,
    ) -> Self {
        Self {
            config,
            refresher,
            detector: ChangeDetector::new(),
            exporter,
            notifier,
            events: None,
            cycles: 0,
        }
    }

    /// Publish progress on `events`. A dropped receiver is ignored.
    pub fn with_events(mut self, events: Sender<MonitorEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn detector(&self) -> &ChangeDetector {
        &self.detector
    }

    fn emit(&self, event: MonitorEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    /// Refresh, fingerprint, export and notify one file.
    ///
    /// Never fails: every error becomes the returned outcome. The stored
    /// fingerprint only moves once the export has succeeded.
    pub fn process_file(&mut self, path: &Path) -> FileOutcome {
        if let Err(err) = self.refresher.refresh(path) {
            tracing::warn!("Error refreshing {}: {}", path.display(), err);
            return FileOutcome::RefreshFailed {
                error: err.to_string(),
            };
        }

        let fingerprint = match self.detector.fingerprint(path) {
            Ok(fingerprint) => fingerprint,
            Err(err) => {
                tracing::warn!("Error reading {}: {}", path.display(), err);
                return FileOutcome::ReadFailed {
                    error: err.to_string(),
                };
            }
        };

        if !self.detector.has_changed(path, &fingerprint) {
            tracing::info!("No changes detected in {}.", path.display());
            return FileOutcome::Unchanged { fingerprint };
        }

        tracing::info!("Changes detected in {}, processing...", path.display());

        let table = match self.exporter.export(path, self.config.output_dir()) {
            Ok(table) => table,
            Err(err) => {
                tracing::warn!("Error converting {}: {}", path.display(), err);
                return FileOutcome::ExportFailed {
                    fingerprint,
                    error: err.to_string(),
                };
            }
        };

        tracing::info!("Converted {} to {}", path.display(), table.path.display());

        match self.notifier.send(&table.path, self.config.recipients()) {
            Ok(delivery) => {
                let recorded = self.advance(path, fingerprint, delivery.all_failed());
                FileOutcome::Changed {
                    fingerprint,
                    table,
                    delivery,
                    recorded,
                }
            }
            Err(err) => {
                tracing::warn!("Failed to send {}: {}", table.path.display(), err);
                let recorded = self.advance(path, fingerprint, true);
                FileOutcome::DeliveryFailed {
                    fingerprint,
                    table,
                    error: err.to_string(),
                    recorded,
                }
            }
        }
    }

    fn advance(&mut self, path: &Path, fingerprint: Fingerprint, nobody_reached: bool) -> bool {
        if nobody_reached && self.config.retry_failed_delivery() {
            tracing::debug!(
                "Keeping previous fingerprint for {} so delivery is retried",
                path.display()
            );
            return false;
        }
        self.detector.record(path, fingerprint);
        true
    }

    /// One pass over the watched files, checking `stop` before each file.
    pub fn run_cycle(&mut self, stop: &StopSignal) -> CycleReport {
        self.cycles += 1;
        let cycle = self.cycles;
        let started_at = Utc::now();
        self.emit(MonitorEvent::CycleStarted {
            cycle,
            timestamp: started_at,
        });

        let config = Arc::clone(&self.config);
        let mut files = Vec::with_capacity(config.files().len());
        let mut interrupted = false;

        for path in config.files() {
            if stop.is_stopped() {
                interrupted = true;
                break;
            }

            let report = FileReport::new(path.clone(), self.process_file(path));
            self.emit(MonitorEvent::FileProcessed(report.clone()));
            files.push(report);
        }

        let report = CycleReport {
            cycle,
            started_at,
            finished_at: Utc::now(),
            files,
            interrupted,
        };
        tracing::debug!(
            "Cycle {} done: {} changed, {} failed",
            cycle,
            report.changed_count(),
            report.failure_count()
        );
        self.emit(MonitorEvent::CycleFinished(report.clone()));
        report
    }

    /// Cycle until `stop` is set, sleeping the configured interval between cycles.
    pub fn run(mut self, stop: StopSignal) -> MonitorSummary {
        let mut summary = MonitorSummary::default();

        while !stop.is_stopped() {
            let report = self.run_cycle(&stop);
            summary.add_cycle(&report);
            if report.interrupted {
                break;
            }

            tracing::debug!("Next check in {}", self.config.interval());
            if stop.wait_timeout(self.config.interval().duration()) {
                break;
            }
        }

        tracing::info!("Monitoring stopped after {} cycles", summary.cycles);
        self.emit(MonitorEvent::Stopped(summary));
        summary
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Constructed, not started
    Idle,
    /// Worker thread polling
    Running,
    /// Stop observed and worker joined
    Stopped,
}

/// Owns the worker thread and its lifecycle: `Idle -> Running -> Stopped`.
pub struct MonitorLoop {
    state: MonitorState,
    stop: StopSignal,
    worker: Option<MonitorWorker>,
    handle: Option<JoinHandle<MonitorSummary>>,
    summary: MonitorSummary,
}

impl MonitorLoop {
    pub fn new(worker: MonitorWorker, stop: StopSignal) -> Self {
        Self {
            state: MonitorState::Idle,
            stop,
            worker: Some(worker),
            handle: None,
            summary: MonitorSummary::default(),
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Create the output directory and spawn the worker.
    pub fn start(&mut self) -> Result<(), MonitorError> {
        if self.state != MonitorState::Idle {
            return Err(MonitorError::InvalidState(state_name(self.state)));
        }
        let output_dir = match &self.worker {
            Some(worker) => worker.config().output_dir().to_path_buf(),
            None => return Err(MonitorError::InvalidState(state_name(self.state))),
        };

        std::fs::create_dir_all(&output_dir).map_err(|source| {
            tracing::error!("Cannot create output directory {}", output_dir.display());
            MonitorError::OutputDirectory {
                path: output_dir.clone(),
                source,
            }
        })?;

        let Some(worker) = self.worker.take() else {
            return Err(MonitorError::InvalidState(state_name(self.state)));
        };
        let stop = self.stop.clone();
        let handle = thread::Builder::new()
            .name("sheetwatch-monitor".to_owned())
            .spawn(move || worker.run(stop))
            .map_err(MonitorError::Spawn)?;

        self.handle = Some(handle);
        self.state = MonitorState::Running;
        tracing::info!("Monitoring started...");
        Ok(())
    }

    /// Request a stop and wait for the worker to finish its current file.
    pub fn stop(&mut self) -> Result<MonitorSummary, MonitorError> {
        self.stop.stop();
        self.join()
    }

    /// Wait for the worker to exit after the stop signal is set elsewhere.
    pub fn join(&mut self) -> Result<MonitorSummary, MonitorError> {
        match self.state {
            MonitorState::Idle => {
                self.worker = None;
                self.state = MonitorState::Stopped;
            }
            MonitorState::Running => {
                if let Some(handle) = self.handle.take() {
                    self.state = MonitorState::Stopped;
                    self.summary = handle.join().map_err(|_| MonitorError::WorkerPanicked)?;
                }
            }
            MonitorState::Stopped => {}
        }
        Ok(self.summary)
    }
}

impl Drop for MonitorLoop {
    fn drop(&mut self) {
        if self.state == MonitorState::Running {
            let _ = self.stop();
        }
    }
}

fn state_name(state: MonitorState) -> &'static str {
    match state {
        MonitorState::Idle => "idle",
        MonitorState::Running => "running",
        MonitorState::Stopped => "stopped",
    }
}
