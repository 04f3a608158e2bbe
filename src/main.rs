use std::io::Write;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use sheetwatch::{
    cli::{Cli, OutputFormat},
    config::SmtpSettings,
    export::TableExporter,
    monitor::{MonitorLoop, MonitorWorker, StopSignal},
    notifier::{Notifier, SmtpMailer},
    FileOutcome, FileReport, MonitorEvent,
};

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(err) = cli.validate() {
        eprintln!("Error: {}", err);
        eprintln!("Please select files or a folder to monitor, a save folder, and enter email addresses!");
        std::process::exit(2);
    }

    cli.setup_logging();

    let settings = cli.load_settings()?;
    let config = Arc::new(cli.monitor_config(&settings)?);
    let smtp = SmtpSettings::resolve(&settings.smtp)?;
    let mailer = SmtpMailer::new(&smtp)?;
    let notifier = Notifier::new(Box::new(mailer), &smtp.sender, settings.mail.clone())?;
    let refresher = settings.monitor.refresher.build();

    tracing::info!(
        "Watching {} workbook(s) every {}, refresher: {}, sending to {} recipient(s) via {}:{}",
        config.files().len(),
        config.interval(),
        refresher.name(),
        config.recipients().len(),
        smtp.host,
        smtp.port
    );

    let (event_tx, event_rx) = mpsc::channel();
    let worker = MonitorWorker::new(
        Arc::clone(&config),
        refresher,
        TableExporter::new(settings.export.clone()),
        notifier,
    )
    .with_events(event_tx);

    if cli.once {
        run_once(worker, event_rx, &cli)
    } else {
        run_monitor(worker, event_rx, &cli)
    }
}

fn run_once(mut worker: MonitorWorker, events: Receiver<MonitorEvent>, cli: &Cli) -> Result<()> {
    let output_dir = worker.config().output_dir().to_path_buf();
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create output directory {}", output_dir.display()))?;

    let report = worker.run_cycle(&StopSignal::new());
    drop(worker);

    for event in events {
        print_event(&event, cli)?;
    }

    if report.failure_count() > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn run_monitor(worker: MonitorWorker, events: Receiver<MonitorEvent>, cli: &Cli) -> Result<()> {
    let stop = StopSignal::new();
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        tracing::info!("Stop requested, finishing current file...");
        handler_stop.stop();
    })?;

    let mut monitor = MonitorLoop::new(worker, stop);
    monitor.start()?;

    if cli.output == OutputFormat::Text {
        println!("Press Ctrl+C to stop");
        println!("---");
    }

    // The worker drops its sender when it exits, which ends this loop
    for event in events {
        print_event(&event, cli)?;
    }

    let summary = monitor.join()?;
    tracing::debug!(
        "{} cycles, {} tables sent, {} failures",
        summary.cycles,
        summary.files_changed,
        summary.failures
    );
    Ok(())
}

fn print_event(event: &MonitorEvent, cli: &Cli) -> Result<()> {
    match cli.output {
        OutputFormat::Json => println!("{}", serde_json::to_string(event)?),
        OutputFormat::Compact => {
            if let MonitorEvent::FileProcessed(report) = event {
                println!("{} {}", report.outcome.code(), report.path.display());
            }
        }
        OutputFormat::Text => print_text_event(event, cli.no_color),
    }
    std::io::stdout().flush()?;
    Ok(())
}

fn print_text_event(event: &MonitorEvent, no_color: bool) {
    match event {
        MonitorEvent::CycleStarted { cycle, timestamp } => {
            println!("[{}] Cycle {} started", timestamp.format("%H:%M:%S"), cycle);
        }
        MonitorEvent::FileProcessed(report) => print_file_report(report, no_color),
        MonitorEvent::CycleFinished(report) => {
            println!(
                "[{}] Cycle {} finished: {} changed, {} failed{}",
                report.finished_at.format("%H:%M:%S"),
                report.cycle,
                report.changed_count(),
                report.failure_count(),
                if report.interrupted { " (interrupted)" } else { "" }
            );
            println!();
        }
        MonitorEvent::Stopped(summary) => {
            println!(
                "Stopped after {} cycle(s): {} table(s) sent, {} failure(s)",
                summary.cycles, summary.files_changed, summary.failures
            );
        }
    }
}

fn print_file_report(report: &FileReport, no_color: bool) {
    let (label, color) = match &report.outcome {
        FileOutcome::Unchanged { .. } => ("UNCHANGED", "\x1b[90m"),      // Grey
        FileOutcome::Changed { .. } if !report.outcome.is_failure() => ("SENT", "\x1b[32m"), // Green
        FileOutcome::Changed { .. } | FileOutcome::DeliveryFailed { .. } => ("DELIVERY", "\x1b[33m"), // Yellow
        FileOutcome::RefreshFailed { .. } | FileOutcome::ReadFailed { .. } => ("REFRESH", "\x1b[31m"), // Red
        FileOutcome::ExportFailed { .. } => ("EXPORT", "\x1b[31m"),
    };

    let time_str = report.timestamp.format("%H:%M:%S");
    if no_color {
        println!("[{}] {} {}", time_str, label, report.path.display());
    } else {
        println!("[{}] {}{}\x1b[0m {}", time_str, color, label, report.path.display());
    }

    match &report.outcome {
        FileOutcome::Changed { table, delivery, .. } => {
            println!("  -> {} ({} rows)", table.path.display(), table.rows);
            for recipient in &delivery.delivered {
                println!("  sent to {}", recipient);
            }
            for failure in &delivery.failed {
                println!("  not sent to {}: {}", failure.recipient, failure.error);
            }
        }
        FileOutcome::DeliveryFailed { table, error, .. } => {
            println!("  -> {}", table.path.display());
            println!("  {}", error);
        }
        FileOutcome::RefreshFailed { error }
        | FileOutcome::ReadFailed { error }
        | FileOutcome::ExportFailed { error, .. } => println!("  {}", error),
        FileOutcome::Unchanged { .. } => {}
    }
}
