//! `dss run` - scan the dropbox and register what arrives

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use dss_core::{QueueingPathRemover, StopSignal};
use dss_registrator::{
    DefaultStorageProcessor, DropboxItemHandler, JournalEntityService, TransactionContext,
    rollback_dead_transactions,
};
use dss_scanner::{
    CompositeHandler, DirectoryScanner, DirectoryStore, FaultyPathTracker, ReprocessingHandler,
};

use crate::config::Config;

/// How long shutdown waits for queued deletions.
const REMOVER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Scan once and exit instead of polling
    #[arg(long)]
    pub once: bool,

    /// Override the check interval in seconds
    #[arg(long)]
    pub interval: Option<u64>,
}

pub fn run(args: RunArgs, config: &Config) -> Result<()> {
    let reg = &config.registrator;

    let stop = StopSignal::new();
    stop.install_signal_handlers()
        .context("failed to install signal handlers")?;

    let report = rollback_dead_transactions(&reg.rollback_dir, false)
        .context("recovery of dead transactions failed")?;
    if report.had_work() {
        log::info!(
            "recovery: {} rolled back, {} locked, {} failed",
            report.rolled_back,
            report.skipped_locked,
            report.failed
        );
    }

    let journal = JournalEntityService::open(&config.journal.dir)
        .with_context(|| format!("cannot open journal {}", config.journal.dir.display()))?;
    let remover = Arc::new(
        QueueingPathRemover::start(&config.shredder.dir, &config.shredder.queue_file)
            .context("cannot start path remover")?,
    );

    let ctx = TransactionContext {
        service: Arc::new(journal),
        storage_processor: Arc::new(DefaultStorageProcessor),
        path_remover: remover.clone(),
        stop: stop.clone(),
        settings: reg.transaction_settings(),
    };

    std::fs::create_dir_all(&reg.incoming_dir)
        .with_context(|| format!("cannot create {}", reg.incoming_dir.display()))?;
    let store =
        DirectoryStore::new(&reg.incoming_dir).with_is_finished_marker(reg.use_is_finished_marker);
    let scanning = if reg.reprocess_faulty {
        CompositeHandler::new().with(ReprocessingHandler::new(reg.check_interval()))
    } else {
        CompositeHandler::new().with(FaultyPathTracker::new(&reg.incoming_dir))
    };
    let mut scanner = DirectoryScanner::new(
        store,
        DropboxItemHandler::new(ctx, reg),
        scanning,
        "dropbox",
    );

    if args.once {
        let summary = scanner.run();
        eprintln!(
            "Handled {} items in {} passes{}",
            summary.processed,
            summary.passes,
            if summary.stopped { " (stopped)" } else { "" }
        );
        if let Some(dump) = scanner.error_log_dump() {
            eprintln!("{dump}");
        }
    } else {
        let interval = args
            .interval
            .map(Duration::from_secs)
            .unwrap_or_else(|| reg.check_interval());
        scanner.run_periodically(interval, &stop);
        log::info!("scanner stopped");
    }

    if !remover.stop_and_wait(REMOVER_SHUTDOWN_TIMEOUT) {
        log::warn!(
            "{} deletions left in {}",
            remover.pending().len(),
            config.shredder.queue_file.display()
        );
    }
    Ok(())
}
