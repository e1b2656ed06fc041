//! Startup recovery of transactions abandoned by a dead process

use std::fs;
use std::path::{Path, PathBuf};

use dss_core::{DssError, IoContext, NoopDelegate, ROLLBACK_QUEUE_SUFFIX, RollbackStack};

/// What a recovery run did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Stacks fully rolled back and discarded.
    pub rolled_back: usize,
    /// Stacks left alone because another process may hold them.
    pub skipped_locked: usize,
    /// Stacks that could not be opened or rolled back.
    pub failed: usize,
    /// Commands reversed over all stacks.
    pub commands_reversed: usize,
}

impl RecoveryReport {
    pub fn had_work(&self) -> bool {
        self.rolled_back > 0 || self.skipped_locked > 0 || self.failed > 0
    }
}

/// Persisted rollback logs in `dir`, oldest name first. A missing
/// directory has none.
pub fn find_rollback_stacks(dir: &Path) -> Result<Vec<PathBuf>, DssError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(DssError::io(format!("list {}", dir.display()), e)),
    };
    let mut stacks = Vec::new();
    for entry in entries {
        let path = entry.io_context(|| format!("list {}", dir.display()))?.path();
        let is_stack = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(ROLLBACK_QUEUE_SUFFIX));
        if is_stack && path.is_file() {
            stacks.push(path);
        }
    }
    stacks.sort();
    Ok(stacks)
}

/// Roll back and discard every stack left in `dir`.
///
/// Locked stacks are skipped unless `include_locked` is set; a crash in the
/// middle of a mutation also leaves the lock behind, so an operator who
/// knows no other process is running can force them.
pub fn rollback_dead_transactions(
    dir: &Path,
    include_locked: bool,
) -> Result<RecoveryReport, DssError> {
    let mut report = RecoveryReport::default();
    let stacks = find_rollback_stacks(dir)?;
    if stacks.is_empty() {
        return Ok(report);
    }
    log::info!("Found {} dead transactions in {}", stacks.len(), dir.display());

    for path in stacks {
        let mut stack = match RollbackStack::open(&path) {
            Ok(stack) => stack,
            Err(e) => {
                log::error!("cannot open rollback stack {}: {e}", path.display());
                report.failed += 1;
                continue;
            }
        };
        if stack.is_locked_state() && !include_locked {
            log::warn!(
                "rollback stack {} is locked, leaving it alone",
                path.display()
            );
            report.skipped_locked += 1;
            continue;
        }
        match stack.rollback_all(&mut NoopDelegate) {
            Ok(summary) => {
                report.commands_reversed += summary.reversed;
                if let Err(e) = stack.discard() {
                    log::error!("cannot discard rollback stack {}: {e}", path.display());
                    report.failed += 1;
                    continue;
                }
                log::info!(
                    "Rolled back dead transaction {} ({} commands, {} failed)",
                    path.display(),
                    summary.reversed,
                    summary.failed
                );
                report.rolled_back += 1;
            }
            Err(e) => {
                log::error!("rollback of {} failed: {e}", path.display());
                report.failed += 1;
            }
        }
    }
    Ok(report)
}
