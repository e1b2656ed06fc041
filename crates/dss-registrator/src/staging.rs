//! Blocks rollback while the staging area is unreachable

use std::fs;
use std::path::{Path, PathBuf};

use dss_core::{DssError, RollbackStack, RollbackStackDelegate, StopSignal, WaitBudget, wait_until};

/// Waits for the staging directory before each reversal step.
///
/// Reversing moves into an unmounted share would scatter files, so the
/// rollback stalls until the directory is usable again and gives up with
/// [`DssError::Unavailable`] after the wait budget.
pub struct StagingAvailabilityDelegate {
    staging_dir: PathBuf,
    budget: WaitBudget,
    stop: StopSignal,
}

impl StagingAvailabilityDelegate {
    pub fn new(staging_dir: &Path, budget: WaitBudget, stop: StopSignal) -> Self {
        Self {
            staging_dir: staging_dir.to_path_buf(),
            budget,
            stop,
        }
    }
}

fn is_available(dir: &Path) -> bool {
    let Ok(meta) = fs::metadata(dir) else {
        return false;
    };
    meta.is_dir() && !meta.permissions().readonly() && fs::read_dir(dir).is_ok()
}

impl RollbackStackDelegate for StagingAvailabilityDelegate {
    fn will_continue_rollback_all(&mut self, _stack: &RollbackStack) -> Result<(), DssError> {
        self.stop.check("rollback")?;
        let label = format!("staging {}", self.staging_dir.display());
        let ready = wait_until(&label, self.budget, &self.stop, || {
            is_available(&self.staging_dir).then_some(())
        })?;
        match ready {
            Some(()) => Ok(()),
            None => {
                log::error!(
                    "staging directory {} unavailable after {:?}",
                    self.staging_dir.display(),
                    self.budget.total()
                );
                Err(DssError::Unavailable(self.staging_dir.display().to_string()))
            }
        }
    }
}
