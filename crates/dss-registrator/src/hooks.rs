//! Callbacks fired at the milestones of a registration

use crate::service::AtomicEntityOperationDetails;

/// A secondary query that failed to commit or roll back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecondaryError {
    pub query: String,
    pub message: String,
}

/// Observer of a transaction. All methods have no-op defaults.
pub trait TransactionHooks {
    /// Runs after data reached the precommit area, before registration.
    /// An error rolls the transaction back.
    fn pre_registration(&mut self, _details: &AtomicEntityOperationDetails) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs after successful registration. Errors are only logged.
    fn post_registration(
        &mut self,
        _details: &AtomicEntityOperationDetails,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn did_commit(&mut self) {}

    fn did_rollback(&mut self, _reason: &str) {}

    fn did_enter_recovery(&mut self, _reason: &str) {}

    fn did_encounter_secondary_errors(&mut self, errors: &[SecondaryError]) {
        for e in errors {
            log::error!("secondary query {} failed: {}", e.query, e.message);
        }
    }
}

/// Hooks that only log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHooks;

impl TransactionHooks for LoggingHooks {
    fn did_rollback(&mut self, reason: &str) {
        log::warn!("transaction rolled back: {reason}");
    }

    fn did_enter_recovery(&mut self, reason: &str) {
        log::error!("transaction awaits recovery: {reason}");
    }
}
