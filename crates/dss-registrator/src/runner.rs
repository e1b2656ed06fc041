//! Drives storage algorithms and the service registration as one unit
//!
//! Failures before registration are rolled back. Once the service may
//! have accepted the batch, failures leave the rollback stack in place
//! and end in recovery instead.

use std::time::Duration;

use dss_core::{RollbackStack, StopSignal, TransactionalCommand};
use rustc_hash::FxHashMap;

use crate::hooks::TransactionHooks;
use crate::service::{AtomicEntityOperationDetails, EntityOperationService, EntityOperationsState};
use crate::storage::DataSetStorageAlgorithm;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackReason {
    StorageProcessorError,
    PreRegistrationError,
    RegistrationFailure,
}

impl std::fmt::Display for RollbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StorageProcessorError => f.write_str("storage processor error"),
            Self::PreRegistrationError => f.write_str("pre-registration error"),
            Self::RegistrationFailure => f.write_str("registration failure"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerOutcome {
    /// Codes of the data sets now in the store.
    Stored { data_sets: Vec<String> },
    /// Nothing reached the service; the caller should roll back.
    RolledBack {
        reason: RollbackReason,
        error: String,
    },
    /// The service may hold the registration; keep the rollback stack.
    RecoveryPending { error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerSettings {
    /// How often the same registration error is tolerated.
    pub max_retry_count: u32,
    pub retry_pause: Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            max_retry_count: 6,
            retry_pause: Duration::from_secs(10),
        }
    }
}

enum Registration {
    Done,
    RollBack(String),
    Recovery(String),
}

pub struct StorageAlgorithmRunner<'a> {
    algorithms: Vec<DataSetStorageAlgorithm>,
    details: AtomicEntityOperationDetails,
    stack: &'a mut RollbackStack,
    service: &'a dyn EntityOperationService,
    stop: &'a StopSignal,
    settings: RunnerSettings,
}

impl<'a> StorageAlgorithmRunner<'a> {
    pub fn new(
        algorithms: Vec<DataSetStorageAlgorithm>,
        details: AtomicEntityOperationDetails,
        stack: &'a mut RollbackStack,
        service: &'a dyn EntityOperationService,
        stop: &'a StopSignal,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            algorithms,
            details,
            stack,
            service,
            stop,
            settings,
        }
    }

    pub fn prepare_and_run(mut self, hooks: &mut dyn TransactionHooks) -> RunnerOutcome {
        for alg in &mut self.algorithms {
            let marker = TransactionalCommand::marker(format!("storage transaction {}", alg.code()));
            if let Err(e) = self.stack.push_and_execute(marker) {
                return self.roll_back(RollbackReason::StorageProcessorError, e.to_string());
            }
            if let Err(e) = alg.prepare(self.stack) {
                log::error!("preparing storage of {} failed: {e}", alg.code());
                return self.roll_back(RollbackReason::StorageProcessorError, e.to_string());
            }
        }

        for alg in &mut self.algorithms {
            if let Err(e) = alg.pre_commit(self.stack) {
                log::error!("storing data set {} failed: {e}", alg.code());
                return self.roll_back(RollbackReason::StorageProcessorError, e.to_string());
            }
        }

        if let Err(e) = hooks.pre_registration(&self.details) {
            log::error!("pre-registration hook failed: {e:#}");
            return self.roll_back(RollbackReason::PreRegistrationError, format!("{e:#}"));
        }

        match self.service.draw_unique_id() {
            Ok(id) => self.details.registration_id = id,
            Err(e) => {
                return self.roll_back(RollbackReason::RegistrationFailure, e.to_string());
            }
        }

        match self.register_with_recovery() {
            Registration::Done => {}
            Registration::RollBack(error) => {
                return self.roll_back(RollbackReason::RegistrationFailure, error);
            }
            Registration::Recovery(error) => return RunnerOutcome::RecoveryPending { error },
        }

        if let Err(e) = hooks.post_registration(&self.details) {
            log::error!("post-registration hook failed: {e:#}");
        }

        self.finish_storage()
    }

    fn roll_back(&mut self, reason: RollbackReason, error: String) -> RunnerOutcome {
        let why = format!("{reason}: {error}");
        for alg in self.algorithms.iter_mut().rev() {
            alg.rollback(&why);
        }
        RunnerOutcome::RolledBack { reason, error }
    }

    fn register_with_recovery(&mut self) -> Registration {
        let id = self.details.registration_id;
        let mut same_error: FxHashMap<String, u32> = FxHashMap::default();
        loop {
            let error = match self.service.perform_operations(&self.details) {
                Ok(result) => {
                    log::info!(
                        "registration {id}: {} data sets, {} samples, {} experiments, {} updates",
                        result.data_sets_created,
                        result.samples_created,
                        result.experiments_created,
                        result.entities_updated
                    );
                    return Registration::Done;
                }
                Err(e) => e,
            };
            log::error!("registration {id} failed: {error}");
            if !error.retryable {
                return Registration::RollBack(error.to_string());
            }

            match self.wait_for_operation_state(id) {
                Ok(EntityOperationsState::Successful) => {
                    log::info!("registration {id} was applied despite the error");
                    return Registration::Done;
                }
                Ok(state) => log::warn!("registration {id} is {state:?}, retrying"),
                Err(e) => return Registration::Recovery(e),
            }

            let count = same_error.entry(error.message.clone()).or_insert(0);
            *count += 1;
            if *count > self.settings.max_retry_count {
                return Registration::Recovery(format!(
                    "registration {id} failed {count} times: {error}"
                ));
            }
            if !self.stop.sleep(self.settings.retry_pause) {
                return Registration::Recovery(format!(
                    "stopped while retrying registration {id}: {error}"
                ));
            }
        }
    }

    /// Poll until the service reports a settled state. Status errors are
    /// retried until a stop is requested.
    fn wait_for_operation_state(&self, id: u64) -> Result<EntityOperationsState, String> {
        loop {
            match self.service.did_entity_operations_succeed(id) {
                Ok(EntityOperationsState::InProgress) => {
                    log::info!("registration {id} still in progress");
                }
                Ok(state) => return Ok(state),
                Err(e) => log::warn!("cannot query status of registration {id}: {e}"),
            }
            if !self.stop.sleep(self.settings.retry_pause) {
                return Err(format!("stopped while waiting for registration {id}"));
            }
        }
    }

    fn finish_storage(mut self) -> RunnerOutcome {
        let id = self.details.registration_id;
        for alg in &mut self.algorithms {
            if let Err(e) = alg.commit_storage_processor() {
                log::error!("committing storage of {} failed: {e}", alg.code());
                return RunnerOutcome::RecoveryPending {
                    error: e.to_string(),
                };
            }
        }
        for alg in &mut self.algorithms {
            if let Err(e) = alg.move_to_store(id) {
                log::error!("moving {} to the store failed: {e}", alg.code());
                return RunnerOutcome::RecoveryPending {
                    error: e.to_string(),
                };
            }
        }
        for alg in &self.algorithms {
            if let Err(e) = alg.clean_precommit_directory() {
                log::warn!("cannot clean precommit directory of {}: {e}", alg.code());
            }
        }
        let mut data_sets = Vec::with_capacity(self.algorithms.len());
        for alg in &self.algorithms {
            if let Err(e) = self.service.set_storage_confirmed(alg.code()) {
                log::error!("confirming storage of {} failed: {e}", alg.code());
                return RunnerOutcome::RecoveryPending {
                    error: e.to_string(),
                };
            }
            data_sets.push(alg.code().to_string());
        }
        RunnerOutcome::Stored { data_sets }
    }
}
