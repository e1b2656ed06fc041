//! Registration transaction and its state machine
//!
//! ```text
//!          commit()            ┌──────────────────┐
//!   Live ─────────────────────►│ Committed        │
//!    │     rollback()          ├──────────────────┤
//!    ├────────────────────────►│ Rolledback       │
//!    │  mark_ready_for_recovery├──────────────────┤
//!    └────────────────────────►│ RecoveryPending  │ keeps the rollback stack
//!                              └──────────────────┘
//! ```
//!
//! Every transition consumes the live state. Terminal states hold nothing
//! mutable, so operations on them fail with
//! [`RegistrationError::TerminalState`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dss_core::{PathRemover, RollbackStack, StopSignal, WaitBudget};

use crate::dataset::{DataSet, DataSetInformation};
use crate::entity::{
    EntityKind, ExistingEntity, NewExperiment, NewMaterial, NewMetaproject, NewProject, NewSample,
    NewSpace, Role,
};
use crate::error::{RegistrationError, TerminalKind};
use crate::hooks::{LoggingHooks, SecondaryError, TransactionHooks};
use crate::live::LiveState;
use crate::runner::{RunnerOutcome, RunnerSettings, StorageAlgorithmRunner};
use crate::service::{EntityOperationService, SecondaryQuery};
use crate::staging::StagingAvailabilityDelegate;
use crate::storage::StorageProcessor;

/// Locations and tuning shared by all transactions of one registrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionSettings {
    pub store_root: PathBuf,
    pub precommit_dir: PathBuf,
    pub data_store_code: Option<String>,
    pub registration_max_retry_count: u32,
    pub registration_retry_pause: Duration,
    /// How long a rollback waits for an unreachable staging directory.
    pub staging_wait: WaitBudget,
}

impl TransactionSettings {
    pub fn new(store_root: impl Into<PathBuf>, precommit_dir: impl Into<PathBuf>) -> Self {
        let runner = RunnerSettings::default();
        Self {
            store_root: store_root.into(),
            precommit_dir: precommit_dir.into(),
            data_store_code: None,
            registration_max_retry_count: runner.max_retry_count,
            registration_retry_pause: runner.retry_pause,
            staging_wait: WaitBudget::default(),
        }
    }

    pub fn runner_settings(&self) -> RunnerSettings {
        RunnerSettings {
            max_retry_count: self.registration_max_retry_count,
            retry_pause: self.registration_retry_pause,
        }
    }
}

/// Collaborators of a transaction.
#[derive(Clone)]
pub struct TransactionContext {
    pub service: Arc<dyn EntityOperationService>,
    pub storage_processor: Arc<dyn StorageProcessor>,
    pub path_remover: Arc<dyn PathRemover>,
    pub stop: StopSignal,
    pub settings: TransactionSettings,
}

pub enum TransactionState {
    Live(Box<LiveState>),
    Committed,
    Rolledback,
    /// The stack stays on disk for a later recovery run.
    RecoveryPending { rollback_stack: RollbackStack },
}

impl TransactionState {
    fn terminal_kind(&self) -> Option<TerminalKind> {
        match self {
            Self::Live(_) => None,
            Self::Committed => Some(TerminalKind::Committed),
            Self::Rolledback => Some(TerminalKind::Rolledback),
            Self::RecoveryPending { .. } => Some(TerminalKind::RecoveryPending),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Live(_) => "live",
            Self::Committed => "committed",
            Self::Rolledback => "rolledback",
            Self::RecoveryPending { .. } => "recovery-pending",
        }
    }
}

pub struct DataSetRegistrationTransaction {
    state: TransactionState,
    ctx: TransactionContext,
    hooks: Box<dyn TransactionHooks>,
    last_error: Option<String>,
}

impl DataSetRegistrationTransaction {
    /// Open a live transaction with a fresh rollback stack in `rollback_dir`.
    pub fn new(
        rollback_dir: &Path,
        working_dir: &Path,
        staging_dir: &Path,
        ctx: TransactionContext,
    ) -> Result<Self, RegistrationError> {
        let stack = RollbackStack::create_in(rollback_dir)?;
        log::info!("Start registration ({})", stack.path().display());
        let live = LiveState::new(stack, working_dir, staging_dir, ctx.clone());
        Ok(Self {
            state: TransactionState::Live(Box::new(live)),
            ctx,
            hooks: Box::new(LoggingHooks),
            last_error: None,
        })
    }

    pub fn with_hooks(mut self, hooks: impl TransactionHooks + 'static) -> Self {
        self.hooks = Box::new(hooks);
        self
    }

    fn live(&self) -> Result<&LiveState, RegistrationError> {
        match &self.state {
            TransactionState::Live(live) => Ok(&**live),
            other => Err(terminal_error(other)),
        }
    }

    fn live_mut(&mut self) -> Result<&mut LiveState, RegistrationError> {
        match &mut self.state {
            TransactionState::Live(live) => Ok(&mut **live),
            other => Err(terminal_error(other)),
        }
    }

    pub fn state(&self) -> &TransactionState {
        &self.state
    }

    pub fn state_name(&self) -> &'static str {
        self.state.name()
    }

    pub fn is_committed(&self) -> bool {
        matches!(self.state, TransactionState::Committed)
    }

    pub fn is_rolledback(&self) -> bool {
        matches!(self.state, TransactionState::Rolledback)
    }

    pub fn is_recovery_pending(&self) -> bool {
        matches!(self.state, TransactionState::RecoveryPending { .. })
    }

    pub fn is_committed_or_rolledback(&self) -> bool {
        self.is_committed() || self.is_rolledback()
    }

    /// Why the last commit did not store anything.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Path of the persisted rollback log, while one exists.
    pub fn rollback_stack_path(&self) -> Option<&Path> {
        match &self.state {
            TransactionState::Live(live) => Some(live.stack().path()),
            TransactionState::RecoveryPending { rollback_stack } => Some(rollback_stack.path()),
            _ => None,
        }
    }

    // --- live operations ---

    pub fn user_id(&self) -> Result<Option<&str>, RegistrationError> {
        Ok(self.live()?.user_id())
    }

    pub fn set_user_id(&mut self, user_id: impl Into<String>) -> Result<(), RegistrationError> {
        self.live_mut()?.set_user_id(user_id.into());
        Ok(())
    }

    /// New physical data set; the code is generated unless given.
    pub fn create_new_data_set(
        &mut self,
        data_set_type: Option<&str>,
        code: Option<&str>,
    ) -> Result<&mut DataSet, RegistrationError> {
        self.live_mut()?.create_new_data_set(data_set_type, code)
    }

    pub fn create_new_data_set_with_details(
        &mut self,
        info: DataSetInformation,
    ) -> Result<&mut DataSet, RegistrationError> {
        self.live_mut()?.create_new_data_set_with_details(info)
    }

    pub fn data_set(&self, code: &str) -> Result<Option<&DataSet>, RegistrationError> {
        Ok(self.live()?.data_set(code))
    }

    pub fn data_set_mut(&mut self, code: &str) -> Result<Option<&mut DataSet>, RegistrationError> {
        Ok(self.live_mut()?.data_set_mut(code))
    }

    pub fn registered_data_sets(&self) -> Result<&[DataSet], RegistrationError> {
        Ok(self.live()?.data_sets())
    }

    pub fn create_new_sample(
        &mut self,
        identifier: &str,
        sample_type: &str,
    ) -> Result<&mut NewSample, RegistrationError> {
        self.live_mut()?.create_new_sample(identifier, sample_type)
    }

    pub fn create_new_sample_with_generated_code(
        &mut self,
        space: &str,
        sample_type: &str,
    ) -> Result<&mut NewSample, RegistrationError> {
        self.live_mut()?
            .create_new_sample_with_generated_code(space, sample_type)
    }

    pub fn create_new_experiment(
        &mut self,
        identifier: &str,
        experiment_type: &str,
    ) -> Result<&mut NewExperiment, RegistrationError> {
        self.live_mut()?
            .create_new_experiment(identifier, experiment_type)
    }

    pub fn create_new_space(
        &mut self,
        code: &str,
        space_admin_user_id: Option<&str>,
    ) -> Result<&mut NewSpace, RegistrationError> {
        self.live_mut()?.create_new_space(code, space_admin_user_id)
    }

    pub fn create_new_project(&mut self, identifier: &str) -> Result<&mut NewProject, RegistrationError> {
        self.live_mut()?.create_new_project(identifier)
    }

    pub fn create_new_material(
        &mut self,
        code: &str,
        material_type: &str,
    ) -> Result<&mut NewMaterial, RegistrationError> {
        self.live_mut()?.create_new_material(code, material_type)
    }

    pub fn create_new_metaproject(
        &mut self,
        name: &str,
        description: Option<&str>,
        owner_id: Option<&str>,
    ) -> Result<&mut NewMetaproject, RegistrationError> {
        self.live_mut()?
            .create_new_metaproject(name, description, owner_id)
    }

    pub fn get_sample_for_update(
        &mut self,
        identifier: &str,
    ) -> Result<Option<&mut ExistingEntity>, RegistrationError> {
        self.live_mut()?
            .get_for_update(EntityKind::Sample, identifier)
    }

    pub fn get_experiment_for_update(
        &mut self,
        identifier: &str,
    ) -> Result<Option<&mut ExistingEntity>, RegistrationError> {
        self.live_mut()?
            .get_for_update(EntityKind::Experiment, identifier)
    }

    pub fn get_project_for_update(
        &mut self,
        identifier: &str,
    ) -> Result<Option<&mut ExistingEntity>, RegistrationError> {
        self.live_mut()?
            .get_for_update(EntityKind::Project, identifier)
    }

    pub fn get_material_for_update(
        &mut self,
        identifier: &str,
    ) -> Result<Option<&mut ExistingEntity>, RegistrationError> {
        self.live_mut()?
            .get_for_update(EntityKind::Material, identifier)
    }

    pub fn get_data_set_for_update(
        &mut self,
        code: &str,
    ) -> Result<Option<&mut ExistingEntity>, RegistrationError> {
        self.live_mut()?.get_for_update(EntityKind::DataSet, code)
    }

    pub fn get_vocabulary_for_update(
        &mut self,
        code: &str,
    ) -> Result<Option<&mut ExistingEntity>, RegistrationError> {
        self.live_mut()?
            .get_for_update(EntityKind::Vocabulary, code)
    }

    /// Read-only lookup of a metaproject (`/owner/name`).
    pub fn get_metaproject(
        &self,
        identifier: &str,
    ) -> Result<Option<ExistingEntity>, RegistrationError> {
        self.live()?.get_metaproject(identifier)
    }

    pub fn assign_role_to_space(
        &mut self,
        role: Role,
        space: &str,
        user_ids: &[&str],
    ) -> Result<(), RegistrationError> {
        self.live_mut()?.assign_role_to_space(role, space, user_ids);
        Ok(())
    }

    pub fn revoke_role_from_space(
        &mut self,
        role: Role,
        space: &str,
        user_ids: &[&str],
    ) -> Result<(), RegistrationError> {
        self.live_mut()?.revoke_role_from_space(role, space, user_ids);
        Ok(())
    }

    pub fn register_secondary_query(
        &mut self,
        name: &str,
        query: Box<dyn SecondaryQuery>,
    ) -> Result<(), RegistrationError> {
        self.live_mut()?.register_secondary_query(name, query);
        Ok(())
    }

    /// Move `src` into the staging folder of `data_set`. Returns the new path.
    pub fn move_file(
        &mut self,
        src: &str,
        data_set: &str,
        dst_in_data_set: Option<&str>,
    ) -> Result<PathBuf, RegistrationError> {
        self.live_mut()?.move_file(src, data_set, dst_in_data_set)
    }

    pub fn create_new_file(
        &mut self,
        data_set: &str,
        dst_in_data_set: Option<&str>,
        name: &str,
    ) -> Result<PathBuf, RegistrationError> {
        self.live_mut()?
            .create_new_file(data_set, dst_in_data_set, name)
    }

    pub fn create_new_directory(
        &mut self,
        data_set: &str,
        name: &str,
    ) -> Result<PathBuf, RegistrationError> {
        self.live_mut()?.create_new_directory(data_set, name)
    }

    pub fn create_new_link(
        &mut self,
        data_set: &str,
        dst_in_data_set: Option<&str>,
        name: &str,
        target: &Path,
    ) -> Result<PathBuf, RegistrationError> {
        self.live_mut()?
            .create_new_link(data_set, dst_in_data_set, name, target)
    }

    // --- transitions ---

    /// Store and register everything. Returns whether a data set was stored.
    ///
    /// `Ok(false)` also covers a commit that ended rolled back or awaiting
    /// recovery; [`last_error`](Self::last_error) tells why.
    pub fn commit(&mut self) -> Result<bool, RegistrationError> {
        let live = match &mut self.state {
            TransactionState::Live(live) => live,
            TransactionState::Committed => return Ok(false),
            other => return Err(terminal_error(other)),
        };

        let (algorithms, infos) = match live.build_algorithms() {
            Ok(built) => built,
            Err(e) => {
                log::error!("cannot commit: {e}");
                self.last_error = Some(e.to_string());
                self.roll_back_live(&e.to_string())?;
                return Err(e);
            }
        };
        let details = live.operation_details(infos);
        let mut queries = live.take_secondary_queries();
        let outcome = StorageAlgorithmRunner::new(
            algorithms,
            details,
            live.stack_mut(),
            self.ctx.service.as_ref(),
            &self.ctx.stop,
            self.ctx.settings.runner_settings(),
        )
        .prepare_and_run(self.hooks.as_mut());

        let stored = matches!(outcome, RunnerOutcome::Stored { .. });
        let secondary_errors = finish_secondary_queries(&mut queries, stored);
        if !secondary_errors.is_empty() {
            self.hooks.did_encounter_secondary_errors(&secondary_errors);
        }

        match outcome {
            RunnerOutcome::Stored { data_sets } => {
                for code in &data_sets {
                    log::info!("Successfully registered data set: [{code}]");
                }
                self.to_committed();
                self.hooks.did_commit();
                log::info!("Successfully committed transaction");
                Ok(!data_sets.is_empty())
            }
            RunnerOutcome::RolledBack { reason, error } => {
                let why = format!("{reason}: {error}");
                self.last_error = Some(why.clone());
                if let Err(e) = self.roll_back_live(&why) {
                    log::error!("rollback after failed commit did not finish: {e}");
                }
                Ok(false)
            }
            RunnerOutcome::RecoveryPending { error } => {
                self.last_error = Some(error.clone());
                self.to_recovery_pending(&error);
                Ok(false)
            }
        }
    }

    /// Undo all staged changes. No-op once rolled back or pending recovery.
    pub fn rollback(&mut self) -> Result<(), RegistrationError> {
        match &self.state {
            TransactionState::Live(_) => self.roll_back_live("rollback requested"),
            TransactionState::Committed => {
                Err(RegistrationError::TerminalState(TerminalKind::Committed))
            }
            TransactionState::Rolledback | TransactionState::RecoveryPending { .. } => Ok(()),
        }
    }

    /// Give up on the live transaction but keep its rollback stack.
    pub fn mark_ready_for_recovery(&mut self, error: &str) -> Result<(), RegistrationError> {
        self.live()?;
        self.last_error = Some(error.to_string());
        self.to_recovery_pending(error);
        Ok(())
    }

    fn roll_back_live(&mut self, reason: &str) -> Result<(), RegistrationError> {
        let mut live = match std::mem::replace(&mut self.state, TransactionState::Rolledback) {
            TransactionState::Live(live) => live,
            other => {
                self.state = other;
                return Ok(());
            }
        };

        let mut delegate = StagingAvailabilityDelegate::new(
            live.staging_dir(),
            self.ctx.settings.staging_wait,
            self.ctx.stop.clone(),
        );
        let result = live.stack_mut().rollback_all(&mut delegate);
        let folders = live.clear_data_sets();
        let mut queries = live.take_secondary_queries();
        let secondary_errors = finish_secondary_queries(&mut queries, false);
        if !secondary_errors.is_empty() {
            self.hooks.did_encounter_secondary_errors(&secondary_errors);
        }

        match result {
            Ok(summary) => {
                if summary.failed > 0 {
                    log::warn!("{} commands could not be reversed", summary.failed);
                }
                self.remove_staging_folders(&folders);
                if let Err(e) = live.stack_mut().discard() {
                    log::warn!("cannot discard rollback stack: {e}");
                }
                self.hooks.did_rollback(reason);
                Ok(())
            }
            Err(e) => {
                let error: RegistrationError = e.into();
                log::error!("rollback interrupted, transaction awaits recovery: {error}");
                self.last_error = Some(error.to_string());
                self.state = TransactionState::RecoveryPending {
                    rollback_stack: (*live).into_stack(),
                };
                self.hooks.did_enter_recovery(&error.to_string());
                Err(error)
            }
        }
    }

    fn to_committed(&mut self) {
        let state = std::mem::replace(&mut self.state, TransactionState::Committed);
        if let TransactionState::Live(mut live) = state {
            let folders = live.clear_data_sets();
            self.remove_staging_folders(&folders);
            if let Err(e) = live.stack_mut().discard() {
                log::warn!("cannot discard rollback stack: {e}");
            }
        }
    }

    fn to_recovery_pending(&mut self, reason: &str) {
        let state = std::mem::replace(&mut self.state, TransactionState::Rolledback);
        self.state = match state {
            TransactionState::Live(live) => TransactionState::RecoveryPending {
                rollback_stack: (*live).into_stack(),
            },
            other => other,
        };
        self.hooks.did_enter_recovery(reason);
    }

    fn remove_staging_folders(&self, folders: &[PathBuf]) {
        for folder in folders {
            if let Err(e) = self.ctx.path_remover.remove_recursively(folder) {
                log::warn!("cannot remove staging folder {}: {e}", folder.display());
            }
        }
    }
}

fn terminal_error(state: &TransactionState) -> RegistrationError {
    match state.terminal_kind() {
        Some(kind) => RegistrationError::TerminalState(kind),
        None => RegistrationError::InvalidArgument("transaction is live".into()),
    }
}

/// Commit or roll back every secondary query, collecting failures.
fn finish_secondary_queries(
    queries: &mut [(String, Box<dyn SecondaryQuery>)],
    commit: bool,
) -> Vec<SecondaryError> {
    let mut errors = Vec::new();
    for (name, query) in queries.iter_mut() {
        let result = if commit {
            query.commit()
        } else {
            query.rollback()
        };
        if let Err(e) = result {
            errors.push(SecondaryError {
                query: name.clone(),
                message: format!("{e:#}"),
            });
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;

    use crate::dataset::DataSetKind;
    use crate::manifest::MANIFEST_FILENAME;
    use crate::service::{ServiceError, EntityOperationsState};
    use crate::testing::{MemoryService, test_context};

    const EXPERIMENT: &str = "/SPACE/PROJECT/EXP";

    struct Fixture {
        dir: tempfile::TempDir,
        service: Arc<MemoryService>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            for d in ["incoming", "staging"] {
                fs::create_dir(dir.path().join(d)).unwrap();
            }
            Self {
                dir,
                service: Arc::new(MemoryService::with_owner(EXPERIMENT)),
            }
        }

        fn path(&self, rel: &str) -> PathBuf {
            self.dir.path().join(rel)
        }

        fn transaction(&self) -> DataSetRegistrationTransaction {
            DataSetRegistrationTransaction::new(
                &self.path("rollback"),
                &self.path("incoming"),
                &self.path("staging"),
                test_context(self.dir.path(), self.service.clone()),
            )
            .unwrap()
        }

        fn incoming(&self, name: &str, content: &str) {
            fs::write(self.path("incoming").join(name), content).unwrap();
        }

        /// Entries of a directory under the fixture root; missing counts as empty.
        fn entries(&self, rel: &str) -> usize {
            fs::read_dir(self.path(rel)).map(|d| d.count()).unwrap_or(0)
        }

        fn rollback_logs(&self) -> usize {
            fs::read_dir(self.path("rollback"))
                .map(|d| d.count())
                .unwrap_or(0)
        }
    }

    fn stage(tx: &mut DataSetRegistrationTransaction, file: &str) -> String {
        let ds = tx.create_new_data_set(Some("RAW"), None).unwrap();
        ds.set_experiment(EXPERIMENT);
        let code = ds.code().to_string();
        tx.move_file(file, &code, None).unwrap();
        code
    }

    #[test]
    fn commit_stores_and_registers() {
        let f = Fixture::new();
        f.incoming("data.txt", "hello");
        let mut tx = f.transaction();
        let code = stage(&mut tx, "data.txt");

        assert!(tx.commit().unwrap());
        assert!(tx.is_committed());
        assert_eq!(tx.state_name(), "committed");

        let stored = f.path("store").join(&code);
        assert_eq!(
            fs::read_to_string(stored.join("original/data.txt")).unwrap(),
            "hello"
        );
        assert!(stored.join(MANIFEST_FILENAME).exists());
        assert!(!f.path("staging").join(&code).exists());
        assert!(!f.path("incoming/data.txt").exists());
        assert_eq!(f.rollback_logs(), 0);

        let performed = f.service.performed.lock().unwrap();
        assert_eq!(performed.len(), 1);
        assert_eq!(performed[0].data_sets[0].code, code);
        assert_eq!(performed[0].data_sets[0].data_set_type.as_deref(), Some("RAW"));
    }

    #[test]
    fn second_commit_returns_false() {
        let f = Fixture::new();
        f.incoming("data.txt", "x");
        let mut tx = f.transaction();
        stage(&mut tx, "data.txt");
        assert!(tx.commit().unwrap());
        assert!(!tx.commit().unwrap());
    }

    #[test]
    fn terminal_state_rejects_mutation() {
        let f = Fixture::new();
        let mut tx = f.transaction();
        tx.rollback().unwrap();
        assert!(tx.is_rolledback());
        let err = tx.create_new_data_set(None, None).unwrap_err();
        assert!(matches!(
            err,
            RegistrationError::TerminalState(TerminalKind::Rolledback)
        ));
        // rollback again is a no-op
        tx.rollback().unwrap();
        assert!(matches!(
            tx.commit(),
            Err(RegistrationError::TerminalState(TerminalKind::Rolledback))
        ));
    }

    #[test]
    fn rollback_restores_incoming() {
        let f = Fixture::new();
        f.incoming("data.txt", "hello");
        let mut tx = f.transaction();
        let code = stage(&mut tx, "data.txt");
        assert!(!f.path("incoming/data.txt").exists());

        tx.rollback().unwrap();
        assert!(tx.is_rolledback());
        assert_eq!(
            fs::read_to_string(f.path("incoming/data.txt")).unwrap(),
            "hello"
        );
        assert!(!f.path("staging").join(&code).exists());
        assert_eq!(f.rollback_logs(), 0);
    }

    #[test]
    fn committed_cannot_roll_back() {
        let f = Fixture::new();
        f.incoming("data.txt", "x");
        let mut tx = f.transaction();
        stage(&mut tx, "data.txt");
        tx.commit().unwrap();
        assert!(matches!(
            tx.rollback(),
            Err(RegistrationError::TerminalState(TerminalKind::Committed))
        ));
    }

    #[test]
    fn permanent_service_error_rolls_back_commit() {
        let f = Fixture::new();
        f.incoming("data.txt", "hello");
        f.service
            .script_perform(vec![Err(ServiceError::permanent("bad property"))]);
        let mut tx = f.transaction();
        let code = stage(&mut tx, "data.txt");

        assert!(!tx.commit().unwrap());
        assert!(tx.is_rolledback());
        assert!(tx.last_error().unwrap().contains("bad property"));
        assert!(f.path("incoming/data.txt").exists());
        assert!(!f.path("staging").join(&code).exists());
        assert_eq!(f.entries("precommit"), 0);
        assert_eq!(f.entries("store"), 0);
        assert_eq!(f.rollback_logs(), 0);
    }

    #[test]
    fn repeated_transient_error_leaves_recovery_stack() {
        let f = Fixture::new();
        f.incoming("data.txt", "hello");
        f.service.script_perform(
            (0..3)
                .map(|_| Err(ServiceError::transient("refused")))
                .collect(),
        );
        f.service.script_status(vec![
            Ok(EntityOperationsState::NoOperation),
            Ok(EntityOperationsState::Failed),
        ]);
        let mut tx = f.transaction();
        stage(&mut tx, "data.txt");

        assert!(!tx.commit().unwrap());
        assert!(tx.is_recovery_pending());
        let stack_path = tx.rollback_stack_path().unwrap().to_path_buf();
        assert!(stack_path.exists());
        let stack = RollbackStack::open(&stack_path).unwrap();
        assert!(!stack.is_empty());
        // rollback is a no-op now
        tx.rollback().unwrap();
        assert!(tx.is_recovery_pending());
    }

    #[test]
    fn empty_data_set_fails_commit_and_rolls_back() {
        let f = Fixture::new();
        let mut tx = f.transaction();
        tx.create_new_data_set(None, Some("empty1"))
            .unwrap()
            .set_experiment(EXPERIMENT);
        let err = tx.commit().unwrap_err();
        assert!(matches!(err, RegistrationError::EmptyDataSet { ref code } if code == "EMPTY1"));
        assert!(tx.is_rolledback());
        assert!(!f.path("staging/EMPTY1").exists());
        assert_eq!(f.entries("precommit"), 0);
        assert_eq!(f.entries("store"), 0);
    }

    #[test]
    fn two_moves_into_one_data_set_are_ambiguous() {
        let f = Fixture::new();
        f.incoming("a.txt", "a");
        f.incoming("b.txt", "b");
        let mut tx = f.transaction();
        let code = stage(&mut tx, "a.txt");
        tx.move_file("b.txt", &code, None).unwrap();

        let err = tx.commit().unwrap_err();
        assert!(matches!(
            err,
            RegistrationError::AmbiguousDataSet { entries: 2, .. }
        ));
        assert!(tx.is_rolledback());
        assert_eq!(fs::read_to_string(f.path("incoming/a.txt")).unwrap(), "a");
        assert_eq!(fs::read_to_string(f.path("incoming/b.txt")).unwrap(), "b");
        assert!(!f.path("staging").join(&code).exists());
        assert_eq!(f.service.performed_count(), 0);
    }

    #[test]
    fn unknown_owner_fails_commit() {
        let f = Fixture::new();
        f.incoming("data.txt", "x");
        let mut tx = f.transaction();
        let ds = tx.create_new_data_set(None, None).unwrap();
        ds.set_sample("/SPACE/MISSING");
        let code = ds.code().to_string();
        tx.move_file("data.txt", &code, None).unwrap();
        assert!(matches!(
            tx.commit(),
            Err(RegistrationError::UnknownOwner { .. })
        ));
        assert!(f.path("incoming/data.txt").exists());
    }

    #[test]
    fn owner_created_in_same_transaction() {
        let f = Fixture::new();
        f.incoming("data.txt", "x");
        let mut tx = f.transaction();
        tx.create_new_experiment("/SPACE/PROJECT/NEW", "DEFAULT")
            .unwrap();
        tx.create_new_sample("/SPACE/S1", "CELL")
            .unwrap()
            .set_experiment("/SPACE/PROJECT/NEW");
        let ds = tx.create_new_data_set(None, None).unwrap();
        ds.set_sample("/SPACE/S1");
        let code = ds.code().to_string();
        tx.move_file("data.txt", &code, None).unwrap();

        assert!(tx.commit().unwrap());
        let performed = f.service.performed.lock().unwrap();
        assert_eq!(performed[0].samples.len(), 1);
        assert_eq!(performed[0].experiments.len(), 1);
        assert_eq!(
            performed[0].data_sets[0].experiment.as_deref(),
            Some("/SPACE/PROJECT/NEW")
        );
    }

    #[test]
    fn container_without_files_commits() {
        let f = Fixture::new();
        let mut tx = f.transaction();
        let mut info = DataSetInformation::new("cont", DataSetKind::Container);
        info.experiment = Some(EXPERIMENT.into());
        tx.create_new_data_set_with_details(info).unwrap();
        assert!(tx.commit().unwrap());
        assert!(f.path("store/CONT").join(MANIFEST_FILENAME).exists());
    }

    #[test]
    fn mark_ready_for_recovery_keeps_stack() {
        let f = Fixture::new();
        f.incoming("data.txt", "x");
        let mut tx = f.transaction();
        let code = stage(&mut tx, "data.txt");
        tx.mark_ready_for_recovery("operator request").unwrap();
        assert!(tx.is_recovery_pending());
        assert_eq!(tx.last_error(), Some("operator request"));
        assert!(f.path("staging").join(code).join("data.txt").exists());
        assert_eq!(f.rollback_logs(), 1);
        assert!(tx.mark_ready_for_recovery("again").is_err());
    }

    #[test]
    fn staging_unavailable_during_rollback_enters_recovery() {
        let f = Fixture::new();
        f.incoming("data.txt", "x");
        let mut tx = f.transaction();
        let code = stage(&mut tx, "data.txt");
        // simulate an unmounted staging share
        fs::rename(f.path("staging"), f.path("staging-away")).unwrap();

        let err = tx.rollback().unwrap_err();
        assert!(matches!(err, RegistrationError::StagingUnavailable(_)));
        assert!(tx.is_recovery_pending());
        assert!(f.path("staging-away").join(code).join("data.txt").exists());
    }

    #[derive(Default)]
    struct Recorded {
        committed: usize,
        rolled_back: Vec<String>,
        recovery: Vec<String>,
        secondary: Vec<SecondaryError>,
    }

    struct RecordingHooks(Arc<Mutex<Recorded>>);

    impl TransactionHooks for RecordingHooks {
        fn did_commit(&mut self) {
            self.0.lock().unwrap().committed += 1;
        }

        fn did_rollback(&mut self, reason: &str) {
            self.0.lock().unwrap().rolled_back.push(reason.to_string());
        }

        fn did_enter_recovery(&mut self, reason: &str) {
            self.0.lock().unwrap().recovery.push(reason.to_string());
        }

        fn did_encounter_secondary_errors(&mut self, errors: &[SecondaryError]) {
            self.0.lock().unwrap().secondary.extend_from_slice(errors);
        }
    }

    struct Query {
        log: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl SecondaryQuery for Query {
        fn commit(&mut self) -> anyhow::Result<()> {
            self.log.lock().unwrap().push("commit".into());
            if self.fail {
                anyhow::bail!("commit failed");
            }
            Ok(())
        }

        fn rollback(&mut self) -> anyhow::Result<()> {
            self.log.lock().unwrap().push("rollback".into());
            if self.fail {
                anyhow::bail!("rollback failed");
            }
            Ok(())
        }
    }

    #[test]
    fn secondary_queries_follow_outcome() {
        let f = Fixture::new();
        f.incoming("data.txt", "x");
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut tx = f
            .transaction()
            .with_hooks(RecordingHooks(recorded.clone()));
        stage(&mut tx, "data.txt");
        tx.register_secondary_query(
            "ok",
            Box::new(Query {
                log: log.clone(),
                fail: false,
            }),
        )
        .unwrap();
        tx.register_secondary_query(
            "broken",
            Box::new(Query {
                log: log.clone(),
                fail: true,
            }),
        )
        .unwrap();

        assert!(tx.commit().unwrap());
        assert_eq!(*log.lock().unwrap(), vec!["commit", "commit"]);
        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.committed, 1);
        assert_eq!(recorded.secondary.len(), 1);
        assert_eq!(recorded.secondary[0].query, "broken");
    }

    #[test]
    fn rollback_rolls_back_secondary_queries() {
        let f = Fixture::new();
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut tx = f
            .transaction()
            .with_hooks(RecordingHooks(recorded.clone()));
        tx.register_secondary_query(
            "q",
            Box::new(Query {
                log: log.clone(),
                fail: false,
            }),
        )
        .unwrap();
        tx.rollback().unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["rollback"]);
        assert_eq!(recorded.lock().unwrap().rolled_back.len(), 1);
    }
}
