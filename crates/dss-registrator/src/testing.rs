//! Scriptable in-memory service shared by the unit tests

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dss_core::{ImmediateRemover, StopSignal, WaitBudget};

use crate::dataset::DataSetInformation;
use crate::entity::{EntityKind, ExistingEntity};
use crate::service::{
    AtomicEntityOperationDetails, AtomicEntityOperationResult, EntityOperationService,
    EntityOperationsState, ServiceError,
};
use crate::storage::DefaultStorageProcessor;
use crate::transaction::{TransactionContext, TransactionSettings};

#[derive(Default)]
pub(crate) struct MemoryService {
    pub perm_id_requests: Mutex<Vec<usize>>,
    counter: AtomicU64,
    /// Consumed front to back by `perform_operations`; empty means success.
    pub perform_script: Mutex<VecDeque<Result<(), ServiceError>>>,
    /// Consumed by `did_entity_operations_succeed`; empty means the real state.
    pub status_script: Mutex<VecDeque<Result<EntityOperationsState, ServiceError>>>,
    pub performed: Mutex<Vec<AtomicEntityOperationDetails>>,
    pub perform_calls: Mutex<usize>,
    pub owners: Mutex<BTreeSet<String>>,
    pub entities: Mutex<BTreeMap<(EntityKind, String), ExistingEntity>>,
    pub confirmed: Mutex<Vec<String>>,
    pub confirm_error: Mutex<Option<ServiceError>>,
}

impl MemoryService {
    pub fn with_owner(owner: &str) -> Self {
        let service = Self::default();
        service.owners.lock().unwrap().insert(owner.to_string());
        service
    }

    pub fn script_perform(&self, results: Vec<Result<(), ServiceError>>) {
        self.perform_script.lock().unwrap().extend(results);
    }

    pub fn script_status(&self, results: Vec<Result<EntityOperationsState, ServiceError>>) {
        self.status_script.lock().unwrap().extend(results);
    }

    pub fn add_entity(&self, entity: ExistingEntity) {
        self.entities
            .lock()
            .unwrap()
            .insert((entity.kind, entity.identifier.clone()), entity);
    }

    pub fn performed_count(&self) -> usize {
        self.performed.lock().unwrap().len()
    }
}

impl EntityOperationService for MemoryService {
    fn create_perm_ids(&self, count: usize) -> Result<Vec<String>, ServiceError> {
        self.perm_id_requests.lock().unwrap().push(count);
        Ok((0..count)
            .map(|_| format!("20261019-{}", self.counter.fetch_add(1, Ordering::SeqCst)))
            .collect())
    }

    fn draw_unique_id(&self) -> Result<u64, ServiceError> {
        Ok(self.counter.fetch_add(1, Ordering::SeqCst) + 1000)
    }

    fn generate_codes(&self, prefix: &str, count: usize) -> Result<Vec<String>, ServiceError> {
        Ok((0..count)
            .map(|_| format!("{prefix}{}", self.counter.fetch_add(1, Ordering::SeqCst)))
            .collect())
    }

    fn perform_operations(
        &self,
        details: &AtomicEntityOperationDetails,
    ) -> Result<AtomicEntityOperationResult, ServiceError> {
        *self.perform_calls.lock().unwrap() += 1;
        if let Some(result) = self.perform_script.lock().unwrap().pop_front() {
            result?;
        }
        self.performed.lock().unwrap().push(details.clone());
        Ok(AtomicEntityOperationResult::for_details(details))
    }

    fn did_entity_operations_succeed(
        &self,
        registration_id: u64,
    ) -> Result<EntityOperationsState, ServiceError> {
        if let Some(result) = self.status_script.lock().unwrap().pop_front() {
            return result;
        }
        let performed = self
            .performed
            .lock()
            .unwrap()
            .iter()
            .any(|d| d.registration_id == registration_id);
        Ok(if performed {
            EntityOperationsState::Successful
        } else {
            EntityOperationsState::NoOperation
        })
    }

    fn owner_exists(&self, info: &DataSetInformation) -> Result<bool, ServiceError> {
        let owners = self.owners.lock().unwrap();
        Ok(info
            .sample
            .as_ref()
            .or(info.experiment.as_ref())
            .is_some_and(|o| owners.contains(o)))
    }

    fn set_storage_confirmed(&self, data_set_code: &str) -> Result<(), ServiceError> {
        if let Some(e) = self.confirm_error.lock().unwrap().clone() {
            return Err(e);
        }
        self.confirmed.lock().unwrap().push(data_set_code.to_string());
        Ok(())
    }

    fn try_get_entity(
        &self,
        kind: EntityKind,
        identifier: &str,
    ) -> Result<Option<ExistingEntity>, ServiceError> {
        Ok(self
            .entities
            .lock()
            .unwrap()
            .get(&(kind, identifier.to_string()))
            .cloned())
    }
}

/// Context with fast retries rooted at `root` (`root/store`, `root/precommit`).
pub(crate) fn test_context(root: &Path, service: Arc<MemoryService>) -> TransactionContext {
    let mut settings = TransactionSettings::new(root.join("store"), root.join("precommit"));
    settings.data_store_code = Some("DSS1".into());
    settings.registration_max_retry_count = 1;
    settings.registration_retry_pause = Duration::ZERO;
    settings.staging_wait = WaitBudget::new(1, Duration::from_millis(1));
    TransactionContext {
        service,
        storage_processor: Arc::new(DefaultStorageProcessor),
        path_remover: Arc::new(ImmediateRemover),
        stop: StopSignal::new(),
        settings,
    }
}
