//! Interface to the remote entity registration service

use serde::{Deserialize, Serialize};

use crate::dataset::DataSetInformation;
use crate::entity::{
    EntityKind, ExistingEntity, NewExperiment, NewMaterial, NewMetaproject, NewProject, NewSample,
    NewSpace, RoleAssignment,
};

/// Error returned by the registration service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceError {
    pub message: String,
    /// Whether the call may succeed if repeated (e.g. connection refused).
    pub retryable: bool,
}

impl ServiceError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ServiceError {}

/// Server-side status of a registration batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityOperationsState {
    InProgress,
    Successful,
    Failed,
    /// The service has no record of the batch.
    NoOperation,
}

/// Everything one transaction asks the service to register, applied
/// atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomicEntityOperationDetails {
    pub registration_id: u64,
    pub user_id: Option<String>,
    pub spaces: Vec<NewSpace>,
    pub projects: Vec<NewProject>,
    pub experiments: Vec<NewExperiment>,
    pub samples: Vec<NewSample>,
    pub materials: Vec<NewMaterial>,
    pub metaprojects: Vec<NewMetaproject>,
    pub updates: Vec<ExistingEntity>,
    pub data_sets: Vec<DataSetInformation>,
    pub role_assignments: Vec<RoleAssignment>,
    pub role_revocations: Vec<RoleAssignment>,
}

impl AtomicEntityOperationDetails {
    /// Number of individual operations in the batch.
    pub fn operation_count(&self) -> usize {
        self.spaces.len()
            + self.projects.len()
            + self.experiments.len()
            + self.samples.len()
            + self.materials.len()
            + self.metaprojects.len()
            + self.updates.len()
            + self.data_sets.len()
            + self.role_assignments.len()
            + self.role_revocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operation_count() == 0
    }
}

/// Counts reported back by the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomicEntityOperationResult {
    pub spaces_created: usize,
    pub projects_created: usize,
    pub experiments_created: usize,
    pub samples_created: usize,
    pub materials_created: usize,
    pub metaprojects_created: usize,
    pub entities_updated: usize,
    pub data_sets_created: usize,
}

impl AtomicEntityOperationResult {
    pub fn for_details(details: &AtomicEntityOperationDetails) -> Self {
        Self {
            spaces_created: details.spaces.len(),
            projects_created: details.projects.len(),
            experiments_created: details.experiments.len(),
            samples_created: details.samples.len(),
            materials_created: details.materials.len(),
            metaprojects_created: details.metaprojects.len(),
            entities_updated: details.updates.len(),
            data_sets_created: details.data_sets.len(),
        }
    }
}

/// The application server as seen from the registration engine.
pub trait EntityOperationService: Send + Sync {
    /// Pre-generated permanent identifiers.
    fn create_perm_ids(&self, count: usize) -> Result<Vec<String>, ServiceError>;

    /// A fresh registration id for [`Self::perform_operations`].
    fn draw_unique_id(&self) -> Result<u64, ServiceError>;

    /// Codes for entities created without an explicit code.
    fn generate_codes(&self, prefix: &str, count: usize) -> Result<Vec<String>, ServiceError>;

    /// Apply the whole batch or nothing.
    fn perform_operations(
        &self,
        details: &AtomicEntityOperationDetails,
    ) -> Result<AtomicEntityOperationResult, ServiceError>;

    fn did_entity_operations_succeed(
        &self,
        registration_id: u64,
    ) -> Result<EntityOperationsState, ServiceError>;

    /// Whether the sample or experiment owning `info` is registered.
    fn owner_exists(&self, info: &DataSetInformation) -> Result<bool, ServiceError>;

    fn set_storage_confirmed(&self, data_set_code: &str) -> Result<(), ServiceError>;

    fn try_get_entity(
        &self,
        kind: EntityKind,
        identifier: &str,
    ) -> Result<Option<ExistingEntity>, ServiceError>;
}

/// An auxiliary database query run alongside the registration.
///
/// Committed after successful storage, rolled back otherwise.
pub trait SecondaryQuery {
    fn commit(&mut self) -> anyhow::Result<()>;
    fn rollback(&mut self) -> anyhow::Result<()>;
}
