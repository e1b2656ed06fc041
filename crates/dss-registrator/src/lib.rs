//! dss-registrator - Transactional data set registration
//!
//! A [`DataSetRegistrationTransaction`] collects new entities and staged
//! files, then on commit moves the data into the store and registers the
//! metadata in a single service call. Every filesystem change goes through
//! a persisted rollback stack, so a failed or interrupted transaction can
//! be undone later by [`rollback_dead_transactions`].

pub mod config;
pub mod dataset;
pub mod dropbox;
pub mod entity;
pub mod error;
pub mod hooks;
pub mod journal;
pub mod live;
pub mod manifest;
pub mod perm_id;
pub mod recovery;
pub mod runner;
pub mod service;
pub mod staging;
pub mod storage;
pub mod transaction;

#[cfg(test)]
mod testing;

pub use config::RegistratorConfig;
pub use dataset::{DataSet, DataSetInformation, DataSetKind};
pub use dropbox::DropboxItemHandler;
pub use entity::{
    EntityKind, ExistingEntity, NewExperiment, NewMaterial, NewMetaproject, NewProject, NewSample,
    NewSpace, Role, RoleAssignment,
};
pub use error::{RegistrationError, TerminalKind};
pub use hooks::{LoggingHooks, SecondaryError, TransactionHooks};
pub use journal::JournalEntityService;
pub use manifest::{DataSetManifest, MANIFEST_FILENAME};
pub use recovery::{RecoveryReport, find_rollback_stacks, rollback_dead_transactions};
pub use runner::{RollbackReason, RunnerOutcome, RunnerSettings, StorageAlgorithmRunner};
pub use service::{
    AtomicEntityOperationDetails, AtomicEntityOperationResult, EntityOperationService,
    EntityOperationsState, SecondaryQuery, ServiceError,
};
pub use storage::{DefaultStorageProcessor, StorageProcessor, StoreStrategy};
pub use transaction::{
    DataSetRegistrationTransaction, TransactionContext, TransactionSettings, TransactionState,
};
