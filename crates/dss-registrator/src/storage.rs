//! Moving staged data set content into permanent storage
//!
//! Layout for a data set `CODE`:
//! ```text
//! {staging}/
//! ├── CODE/                     # filled by the transaction
//! ├── CODE-storage/             # storage processor output
//! └── .processing-CODE-storage  # marker while storing
//! {precommit}/CODE-precommit/   # waiting for registration
//! {store}/CODE/                 # final location
//! ├── manifest.json
//! └── original/...
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dss_core::{DssError, IoContext, RollbackStack, TransactionalCommand};

use crate::dataset::DataSetInformation;
use crate::error::RegistrationError;
use crate::manifest::DataSetManifest;

pub const PROCESSING_PREFIX: &str = ".processing-";

/// Turns staged content into the stored form of a data set.
pub trait StorageProcessor: Send + Sync {
    fn create_transaction(
        &self,
        info: &DataSetInformation,
        root_dir: &Path,
    ) -> Box<dyn StorageProcessorTransaction>;
}

/// One storage attempt of a [`StorageProcessor`].
pub trait StorageProcessorTransaction {
    /// Place `contents` below [`stored_data_directory`](Self::stored_data_directory).
    /// Every filesystem change goes through `stack`.
    fn store_data(
        &mut self,
        contents: Option<&Path>,
        stack: &mut RollbackStack,
    ) -> Result<(), RegistrationError>;

    fn stored_data_directory(&self) -> &Path;

    fn set_stored_data_directory(&mut self, dir: PathBuf);

    fn commit(&mut self) -> Result<(), RegistrationError>;

    fn rollback(&mut self, reason: &str) -> Result<(), RegistrationError>;
}

/// Stores the content unchanged under `original/`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultStorageProcessor;

pub const ORIGINAL_DIR: &str = "original";

impl StorageProcessor for DefaultStorageProcessor {
    fn create_transaction(
        &self,
        _info: &DataSetInformation,
        root_dir: &Path,
    ) -> Box<dyn StorageProcessorTransaction> {
        Box::new(DefaultTransaction {
            root_dir: root_dir.to_path_buf(),
        })
    }
}

struct DefaultTransaction {
    root_dir: PathBuf,
}

impl StorageProcessorTransaction for DefaultTransaction {
    fn store_data(
        &mut self,
        contents: Option<&Path>,
        stack: &mut RollbackStack,
    ) -> Result<(), RegistrationError> {
        let Some(contents) = contents else {
            return Ok(());
        };
        let original = self.root_dir.join(ORIGINAL_DIR);
        stack.mkdirs(&original)?;
        let name = contents.file_name().ok_or_else(|| {
            RegistrationError::InvalidArgument(format!("no file name: {}", contents.display()))
        })?;
        stack.push_and_execute(TransactionalCommand::move_file(
            contents,
            &original.join(name),
        )?)?;
        Ok(())
    }

    fn stored_data_directory(&self) -> &Path {
        &self.root_dir
    }

    fn set_stored_data_directory(&mut self, dir: PathBuf) {
        self.root_dir = dir;
    }

    fn commit(&mut self) -> Result<(), RegistrationError> {
        Ok(())
    }

    fn rollback(&mut self, _reason: &str) -> Result<(), RegistrationError> {
        Ok(())
    }
}

/// How the owner of a data set was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreStrategy {
    /// Owner is registered by the same transaction.
    NewOwner,
    /// Owner was already known to the service.
    ExistingOwner,
}

impl std::fmt::Display for StoreStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::NewOwner => "new owner",
            Self::ExistingOwner => "existing owner",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmState {
    Initialized,
    Prepared,
    Precommitted,
    Committed,
    Stored,
    RolledBack,
    Undone,
}

/// Directories an algorithm works in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePaths {
    pub staging_base: PathBuf,
    pub precommit_base: PathBuf,
    pub store_base: PathBuf,
    pub marker: PathBuf,
}

impl StoragePaths {
    pub fn new(code: &str, staging_dir: &Path, precommit_dir: &Path, store_root: &Path) -> Self {
        let storage_name = format!("{code}-storage");
        Self {
            marker: staging_dir.join(format!("{PROCESSING_PREFIX}{storage_name}")),
            staging_base: staging_dir.join(storage_name),
            precommit_base: precommit_dir.join(format!("{code}-precommit")),
            store_base: store_root.join(code),
        }
    }
}

/// Stores one data set, step by step, under control of the runner.
pub struct DataSetStorageAlgorithm {
    info: DataSetInformation,
    contents: Option<PathBuf>,
    strategy: StoreStrategy,
    paths: StoragePaths,
    processor: Arc<dyn StorageProcessor>,
    transaction: Option<Box<dyn StorageProcessorTransaction>>,
    state: AlgorithmState,
}

impl DataSetStorageAlgorithm {
    pub fn new(
        info: DataSetInformation,
        contents: Option<PathBuf>,
        strategy: StoreStrategy,
        paths: StoragePaths,
        processor: Arc<dyn StorageProcessor>,
    ) -> Self {
        Self {
            info,
            contents,
            strategy,
            paths,
            processor,
            transaction: None,
            state: AlgorithmState::Initialized,
        }
    }

    pub fn info(&self) -> &DataSetInformation {
        &self.info
    }

    pub fn code(&self) -> &str {
        &self.info.code
    }

    pub fn state(&self) -> AlgorithmState {
        self.state
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    fn expect_state(&self, expected: AlgorithmState) -> Result<(), RegistrationError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(RegistrationError::InvalidArgument(format!(
                "storage of {} is {:?}, expected {expected:?}",
                self.info.code, self.state
            )))
        }
    }

    fn transaction_mut(&mut self) -> Result<&mut Box<dyn StorageProcessorTransaction>, RegistrationError> {
        let code = self.info.code.clone();
        self.transaction.as_mut().ok_or_else(|| {
            RegistrationError::InvalidArgument(format!("storage of {code} was never prepared"))
        })
    }

    /// Create the working directories and the processor transaction.
    pub fn prepare(&mut self, stack: &mut RollbackStack) -> Result<(), RegistrationError> {
        self.expect_state(AlgorithmState::Initialized)?;
        stack.mkdirs(&self.paths.staging_base)?;
        stack.mkdirs(&self.paths.store_base)?;
        self.transaction = Some(
            self.processor
                .create_transaction(&self.info, &self.paths.staging_base),
        );
        self.state = AlgorithmState::Prepared;
        Ok(())
    }

    /// Run the storage processor and move its output to the precommit area.
    pub fn pre_commit(&mut self, stack: &mut RollbackStack) -> Result<(), RegistrationError> {
        self.expect_state(AlgorithmState::Prepared)?;
        // fails if another attempt is storing the same data set
        stack.push_and_execute(TransactionalCommand::new_file(&self.paths.marker))?;

        log::info!(
            "Start storing data set {} for {} ({})",
            self.info.code,
            self.info.owner_description(),
            self.strategy
        );
        let started = std::time::Instant::now();
        let contents = self.contents.clone();
        let tx = self.transaction_mut()?;
        tx.store_data(contents.as_deref(), stack)?;
        let stored_dir = tx.stored_data_directory().to_path_buf();
        log::info!(
            "Finished storing data set {}, took {:?}",
            self.info.code,
            started.elapsed()
        );

        stack.mkdirs(&self.paths.precommit_base)?;
        for entry in list_entries(&stored_dir)? {
            let Some(name) = entry.file_name() else {
                continue;
            };
            stack.push_and_execute(TransactionalCommand::move_file(
                &entry,
                &self.paths.precommit_base.join(name),
            )?)?;
        }
        self.state = AlgorithmState::Precommitted;
        Ok(())
    }

    /// Let the processor commit; drop the marker and the emptied staging dir.
    pub fn commit_storage_processor(&mut self) -> Result<(), RegistrationError> {
        self.expect_state(AlgorithmState::Precommitted)?;
        let precommit = self.paths.precommit_base.clone();
        let tx = self.transaction_mut()?;
        tx.set_stored_data_directory(precommit);
        tx.commit()?;
        if let Err(e) = fs::remove_file(&self.paths.marker) {
            log::error!(
                "Marker file '{}' could not be deleted: {e}",
                self.paths.marker.display()
            );
        }
        if let Err(e) = fs::remove_dir_all(&self.paths.staging_base) {
            log::error!(
                "Staging directory '{}' could not be deleted: {e}",
                self.paths.staging_base.display()
            );
        }
        self.state = AlgorithmState::Committed;
        Ok(())
    }

    /// Move precommitted files to their final place and write the manifest.
    pub fn move_to_store(&mut self, registration_id: u64) -> Result<(), RegistrationError> {
        self.expect_state(AlgorithmState::Committed)?;
        if !self.paths.precommit_base.exists() {
            return Err(RegistrationError::Storage(DssError::Invalid(format!(
                "Can't find precommit directory {}",
                self.paths.precommit_base.display()
            ))));
        }
        for entry in list_entries(&self.paths.precommit_base)? {
            let Some(name) = entry.file_name() else {
                continue;
            };
            TransactionalCommand::move_file(&entry, &self.paths.store_base.join(name))?
                .execute()?;
        }
        DataSetManifest::compute(&self.paths.store_base, self.info.clone(), registration_id)?
            .write_to(&self.paths.store_base)?;
        self.state = AlgorithmState::Stored;
        Ok(())
    }

    pub fn clean_precommit_directory(&self) -> Result<(), RegistrationError> {
        self.expect_state(AlgorithmState::Stored)?;
        fs::remove_dir(&self.paths.precommit_base)
            .io_context(|| format!("remove {}", self.paths.precommit_base.display()))?;
        Ok(())
    }

    /// Tell the processor the attempt failed. Files are restored by the
    /// rollback stack, not here.
    pub fn rollback(&mut self, reason: &str) {
        if matches!(
            self.state,
            AlgorithmState::Prepared | AlgorithmState::Precommitted
        ) {
            if let Some(tx) = self.transaction.as_mut() {
                if let Err(e) = tx.rollback(reason) {
                    log::error!("storage processor rollback of {} failed: {e}", self.info.code);
                }
            }
            self.state = AlgorithmState::RolledBack;
        }
        self.state = AlgorithmState::Undone;
    }
}

fn list_entries(dir: &Path) -> Result<Vec<PathBuf>, RegistrationError> {
    let mut entries = Vec::new();
    let read = match fs::read_dir(dir) {
        Ok(r) => r,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
        Err(e) => return Err(DssError::io(format!("list {}", dir.display()), e).into()),
    };
    for entry in read {
        entries.push(entry.io_context(|| format!("list {}", dir.display()))?.path());
    }
    entries.sort();
    Ok(entries)
}
