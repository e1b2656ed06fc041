//! File-backed entity service for standalone operation
//!
//! ```text
//! {journal}/
//! ├── registry.json   # known entities, counters, confirmed data sets
//! ├── 1.json          # one file per applied registration batch
//! └── 2.json
//! ```
//!
//! A batch file is written before the registry, so a batch whose file
//! exists counts as applied even if the process died right after.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use dss_core::{DssError, IoContext};
use serde::{Deserialize, Serialize};

use crate::dataset::DataSetInformation;
use crate::entity::{EntityKind, ExistingEntity};
use crate::service::{
    AtomicEntityOperationDetails, AtomicEntityOperationResult, EntityOperationService,
    EntityOperationsState, ServiceError,
};

const REGISTRY_FILENAME: &str = "registry.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Registry {
    last_registration_id: u64,
    perm_id_counter: u64,
    code_counter: u64,
    /// `<KIND prefix><identifier>` → entity
    entities: BTreeMap<String, ExistingEntity>,
    confirmed: BTreeSet<String>,
}

fn key(kind: EntityKind, identifier: &str) -> String {
    format!("{}{identifier}", kind.prefix())
}

impl Registry {
    fn insert(&mut self, kind: EntityKind, identifier: &str, perm_id: Option<&str>) {
        let mut entity = ExistingEntity::new(kind, identifier);
        entity.perm_id = perm_id.map(str::to_string);
        self.entities.insert(key(kind, identifier), entity);
    }

    fn apply(&mut self, details: &AtomicEntityOperationDetails) {
        for space in &details.spaces {
            self.insert(EntityKind::Space, &space.code, None);
        }
        for project in &details.projects {
            self.insert(EntityKind::Project, &project.identifier, None);
        }
        for experiment in &details.experiments {
            self.insert(
                EntityKind::Experiment,
                &experiment.identifier,
                Some(&experiment.perm_id),
            );
        }
        for sample in &details.samples {
            self.insert(EntityKind::Sample, &sample.identifier, Some(&sample.perm_id));
        }
        for material in &details.materials {
            self.insert(EntityKind::Material, &material.code, None);
        }
        for metaproject in &details.metaprojects {
            self.insert(EntityKind::Metaproject, &metaproject.identifier(), None);
        }
        for data_set in &details.data_sets {
            self.insert(EntityKind::DataSet, &data_set.code, Some(&data_set.code));
        }
        for update in &details.updates {
            let mut entity = update.clone();
            entity.modified = false;
            self.entities
                .insert(key(update.kind, &update.identifier), entity);
        }
    }
}

pub struct JournalEntityService {
    dir: PathBuf,
    registry: Mutex<Registry>,
}

impl JournalEntityService {
    /// Open (or create) the journal in `dir`.
    pub fn open(dir: &Path) -> Result<Self, DssError> {
        fs::create_dir_all(dir).io_context(|| format!("create {}", dir.display()))?;
        let path = dir.join(REGISTRY_FILENAME);
        let registry = match fs::read_to_string(&path) {
            Ok(json) => serde_json::from_str(&json).map_err(|e| DssError::Corrupt {
                path: path.clone(),
                message: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Registry::default(),
            Err(e) => return Err(DssError::io(format!("read {}", path.display()), e)),
        };
        Ok(Self {
            dir: dir.to_path_buf(),
            registry: Mutex::new(registry),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn batch_path(&self, registration_id: u64) -> PathBuf {
        self.dir.join(format!("{registration_id}.json"))
    }

    /// Codes of data sets whose storage was confirmed.
    pub fn confirmed_data_sets(&self) -> Vec<String> {
        self.lock().confirmed.iter().cloned().collect()
    }

    /// The batch recorded under `registration_id`, if any.
    pub fn read_batch(
        &self,
        registration_id: u64,
    ) -> Result<Option<AtomicEntityOperationDetails>, DssError> {
        let path = self.batch_path(registration_id);
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(DssError::io(format!("read {}", path.display()), e)),
        };
        serde_json::from_str(&json)
            .map(Some)
            .map_err(|e| DssError::Corrupt {
                path,
                message: e.to_string(),
            })
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn save(&self, registry: &Registry) -> Result<(), ServiceError> {
        let json = serde_json::to_string_pretty(registry)
            .map_err(|e| ServiceError::permanent(format!("cannot serialize registry: {e}")))?;
        write_atomically(&self.dir.join(REGISTRY_FILENAME), &json).map_err(to_service_error)
    }
}

fn write_atomically(path: &Path, content: &str) -> Result<(), DssError> {
    let mut tmp = path.to_path_buf().into_os_string();
    tmp.push(".tmp");
    fs::write(&tmp, content).io_context(|| format!("write {}", path.display()))?;
    fs::rename(&tmp, path).io_context(|| format!("replace {}", path.display()))
}

fn to_service_error(e: DssError) -> ServiceError {
    ServiceError {
        message: e.to_string(),
        retryable: e.is_retryable(),
    }
}

impl EntityOperationService for JournalEntityService {
    fn create_perm_ids(&self, count: usize) -> Result<Vec<String>, ServiceError> {
        let mut registry = self.lock();
        let stamp = chrono::Local::now().format("%Y%m%d%H%M%S%3f");
        let ids = (0..count)
            .map(|_| {
                registry.perm_id_counter += 1;
                format!("{stamp}-{}", registry.perm_id_counter)
            })
            .collect();
        self.save(&registry)?;
        Ok(ids)
    }

    fn draw_unique_id(&self) -> Result<u64, ServiceError> {
        let mut registry = self.lock();
        registry.last_registration_id += 1;
        let id = registry.last_registration_id;
        self.save(&registry)?;
        Ok(id)
    }

    fn generate_codes(&self, prefix: &str, count: usize) -> Result<Vec<String>, ServiceError> {
        let mut registry = self.lock();
        let codes = (0..count)
            .map(|_| {
                registry.code_counter += 1;
                format!("{prefix}{}", registry.code_counter)
            })
            .collect();
        self.save(&registry)?;
        Ok(codes)
    }

    fn perform_operations(
        &self,
        details: &AtomicEntityOperationDetails,
    ) -> Result<AtomicEntityOperationResult, ServiceError> {
        let mut registry = self.lock();
        let batch = self.batch_path(details.registration_id);
        if batch.exists() {
            log::warn!(
                "registration {} already in the journal",
                details.registration_id
            );
            return Ok(AtomicEntityOperationResult::for_details(details));
        }
        let json = serde_json::to_string_pretty(details)
            .map_err(|e| ServiceError::permanent(format!("cannot serialize batch: {e}")))?;
        write_atomically(&batch, &json).map_err(to_service_error)?;
        registry.apply(details);
        self.save(&registry)?;
        log::debug!(
            "journaled registration {} ({} operations)",
            details.registration_id,
            details.operation_count()
        );
        Ok(AtomicEntityOperationResult::for_details(details))
    }

    fn did_entity_operations_succeed(
        &self,
        registration_id: u64,
    ) -> Result<EntityOperationsState, ServiceError> {
        Ok(if self.batch_path(registration_id).exists() {
            EntityOperationsState::Successful
        } else {
            EntityOperationsState::NoOperation
        })
    }

    fn owner_exists(&self, info: &DataSetInformation) -> Result<bool, ServiceError> {
        let registry = self.lock();
        let owner = match (&info.sample, &info.experiment) {
            (Some(sample), _) => key(EntityKind::Sample, sample),
            (None, Some(experiment)) => key(EntityKind::Experiment, experiment),
            (None, None) => return Ok(false),
        };
        Ok(registry.entities.contains_key(&owner))
    }

    fn set_storage_confirmed(&self, data_set_code: &str) -> Result<(), ServiceError> {
        let mut registry = self.lock();
        registry.confirmed.insert(data_set_code.to_string());
        self.save(&registry)
    }

    fn try_get_entity(
        &self,
        kind: EntityKind,
        identifier: &str,
    ) -> Result<Option<ExistingEntity>, ServiceError> {
        Ok(self.lock().entities.get(&key(kind, identifier)).cloned())
    }
}
