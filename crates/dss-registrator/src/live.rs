//! Everything a live transaction has collected so far

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use dss_core::command::exists_no_follow;
use dss_core::{RollbackStack, TransactionalCommand};
use rustc_hash::FxHashSet;

use crate::dataset::{DataSet, DataSetInformation, DataSetKind};
use crate::entity::{
    EntityKind, ExistingEntity, NewExperiment, NewMaterial, NewMetaproject, NewProject, NewSample,
    NewSpace, Role, RoleAssignment,
};
use crate::error::RegistrationError;
use crate::perm_id::PermIdCache;
use crate::service::{AtomicEntityOperationDetails, SecondaryQuery};
use crate::storage::{DataSetStorageAlgorithm, StoragePaths, StoreStrategy};
use crate::transaction::TransactionContext;

/// State owned by a transaction until it reaches a terminal state.
pub struct LiveState {
    ctx: TransactionContext,
    stack: RollbackStack,
    working_dir: PathBuf,
    staging_dir: PathBuf,
    user_id: Option<String>,
    data_sets: Vec<DataSet>,
    spaces: Vec<NewSpace>,
    projects: Vec<NewProject>,
    experiments: Vec<NewExperiment>,
    samples: Vec<NewSample>,
    materials: Vec<NewMaterial>,
    metaprojects: Vec<NewMetaproject>,
    updates: BTreeMap<(EntityKind, String), ExistingEntity>,
    role_assignments: Vec<RoleAssignment>,
    role_revocations: Vec<RoleAssignment>,
    /// `<KIND prefix><identifier>` of everything created so far.
    registered: FxHashSet<String>,
    secondary_queries: Vec<(String, Box<dyn SecondaryQuery>)>,
    perm_ids: PermIdCache,
}

impl LiveState {
    pub(crate) fn new(
        stack: RollbackStack,
        working_dir: &Path,
        staging_dir: &Path,
        ctx: TransactionContext,
    ) -> Self {
        Self {
            ctx,
            stack,
            working_dir: working_dir.to_path_buf(),
            staging_dir: staging_dir.to_path_buf(),
            user_id: None,
            data_sets: Vec::new(),
            spaces: Vec::new(),
            projects: Vec::new(),
            experiments: Vec::new(),
            samples: Vec::new(),
            materials: Vec::new(),
            metaprojects: Vec::new(),
            updates: BTreeMap::new(),
            role_assignments: Vec::new(),
            role_revocations: Vec::new(),
            registered: FxHashSet::default(),
            secondary_queries: Vec::new(),
            perm_ids: PermIdCache::new(),
        }
    }

    pub fn stack(&self) -> &RollbackStack {
        &self.stack
    }

    pub(crate) fn stack_mut(&mut self) -> &mut RollbackStack {
        &mut self.stack
    }

    pub(crate) fn into_stack(self) -> RollbackStack {
        self.stack
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub(crate) fn set_user_id(&mut self, user_id: String) {
        self.user_id = Some(user_id);
    }

    fn register_identifier(
        &mut self,
        kind: EntityKind,
        identifier: &str,
    ) -> Result<(), RegistrationError> {
        if self.registered.insert(format!("{}{identifier}", kind.prefix())) {
            Ok(())
        } else {
            Err(RegistrationError::InvalidArgument(format!(
                "{kind} with identifier {identifier} has already been created in this transaction"
            )))
        }
    }

    fn release_identifier(&mut self, kind: EntityKind, identifier: &str) {
        self.registered.remove(&format!("{}{identifier}", kind.prefix()));
    }

    fn next_perm_id(&mut self) -> Result<String, RegistrationError> {
        Ok(self.perm_ids.next(self.ctx.service.as_ref())?)
    }

    // --- data sets ---

    pub(crate) fn create_new_data_set(
        &mut self,
        data_set_type: Option<&str>,
        code: Option<&str>,
    ) -> Result<&mut DataSet, RegistrationError> {
        let mut info = DataSetInformation::new(code.unwrap_or_default(), DataSetKind::Physical);
        info.data_set_type = data_set_type.map(str::to_string);
        self.create_new_data_set_with_details(info)
    }

    pub(crate) fn create_new_data_set_with_details(
        &mut self,
        mut info: DataSetInformation,
    ) -> Result<&mut DataSet, RegistrationError> {
        info.code = if info.code.is_empty() {
            self.next_perm_id()?
        } else {
            info.code.to_uppercase()
        };
        if info.data_store_code.is_none() {
            info.data_store_code = self.ctx.settings.data_store_code.clone();
        }
        self.register_identifier(EntityKind::DataSet, &info.code)?;

        let folder = self.staging_dir.join(&info.code);
        if let Err(e) = self.stack.mkdirs(&folder) {
            self.release_identifier(EntityKind::DataSet, &info.code);
            return Err(e.into());
        }
        log::debug!("data set {} staged in {}", info.code, folder.display());
        self.data_sets.push(DataSet::new(info, folder));
        let idx = self.data_sets.len() - 1;
        Ok(&mut self.data_sets[idx])
    }

    pub fn data_set(&self, code: &str) -> Option<&DataSet> {
        self.data_sets.iter().find(|d| d.code() == code)
    }

    pub(crate) fn data_set_mut(&mut self, code: &str) -> Option<&mut DataSet> {
        self.data_sets.iter_mut().find(|d| d.code() == code)
    }

    pub fn data_sets(&self) -> &[DataSet] {
        &self.data_sets
    }

    /// Forget all data sets and return their staging folders.
    pub(crate) fn clear_data_sets(&mut self) -> Vec<PathBuf> {
        self.data_sets
            .drain(..)
            .map(|d| d.staging_folder().to_path_buf())
            .collect()
    }

    // --- other entities ---

    pub(crate) fn create_new_sample(
        &mut self,
        identifier: &str,
        sample_type: &str,
    ) -> Result<&mut NewSample, RegistrationError> {
        self.register_identifier(EntityKind::Sample, identifier)?;
        let perm_id = self.next_perm_id()?;
        self.samples.push(NewSample {
            identifier: identifier.to_string(),
            perm_id,
            sample_type: sample_type.to_string(),
            experiment: None,
            properties: BTreeMap::new(),
        });
        let idx = self.samples.len() - 1;
        Ok(&mut self.samples[idx])
    }

    /// Sample `/<space>/<generated code>`; the type code is the code prefix.
    pub(crate) fn create_new_sample_with_generated_code(
        &mut self,
        space: &str,
        sample_type: &str,
    ) -> Result<&mut NewSample, RegistrationError> {
        let code = self
            .ctx
            .service
            .generate_codes(sample_type, 1)?
            .pop()
            .ok_or_else(|| RegistrationError::InvalidArgument("no code generated".into()))?;
        self.create_new_sample(&format!("/{space}/{code}"), sample_type)
    }

    pub(crate) fn create_new_experiment(
        &mut self,
        identifier: &str,
        experiment_type: &str,
    ) -> Result<&mut NewExperiment, RegistrationError> {
        self.register_identifier(EntityKind::Experiment, identifier)?;
        let perm_id = self.next_perm_id()?;
        self.experiments.push(NewExperiment {
            identifier: identifier.to_string(),
            perm_id,
            experiment_type: experiment_type.to_string(),
            properties: BTreeMap::new(),
        });
        let idx = self.experiments.len() - 1;
        Ok(&mut self.experiments[idx])
    }

    pub(crate) fn create_new_space(
        &mut self,
        code: &str,
        space_admin_user_id: Option<&str>,
    ) -> Result<&mut NewSpace, RegistrationError> {
        self.register_identifier(EntityKind::Space, code)?;
        self.spaces.push(NewSpace {
            code: code.to_string(),
            description: None,
            space_admin_user_id: space_admin_user_id.map(str::to_string),
        });
        let idx = self.spaces.len() - 1;
        Ok(&mut self.spaces[idx])
    }

    pub(crate) fn create_new_project(
        &mut self,
        identifier: &str,
    ) -> Result<&mut NewProject, RegistrationError> {
        self.register_identifier(EntityKind::Project, identifier)?;
        self.projects.push(NewProject {
            identifier: identifier.to_string(),
            description: None,
        });
        let idx = self.projects.len() - 1;
        Ok(&mut self.projects[idx])
    }

    pub(crate) fn create_new_material(
        &mut self,
        code: &str,
        material_type: &str,
    ) -> Result<&mut NewMaterial, RegistrationError> {
        self.register_identifier(EntityKind::Material, &format!("{code} ({material_type})"))?;
        self.materials.push(NewMaterial {
            code: code.to_string(),
            material_type: material_type.to_string(),
            properties: BTreeMap::new(),
        });
        let idx = self.materials.len() - 1;
        Ok(&mut self.materials[idx])
    }

    /// The owner defaults to the transaction user and must match it.
    pub(crate) fn create_new_metaproject(
        &mut self,
        name: &str,
        description: Option<&str>,
        owner_id: Option<&str>,
    ) -> Result<&mut NewMetaproject, RegistrationError> {
        let owner = match (owner_id, self.user_id.as_deref()) {
            (Some(owner), Some(user)) if owner != user => {
                return Err(RegistrationError::InvalidArgument(format!(
                    "metaproject owner {owner} differs from transaction user {user}"
                )));
            }
            (Some(owner), _) | (None, Some(owner)) => owner.to_string(),
            (None, None) => {
                return Err(RegistrationError::InvalidArgument(
                    "metaproject needs an owner or a transaction user".into(),
                ));
            }
        };
        let metaproject = NewMetaproject {
            name: name.to_string(),
            description: description.map(str::to_string),
            owner_id: owner,
        };
        self.register_identifier(EntityKind::Metaproject, &metaproject.identifier())?;
        self.metaprojects.push(metaproject);
        let idx = self.metaprojects.len() - 1;
        Ok(&mut self.metaprojects[idx])
    }

    /// Fetch once from the service, then hand out the cached instance.
    pub(crate) fn get_for_update(
        &mut self,
        kind: EntityKind,
        identifier: &str,
    ) -> Result<Option<&mut ExistingEntity>, RegistrationError> {
        let key = (kind, identifier.to_string());
        if !self.updates.contains_key(&key) {
            match self.ctx.service.try_get_entity(kind, identifier)? {
                Some(entity) => {
                    self.updates.insert(key.clone(), entity);
                }
                None => return Ok(None),
            }
        }
        Ok(self.updates.get_mut(&key))
    }

    pub(crate) fn get_metaproject(
        &self,
        identifier: &str,
    ) -> Result<Option<ExistingEntity>, RegistrationError> {
        Ok(self
            .ctx
            .service
            .try_get_entity(EntityKind::Metaproject, identifier)?)
    }

    pub(crate) fn assign_role_to_space(&mut self, role: Role, space: &str, user_ids: &[&str]) {
        self.role_assignments.push(role_assignment(role, space, user_ids));
    }

    pub(crate) fn revoke_role_from_space(&mut self, role: Role, space: &str, user_ids: &[&str]) {
        self.role_revocations.push(role_assignment(role, space, user_ids));
    }

    pub(crate) fn register_secondary_query(&mut self, name: &str, query: Box<dyn SecondaryQuery>) {
        self.secondary_queries.push((name.to_string(), query));
    }

    pub(crate) fn take_secondary_queries(&mut self) -> Vec<(String, Box<dyn SecondaryQuery>)> {
        std::mem::take(&mut self.secondary_queries)
    }

    // --- files ---

    fn staging_folder_of(&self, code: &str) -> Result<PathBuf, RegistrationError> {
        self.data_set(code)
            .map(|d| d.staging_folder().to_path_buf())
            .ok_or_else(|| {
                RegistrationError::InvalidArgument(format!(
                    "data set {code} is not part of this transaction"
                ))
            })
    }

    /// Absolute sources are taken as is, relative ones against the working
    /// directory.
    fn resolve_source(&self, src: &str) -> Result<PathBuf, RegistrationError> {
        let given = PathBuf::from(src);
        if given.is_absolute() && exists_no_follow(&given) {
            return Ok(given);
        }
        let resolved = self.working_dir.join(&given);
        if exists_no_follow(&resolved) {
            Ok(resolved)
        } else {
            Err(RegistrationError::FileNotFound { given, resolved })
        }
    }

    /// `folder/rel`, refusing anything that leaves the folder.
    fn inside(folder: &Path, rel: &str) -> Result<PathBuf, RegistrationError> {
        let rel_path = Path::new(rel);
        if rel_path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(RegistrationError::InvalidArgument(format!(
                "'{rel}' must be a relative path inside the data set"
            )));
        }
        Ok(folder.join(rel_path))
    }

    pub(crate) fn move_file(
        &mut self,
        src: &str,
        data_set: &str,
        dst_in_data_set: Option<&str>,
    ) -> Result<PathBuf, RegistrationError> {
        let source = self.resolve_source(src)?;
        let folder = self.staging_folder_of(data_set)?;
        let dst = match dst_in_data_set {
            Some(rel) => Self::inside(&folder, rel)?,
            None => {
                let name = source.file_name().ok_or_else(|| {
                    RegistrationError::InvalidArgument(format!("cannot move {}", source.display()))
                })?;
                folder.join(name)
            }
        };
        if let Some(parent) = dst.parent() {
            self.stack.mkdirs(parent)?;
        }
        self.stack
            .push_and_execute(TransactionalCommand::move_file(&source, &dst)?)?;
        Ok(dst)
    }

    pub(crate) fn create_new_file(
        &mut self,
        data_set: &str,
        dst_in_data_set: Option<&str>,
        name: &str,
    ) -> Result<PathBuf, RegistrationError> {
        let dir = self.target_dir(data_set, dst_in_data_set)?;
        let path = Self::inside(&dir, name)?;
        self.stack
            .push_and_execute(TransactionalCommand::new_file(path.clone()))?;
        Ok(path)
    }

    pub(crate) fn create_new_directory(
        &mut self,
        data_set: &str,
        name: &str,
    ) -> Result<PathBuf, RegistrationError> {
        let folder = self.staging_folder_of(data_set)?;
        let dir = Self::inside(&folder, name)?;
        self.stack.mkdirs(&dir)?;
        Ok(dir)
    }

    pub(crate) fn create_new_link(
        &mut self,
        data_set: &str,
        dst_in_data_set: Option<&str>,
        name: &str,
        target: &Path,
    ) -> Result<PathBuf, RegistrationError> {
        let dir = self.target_dir(data_set, dst_in_data_set)?;
        let path = Self::inside(&dir, name)?;
        self.stack
            .push_and_execute(TransactionalCommand::new_link(path.clone(), target))?;
        Ok(path)
    }

    /// Directory inside a data set, created on demand.
    fn target_dir(
        &mut self,
        data_set: &str,
        dst_in_data_set: Option<&str>,
    ) -> Result<PathBuf, RegistrationError> {
        let folder = self.staging_folder_of(data_set)?;
        let dir = match dst_in_data_set {
            Some(rel) => Self::inside(&folder, rel)?,
            None => folder,
        };
        self.stack.mkdirs(&dir)?;
        Ok(dir)
    }

    // --- commit support ---

    /// One storage algorithm per data set plus the information to register.
    pub(crate) fn build_algorithms(
        &self,
    ) -> Result<(Vec<DataSetStorageAlgorithm>, Vec<DataSetInformation>), RegistrationError> {
        let settings = &self.ctx.settings;
        let mut algorithms = Vec::with_capacity(self.data_sets.len());
        let mut infos = Vec::with_capacity(self.data_sets.len());
        for data_set in &self.data_sets {
            let contents = data_set.contents()?;
            let mut info = data_set.info().clone();
            let strategy = self.store_strategy(&mut info)?;
            let paths = StoragePaths::new(
                &info.code,
                &self.staging_dir,
                &settings.precommit_dir,
                &settings.store_root,
            );
            infos.push(info.clone());
            algorithms.push(DataSetStorageAlgorithm::new(
                info,
                contents,
                strategy,
                paths,
                self.ctx.storage_processor.clone(),
            ));
        }
        Ok((algorithms, infos))
    }

    /// Owners created in this transaction win over service lookups. A data
    /// set owned by a new sample inherits that sample's experiment.
    fn store_strategy(
        &self,
        info: &mut DataSetInformation,
    ) -> Result<StoreStrategy, RegistrationError> {
        if let Some(sample) = info.sample.clone() {
            if let Some(new) = self.samples.iter().find(|s| s.identifier == sample) {
                if info.experiment.is_none() {
                    info.experiment = new.experiment.clone();
                }
                return Ok(StoreStrategy::NewOwner);
            }
        } else if let Some(experiment) = &info.experiment {
            if self.experiments.iter().any(|e| &e.identifier == experiment) {
                return Ok(StoreStrategy::NewOwner);
            }
        }
        let has_owner = info.sample.is_some() || info.experiment.is_some();
        if has_owner && self.ctx.service.owner_exists(info)? {
            return Ok(StoreStrategy::ExistingOwner);
        }
        Err(RegistrationError::UnknownOwner {
            code: info.code.clone(),
        })
    }

    pub(crate) fn operation_details(
        &self,
        data_sets: Vec<DataSetInformation>,
    ) -> AtomicEntityOperationDetails {
        AtomicEntityOperationDetails {
            registration_id: 0,
            user_id: self.user_id.clone(),
            spaces: self.spaces.clone(),
            projects: self.projects.clone(),
            experiments: self.experiments.clone(),
            samples: self.samples.clone(),
            materials: self.materials.clone(),
            metaprojects: self.metaprojects.clone(),
            updates: self.updates.values().filter(|e| e.modified).cloned().collect(),
            data_sets,
            role_assignments: self.role_assignments.clone(),
            role_revocations: self.role_revocations.clone(),
        }
    }
}

fn role_assignment(role: Role, space: &str, user_ids: &[&str]) -> RoleAssignment {
    RoleAssignment {
        role,
        space: space.to_string(),
        user_ids: user_ids.iter().map(|u| u.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Arc;

    use dss_core::NoopDelegate;

    use crate::testing::{MemoryService, test_context};

    struct Fixture {
        dir: tempfile::TempDir,
        service: Arc<MemoryService>,
        live: LiveState,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let working = dir.path().join("incoming");
        let staging = dir.path().join("staging");
        fs::create_dir(&working).unwrap();
        fs::create_dir(&staging).unwrap();
        let service = Arc::new(MemoryService::default());
        let stack = RollbackStack::create_in(&dir.path().join("rollback")).unwrap();
        let live = LiveState::new(
            stack,
            &working,
            &staging,
            test_context(dir.path(), service.clone()),
        );
        Fixture { dir, service, live }
    }

    impl Fixture {
        fn incoming(&self, rel: &str) -> PathBuf {
            self.dir.path().join("incoming").join(rel)
        }

        fn new_data_set(&mut self) -> String {
            self.live
                .create_new_data_set(None, None)
                .unwrap()
                .code()
                .to_string()
        }
    }

    #[test]
    fn data_set_code_generated_or_uppercased() {
        let mut f = fixture();
        let generated = f.new_data_set();
        assert!(!generated.is_empty());
        let given = f
            .live
            .create_new_data_set(Some("RAW"), Some("my-ds"))
            .unwrap();
        assert_eq!(given.code(), "MY-DS");
        assert_eq!(given.info().data_set_type.as_deref(), Some("RAW"));
        assert!(given.staging_folder().is_dir());
        assert!(f.live.data_set("MY-DS").is_some());
    }

    #[test]
    fn duplicate_identifiers_rejected() {
        let mut f = fixture();
        f.live.create_new_sample("/S/A", "CELL").unwrap();
        let err = f.live.create_new_sample("/S/A", "CELL").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Sample with identifier /S/A has already been created in this transaction"
        );
        // same identifier, different kind
        f.live.create_new_experiment("/S/A", "E").unwrap();
        f.live.create_new_data_set(None, Some("x")).unwrap();
        assert!(f.live.create_new_data_set(None, Some("X")).is_err());
    }

    #[test]
    fn failed_staging_folder_releases_code() {
        let mut f = fixture();
        let staging = f.dir.path().join("staging");
        fs::remove_dir(&staging).unwrap();
        fs::write(&staging, b"not a directory").unwrap();

        assert!(f.live.create_new_data_set(None, Some("run7")).is_err());
        assert!(f.live.data_set("RUN7").is_none());

        fs::remove_file(&staging).unwrap();
        fs::create_dir(&staging).unwrap();
        let ds = f.live.create_new_data_set(None, Some("run7")).unwrap();
        assert_eq!(ds.code(), "RUN7");
        assert!(ds.staging_folder().is_dir());
    }

    #[test]
    fn perm_ids_assigned_to_new_entities() {
        let mut f = fixture();
        let s = f.live.create_new_sample("/S/A", "CELL").unwrap().perm_id.clone();
        let e = f
            .live
            .create_new_experiment("/S/P/E", "DEFAULT")
            .unwrap()
            .perm_id
            .clone();
        assert_ne!(s, e);
        assert_eq!(*f.service.perm_id_requests.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn generated_sample_code() {
        let mut f = fixture();
        let sample = f
            .live
            .create_new_sample_with_generated_code("SPACE", "CELL")
            .unwrap();
        assert!(sample.identifier.starts_with("/SPACE/CELL"));
    }

    #[test]
    fn metaproject_owner_rules() {
        let mut f = fixture();
        assert!(f.live.create_new_metaproject("tag", None, None).is_err());
        f.live.set_user_id("alice".into());
        let m = f.live.create_new_metaproject("tag", Some("d"), None).unwrap();
        assert_eq!(m.identifier(), "/alice/tag");
        assert!(f
            .live
            .create_new_metaproject("other", None, Some("bob"))
            .is_err());
        assert!(f.live.create_new_metaproject("tag", None, Some("alice")).is_err());
    }

    #[test]
    fn get_for_update_caches_instance() {
        let mut f = fixture();
        f.service
            .add_entity(ExistingEntity::new(EntityKind::Sample, "/S/OLD"));
        f.live
            .get_for_update(EntityKind::Sample, "/S/OLD")
            .unwrap()
            .unwrap()
            .set_property("COLOR", "red");
        let again = f
            .live
            .get_for_update(EntityKind::Sample, "/S/OLD")
            .unwrap()
            .unwrap();
        assert_eq!(again.property("COLOR"), Some("red"));
        assert!(f
            .live
            .get_for_update(EntityKind::Sample, "/S/NONE")
            .unwrap()
            .is_none());

        let details = f.live.operation_details(Vec::new());
        assert_eq!(details.updates.len(), 1);
    }

    #[test]
    fn move_file_relative_to_working_dir() {
        let mut f = fixture();
        fs::write(f.incoming("a.txt"), b"a").unwrap();
        let code = f.new_data_set();
        let dst = f.live.move_file("a.txt", &code, None).unwrap();
        assert!(dst.ends_with(format!("{code}/a.txt")));
        assert!(dst.exists());
        assert!(!f.incoming("a.txt").exists());
    }

    #[test]
    fn move_file_absolute_source() {
        let mut f = fixture();
        let src = f.dir.path().join("elsewhere.txt");
        fs::write(&src, b"e").unwrap();
        let code = f.new_data_set();
        let dst = f
            .live
            .move_file(src.to_str().unwrap(), &code, Some("sub/dir/renamed.txt"))
            .unwrap();
        assert_eq!(fs::read(&dst).unwrap(), b"e");

        // parents are undone innermost first
        f.live.stack_mut().rollback_all(&mut NoopDelegate).unwrap();
        assert!(src.exists());
        assert!(!dst.parent().unwrap().exists());
    }

    #[test]
    fn move_file_missing_source_names_both_paths() {
        let mut f = fixture();
        let code = f.new_data_set();
        let err = f.live.move_file("nope.txt", &code, None).unwrap_err();
        let RegistrationError::FileNotFound { given, resolved } = err else {
            panic!("unexpected error");
        };
        assert_eq!(given, PathBuf::from("nope.txt"));
        assert_eq!(resolved, f.incoming("nope.txt"));
    }

    #[test]
    fn move_into_unknown_data_set() {
        let mut f = fixture();
        fs::write(f.incoming("a.txt"), b"a").unwrap();
        assert!(matches!(
            f.live.move_file("a.txt", "NOPE", None),
            Err(RegistrationError::InvalidArgument(_))
        ));
        assert!(f.incoming("a.txt").exists());
    }

    #[test]
    fn destination_may_not_escape() {
        let mut f = fixture();
        fs::write(f.incoming("a.txt"), b"a").unwrap();
        let code = f.new_data_set();
        assert!(f.live.move_file("a.txt", &code, Some("../x")).is_err());
        assert!(f.live.create_new_file(&code, None, "/abs").is_err());
    }

    #[test]
    fn create_file_directory_and_link() {
        let mut f = fixture();
        let code = f.new_data_set();
        let file = f.live.create_new_file(&code, Some("meta"), "info.txt").unwrap();
        assert!(file.is_file());
        let dir = f.live.create_new_directory(&code, "raw").unwrap();
        assert!(dir.is_dir());
        let link = f
            .live
            .create_new_link(&code, None, "latest", Path::new("raw"))
            .unwrap();
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());

        f.live.stack_mut().rollback_all(&mut NoopDelegate).unwrap();
        let folder = f.dir.path().join("staging").join(&code);
        assert!(!folder.exists());
    }

    #[test]
    fn role_changes_in_details() {
        let mut f = fixture();
        f.live.assign_role_to_space(Role::User, "LAB", &["alice", "bob"]);
        f.live.revoke_role_from_space(Role::Admin, "LAB", &["carol"]);
        let details = f.live.operation_details(Vec::new());
        assert_eq!(details.role_assignments[0].user_ids, vec!["alice", "bob"]);
        assert_eq!(details.role_revocations[0].role, Role::Admin);
    }

    #[test]
    fn new_sample_owner_lends_experiment() {
        let mut f = fixture();
        f.live
            .create_new_sample("/S/A", "CELL")
            .unwrap()
            .set_experiment("/S/P/E");
        let mut info = DataSetInformation::new("DS", DataSetKind::Physical);
        info.sample = Some("/S/A".into());
        assert_eq!(
            f.live.store_strategy(&mut info).unwrap(),
            StoreStrategy::NewOwner
        );
        assert_eq!(info.experiment.as_deref(), Some("/S/P/E"));

        let mut orphan = DataSetInformation::new("DS2", DataSetKind::Physical);
        assert!(matches!(
            f.live.store_strategy(&mut orphan),
            Err(RegistrationError::UnknownOwner { .. })
        ));
    }
}
