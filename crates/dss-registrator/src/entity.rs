//! Registration intents for entities other than data sets

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Space,
    Project,
    Experiment,
    Sample,
    Material,
    Metaproject,
    DataSet,
    Vocabulary,
}

impl EntityKind {
    /// Prefix used when tracking identifiers registered in a transaction.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Space => "SPACE:",
            Self::Project => "PROJECT:",
            Self::Experiment => "EXPERIMENT:",
            Self::Sample => "SAMPLE:",
            Self::Material => "MATERIAL:",
            Self::Metaproject => "METAPROJECT:",
            Self::DataSet => "DATA_SET:",
            Self::Vocabulary => "VOCABULARY:",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Space => "Space",
            Self::Project => "Project",
            Self::Experiment => "Experiment",
            Self::Sample => "Sample",
            Self::Material => "Material",
            Self::Metaproject => "Metaproject",
            Self::DataSet => "Data set",
            Self::Vocabulary => "Vocabulary",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSpace {
    pub code: String,
    pub description: Option<String>,
    pub space_admin_user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProject {
    pub identifier: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewExperiment {
    pub identifier: String,
    pub perm_id: String,
    pub experiment_type: String,
    pub properties: BTreeMap<String, String>,
}

impl NewExperiment {
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSample {
    pub identifier: String,
    pub perm_id: String,
    pub sample_type: String,
    pub experiment: Option<String>,
    pub properties: BTreeMap<String, String>,
}

impl NewSample {
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn set_experiment(&mut self, identifier: impl Into<String>) {
        self.experiment = Some(identifier.into());
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMaterial {
    pub code: String,
    pub material_type: String,
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMetaproject {
    pub name: String,
    pub description: Option<String>,
    pub owner_id: String,
}

impl NewMetaproject {
    pub fn identifier(&self) -> String {
        format!("/{}/{}", self.owner_id, self.name)
    }
}

/// An already registered entity fetched for modification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingEntity {
    pub kind: EntityKind,
    pub identifier: String,
    pub perm_id: Option<String>,
    pub entity_type: Option<String>,
    pub properties: BTreeMap<String, String>,
    /// Set once a property was changed in this transaction.
    #[serde(default)]
    pub modified: bool,
}

impl ExistingEntity {
    pub fn new(kind: EntityKind, identifier: impl Into<String>) -> Self {
        Self {
            kind,
            identifier: identifier.into(),
            perm_id: None,
            entity_type: None,
            properties: BTreeMap::new(),
            modified: false,
        }
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
        self.modified = true;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Power,
    User,
    Observer,
    Etl,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub role: Role,
    pub space: String,
    pub user_ids: Vec<String>,
}
