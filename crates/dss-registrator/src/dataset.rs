//! Data sets being assembled inside a transaction

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use dss_core::IoContext;
use serde::{Deserialize, Serialize};

use crate::error::RegistrationError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSetKind {
    /// Carries exactly one file or directory.
    #[default]
    Physical,
    /// Groups other data sets, no content of its own.
    Container,
    /// Points at data held elsewhere, no content of its own.
    Link,
}

impl DataSetKind {
    pub fn carries_files(&self) -> bool {
        matches!(self, Self::Physical)
    }
}

/// Metadata registered for one data set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSetInformation {
    pub code: String,
    pub data_set_type: Option<String>,
    pub kind: DataSetKind,
    pub sample: Option<String>,
    pub experiment: Option<String>,
    pub parent_codes: Vec<String>,
    pub contained_codes: Vec<String>,
    pub properties: BTreeMap<String, String>,
    pub data_store_code: Option<String>,
}

impl DataSetInformation {
    pub fn new(code: impl Into<String>, kind: DataSetKind) -> Self {
        Self {
            code: code.into(),
            data_set_type: None,
            kind,
            sample: None,
            experiment: None,
            parent_codes: Vec::new(),
            contained_codes: Vec::new(),
            properties: BTreeMap::new(),
            data_store_code: None,
        }
    }

    /// Short human description of the owner, for logs.
    pub fn owner_description(&self) -> String {
        match (&self.sample, &self.experiment) {
            (Some(s), _) => format!("sample '{s}'"),
            (None, Some(e)) => format!("experiment '{e}'"),
            (None, None) => "no owner".to_string(),
        }
    }
}

/// A data set registered in a live transaction.
#[derive(Debug, Clone)]
pub struct DataSet {
    info: DataSetInformation,
    staging_folder: PathBuf,
}

impl DataSet {
    pub(crate) fn new(info: DataSetInformation, staging_folder: PathBuf) -> Self {
        Self {
            info,
            staging_folder,
        }
    }

    pub fn code(&self) -> &str {
        &self.info.code
    }

    pub fn info(&self) -> &DataSetInformation {
        &self.info
    }

    pub fn staging_folder(&self) -> &Path {
        &self.staging_folder
    }

    pub fn set_data_set_type(&mut self, data_set_type: impl Into<String>) {
        self.info.data_set_type = Some(data_set_type.into());
    }

    pub fn set_sample(&mut self, identifier: impl Into<String>) {
        self.info.sample = Some(identifier.into());
    }

    pub fn set_experiment(&mut self, identifier: impl Into<String>) {
        self.info.experiment = Some(identifier.into());
    }

    pub fn add_parent(&mut self, code: impl Into<String>) {
        self.info.parent_codes.push(code.into());
    }

    pub fn add_contained(&mut self, code: impl Into<String>) {
        self.info.contained_codes.push(code.into());
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.info.properties.insert(key.into(), value.into());
    }

    /// The single staged entry, or `None` for container and link data sets.
    pub fn contents(&self) -> Result<Option<PathBuf>, RegistrationError> {
        let mut entries = Vec::new();
        match fs::read_dir(&self.staging_folder) {
            Ok(dir) => {
                for entry in dir {
                    let entry = entry
                        .io_context(|| format!("list {}", self.staging_folder.display()))?;
                    entries.push(entry.path());
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(dss_core::DssError::io(
                    format!("list {}", self.staging_folder.display()),
                    e,
                )
                .into());
            }
        }

        let code = self.info.code.clone();
        if !self.info.kind.carries_files() {
            return if entries.is_empty() {
                Ok(None)
            } else {
                Err(RegistrationError::ContainerWithFiles { code })
            };
        }
        match entries.len() {
            0 => Err(RegistrationError::EmptyDataSet { code }),
            1 => Ok(entries.pop()),
            n => Err(RegistrationError::AmbiguousDataSet { code, entries: n }),
        }
    }
}
