//! Manifest written next to every stored data set

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use dss_core::{DssError, IoContext};
use serde::{Deserialize, Serialize};

use crate::dataset::DataSetInformation;

pub const MANIFEST_FILENAME: &str = "manifest.json";

/// Records what was stored and the blake3 hashes of the stored files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSetManifest {
    pub data_set: DataSetInformation,
    /// Registration batch that made the data set known to the service.
    pub registration_id: u64,
    /// Relative path → full hex hash.
    pub file_hashes: BTreeMap<String, String>,
    /// Hash over all file hashes in path order.
    pub content_hash: String,
    pub stored_at: chrono::DateTime<chrono::Utc>,
}

/// A stored file whose content no longer matches its manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashMismatch {
    pub path: String,
    pub expected: String,
    pub actual: Option<String>,
}

impl DataSetManifest {
    /// Describe the files currently under `dir`.
    pub fn compute(
        dir: &Path,
        data_set: DataSetInformation,
        registration_id: u64,
    ) -> Result<Self, DssError> {
        let (file_hashes, content_hash) = content_hashes(dir)?;
        Ok(Self {
            data_set,
            registration_id,
            file_hashes,
            content_hash,
            stored_at: chrono::Utc::now(),
        })
    }

    pub fn write_to(&self, dir: &Path) -> Result<(), DssError> {
        let path = dir.join(MANIFEST_FILENAME);
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| DssError::Invalid(format!("cannot serialize manifest: {e}")))?;
        fs::write(&path, json).io_context(|| format!("write {}", path.display()))
    }

    pub fn read_from(dir: &Path) -> Result<Self, DssError> {
        let path = dir.join(MANIFEST_FILENAME);
        let json = fs::read_to_string(&path).io_context(|| format!("read {}", path.display()))?;
        serde_json::from_str(&json).map_err(|e| DssError::Corrupt {
            path,
            message: e.to_string(),
        })
    }

    /// Re-hash the files under `dir` and report every difference.
    pub fn verify(&self, dir: &Path) -> Result<Vec<HashMismatch>, DssError> {
        let (actual, _) = content_hashes(dir)?;
        let mut mismatches = Vec::new();
        for (path, expected) in &self.file_hashes {
            let found = actual.get(path);
            if found != Some(expected) {
                mismatches.push(HashMismatch {
                    path: path.clone(),
                    expected: expected.clone(),
                    actual: found.cloned(),
                });
            }
        }
        for (path, hash) in &actual {
            if !self.file_hashes.contains_key(path) {
                mismatches.push(HashMismatch {
                    path: path.clone(),
                    expected: String::new(),
                    actual: Some(hash.clone()),
                });
            }
        }
        Ok(mismatches)
    }
}

/// Per-file hashes (relative path keys) and the combined hash, for every
/// regular file below `dir` except the manifest itself.
fn content_hashes(dir: &Path) -> Result<(BTreeMap<String, String>, String), DssError> {
    let pattern = dir.join("**/*");
    let mut entries: Vec<_> = glob::glob(&pattern.to_string_lossy())
        .map_err(|e| DssError::Invalid(format!("invalid glob pattern: {e}")))?
        .filter_map(|e| e.ok())
        .filter(|p| p.is_file())
        .filter(|p| p.strip_prefix(dir).is_ok_and(|r| r != Path::new(MANIFEST_FILENAME)))
        .collect();
    entries.sort();

    let mut file_hashes = BTreeMap::new();
    let mut combined = blake3::Hasher::new();
    for path in &entries {
        let mut hasher = blake3::Hasher::new();
        hasher
            .update_mmap(path)
            .io_context(|| format!("hash {}", path.display()))?;
        let hash = hasher.finalize();
        combined.update(hash.as_bytes());
        let rel = path
            .strip_prefix(dir)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned();
        file_hashes.insert(rel, hash.to_hex().to_string());
    }
    Ok((file_hashes, combined.finalize().to_hex().to_string()))
}
