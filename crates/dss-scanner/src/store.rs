//! Scanned stores and the items they contain

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use dss_core::{DssError, IoContext};

/// Prefix of the marker file announcing that an item is completely written.
pub const IS_FINISHED_PREFIX: &str = ".MARKER_is_finished_";

/// One named entry of a scanned store. Identity is the name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreItem {
    name: String,
}

impl StoreItem {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for StoreItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// A source of items polled by the directory scanner.
pub trait ScannedStore {
    /// Where the items live.
    fn location(&self) -> &Path;

    /// All items, oldest modification first.
    fn list_sorted_by_modification(&self) -> Result<Vec<StoreItem>, DssError>;

    /// Drop items that are not ready to be processed yet.
    fn filter_ready(&self, items: Vec<StoreItem>) -> Result<Vec<StoreItem>, DssError>;

    fn exists(&self, item: &StoreItem) -> bool;

    /// Called once an item has been consumed.
    fn mark_consumed(&self, _item: &StoreItem) -> Result<(), DssError> {
        Ok(())
    }

    fn path(&self, item: &StoreItem) -> PathBuf {
        self.location().join(item.name())
    }

    fn last_modified(&self, item: &StoreItem) -> Option<SystemTime> {
        fs::symlink_metadata(self.path(item))
            .and_then(|m| m.modified())
            .ok()
    }
}

/// A plain directory on a (possibly remote) filesystem.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    dir: PathBuf,
    use_is_finished_marker: bool,
}

impl DirectoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            use_is_finished_marker: false,
        }
    }

    /// Only treat an item as ready once `.MARKER_is_finished_<name>` exists.
    pub fn with_is_finished_marker(mut self, enabled: bool) -> Self {
        self.use_is_finished_marker = enabled;
        self
    }

    pub fn marker_path(&self, item: &StoreItem) -> PathBuf {
        self.dir.join(format!("{IS_FINISHED_PREFIX}{}", item.name()))
    }

    /// Remove the is-finished marker of an item, if any.
    pub fn remove_marker(&self, item: &StoreItem) -> Result<(), DssError> {
        let marker = self.marker_path(item);
        match fs::remove_file(&marker) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                Err(DssError::io(format!("remove {}", marker.display()), e))
            }
            _ => Ok(()),
        }
    }

    pub fn uses_is_finished_marker(&self) -> bool {
        self.use_is_finished_marker
    }
}

impl ScannedStore for DirectoryStore {
    fn location(&self) -> &Path {
        &self.dir
    }

    fn list_sorted_by_modification(&self) -> Result<Vec<StoreItem>, DssError> {
        let entries =
            fs::read_dir(&self.dir).io_context(|| format!("list {}", self.dir.display()))?;
        let mut items = Vec::new();
        for entry in entries {
            let entry = entry.io_context(|| format!("list {}", self.dir.display()))?;
            // vanished between listing and stat: skip
            let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
                continue;
            };
            items.push((modified, entry.file_name().to_string_lossy().into_owned()));
        }
        items.sort();
        Ok(items.into_iter().map(|(_, name)| StoreItem::new(name)).collect())
    }

    fn filter_ready(&self, items: Vec<StoreItem>) -> Result<Vec<StoreItem>, DssError> {
        if !self.use_is_finished_marker {
            return Ok(items);
        }
        Ok(items
            .into_iter()
            .filter(|item| {
                !item.name().starts_with(IS_FINISHED_PREFIX) && self.marker_path(item).exists()
            })
            .collect())
    }

    fn exists(&self, item: &StoreItem) -> bool {
        dss_core::command::exists_no_follow(&self.path(item))
    }

    fn mark_consumed(&self, item: &StoreItem) -> Result<(), DssError> {
        if self.use_is_finished_marker {
            self.remove_marker(item)?;
        }
        Ok(())
    }
}
