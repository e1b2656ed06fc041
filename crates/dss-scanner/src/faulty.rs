//! Faulty-path tracking
//!
//! An item that still exists after its handler ran is considered faulty.
//! Faulty items are listed in a `.faulty_paths` file inside the scanned
//! directory, one path per line. Operators un-block an item by removing its
//! line, or all of them by deleting the file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use dss_core::{DssError, IoContext};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::handler::{DirectoryScanningHandler, HandleInstruction, Status};
use crate::store::{ScannedStore, StoreItem};

pub const FAULTY_PATH_FILENAME: &str = ".faulty_paths";

pub const KNOWN_BAD_ITEM: &str = "known bad item";

type SkipPredicate = Box<dyn Fn(&StoreItem) -> bool + Send>;

/// Suppresses items that previously failed, durably across restarts.
pub struct FaultyPathTracker {
    faulty_file: PathBuf,
    faulty: FxHashSet<String>,
    last_read: Option<SystemTime>,
    skip: Option<SkipPredicate>,
}

impl FaultyPathTracker {
    /// Track faulty items of the store rooted at `store_dir`.
    pub fn new(store_dir: &Path) -> Self {
        Self {
            faulty_file: store_dir.join(FAULTY_PATH_FILENAME),
            faulty: FxHashSet::default(),
            last_read: None,
            skip: None,
        }
    }

    /// Items for which `skip` returns true are never recorded as faulty.
    pub fn with_skip_predicate(
        mut self,
        skip: impl Fn(&StoreItem) -> bool + Send + 'static,
    ) -> Self {
        self.skip = Some(Box::new(skip));
        self
    }

    pub fn faulty_file(&self) -> &Path {
        &self.faulty_file
    }

    /// Names of the currently suppressed items, sorted.
    pub fn faulty_paths(&self) -> Vec<String> {
        let mut names: Vec<_> = self.faulty.iter().cloned().collect();
        names.sort();
        names
    }

    fn reload(&mut self) {
        match read_faulty_file(&self.faulty_file) {
            Ok(Some((names, modified))) => {
                self.faulty = names;
                self.last_read = Some(modified);
            }
            Ok(None) => {
                if !self.faulty.is_empty() {
                    log::info!(
                        "{} was deleted, {} items will be processed again",
                        self.faulty_file.display(),
                        self.faulty.len()
                    );
                }
                self.faulty.clear();
                self.last_read = None;
            }
            Err(e) => log::error!("cannot read faulty paths: {e}"),
        }
    }

    fn persist(&mut self, store: &dyn ScannedStore) -> Result<(), DssError> {
        let mut lines: Vec<String> = self
            .faulty
            .iter()
            .map(|name| {
                store
                    .path(&StoreItem::new(name.as_str()))
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        lines.sort();
        let mut content = lines.join("\n");
        if !content.is_empty() {
            content.push('\n');
        }
        fs::write(&self.faulty_file, content)
            .io_context(|| format!("write {}", self.faulty_file.display()))?;
        self.last_read = fs::metadata(&self.faulty_file)
            .and_then(|m| m.modified())
            .ok();
        Ok(())
    }
}

/// Read the faulty-paths file. `Ok(None)` if it does not exist.
///
/// Lines may be absolute paths or bare item names; only the final path
/// component identifies the item.
pub fn read_faulty_file(
    file: &Path,
) -> Result<Option<(FxHashSet<String>, SystemTime)>, DssError> {
    let modified = match fs::metadata(file).and_then(|m| m.modified()) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(DssError::io(format!("stat {}", file.display()), e)),
    };
    let content = match fs::read_to_string(file) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(DssError::io(format!("read {}", file.display()), e)),
    };
    let names = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter_map(|l| Path::new(l).file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .collect();
    Ok(Some((names, modified)))
}

impl DirectoryScanningHandler for FaultyPathTracker {
    fn init(&mut self, store: &dyn ScannedStore) {
        self.reload();
        let before = self.faulty.len();
        self.faulty
            .retain(|name| store.exists(&StoreItem::new(name.as_str())));
        if self.faulty.len() != before {
            log::info!(
                "dropped {} faulty entries that no longer exist",
                before - self.faulty.len()
            );
            if let Err(e) = self.persist(store) {
                log::error!("{e}");
            }
        }
    }

    fn before_handle(&mut self, _store: &dyn ScannedStore) {
        let modified = fs::metadata(&self.faulty_file)
            .and_then(|m| m.modified())
            .ok();
        match modified {
            Some(m) if self.last_read != Some(m) => self.reload(),
            None if self.last_read.is_some() || !self.faulty.is_empty() => self.reload(),
            _ => {}
        }
    }

    fn may_handle(&mut self, _store: &dyn ScannedStore, item: &StoreItem) -> HandleInstruction {
        if item.name() == FAULTY_PATH_FILENAME {
            HandleInstruction::Ignore
        } else if self.faulty.contains(item.name()) {
            HandleInstruction::Error(KNOWN_BAD_ITEM.to_string())
        } else {
            HandleInstruction::Process
        }
    }

    fn finish_item_handle(&mut self, store: &dyn ScannedStore, item: &StoreItem) -> Status {
        if self.skip.as_ref().is_some_and(|skip| skip(item)) {
            return Status::Ok;
        }
        if store.exists(item) {
            log::error!(
                "Processing of '{}' failed, adding it to {}",
                item,
                self.faulty_file.display()
            );
            self.faulty.insert(item.name().to_string());
            if let Err(e) = self.persist(store) {
                log::error!("{e}");
            }
        }
        Status::Ok
    }
}

/// Lets failed items be processed again on every pass.
///
/// Failures are only remembered in memory, to log each one once, and are
/// forgotten after three check intervals.
pub struct ReprocessingHandler {
    seen: FxHashMap<String, Instant>,
    expiry: Duration,
}

impl ReprocessingHandler {
    pub fn new(check_interval: Duration) -> Self {
        Self {
            seen: FxHashMap::default(),
            expiry: check_interval * 3,
        }
    }

    pub fn remembered(&self) -> usize {
        self.seen.len()
    }

    fn expire(&mut self) {
        let expiry = self.expiry;
        self.seen.retain(|_, at| at.elapsed() < expiry);
    }
}

impl DirectoryScanningHandler for ReprocessingHandler {
    fn init(&mut self, _store: &dyn ScannedStore) {
        self.expire();
    }

    fn before_handle(&mut self, _store: &dyn ScannedStore) {
        self.expire();
    }

    fn may_handle(&mut self, _store: &dyn ScannedStore, _item: &StoreItem) -> HandleInstruction {
        HandleInstruction::Process
    }

    fn finish_item_handle(&mut self, store: &dyn ScannedStore, item: &StoreItem) -> Status {
        if store.exists(item) {
            if !self.seen.contains_key(item.name()) {
                log::warn!("Processing of '{item}' failed, it will be processed again");
            }
            self.seen.insert(item.name().to_string(), Instant::now());
        }
        Status::Ok
    }
}
