//! Polling ingestion loop over a scanned store

use std::time::Duration;

use dss_core::{DssError, StopSignal};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::handler::{DirectoryScanningHandler, HandleInstruction, ItemHandler, Status};
use crate::store::{ScannedStore, StoreItem};

/// Result of one [`DirectoryScanner::run`] invocation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    pub passes: usize,
    pub processed: usize,
    pub stopped: bool,
}

/// Dispatches ready items of a store to an item handler.
///
/// Not re-entrant: callers run one invocation at a time per store.
pub struct DirectoryScanner<S: ScannedStore> {
    store: S,
    item_handler: Box<dyn ItemHandler + Send>,
    scanning_handler: Box<dyn DirectoryScanningHandler + Send>,
    thread_name: String,
    error_log: FxHashMap<StoreItem, String>,
    performed_meaningful_work: bool,
    initialized: bool,
}

impl<S: ScannedStore> DirectoryScanner<S> {
    pub fn new(
        store: S,
        item_handler: impl ItemHandler + Send + 'static,
        scanning_handler: impl DirectoryScanningHandler + Send + 'static,
        thread_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            item_handler: Box::new(item_handler),
            scanning_handler: Box::new(scanning_handler),
            thread_name: thread_name.into(),
            error_log: FxHashMap::default(),
            performed_meaningful_work: false,
            initialized: false,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run the scanning handler's one-time initialization.
    pub fn init(&mut self) {
        if !self.initialized {
            self.scanning_handler.init(&self.store);
            self.initialized = true;
        }
    }

    /// Scan until a pass processes nothing new.
    ///
    /// An item is handled at most once per invocation; items that stay in
    /// the store wait for the next invocation.
    pub fn run(&mut self) -> ScanSummary {
        self.init();
        self.performed_meaningful_work = false;
        let mut summary = ScanSummary::default();
        let mut attempted = FxHashSet::default();
        loop {
            summary.passes += 1;
            let (processed, stopped) = self.scan_once(&mut attempted);
            summary.processed += processed;
            if processed > 0 {
                self.performed_meaningful_work = true;
            }
            if stopped {
                summary.stopped = true;
                break;
            }
            if processed == 0 {
                break;
            }
        }
        summary
    }

    /// One pass. Returns the number of handled items and whether a stop
    /// interrupted the pass.
    fn scan_once(&mut self, attempted: &mut FxHashSet<StoreItem>) -> (usize, bool) {
        let items = match self.store.list_sorted_by_modification() {
            Ok(items) => items,
            Err(e) => {
                log::error!(
                    "[{}] cannot list {}: {e}",
                    self.thread_name,
                    self.store.location().display()
                );
                return (0, false);
            }
        };
        self.cleanse_error_log(&items);

        let ready = match self.store.filter_ready(items) {
            Ok(ready) => ready,
            Err(e) => {
                log::error!("[{}] cannot filter items: {e}", self.thread_name);
                return (0, false);
            }
        };
        self.scanning_handler.before_handle(&self.store);

        let mut processed = 0;
        for item in ready {
            if self.item_handler.is_stop_requested() {
                log::info!("[{}] stop requested, leaving remaining items", self.thread_name);
                return (processed, true);
            }
            if attempted.contains(&item) {
                continue;
            }
            match self.scanning_handler.may_handle(&self.store, &item) {
                HandleInstruction::Process => {
                    attempted.insert(item.clone());
                    processed += 1;
                    if self.process_item(&item) {
                        return (processed, true);
                    }
                }
                HandleInstruction::Ignore => {}
                HandleInstruction::Error(msg) => {
                    self.error_log.insert(item, msg);
                }
            }
        }
        (processed, false)
    }

    /// Returns true if handling was cancelled.
    fn process_item(&mut self, item: &StoreItem) -> bool {
        log::debug!("[{}] processing {item}", self.thread_name);
        match self.item_handler.handle(&self.store, item) {
            Ok(()) => {
                self.error_log.remove(item);
            }
            Err(e) => {
                if e
                    .downcast_ref::<DssError>()
                    .is_some_and(DssError::is_cancelled)
                {
                    log::warn!("[{}] handling of {item} cancelled", self.thread_name);
                    return true;
                }
                log::error!("[{}] failed to handle {item}: {e:#}", self.thread_name);
                self.error_log.insert(item.clone(), format!("{e:#}"));
            }
        }
        if let Status::Error(msg) = self.scanning_handler.finish_item_handle(&self.store, item) {
            self.error_log.insert(item.clone(), msg);
        }
        false
    }

    fn cleanse_error_log(&mut self, present: &[StoreItem]) {
        if self.error_log.is_empty() {
            return;
        }
        let present: FxHashSet<&StoreItem> = present.iter().collect();
        self.error_log.retain(|item, _| present.contains(item));
    }

    /// Whether the last [`run`](Self::run) handled at least one item.
    pub fn has_performed_meaningful_work(&self) -> bool {
        self.performed_meaningful_work
    }

    pub fn error_log(&self) -> &FxHashMap<StoreItem, String> {
        &self.error_log
    }

    /// Thread name followed by one line per faulty item, or `None` when
    /// nothing is broken.
    pub fn error_log_dump(&self) -> Option<String> {
        if self.error_log.is_empty() {
            return None;
        }
        let mut entries: Vec<_> = self.error_log.iter().collect();
        entries.sort();
        let mut out = format!("{}:", self.thread_name);
        for (item, msg) in entries {
            out.push_str(&format!("\n  {item}: {msg}"));
        }
        Some(out)
    }

    /// Run every `interval` until `stop` is requested.
    pub fn run_periodically(&mut self, interval: Duration, stop: &StopSignal) {
        self.init();
        log::info!(
            "[{}] scanning {} every {interval:?}",
            self.thread_name,
            self.store.location().display()
        );
        loop {
            let summary = self.run();
            if summary.processed > 0 {
                log::info!(
                    "[{}] handled {} items in {} passes",
                    self.thread_name,
                    summary.processed,
                    summary.passes
                );
            }
            if let Some(dump) = self.error_log_dump() {
                log::debug!("{dump}");
            }
            if summary.stopped || !stop.sleep(interval) {
                break;
            }
        }
        log::info!("[{}] scanner stopped", self.thread_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use crate::faulty::{FaultyPathTracker, KNOWN_BAD_ITEM};
    use crate::handler::PassThroughHandler;
    use crate::store::DirectoryStore;

    /// Deletes items it handles, except those listed in `fail`.
    struct Deleting {
        fail: Vec<&'static str>,
        seen: Arc<Mutex<Vec<String>>>,
        stop: StopSignal,
        stop_after: Option<usize>,
    }

    impl Deleting {
        fn new(fail: Vec<&'static str>) -> (Self, Arc<Mutex<Vec<String>>>) {
            let seen = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    fail,
                    seen: Arc::clone(&seen),
                    stop: StopSignal::new(),
                    stop_after: None,
                },
                seen,
            )
        }
    }

    impl ItemHandler for Deleting {
        fn handle(&mut self, store: &dyn ScannedStore, item: &StoreItem) -> anyhow::Result<()> {
            let mut seen = self.seen.lock().unwrap();
            seen.push(item.name().to_string());
            if self.stop_after == Some(seen.len()) {
                self.stop.request_stop();
            }
            if self.fail.contains(&item.name()) {
                anyhow::bail!("cannot handle {item}");
            }
            fs::remove_file(store.path(item))?;
            Ok(())
        }

        fn is_stop_requested(&self) -> bool {
            self.stop.is_stop_requested()
        }
    }

    fn write_items(dir: &Path, names: &[&str]) {
        let now = std::time::SystemTime::now();
        for (i, name) in names.iter().enumerate() {
            let path = dir.join(name);
            fs::write(&path, b"x").unwrap();
            let f = fs::File::options().write(true).open(&path).unwrap();
            f.set_modified(now - Duration::from_secs(100 - i as u64))
                .unwrap();
        }
    }

    #[test]
    fn failing_item_does_not_block_others() {
        let dir = tempfile::tempdir().unwrap();
        write_items(dir.path(), &["A", "B", "C"]);
        let (handler, seen) = Deleting::new(vec!["B"]);
        let mut scanner = DirectoryScanner::new(
            DirectoryStore::new(dir.path()),
            handler,
            PassThroughHandler,
            "test-scanner",
        );

        let summary = scanner.run();
        assert_eq!(*seen.lock().unwrap(), ["A", "B", "C"]);
        assert!(scanner.has_performed_meaningful_work());
        assert_eq!(summary.processed, 3);
        assert_eq!(scanner.error_log().len(), 1);
        assert!(scanner.error_log()[&StoreItem::new("B")].contains("cannot handle B"));

        let dump = scanner.error_log_dump().unwrap();
        assert!(dump.starts_with("test-scanner:"));
        assert_eq!(dump.lines().count(), 2);
    }

    #[test]
    fn nothing_to_do_is_not_meaningful() {
        let dir = tempfile::tempdir().unwrap();
        let (handler, _) = Deleting::new(vec![]);
        let mut scanner = DirectoryScanner::new(
            DirectoryStore::new(dir.path()),
            handler,
            PassThroughHandler,
            "t",
        );
        let summary = scanner.run();
        assert!(!scanner.has_performed_meaningful_work());
        assert_eq!(summary.passes, 1);
        assert!(scanner.error_log_dump().is_none());
    }

    #[test]
    fn failed_item_retried_on_next_run_only() {
        let dir = tempfile::tempdir().unwrap();
        write_items(dir.path(), &["B"]);
        let (handler, seen) = Deleting::new(vec!["B"]);
        let mut scanner = DirectoryScanner::new(
            DirectoryStore::new(dir.path()),
            handler,
            PassThroughHandler,
            "t",
        );
        let summary = scanner.run();
        assert_eq!(summary.processed, 1);
        assert_eq!(seen.lock().unwrap().len(), 1);
        scanner.run();
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn stop_request_aborts_remaining_items() {
        let dir = tempfile::tempdir().unwrap();
        write_items(dir.path(), &["A", "B", "C"]);
        let (mut handler, seen) = Deleting::new(vec![]);
        handler.stop_after = Some(1);
        let mut scanner = DirectoryScanner::new(
            DirectoryStore::new(dir.path()),
            handler,
            PassThroughHandler,
            "t",
        );
        let summary = scanner.run();
        assert!(summary.stopped);
        assert_eq!(*seen.lock().unwrap(), ["A"]);
        assert!(dir.path().join("B").exists());
        assert!(dir.path().join("C").exists());
    }

    #[test]
    fn faulty_item_suppressed_until_file_cleared() {
        let dir = tempfile::tempdir().unwrap();
        write_items(dir.path(), &["X", "Y"]);
        let (handler, seen) = Deleting::new(vec!["X"]);
        let mut scanner = DirectoryScanner::new(
            DirectoryStore::new(dir.path()),
            handler,
            FaultyPathTracker::new(dir.path()),
            "t",
        );

        scanner.run();
        assert_eq!(*seen.lock().unwrap(), ["X", "Y"]);
        let faulty = fs::read_to_string(dir.path().join(".faulty_paths")).unwrap();
        assert!(faulty.contains("X"));

        // X is now suppressed without invoking the handler
        scanner.run();
        assert_eq!(seen.lock().unwrap().len(), 2);
        assert_eq!(scanner.error_log()[&StoreItem::new("X")], KNOWN_BAD_ITEM);

        // operator clears the file
        fs::remove_file(dir.path().join(".faulty_paths")).unwrap();
        scanner.run();
        assert_eq!(*seen.lock().unwrap(), ["X", "Y", "X"]);
    }

    #[test]
    fn error_log_cleansed_when_item_disappears() {
        let dir = tempfile::tempdir().unwrap();
        write_items(dir.path(), &["B"]);
        let (handler, _) = Deleting::new(vec!["B"]);
        let mut scanner = DirectoryScanner::new(
            DirectoryStore::new(dir.path()),
            handler,
            PassThroughHandler,
            "t",
        );
        scanner.run();
        assert_eq!(scanner.error_log().len(), 1);
        fs::remove_file(dir.path().join("B")).unwrap();
        scanner.run();
        assert!(scanner.error_log().is_empty());
    }

    #[test]
    fn newly_appearing_items_drained_in_same_run() {
        struct Spawning {
            dir: std::path::PathBuf,
            spawned: bool,
        }
        impl ItemHandler for Spawning {
            fn handle(&mut self, store: &dyn ScannedStore, item: &StoreItem) -> anyhow::Result<()> {
                fs::remove_file(store.path(item))?;
                if !self.spawned {
                    self.spawned = true;
                    fs::write(self.dir.join("late"), b"x")?;
                }
                Ok(())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        write_items(dir.path(), &["first"]);
        let mut scanner = DirectoryScanner::new(
            DirectoryStore::new(dir.path()),
            Spawning {
                dir: dir.path().to_path_buf(),
                spawned: false,
            },
            PassThroughHandler,
            "t",
        );
        let summary = scanner.run();
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.passes, 3);
        assert!(!dir.path().join("late").exists());
    }

    #[test]
    fn cancelled_handler_stops_pass() {
        struct Cancelling;
        impl ItemHandler for Cancelling {
            fn handle(&mut self, _: &dyn ScannedStore, _: &StoreItem) -> anyhow::Result<()> {
                Err(DssError::Cancelled("shutdown".into()).into())
            }
        }
        let dir = tempfile::tempdir().unwrap();
        write_items(dir.path(), &["A", "B"]);
        let mut scanner = DirectoryScanner::new(
            DirectoryStore::new(dir.path()),
            Cancelling,
            FaultyPathTracker::new(dir.path()),
            "t",
        );
        let summary = scanner.run();
        assert!(summary.stopped);
        assert_eq!(summary.processed, 1);
        assert!(scanner.error_log().is_empty());
        assert!(!dir.path().join(".faulty_paths").exists());
    }

    #[test]
    fn run_periodically_exits_on_stop() {
        let dir = tempfile::tempdir().unwrap();
        write_items(dir.path(), &["A"]);
        let (handler, seen) = Deleting::new(vec![]);
        let mut scanner = DirectoryScanner::new(
            DirectoryStore::new(dir.path()),
            handler,
            PassThroughHandler,
            "t",
        );
        let stop = StopSignal::new();
        stop.request_stop();
        scanner.run_periodically(Duration::from_secs(60), &stop);
        assert_eq!(*seen.lock().unwrap(), ["A"]);
    }
}
