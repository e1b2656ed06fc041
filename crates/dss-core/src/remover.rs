//! Recursive deletion, optionally deferred to a background worker
//!
//! [`QueueingPathRemover`] deletes in two phases: the path is first renamed
//! into a shredder directory (cheap, atomic, frees the name immediately),
//! then a worker thread deletes it. Pending deletions are recorded in a
//! queue file so they survive a restart.

use std::fs;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::command::exists_no_follow;
use crate::error::{DssError, IoContext};
use crate::retry::retry_transient;

const QUEUE_CAPACITY: usize = 1024;
const DELETE_RETRIES: u32 = 3;
const DELETE_RETRY_PAUSE: Duration = Duration::from_millis(500);

static SHRED_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Something that can delete a file or directory tree.
pub trait PathRemover: Send + Sync {
    fn remove_recursively(&self, path: &Path) -> Result<(), DssError>;
}

/// Deletes synchronously.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateRemover;

impl PathRemover for ImmediateRemover {
    fn remove_recursively(&self, path: &Path) -> Result<(), DssError> {
        delete_path(path)
    }
}

fn delete_path(path: &Path) -> Result<(), DssError> {
    let meta = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(DssError::io(format!("stat {}", path.display()), e)),
    };
    let result = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other.io_context(|| format!("delete {}", path.display())),
    }
}

/// Persisted list of paths waiting for deletion, one per line.
#[derive(Debug)]
struct ShredderQueue {
    file: PathBuf,
    entries: Vec<PathBuf>,
}

impl ShredderQueue {
    fn load(file: &Path) -> Result<Self, DssError> {
        Ok(Self {
            file: file.to_path_buf(),
            entries: list_shredder_items(file)?,
        })
    }

    fn add(&mut self, path: PathBuf) -> Result<(), DssError> {
        self.entries.push(path);
        self.save()
    }

    fn remove(&mut self, path: &Path) -> Result<(), DssError> {
        self.entries.retain(|p| p != path);
        self.save()
    }

    fn save(&self) -> Result<(), DssError> {
        let mut content = String::new();
        for p in &self.entries {
            content.push_str(&p.to_string_lossy());
            content.push('\n');
        }
        let mut tmp = self.file.clone().into_os_string();
        tmp.push(".tmp");
        fs::write(&tmp, content).io_context(|| format!("write {}", self.file.display()))?;
        fs::rename(&tmp, &self.file).io_context(|| format!("replace {}", self.file.display()))
    }
}

/// Paths recorded in a shredder queue file, oldest first.
///
/// A missing file means an empty queue.
pub fn list_shredder_items(queue_file: &Path) -> Result<Vec<PathBuf>, DssError> {
    let file = match fs::File::open(queue_file) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(DssError::io(format!("open {}", queue_file.display()), e)),
    };
    let mut items = Vec::new();
    for line in io::BufReader::new(file).lines() {
        let line = line.io_context(|| format!("read {}", queue_file.display()))?;
        let line = line.trim();
        if !line.is_empty() {
            items.push(PathBuf::from(line));
        }
    }
    Ok(items)
}

/// Background deleter with an explicit start/stop lifecycle.
pub struct QueueingPathRemover {
    shredder_dir: PathBuf,
    queue: Arc<Mutex<ShredderQueue>>,
    sender: Mutex<Option<SyncSender<PathBuf>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl QueueingPathRemover {
    /// Start the worker. Entries left over in `queue_file` are deleted first.
    pub fn start(shredder_dir: &Path, queue_file: &Path) -> Result<Self, DssError> {
        fs::create_dir_all(shredder_dir)
            .io_context(|| format!("create {}", shredder_dir.display()))?;
        let queue = Arc::new(Mutex::new(ShredderQueue::load(queue_file)?));
        let leftovers = lock(&queue).entries.clone();

        let (tx, rx) = mpsc::sync_channel::<PathBuf>(QUEUE_CAPACITY);
        let worker_queue = Arc::clone(&queue);
        let worker = std::thread::Builder::new()
            .name("path-remover".to_string())
            .spawn(move || {
                for path in rx {
                    let label = format!("delete {}", path.display());
                    match retry_transient(&label, DELETE_RETRIES, DELETE_RETRY_PAUSE, || {
                        delete_path(&path)
                    }) {
                        Ok(()) => {
                            if let Err(e) = lock(&worker_queue).remove(&path) {
                                log::warn!("failed to update shredder queue: {e}");
                            }
                        }
                        // stays in the queue file for the next start
                        Err(e) => log::error!("cannot delete {}: {e}", path.display()),
                    }
                }
                log::debug!("path remover stopped");
            })
            .io_context(|| "spawn path remover".to_string())?;

        if !leftovers.is_empty() {
            log::info!("re-queueing {} pending deletions", leftovers.len());
        }
        for path in leftovers {
            if tx.send(path).is_err() {
                break;
            }
        }

        Ok(Self {
            shredder_dir: shredder_dir.to_path_buf(),
            queue,
            sender: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn shredder_dir(&self) -> &Path {
        &self.shredder_dir
    }

    /// Paths currently waiting for deletion.
    pub fn pending(&self) -> Vec<PathBuf> {
        lock(&self.queue).entries.clone()
    }

    /// Stop accepting work and wait for queued deletions to finish.
    ///
    /// Returns `false` if the worker was still busy when `timeout` expired.
    pub fn stop_and_wait(&self, timeout: Duration) -> bool {
        drop(lock(&self.sender).take());
        let Some(handle) = lock(&self.worker).take() else {
            return true;
        };
        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                log::warn!("path remover still busy after {timeout:?}");
                return false;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        if handle.join().is_err() {
            log::error!("path remover panicked");
        }
        true
    }

    fn shred_name(path: &Path) -> String {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "root".to_string());
        let stamp = chrono::Local::now().format("%Y%m%d%H%M%S%3f");
        let counter = SHRED_COUNTER.fetch_add(1, Ordering::Relaxed);
        format!("{stamp}-{counter}-{name}")
    }
}

impl PathRemover for QueueingPathRemover {
    fn remove_recursively(&self, path: &Path) -> Result<(), DssError> {
        if !exists_no_follow(path) {
            return Ok(());
        }
        let Some(sender) = lock(&self.sender).clone() else {
            return delete_path(path);
        };
        let target = self.shredder_dir.join(Self::shred_name(path));
        if let Err(e) = fs::rename(path, &target) {
            // different filesystem, or the shredder is gone
            log::warn!(
                "cannot move {} to shredder ({e}), deleting in place",
                path.display()
            );
            return delete_path(path);
        }
        lock(&self.queue).add(target.clone())?;
        if let Err(mpsc::SendError(target)) = sender.send(target) {
            delete_path(&target)?;
            lock(&self.queue).remove(&target)?;
        }
        Ok(())
    }
}

impl Drop for QueueingPathRemover {
    fn drop(&mut self) {
        drop(lock(&self.sender).take());
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
