//! Persisted stack of reversible filesystem commands
//!
//! The log is a JSON-lines file named
//! `<yyyyMMddHHmmssSSS>-<counter>-rollBackQueue`. A sidecar `<log>.lock`
//! file exists while a mutation is in flight; finding one at startup means
//! a process died mid-mutation or is still working on the stack.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::command::TransactionalCommand;
use crate::error::{DssError, IoContext};

/// File name suffix identifying persisted rollback logs.
pub const ROLLBACK_QUEUE_SUFFIX: &str = "rollBackQueue";

const LOCK_SUFFIX: &str = ".lock";

static STACK_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Unique log file name: timestamp plus a process-wide counter.
pub fn next_stack_name() -> String {
    let stamp = chrono::Local::now().format("%Y%m%d%H%M%S%3f");
    let counter = STACK_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{stamp}-{counter}-{ROLLBACK_QUEUE_SUFFIX}")
}

/// Consulted before each reversal step of [`RollbackStack::rollback_all`].
///
/// Returning an error aborts the rollback; blocking inside the call stalls
/// it (e.g. while a mount is unreachable).
pub trait RollbackStackDelegate {
    fn will_continue_rollback_all(&mut self, stack: &RollbackStack) -> Result<(), DssError>;
}

/// Delegate that never interferes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDelegate;

impl RollbackStackDelegate for NoopDelegate {
    fn will_continue_rollback_all(&mut self, _stack: &RollbackStack) -> Result<(), DssError> {
        Ok(())
    }
}

/// Counts from one [`RollbackStack::rollback_all`] call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RollbackSummary {
    pub reversed: usize,
    pub failed: usize,
}

#[derive(Debug)]
pub struct RollbackStack {
    path: PathBuf,
    lock_path: PathBuf,
    commands: Vec<TransactionalCommand>,
}

impl RollbackStack {
    /// Create a fresh, empty stack with a unique name inside `dir`.
    pub fn create_in(dir: &Path) -> Result<Self, DssError> {
        fs::create_dir_all(dir).io_context(|| format!("create {}", dir.display()))?;
        let path = dir.join(next_stack_name());
        fs::File::create(&path).io_context(|| format!("create {}", path.display()))?;
        Ok(Self::with_commands(path, Vec::new()))
    }

    /// Open an existing log, e.g. one left behind by a dead process.
    pub fn open(path: &Path) -> Result<Self, DssError> {
        let file = fs::File::open(path).io_context(|| format!("open {}", path.display()))?;
        let mut commands = Vec::new();
        for (lineno, line) in io::BufReader::new(file).lines().enumerate() {
            let line = line.io_context(|| format!("read {}", path.display()))?;
            if line.trim().is_empty() {
                continue;
            }
            let cmd = serde_json::from_str(&line).map_err(|e| DssError::Corrupt {
                path: path.to_path_buf(),
                message: format!("line {}: {e}", lineno + 1),
            })?;
            commands.push(cmd);
        }
        Ok(Self::with_commands(path.to_path_buf(), commands))
    }

    fn with_commands(path: PathBuf, commands: Vec<TransactionalCommand>) -> Self {
        let mut lock = path.clone().into_os_string();
        lock.push(LOCK_SUFFIX);
        Self {
            path,
            lock_path: PathBuf::from(lock),
            commands,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Commands in execution order.
    pub fn commands(&self) -> &[TransactionalCommand] {
        &self.commands
    }

    /// True while a mutation is in flight, or if one never finished.
    pub fn is_locked_state(&self) -> bool {
        self.lock_path.exists()
    }

    /// Execute `cmd`; record it only if it succeeded.
    pub fn push_and_execute(&mut self, cmd: TransactionalCommand) -> Result<(), DssError> {
        self.lock()?;
        let result = cmd.execute().and_then(|()| {
            self.append(&cmd).inspect_err(|_| {
                // unrecorded effects would survive a rollback
                if let Err(e) = cmd.rollback() {
                    log::error!("failed to undo unrecorded {cmd}: {e}");
                }
            })
        });
        self.unlock();
        match result {
            Ok(()) => {
                log::debug!("executed {cmd}");
                self.commands.push(cmd);
                Ok(())
            }
            Err(e) => {
                log::debug!("failed to execute {cmd}: {e}");
                Err(e)
            }
        }
    }

    /// Create `dir` and any missing ancestors, one command per directory,
    /// outermost first.
    ///
    /// Returns the number of directories created.
    pub fn mkdirs(&mut self, dir: &Path) -> Result<usize, DssError> {
        let missing: Vec<&Path> = dir
            .ancestors()
            .take_while(|p| !p.as_os_str().is_empty() && !p.exists())
            .collect();
        for path in missing.iter().rev() {
            self.push_and_execute(TransactionalCommand::mkdirs(*path))?;
        }
        Ok(missing.len())
    }

    /// Undo every command in reverse order.
    ///
    /// A command whose reversal fails is logged and dropped; the remaining
    /// ones are still reversed. An error from `delegate` stops the rollback
    /// and leaves the unreversed commands in the log.
    pub fn rollback_all(
        &mut self,
        delegate: &mut dyn RollbackStackDelegate,
    ) -> Result<RollbackSummary, DssError> {
        let mut summary = RollbackSummary::default();
        self.lock()?;
        let result = loop {
            let Some(cmd) = self.commands.last().cloned() else {
                break Ok(summary);
            };
            if let Err(e) = delegate.will_continue_rollback_all(self) {
                log::warn!(
                    "rollback of {} stopped with {} commands left: {e}",
                    self.path.display(),
                    self.commands.len()
                );
                break Err(e);
            }
            match cmd.rollback() {
                Ok(()) => {
                    log::debug!("reversed {cmd}");
                    summary.reversed += 1;
                }
                Err(e) => {
                    log::error!("failed to reverse {cmd}: {e}");
                    summary.failed += 1;
                }
            }
            self.commands.pop();
            if let Err(e) = self.rewrite() {
                break Err(e);
            }
        };
        self.unlock();
        result
    }

    /// Remove the persisted log entirely.
    pub fn discard(&mut self) -> Result<(), DssError> {
        self.commands.clear();
        for path in [&self.path, &self.lock_path] {
            match fs::remove_file(path) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => {
                    return Err(DssError::io(format!("remove {}", path.display()), e));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn lock(&self) -> Result<(), DssError> {
        fs::write(&self.lock_path, b"").io_context(|| format!("lock {}", self.path.display()))
    }

    fn unlock(&self) {
        if let Err(e) = fs::remove_file(&self.lock_path) {
            log::warn!("failed to remove lock {}: {e}", self.lock_path.display());
        }
    }

    fn append(&self, cmd: &TransactionalCommand) -> Result<(), DssError> {
        let line = serde_json::to_string(cmd)
            .map_err(|e| DssError::Invalid(format!("cannot serialize {cmd}: {e}")))?;
        let mut file = fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .io_context(|| format!("open {}", self.path.display()))?;
        writeln!(file, "{line}")
            .and_then(|()| file.sync_data())
            .io_context(|| format!("append to {}", self.path.display()))
    }

    /// Rewrite the whole log through a temp file and rename.
    fn rewrite(&self) -> Result<(), DssError> {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        let mut buf = String::new();
        for cmd in &self.commands {
            let line = serde_json::to_string(cmd)
                .map_err(|e| DssError::Invalid(format!("cannot serialize {cmd}: {e}")))?;
            buf.push_str(&line);
            buf.push('\n');
        }
        fs::write(&tmp, buf).io_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path).io_context(|| format!("replace {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingDelegate {
        calls: usize,
        abort_after: Option<usize>,
    }

    impl RollbackStackDelegate for CountingDelegate {
        fn will_continue_rollback_all(&mut self, _stack: &RollbackStack) -> Result<(), DssError> {
            if self.abort_after == Some(self.calls) {
                return Err(DssError::Cancelled("test".into()));
            }
            self.calls += 1;
            Ok(())
        }
    }

    #[test]
    fn stack_name_pattern() {
        let name = next_stack_name();
        let parts: Vec<_> = name.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 17);
        assert!(parts[0].chars().all(|c| c.is_ascii_digit()));
        assert!(parts[1].parse::<usize>().is_ok());
        assert_eq!(parts[2], ROLLBACK_QUEUE_SUFFIX);
    }

    #[test]
    fn stack_names_unique() {
        assert_ne!(next_stack_name(), next_stack_name());
    }

    #[test]
    fn push_and_rollback_in_reverse_order() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");
        let mut stack = RollbackStack::create_in(&dir.path().join("logs")).unwrap();

        stack.push_and_execute(TransactionalCommand::mkdirs(&work)).unwrap();
        stack
            .push_and_execute(TransactionalCommand::mkdirs(work.join("inner")))
            .unwrap();
        stack
            .push_and_execute(TransactionalCommand::new_file(work.join("inner/f")))
            .unwrap();
        assert_eq!(stack.len(), 3);
        assert!(!stack.is_locked_state());

        let mut delegate = CountingDelegate {
            calls: 0,
            abort_after: None,
        };
        let summary = stack.rollback_all(&mut delegate).unwrap();
        assert_eq!(summary.reversed, 3);
        assert_eq!(summary.failed, 0);
        assert_eq!(delegate.calls, 3);
        assert!(!work.exists());
        assert!(stack.is_empty());
        assert!(!stack.is_locked_state());
    }

    #[test]
    fn failed_push_not_logged() {
        let dir = tempfile::tempdir().unwrap();
        let mut stack = RollbackStack::create_in(dir.path()).unwrap();
        let a = dir.path().join("a");
        stack.push_and_execute(TransactionalCommand::mkdirs(&a)).unwrap();
        assert!(
            stack
                .push_and_execute(TransactionalCommand::mkdirs(&a))
                .is_err()
        );
        assert_eq!(stack.len(), 1);
        assert!(!stack.is_locked_state());

        let reopened = RollbackStack::open(stack.path()).unwrap();
        assert_eq!(reopened.commands(), stack.commands());
    }

    #[test]
    fn rollback_continues_after_failed_reversal() {
        let dir = tempfile::tempdir().unwrap();
        let mut stack = RollbackStack::create_in(&dir.path().join("logs")).unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        stack.push_and_execute(TransactionalCommand::mkdirs(&a)).unwrap();
        stack.push_and_execute(TransactionalCommand::mkdirs(&b)).unwrap();
        // makes reversal of `a` fail
        fs::write(a.join("foreign"), b"x").unwrap();

        let summary = stack.rollback_all(&mut NoopDelegate).unwrap();
        assert_eq!(summary.reversed, 1);
        assert_eq!(summary.failed, 1);
        assert!(!b.exists());
        assert!(a.exists());
        assert!(stack.is_empty());
    }

    #[test]
    fn delegate_abort_keeps_remaining_commands() {
        let dir = tempfile::tempdir().unwrap();
        let mut stack = RollbackStack::create_in(&dir.path().join("logs")).unwrap();
        for name in ["a", "b", "c"] {
            stack
                .push_and_execute(TransactionalCommand::mkdirs(dir.path().join(name)))
                .unwrap();
        }
        let mut delegate = CountingDelegate {
            calls: 0,
            abort_after: Some(1),
        };
        let err = stack.rollback_all(&mut delegate).unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(stack.len(), 2);
        assert!(!dir.path().join("c").exists());
        assert!(dir.path().join("b").exists());

        // remaining commands survive a restart
        let mut reopened = RollbackStack::open(stack.path()).unwrap();
        assert_eq!(reopened.len(), 2);
        reopened.rollback_all(&mut NoopDelegate).unwrap();
        assert!(!dir.path().join("a").exists());
    }

    #[test]
    fn discard_removes_log() {
        let dir = tempfile::tempdir().unwrap();
        let mut stack = RollbackStack::create_in(dir.path()).unwrap();
        stack
            .push_and_execute(TransactionalCommand::marker("storage"))
            .unwrap();
        let path = stack.path().to_path_buf();
        assert!(path.exists());
        stack.discard().unwrap();
        assert!(!path.exists());
        assert!(stack.is_empty());
        // second discard is fine
        stack.discard().unwrap();
    }

    #[test]
    fn mkdirs_pushes_outermost_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut stack = RollbackStack::create_in(&dir.path().join("logs")).unwrap();
        let deep = dir.path().join("x/y/z");
        assert_eq!(stack.mkdirs(&deep).unwrap(), 3);
        assert_eq!(
            stack.commands(),
            &[
                TransactionalCommand::mkdirs(dir.path().join("x")),
                TransactionalCommand::mkdirs(dir.path().join("x/y")),
                TransactionalCommand::mkdirs(dir.path().join("x/y/z")),
            ]
        );
        assert_eq!(stack.mkdirs(&deep).unwrap(), 0);

        stack.rollback_all(&mut NoopDelegate).unwrap();
        assert!(!dir.path().join("x").exists());
    }

    #[test]
    fn locked_state_detected() {
        let dir = tempfile::tempdir().unwrap();
        let stack = RollbackStack::create_in(dir.path()).unwrap();
        stack.lock().unwrap();
        let reopened = RollbackStack::open(stack.path()).unwrap();
        assert!(reopened.is_locked_state());
    }

    #[test]
    fn open_rejects_corrupt_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(next_stack_name());
        fs::write(&path, "not json\n").unwrap();
        let err = RollbackStack::open(&path).unwrap_err();
        assert!(matches!(err, DssError::Corrupt { .. }));
    }

    #[test]
    fn double_rollback_from_duplicated_log() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in");
        let dst = dir.path().join("out");
        fs::write(&src, b"data").unwrap();
        let mut stack = RollbackStack::create_in(&dir.path().join("logs")).unwrap();
        stack
            .push_and_execute(TransactionalCommand::move_file(&src, &dst).unwrap())
            .unwrap();
        let copy = dir.path().join("logs").join(next_stack_name());
        fs::copy(stack.path(), &copy).unwrap();

        stack.rollback_all(&mut NoopDelegate).unwrap();
        let mut duplicate = RollbackStack::open(&copy).unwrap();
        let summary = duplicate.rollback_all(&mut NoopDelegate).unwrap();
        assert_eq!(summary.failed, 0);
        assert_eq!(fs::read(&src).unwrap(), b"data");
    }
}
