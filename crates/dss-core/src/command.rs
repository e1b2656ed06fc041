//! Reversible filesystem commands recorded on a rollback stack

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DssError, IoContext};

/// A filesystem mutation that knows how to undo itself.
///
/// Rolling back a command whose effect is already gone is not an error, so
/// a log replayed twice (crash during rollback) converges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransactionalCommand {
    /// Create a single directory whose parent exists.
    Mkdirs { path: PathBuf },
    /// Rename `src_dir/src_name` to `dst_dir/dst_name`.
    MoveFile {
        src_dir: PathBuf,
        src_name: String,
        dst_dir: PathBuf,
        dst_name: String,
    },
    /// Create an empty file that must not exist yet.
    NewFile { path: PathBuf },
    /// Create a symbolic link at `path` pointing to `target`.
    NewLink { path: PathBuf, target: PathBuf },
    /// Records a step that has no filesystem effect of its own.
    Marker { label: String },
}

impl TransactionalCommand {
    pub fn mkdirs(path: impl Into<PathBuf>) -> Self {
        Self::Mkdirs { path: path.into() }
    }

    /// Move `src` to `dst`. Both must have a file name.
    pub fn move_file(src: &Path, dst: &Path) -> Result<Self, DssError> {
        let (src_dir, src_name) = split(src)?;
        let (dst_dir, dst_name) = split(dst)?;
        Ok(Self::MoveFile {
            src_dir,
            src_name,
            dst_dir,
            dst_name,
        })
    }

    pub fn new_file(path: impl Into<PathBuf>) -> Self {
        Self::NewFile { path: path.into() }
    }

    pub fn new_link(path: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self::NewLink {
            path: path.into(),
            target: target.into(),
        }
    }

    pub fn marker(label: impl Into<String>) -> Self {
        Self::Marker {
            label: label.into(),
        }
    }

    pub fn execute(&self) -> Result<(), DssError> {
        match self {
            Self::Mkdirs { path } => {
                fs::create_dir(path).io_context(|| format!("mkdir {}", path.display()))
            }
            Self::MoveFile {
                src_dir,
                src_name,
                dst_dir,
                dst_name,
            } => {
                let src = src_dir.join(src_name);
                let dst = dst_dir.join(dst_name);
                if exists_no_follow(&dst) {
                    return Err(DssError::io(
                        format!("move {} -> {}", src.display(), dst.display()),
                        io::Error::new(io::ErrorKind::AlreadyExists, "destination exists"),
                    ));
                }
                fs::rename(&src, &dst)
                    .io_context(|| format!("move {} -> {}", src.display(), dst.display()))
            }
            Self::NewFile { path } => fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
                .map(drop)
                .io_context(|| format!("create file {}", path.display())),
            Self::NewLink { path, target } => symlink(target, path)
                .io_context(|| format!("link {} -> {}", path.display(), target.display())),
            Self::Marker { .. } => Ok(()),
        }
    }

    pub fn rollback(&self) -> Result<(), DssError> {
        match self {
            Self::Mkdirs { path } => match fs::remove_dir(path) {
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                other => other.io_context(|| format!("remove dir {}", path.display())),
            },
            Self::MoveFile {
                src_dir,
                src_name,
                dst_dir,
                dst_name,
            } => {
                let src = src_dir.join(src_name);
                let dst = dst_dir.join(dst_name);
                if !exists_no_follow(&dst) {
                    if !exists_no_follow(&src) {
                        log::warn!(
                            "cannot move back {}: it no longer exists",
                            dst.display()
                        );
                    }
                    return Ok(());
                }
                fs::rename(&dst, &src)
                    .io_context(|| format!("move back {} -> {}", dst.display(), src.display()))
            }
            Self::NewFile { path } | Self::NewLink { path, .. } => match fs::remove_file(path) {
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                other => other.io_context(|| format!("remove {}", path.display())),
            },
            Self::Marker { .. } => Ok(()),
        }
    }
}

impl std::fmt::Display for TransactionalCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mkdirs { path } => write!(f, "mkdir {}", path.display()),
            Self::MoveFile {
                src_dir,
                src_name,
                dst_dir,
                dst_name,
            } => write!(
                f,
                "move {} -> {}",
                src_dir.join(src_name).display(),
                dst_dir.join(dst_name).display()
            ),
            Self::NewFile { path } => write!(f, "new file {}", path.display()),
            Self::NewLink { path, target } => {
                write!(f, "link {} -> {}", path.display(), target.display())
            }
            Self::Marker { label } => write!(f, "marker {label}"),
        }
    }
}

fn split(path: &Path) -> Result<(PathBuf, String), DssError> {
    let name = path
        .file_name()
        .ok_or_else(|| DssError::Invalid(format!("path has no file name: {}", path.display())))?;
    let dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
    Ok((dir, name.to_string_lossy().into_owned()))
}

/// Existence check that sees dangling symlinks.
pub fn exists_no_follow(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    if target.is_dir() {
        std::os::windows::fs::symlink_dir(target, link)
    } else {
        std::os::windows::fs::symlink_file(target, link)
    }
}
