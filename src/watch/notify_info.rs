use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// One kernel-level change primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawAction {
    Added,
    Removed,
    Modified,
    RenameOld,
    RenameNew,
}

/// Immutable descriptor of one raw edit: the path it touched, the
/// primitive kind, and the monotonic instant it was captured. Everything
/// after construction is a pure accessor.
#[derive(Debug, Clone)]
pub struct NotifyInfo {
    path: PathBuf,
    action: RawAction,
    directory: bool,
    created_at: Instant,
}

impl PartialEq for NotifyInfo {
    fn eq(&self, other: &Self) -> bool {
        self.action == other.action && self.path == other.path
    }
}
impl Eq for NotifyInfo {}

impl NotifyInfo {
    /// Capture a raw edit now. The directory flag is stat-ed best-effort;
    /// an entity that is already gone reads as a file.
    pub fn new(path: PathBuf, action: RawAction) -> Self {
        let directory = path.is_dir();
        Self::with_directory(path, action, directory)
    }

    /// Capture a raw edit whose directory-ness the caller already knows
    /// (the driver learns it from the notification kind).
    pub fn with_directory(path: PathBuf, action: RawAction, directory: bool) -> Self {
        Self {
            path,
            action,
            directory,
            created_at: Instant::now(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn into_path(self) -> PathBuf {
        self.path
    }

    pub fn action(&self) -> RawAction {
        self.action
    }

    pub fn file_name(&self) -> Option<&OsStr> {
        self.path.file_name()
    }

    pub fn parent_path(&self) -> Option<&Path> {
        self.path.parent()
    }

    pub fn is_directory(&self) -> bool {
        self.directory
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Age of this record on the process-wide monotonic clock.
    pub fn alive(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn is_valid(&self) -> bool {
        !self.path.as_os_str().is_empty()
    }

    /// Same base name as `other`, different parent directory. The shape of
    /// a move candidate.
    pub fn is_relocation_of(&self, other: &NotifyInfo) -> bool {
        self.file_name().is_some()
            && self.file_name() == other.file_name()
            && self.parent_path() != other.parent_path()
    }
}
