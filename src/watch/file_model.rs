use crate::watch::circle_map::CircleMap;
use crate::watch::notify_info::NotifyInfo;
use std::path::{Path, PathBuf};

/// Path-keyed queue of raw edits: the specialisation behind the add,
/// remove, modify, folder, attribute, and security queues of one volume.
pub struct FileModel {
    data: CircleMap<PathBuf, NotifyInfo>,
}

impl FileModel {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: CircleMap::new(capacity),
        }
    }

    pub fn push(&self, info: NotifyInfo) {
        if !info.is_valid() {
            return;
        }
        let key = info.path().to_path_buf();
        self.data.insert(key, info);
    }

    pub fn front(&self) -> Option<NotifyInfo> {
        self.data.front()
    }

    pub fn find(&self, path: &Path) -> Option<NotifyInfo> {
        self.data.find(&path.to_path_buf())
    }

    pub fn find_if<P>(&self, pred: P) -> Option<NotifyInfo>
    where
        P: FnMut(&NotifyInfo) -> bool,
    {
        self.data.find_if(pred)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.find(path).is_some()
    }

    pub fn erase(&self, path: &Path) {
        self.data.erase(&path.to_path_buf());
    }

    /// Advance the drain cursor; see [`CircleMap::next_available_item`].
    pub fn advance(&self) -> usize {
        self.data.next_available_item()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.data.len()
    }
}
