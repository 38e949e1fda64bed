use crate::global_var::LOGGER;
use crate::watch::driver::{EditClass, RawEdit};
use crate::watch::file_model::FileModel;
use crate::watch::notify_info::{NotifyInfo, RawAction};
use crate::watch::rename_model::RenameModel;
use std::path::{Path, PathBuf};

/// The eight queues of one watched volume.
pub struct WatchingGroup {
    root: PathBuf,
    pub file_add: FileModel,
    pub file_remove: FileModel,
    pub file_modify: FileModel,
    pub rename: RenameModel,
    pub folder_add: FileModel,
    pub folder_remove: FileModel,
    pub attribute: FileModel,
    pub security: FileModel,
}

impl WatchingGroup {
    pub fn new(root: PathBuf, queue_capacity: usize) -> Self {
        Self {
            root,
            file_add: FileModel::new(queue_capacity),
            file_remove: FileModel::new(queue_capacity),
            file_modify: FileModel::new(queue_capacity),
            rename: RenameModel::new(queue_capacity),
            folder_add: FileModel::new(queue_capacity),
            folder_remove: FileModel::new(queue_capacity),
            attribute: FileModel::new(queue_capacity),
            security: FileModel::new(queue_capacity),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Queue one translated edit. Exactly one queue receives it; edits a
    /// queue has no use for (folder modifications, folder renames) are
    /// dropped here.
    pub fn route(&self, edit: RawEdit) {
        let RawEdit { path, action, class } = edit;
        let folder = class == EditClass::FolderName;
        let info = NotifyInfo::with_directory(path, action, folder);
        if !info.is_valid() {
            return;
        }

        match class {
            EditClass::FileName => match action {
                RawAction::Added => self.file_add.push(info),
                RawAction::Removed => self.file_remove.push(info),
                RawAction::Modified => self.file_modify.push(info),
                RawAction::RenameOld | RawAction::RenameNew => self.rename.push(info),
            },
            EditClass::FolderName => match action {
                RawAction::Added => self.folder_add.push(info),
                RawAction::Removed => self.folder_remove.push(info),
                _ => {
                    LOGGER.trace(format!(
                        "ignore folder edit {:?} on {}",
                        action,
                        info.path().display()
                    ));
                }
            },
            EditClass::Attribute => {
                if action == RawAction::Modified {
                    self.attribute.push(info);
                }
            }
            EditClass::Security => {
                if action == RawAction::Modified {
                    self.security.push(info);
                }
            }
        }
    }

    /// Remove every trace of `path` from the file-level queues. The
    /// classifier that commits an event calls this for the emitted path
    /// and every companion temporary.
    pub fn erase_file_traces(&self, path: &Path) {
        self.file_add.erase(path);
        self.file_remove.erase(path);
        self.file_modify.erase(path);
        self.attribute.erase(path);
        self.security.erase(path);
    }

    /// Folder counterpart of [`Self::erase_file_traces`].
    pub fn erase_folder_traces(&self, path: &Path) {
        self.folder_add.erase(path);
        self.folder_remove.erase(path);
        self.attribute.erase(path);
        self.security.erase(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group() -> WatchingGroup {
        WatchingGroup::new(PathBuf::from("/"), 8)
    }

    fn edit(path: &str, action: RawAction, class: EditClass) -> RawEdit {
        RawEdit::new(path, action, class)
    }

    #[test]
    fn file_edits_land_in_their_queue() {
        let g = group();
        g.route(edit("/t/a.txt", RawAction::Added, EditClass::FileName));
        g.route(edit("/t/b.txt", RawAction::Removed, EditClass::FileName));
        g.route(edit("/t/c.txt", RawAction::Modified, EditClass::FileName));
        assert!(g.file_add.contains(Path::new("/t/a.txt")));
        assert!(g.file_remove.contains(Path::new("/t/b.txt")));
        assert!(g.file_modify.contains(Path::new("/t/c.txt")));
    }

    #[test]
    fn rename_phases_assemble_inside_the_group() {
        let g = group();
        g.route(edit("/t/a.txt", RawAction::RenameOld, EditClass::FileName));
        g.route(edit("/t/b.txt", RawAction::RenameNew, EditClass::FileName));
        assert!(g.rename.find(Path::new("/t/b.txt")).is_some());
    }

    #[test]
    fn folder_edits_use_folder_queues_and_directory_flag() {
        let g = group();
        g.route(edit("/t/dir", RawAction::Added, EditClass::FolderName));
        g.route(edit("/t/old", RawAction::Removed, EditClass::FolderName));
        let added = g.folder_add.find(Path::new("/t/dir")).expect("queued");
        assert!(added.is_directory());
        assert!(g.folder_remove.contains(Path::new("/t/old")));
        // Folder modifications have no queue.
        g.route(edit("/t/dir", RawAction::Modified, EditClass::FolderName));
        assert!(!g.file_modify.contains(Path::new("/t/dir")));
    }

    #[test]
    fn attribute_and_security_queues_accept_only_modifications() {
        let g = group();
        g.route(edit("/t/a.txt", RawAction::Modified, EditClass::Attribute));
        g.route(edit("/t/a.txt", RawAction::Modified, EditClass::Security));
        g.route(edit("/t/b.txt", RawAction::Added, EditClass::Attribute));
        assert!(g.attribute.contains(Path::new("/t/a.txt")));
        assert!(g.security.contains(Path::new("/t/a.txt")));
        assert!(!g.attribute.contains(Path::new("/t/b.txt")));
    }

    #[test]
    fn erase_file_traces_clears_every_file_queue() {
        let g = group();
        let p = "/t/a.txt";
        g.route(edit(p, RawAction::Added, EditClass::FileName));
        g.route(edit(p, RawAction::Modified, EditClass::FileName));
        g.route(edit(p, RawAction::Removed, EditClass::FileName));
        g.route(edit(p, RawAction::Modified, EditClass::Attribute));
        g.route(edit(p, RawAction::Modified, EditClass::Security));

        g.erase_file_traces(Path::new(p));

        assert!(!g.file_add.contains(Path::new(p)));
        assert!(!g.file_remove.contains(Path::new(p)));
        assert!(!g.file_modify.contains(Path::new(p)));
        assert!(!g.attribute.contains(Path::new(p)));
        assert!(!g.security.contains(Path::new(p)));
    }
}
