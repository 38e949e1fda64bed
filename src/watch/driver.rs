use crate::err::Result;
use crate::global_var::LOGGER;
use crate::watch::notify_info::RawAction;
use crate::watch_error_with_source;
use notify::event::{CreateKind, EventKind, MetadataKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

bitflags::bitflags! {
    /// Raw-edit classes a subscription delivers.
    pub struct WatchFlags: u32 {
        const FILE_NAME   = 0b0001;
        const ATTRIBUTES  = 0b0010;
        const SECURITY    = 0b0100;
        const FOLDER_NAME = 0b1000;
    }
}

/// Which of the parallel kernel subscriptions an edit came through. The
/// ingestion task routes on this, so classification never re-derives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditClass {
    FileName,
    Attribute,
    Security,
    FolderName,
}

/// One translated kernel edit, ready for queueing.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEdit {
    pub path: PathBuf,
    pub action: RawAction,
    pub class: EditClass,
}

impl RawEdit {
    pub fn new(path: impl Into<PathBuf>, action: RawAction, class: EditClass) -> Self {
        Self {
            path: path.into(),
            action,
            class,
        }
    }
}

/// Translate one `notify` event into zero or more raw edits, honoring the
/// subscription flags. Pure; the live callback and the tests share it.
pub fn translate_event(event: &Event, flags: WatchFlags) -> Vec<RawEdit> {
    let mut edits = Vec::new();
    match &event.kind {
        EventKind::Create(kind) => {
            for path in &event.paths {
                let folder = matches!(kind, CreateKind::Folder)
                    || (matches!(kind, CreateKind::Any) && path.is_dir());
                push_name_edit(&mut edits, flags, path, RawAction::Added, folder);
            }
        }
        EventKind::Remove(kind) => {
            for path in &event.paths {
                // The entity is gone; only the notification kind can still
                // tell a folder from a file.
                let folder = matches!(kind, RemoveKind::Folder);
                push_name_edit(&mut edits, flags, path, RawAction::Removed, folder);
            }
        }
        EventKind::Modify(ModifyKind::Name(mode)) => {
            if !flags.contains(WatchFlags::FILE_NAME) {
                return edits;
            }
            match (mode, event.paths.as_slice()) {
                (RenameMode::From, [path]) => {
                    edits.push(RawEdit::new(path.clone(), RawAction::RenameOld, EditClass::FileName));
                }
                (RenameMode::To, [path]) => {
                    edits.push(RawEdit::new(path.clone(), RawAction::RenameNew, EditClass::FileName));
                }
                (_, [old, new]) => {
                    edits.push(RawEdit::new(old.clone(), RawAction::RenameOld, EditClass::FileName));
                    edits.push(RawEdit::new(new.clone(), RawAction::RenameNew, EditClass::FileName));
                }
                (_, [path]) => {
                    // Backend reported a name change without phases; all we
                    // know is that the entry changed.
                    edits.push(RawEdit::new(path.clone(), RawAction::Modified, EditClass::FileName));
                }
                _ => {}
            }
        }
        EventKind::Modify(ModifyKind::Metadata(kind)) => {
            let class = match kind {
                MetadataKind::Ownership | MetadataKind::Permissions => EditClass::Security,
                _ => EditClass::Attribute,
            };
            let wanted = match class {
                EditClass::Security => flags.contains(WatchFlags::SECURITY),
                _ => flags.contains(WatchFlags::ATTRIBUTES),
            };
            if wanted {
                for path in &event.paths {
                    edits.push(RawEdit::new(path.clone(), RawAction::Modified, class));
                }
            }
        }
        EventKind::Modify(_) => {
            if flags.contains(WatchFlags::FILE_NAME) {
                for path in &event.paths {
                    edits.push(RawEdit::new(path.clone(), RawAction::Modified, EditClass::FileName));
                }
            }
        }
        _ => {}
    }
    edits
}

fn push_name_edit(
    edits: &mut Vec<RawEdit>,
    flags: WatchFlags,
    path: &Path,
    action: RawAction,
    folder: bool,
) {
    if folder {
        if flags.contains(WatchFlags::FOLDER_NAME) {
            edits.push(RawEdit::new(path.to_path_buf(), action, EditClass::FolderName));
        }
    } else if flags.contains(WatchFlags::FILE_NAME) {
        edits.push(RawEdit::new(path.to_path_buf(), action, EditClass::FileName));
    }
}

/// Live kernel subscription on one volume root. Owns the OS watcher so
/// its callback stays armed; translated edits flow out through the
/// returned channel. Dropping the subscription cancels the outstanding
/// reads and closes the channel.
pub struct NotifySubscription {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl NotifySubscription {
    pub fn start(
        root: &Path,
        flags: WatchFlags,
        subtree: bool,
    ) -> Result<(Self, mpsc::Receiver<RawEdit>)> {
        let (tx, rx) = mpsc::channel::<RawEdit>(1024);

        let callback_flags = flags;
        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| match res {
                Ok(event) => {
                    for edit in translate_event(&event, callback_flags) {
                        // Best-effort hand-off; a closed receiver means the
                        // volume is shutting down.
                        let _ = tx.blocking_send(edit);
                    }
                }
                Err(e) => {
                    LOGGER.error(format!("change subscription error: {}", e));
                }
            },
            notify::Config::default()
                .with_poll_interval(Duration::from_secs(5))
                .with_follow_symlinks(false),
        )
        .map_err(|e| watch_error_with_source!(e, "cannot create change subscription").with_path(root))?;

        let mode = if subtree {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher
            .watch(root, mode)
            .map_err(|e| watch_error_with_source!(e, "cannot watch volume root").with_path(root))?;

        LOGGER.info(format!("subscribed to volume {}", root.display()));

        Ok((
            Self {
                _watcher: watcher,
                root: root.to_path_buf(),
            },
            rx,
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        let mut ev = Event::new(kind);
        for p in paths {
            ev = ev.add_path(PathBuf::from(p));
        }
        ev
    }

    #[test]
    fn create_file_becomes_added_file_edit() {
        let ev = event(EventKind::Create(CreateKind::File), &["/t/a.txt"]);
        let edits = translate_event(&ev, WatchFlags::all());
        assert_eq!(
            edits,
            vec![RawEdit::new("/t/a.txt", RawAction::Added, EditClass::FileName)]
        );
    }

    #[test]
    fn create_folder_routes_to_folder_class() {
        let ev = event(EventKind::Create(CreateKind::Folder), &["/t/dir"]);
        let edits = translate_event(&ev, WatchFlags::all());
        assert_eq!(
            edits,
            vec![RawEdit::new("/t/dir", RawAction::Added, EditClass::FolderName)]
        );
    }

    #[test]
    fn remove_kinds_split_file_and_folder() {
        let file = event(EventKind::Remove(RemoveKind::File), &["/t/a.txt"]);
        let folder = event(EventKind::Remove(RemoveKind::Folder), &["/t/dir"]);
        assert_eq!(
            translate_event(&file, WatchFlags::all())[0].class,
            EditClass::FileName
        );
        assert_eq!(
            translate_event(&folder, WatchFlags::all())[0].class,
            EditClass::FolderName
        );
    }

    #[test]
    fn rename_phases_translate_to_old_and_new() {
        let from = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            &["/t/a.txt"],
        );
        let to = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::To)),
            &["/t/b.txt"],
        );
        assert_eq!(
            translate_event(&from, WatchFlags::all())[0].action,
            RawAction::RenameOld
        );
        assert_eq!(
            translate_event(&to, WatchFlags::all())[0].action,
            RawAction::RenameNew
        );
    }

    #[test]
    fn two_path_rename_expands_to_both_phases() {
        let ev = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/t/a.txt", "/t/b.txt"],
        );
        let edits = translate_event(&ev, WatchFlags::all());
        assert_eq!(edits.len(), 2);
        assert_eq!(edits[0].action, RawAction::RenameOld);
        assert_eq!(edits[0].path, PathBuf::from("/t/a.txt"));
        assert_eq!(edits[1].action, RawAction::RenameNew);
        assert_eq!(edits[1].path, PathBuf::from("/t/b.txt"));
    }

    #[test]
    fn metadata_splits_security_from_attribute() {
        let perm = event(
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
            &["/t/a.txt"],
        );
        let time = event(
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime)),
            &["/t/a.txt"],
        );
        assert_eq!(
            translate_event(&perm, WatchFlags::all())[0].class,
            EditClass::Security
        );
        assert_eq!(
            translate_event(&time, WatchFlags::all())[0].class,
            EditClass::Attribute
        );
    }

    #[test]
    fn flags_gate_each_class() {
        let data = event(EventKind::Modify(ModifyKind::Data(notify::event::DataChange::Content)), &["/t/a.txt"]);
        assert!(translate_event(&data, WatchFlags::ATTRIBUTES).is_empty());
        assert_eq!(translate_event(&data, WatchFlags::FILE_NAME).len(), 1);

        let perm = event(
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
            &["/t/a.txt"],
        );
        assert!(translate_event(&perm, WatchFlags::FILE_NAME).is_empty());
        assert_eq!(translate_event(&perm, WatchFlags::SECURITY).len(), 1);

        let folder = event(EventKind::Create(CreateKind::Folder), &["/t/dir"]);
        assert!(translate_event(&folder, WatchFlags::FILE_NAME).is_empty());
    }

    #[test]
    fn access_events_are_ignored() {
        let ev = event(
            EventKind::Access(notify::event::AccessKind::Read),
            &["/t/a.txt"],
        );
        assert!(translate_event(&ev, WatchFlags::all()).is_empty());
    }
}
