use crate::global_var::LOGGER;
use std::fmt;
use std::path::PathBuf;

/// One user-meaningful file-activity event, the output of correlation.
#[derive(Debug, Clone, PartialEq)]
pub enum SemanticEvent {
    AttributeChange { path: PathBuf },
    SecurityChange { path: PathBuf },
    FolderRemove { path: PathBuf },
    FolderMove { source: PathBuf, dest: PathBuf },
    Rename { old: PathBuf, new: PathBuf },
    Create { path: PathBuf },
    CreateBySaveAs { path: PathBuf },
    CreateByRename { new: PathBuf, old: PathBuf },
    /// Browser download landing: temp file renamed to the in-progress
    /// name, then to the final name.
    CreateByDownload {
        path: PathBuf,
        middle_temp: PathBuf,
        initial_temp: PathBuf,
    },
    /// Office-style save-as: the document materialises through a pair of
    /// scratch files.
    CreateByWord {
        path: PathBuf,
        temp1: PathBuf,
        temp2: PathBuf,
    },
    ModifyByWord {
        path: PathBuf,
        temp1: PathBuf,
        temp2: PathBuf,
    },
    ModifyByRename { new: PathBuf, old: PathBuf },
    Remove { path: PathBuf },
    Modify { path: PathBuf },
    Copy { path: PathBuf },
    Move { source: PathBuf, dest: PathBuf },
}

impl SemanticEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SemanticEvent::AttributeChange { .. } => "attribute-change",
            SemanticEvent::SecurityChange { .. } => "security-change",
            SemanticEvent::FolderRemove { .. } => "folder-remove",
            SemanticEvent::FolderMove { .. } => "folder-move",
            SemanticEvent::Rename { .. } => "rename",
            SemanticEvent::Create { .. } => "create",
            SemanticEvent::CreateBySaveAs { .. } => "create-by-save-as",
            SemanticEvent::CreateByRename { .. } => "create-by-rename",
            SemanticEvent::CreateByDownload { .. } => "create-by-download",
            SemanticEvent::CreateByWord { .. } => "create-by-word",
            SemanticEvent::ModifyByWord { .. } => "modify-by-word",
            SemanticEvent::ModifyByRename { .. } => "modify-by-rename",
            SemanticEvent::Remove { .. } => "remove",
            SemanticEvent::Modify { .. } => "modify",
            SemanticEvent::Copy { .. } => "copy",
            SemanticEvent::Move { .. } => "move",
        }
    }

    /// The path a consumer would attribute the event to (the surviving /
    /// final name for multi-file patterns).
    pub fn subject(&self) -> &PathBuf {
        match self {
            SemanticEvent::AttributeChange { path }
            | SemanticEvent::SecurityChange { path }
            | SemanticEvent::FolderRemove { path }
            | SemanticEvent::Create { path }
            | SemanticEvent::CreateBySaveAs { path }
            | SemanticEvent::CreateByDownload { path, .. }
            | SemanticEvent::CreateByWord { path, .. }
            | SemanticEvent::ModifyByWord { path, .. }
            | SemanticEvent::Remove { path }
            | SemanticEvent::Modify { path }
            | SemanticEvent::Copy { path } => path,
            SemanticEvent::FolderMove { dest, .. } | SemanticEvent::Move { dest, .. } => dest,
            SemanticEvent::Rename { new, .. }
            | SemanticEvent::CreateByRename { new, .. }
            | SemanticEvent::ModifyByRename { new, .. } => new,
        }
    }
}

impl fmt::Display for SemanticEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SemanticEvent::FolderMove { source, dest } | SemanticEvent::Move { source, dest } => {
                write!(f, "{}: {} -> {}", self.kind(), source.display(), dest.display())
            }
            SemanticEvent::Rename { old, new }
            | SemanticEvent::CreateByRename { new, old }
            | SemanticEvent::ModifyByRename { new, old } => {
                write!(f, "{}: {} -> {}", self.kind(), old.display(), new.display())
            }
            SemanticEvent::CreateByDownload { path, middle_temp, initial_temp } => write!(
                f,
                "{}: {} (via {}, {})",
                self.kind(),
                path.display(),
                middle_temp.display(),
                initial_temp.display()
            ),
            SemanticEvent::CreateByWord { path, temp1, temp2 }
            | SemanticEvent::ModifyByWord { path, temp1, temp2 } => write!(
                f,
                "{}: {} (via {}, {})",
                self.kind(),
                path.display(),
                temp1.display(),
                temp2.display()
            ),
            other => write!(f, "{}: {}", other.kind(), other.subject().display()),
        }
    }
}

/// Fire-and-forget consumer of classified events. The engine serialises
/// calls on the timer task; implementations must not block for long.
pub trait EventSink: Send + Sync {
    fn send(&self, event: SemanticEvent);
}

/// Default sink: one log line per event.
pub struct LogSink;

impl EventSink for LogSink {
    fn send(&self, event: SemanticEvent) {
        LOGGER.info(format!("{}", event));
    }
}

/// Channel sinks let tests (and embedders) observe the stream directly.
impl EventSink for std::sync::mpsc::Sender<SemanticEvent> {
    fn send(&self, event: SemanticEvent) {
        // Engine never retries; a gone receiver just drops the event.
        let _ = std::sync::mpsc::Sender::send(self, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_both_sides_of_a_move() {
        let ev = SemanticEvent::Move {
            source: PathBuf::from("/c/x.log"),
            dest: PathBuf::from("/d/x.log"),
        };
        assert_eq!(format!("{}", ev), "move: /c/x.log -> /d/x.log");
        assert_eq!(ev.subject(), &PathBuf::from("/d/x.log"));
    }

    #[test]
    fn subject_is_final_path_for_multi_file_patterns() {
        let ev = SemanticEvent::CreateByDownload {
            path: PathBuf::from("/d/1.jpg"),
            middle_temp: PathBuf::from("/d/1.jpg.crdownload"),
            initial_temp: PathBuf::from("/d/9be8.tmp"),
        };
        assert_eq!(ev.subject(), &PathBuf::from("/d/1.jpg"));
        assert_eq!(ev.kind(), "create-by-download");
    }

    #[test]
    fn channel_sink_delivers_events() {
        let (tx, rx) = std::sync::mpsc::channel();
        let sink: &dyn EventSink = &tx;
        sink.send(SemanticEvent::Create {
            path: PathBuf::from("/t/a.txt"),
        });
        let got = rx.try_recv().expect("event delivered");
        assert_eq!(got.kind(), "create");
    }
}
