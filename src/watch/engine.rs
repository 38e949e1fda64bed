use crate::config::WatchSection;
use crate::global_var::LOGGER;
use crate::watch::exclusion::ExclusionRule;
use crate::watch::group::WatchingGroup;
use crate::watch::notify_info::NotifyInfo;
use crate::watch::rename_model::RenamePair;
use crate::watch::sink::{EventSink, SemanticEvent};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

/// "Is this file currently open for writing somewhere?" — an injected
/// probe because the detection mechanism is OS-specific.
pub type ProcessingProbe = Arc<dyn Fn(&Path) -> bool + Send + Sync>;

/// Default probe: attempt a read-shared open; a permission-style failure
/// is read as "still in use". A missing file is not busy.
pub fn default_processing_probe() -> ProcessingProbe {
    Arc::new(|path: &Path| {
        match std::fs::OpenOptions::new().read(true).open(path) {
            Ok(_) => false,
            Err(e) => matches!(e.kind(), std::io::ErrorKind::PermissionDenied),
        }
    })
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Minimum age before an entry is classified; gives a multi-step
    /// pattern time to land in the queues.
    pub delay_process: Duration,
    /// Quiet period after an open-contention hit.
    pub stability_window: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            delay_process: Duration::from_millis(3000),
            stability_window: Duration::from_millis(1000),
        }
    }
}

impl From<&WatchSection> for EngineSettings {
    fn from(section: &WatchSection) -> Self {
        Self {
            delay_process: Duration::from_millis(section.delay_process_ms),
            stability_window: Duration::from_millis(section.stability_window_ms),
        }
    }
}

/// The correlation engine: every timer tick it walks each volume's
/// queues in a fixed classifier order and collapses ripe raw edits into
/// semantic events.
///
/// Classifier order per volume: attribute, security, folder-remove,
/// folder-move, rename, create, remove, modify,
/// modify-without-modify-event, copy, move. Later classifiers rely on
/// earlier ones having consumed the entries they own.
///
/// The four rules driven by the file-add queue (create, modify-without,
/// copy, move) share one drain cursor: a rule that cannot decide leaves
/// the cursor alone so the rules behind it see the same entry, and only
/// the last of them rotates the cursor when nothing matched.
pub struct CorrelationEngine {
    groups: Vec<Arc<WatchingGroup>>,
    rule: RwLock<Arc<ExclusionRule>>,
    sink: RwLock<Arc<dyn EventSink>>,
    settings: EngineSettings,
    probe: ProcessingProbe,
    /// Paths under a post-contention stability deadline.
    busy_until: Mutex<HashMap<PathBuf, Instant>>,
}

impl CorrelationEngine {
    pub fn new(
        groups: Vec<Arc<WatchingGroup>>,
        rule: Arc<ExclusionRule>,
        sink: Arc<dyn EventSink>,
        settings: EngineSettings,
        probe: ProcessingProbe,
    ) -> Self {
        Self {
            groups,
            rule: RwLock::new(rule),
            sink: RwLock::new(sink),
            settings,
            probe,
            busy_until: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_rule(&self, rule: Arc<ExclusionRule>) {
        *self.rule.write().unwrap_or_else(PoisonError::into_inner) = rule;
    }

    pub fn set_sink(&self, sink: Arc<dyn EventSink>) {
        *self.sink.write().unwrap_or_else(PoisonError::into_inner) = sink;
    }

    /// One timer tick over every volume.
    pub fn tick(&self) {
        self.prune_busy();
        let rule = self
            .rule
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let sink = self
            .sink
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for idx in 0..self.groups.len() {
            let group = &self.groups[idx];
            self.check_attribute(&rule, &*sink, group);
            self.check_security(&rule, &*sink, group);
            self.check_folder_remove(&rule, &*sink, group, idx);
            self.check_folder_move(&rule, &*sink, group);
            self.check_rename(&rule, &*sink, group);
            self.check_create(&rule, &*sink, group, idx);
            self.check_remove(&rule, &*sink, group, idx);
            self.check_modify(&rule, &*sink, group);
            self.check_modify_without_modify_event(&rule, &*sink, group);
            self.check_copy(&rule, &*sink, group, idx);
            self.check_move(&rule, &*sink, group, idx);
        }
    }

    fn is_ripe(&self, info: &NotifyInfo) -> bool {
        info.alive() >= self.settings.delay_process
    }

    fn mark_busy(&self, path: &Path) {
        let deadline = Instant::now() + self.settings.stability_window;
        self.busy_until
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf(), deadline);
    }

    fn in_stability_window(&self, path: &Path) -> bool {
        self.busy_until
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .is_some_and(|deadline| *deadline > Instant::now())
    }

    fn prune_busy(&self) {
        let now = Instant::now();
        self.busy_until
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, deadline| *deadline > now);
    }

    fn emit(&self, sink: &dyn EventSink, event: SemanticEvent) {
        LOGGER.debug(format!("classified: {}", event));
        sink.send(event);
    }

    // ---- rule 1: attribute ------------------------------------------------

    fn check_attribute(&self, rule: &ExclusionRule, sink: &dyn EventSink, group: &WatchingGroup) {
        let Some(info) = group.attribute.front() else {
            group.attribute.advance();
            return;
        };
        if !self.is_ripe(&info) {
            return;
        }
        let path = info.path();
        if rule.contains(&info) {
            group.attribute.erase(path);
            group.attribute.advance();
            return;
        }
        let suppressed = group.file_add.contains(path)
            || group.file_remove.contains(path)
            || group.file_modify.contains(path)
            || group.rename.mentions(path);
        if !suppressed {
            self.emit(
                sink,
                SemanticEvent::AttributeChange {
                    path: path.to_path_buf(),
                },
            );
        }
        group.attribute.erase(path);
        group.attribute.advance();
    }

    // ---- rule 2: security -------------------------------------------------

    fn check_security(&self, rule: &ExclusionRule, sink: &dyn EventSink, group: &WatchingGroup) {
        let Some(info) = group.security.front() else {
            group.security.advance();
            return;
        };
        if !self.is_ripe(&info) {
            return;
        }
        let path = info.path();
        if rule.contains(&info) {
            group.security.erase(path);
            group.security.advance();
            return;
        }
        let suppressed = group.file_add.contains(path)
            || group.file_remove.contains(path)
            || group.file_modify.contains(path)
            || group.rename.mentions(path);
        if !suppressed {
            self.emit(
                sink,
                SemanticEvent::SecurityChange {
                    path: path.to_path_buf(),
                },
            );
        }
        group.security.erase(path);
        group.security.advance();
    }

    // ---- rule 3: folder remove --------------------------------------------

    fn check_folder_remove(
        &self,
        rule: &ExclusionRule,
        sink: &dyn EventSink,
        group: &WatchingGroup,
        idx: usize,
    ) {
        let Some(info) = group.folder_remove.front() else {
            group.folder_remove.advance();
            return;
        };
        if !self.is_ripe(&info) {
            return;
        }
        let path = info.path();
        if rule.contains(&info) {
            group.folder_remove.erase(path);
            group.folder_remove.advance();
            return;
        }
        // A folder-add elsewhere with the same base name means this is the
        // source half of a move; rule 4 owns that.
        let moving = self.groups.iter().enumerate().any(|(i, other)| {
            i != idx
                && other
                    .folder_add
                    .find_if(|cand| cand.is_relocation_of(&info))
                    .is_some()
        });
        if moving {
            group.folder_remove.advance();
            return;
        }
        self.emit(
            sink,
            SemanticEvent::FolderRemove {
                path: path.to_path_buf(),
            },
        );
        group.erase_folder_traces(path);
        group.folder_remove.advance();
    }

    // ---- rule 4: folder move ----------------------------------------------

    fn check_folder_move(&self, rule: &ExclusionRule, sink: &dyn EventSink, group: &WatchingGroup) {
        let Some(info) = group.folder_add.front() else {
            group.folder_add.advance();
            return;
        };
        if !self.is_ripe(&info) {
            return;
        }
        let path = info.path();
        if rule.contains(&info) {
            group.folder_add.erase(path);
            group.folder_add.advance();
            return;
        }
        for other in &self.groups {
            let source = other
                .folder_remove
                .find_if(|removed| info.is_relocation_of(removed));
            if let Some(source) = source {
                self.emit(
                    sink,
                    SemanticEvent::FolderMove {
                        source: source.path().to_path_buf(),
                        dest: path.to_path_buf(),
                    },
                );
                other.erase_folder_traces(source.path());
                group.erase_folder_traces(path);
                group.folder_add.advance();
                return;
            }
        }
        // Ripe and unmatched: a plain new folder, which has no event.
        group.folder_add.erase(path);
        group.folder_add.advance();
    }

    // ---- rule 5: rename ---------------------------------------------------

    fn check_rename(&self, rule: &ExclusionRule, sink: &dyn EventSink, group: &WatchingGroup) {
        let Some(pair) = group.rename.front() else {
            group.rename.advance();
            return;
        };
        if pair.alive() < self.settings.delay_process {
            return;
        }
        let old_path = pair.old_name.path();
        let new_path = pair.new_name.path();
        if self.in_stability_window(old_path) || self.in_stability_window(new_path) {
            return;
        }
        if rule.contains(&pair.new_name) || rule.contains(&pair.old_name) {
            group.rename.erase(new_path);
            group.rename.advance();
            return;
        }

        let old_in_add = group.file_add.contains(old_path);
        let new_in_add = group.file_add.contains(new_path);

        // 5.1 plain rename: nothing created, no related pairs.
        if !old_in_add && !new_in_add && group.rename.is_only_one_family_info(&pair) {
            self.emit(
                sink,
                SemanticEvent::Rename {
                    old: old_path.to_path_buf(),
                    new: new_path.to_path_buf(),
                },
            );
            self.consume_pair(group, &pair);
            group.rename.advance();
            return;
        }

        let family = group.rename.get_family(&pair);
        if family.len() >= 2 {
            // 5.2 forward chain temp -> middle -> final: download auto-save.
            if let Some((first, second)) = find_forward_chain(&family) {
                let event = SemanticEvent::CreateByDownload {
                    path: second.new_name.path().to_path_buf(),
                    middle_temp: first.new_name.path().to_path_buf(),
                    initial_temp: first.old_name.path().to_path_buf(),
                };
                self.emit(sink, event);
                self.consume_pair(group, first);
                self.consume_pair(group, second);
                group.rename.advance();
                return;
            }

            // 5.3 / 5.4 reverse chain: the final name was renamed to a
            // backup before a scratch file was renamed onto it — the
            // word-processor save shape.
            if family.len() == 2 {
                if let Some((late, early)) = find_reverse_chain(&family) {
                    let final_path = late.new_name.path();
                    let backup = early.new_name.path();
                    let scratch = late.old_name.path();
                    let created = group
                        .file_add
                        .find(final_path)
                        .is_some_and(|add| add.created_at() <= early.committed_at());
                    let event = if created {
                        SemanticEvent::CreateByWord {
                            path: final_path.to_path_buf(),
                            temp1: backup.to_path_buf(),
                            temp2: scratch.to_path_buf(),
                        }
                    } else {
                        SemanticEvent::ModifyByWord {
                            path: final_path.to_path_buf(),
                            temp1: backup.to_path_buf(),
                            temp2: scratch.to_path_buf(),
                        }
                    };
                    self.emit(sink, event);
                    self.consume_pair(group, early);
                    self.consume_pair(group, late);
                    group.rename.advance();
                    return;
                }
            }
        }

        // 5.5 single rename right after a create.
        if old_in_add && group.rename.is_only_one_family_info(&pair) {
            let event = if new_in_add {
                SemanticEvent::CreateByRename {
                    new: new_path.to_path_buf(),
                    old: old_path.to_path_buf(),
                }
            } else {
                SemanticEvent::ModifyByRename {
                    new: new_path.to_path_buf(),
                    old: old_path.to_path_buf(),
                }
            };
            self.emit(sink, event);
            self.consume_pair(group, &pair);
            group.rename.advance();
            return;
        }

        // No pattern settled yet; the pair waits for a later tick.
        group.rename.advance();
    }

    /// Erase a committed pair and every file-level trace of both names.
    fn consume_pair(&self, group: &WatchingGroup, pair: &RenamePair) {
        group.rename.erase(pair.new_name.path());
        group.erase_file_traces(pair.old_name.path());
        group.erase_file_traces(pair.new_name.path());
    }

    // ---- rule 6: create ---------------------------------------------------

    fn check_create(
        &self,
        rule: &ExclusionRule,
        sink: &dyn EventSink,
        group: &WatchingGroup,
        idx: usize,
    ) {
        let Some(info) = group.file_add.front() else {
            return;
        };
        if !self.is_ripe(&info) {
            return;
        }
        let path = info.path();
        if rule.contains(&info) {
            group.erase_file_traces(path);
            group.file_add.advance();
            return;
        }
        if group.rename.mentions(path) {
            // One of the rename sub-patterns owns this entry.
            return;
        }
        if self.in_stability_window(path) {
            return;
        }
        if (self.probe)(path) {
            LOGGER.debug(format!("{} still in use; deferring", path.display()));
            self.mark_busy(path);
            return;
        }

        if let Some(removed) = group.file_remove.find(path) {
            // Added and then removed again: a transient temp file.
            if removed.created_at() > info.created_at() {
                group.erase_file_traces(path);
                group.file_add.advance();
                return;
            }
            // Removed before this add and modified after it: an editor
            // that saves-as by deleting and rewriting in place.
            let modified_after = group
                .file_modify
                .find(path)
                .is_some_and(|m| m.created_at() > info.created_at());
            if modified_after {
                self.emit(
                    sink,
                    SemanticEvent::CreateBySaveAs {
                        path: path.to_path_buf(),
                    },
                );
                group.erase_file_traces(path);
                group.file_add.advance();
                return;
            }
        }

        let clean_here =
            !group.file_remove.contains(path) && !group.file_modify.contains(path);
        let move_candidate = self.groups.iter().enumerate().any(|(i, other)| {
            i != idx
                && other
                    .file_remove
                    .find_if(|removed| removed.file_name() == info.file_name())
                    .is_some()
        });
        if clean_here && !move_candidate {
            self.emit(
                sink,
                SemanticEvent::Create {
                    path: path.to_path_buf(),
                },
            );
            group.erase_file_traces(path);
            group.file_add.advance();
        }
        // Otherwise leave the cursor: rules 9-11 inspect this entry next.
    }

    // ---- rule 7: remove ---------------------------------------------------

    fn check_remove(
        &self,
        rule: &ExclusionRule,
        sink: &dyn EventSink,
        group: &WatchingGroup,
        idx: usize,
    ) {
        let Some(info) = group.file_remove.front() else {
            group.file_remove.advance();
            return;
        };
        if !self.is_ripe(&info) {
            return;
        }
        let path = info.path();
        if rule.contains(&info) {
            group.file_remove.erase(path);
            group.file_remove.advance();
            return;
        }
        if group.rename.mentions(path) {
            group.file_remove.advance();
            return;
        }
        if group.file_add.contains(path) {
            // Same path re-added: modify-by-replace; rules 6/9 decide.
            group.file_remove.advance();
            return;
        }
        let moving = self.groups.iter().enumerate().any(|(i, other)| {
            i != idx
                && other
                    .file_add
                    .find_if(|added| added.is_relocation_of(&info))
                    .is_some()
        });
        if moving {
            group.file_remove.advance();
            return;
        }
        self.emit(
            sink,
            SemanticEvent::Remove {
                path: path.to_path_buf(),
            },
        );
        group.erase_file_traces(path);
        group.file_remove.advance();
    }

    // ---- rule 8: modify ---------------------------------------------------

    fn check_modify(&self, rule: &ExclusionRule, sink: &dyn EventSink, group: &WatchingGroup) {
        let Some(info) = group.file_modify.front() else {
            group.file_modify.advance();
            return;
        };
        if !self.is_ripe(&info) {
            return;
        }
        let path = info.path();
        if rule.contains(&info) {
            group.file_modify.erase(path);
            group.file_modify.advance();
            return;
        }
        if group.rename.mentions(path)
            || group.file_add.contains(path)
            || group.file_remove.contains(path)
        {
            group.file_modify.advance();
            return;
        }
        self.emit(
            sink,
            SemanticEvent::Modify {
                path: path.to_path_buf(),
            },
        );
        group.erase_file_traces(path);
        group.file_modify.advance();
    }

    // ---- rule 9: modify without a modify event ----------------------------

    fn check_modify_without_modify_event(
        &self,
        rule: &ExclusionRule,
        sink: &dyn EventSink,
        group: &WatchingGroup,
    ) {
        let Some(info) = group.file_add.front() else {
            return;
        };
        if !self.is_ripe(&info) {
            return;
        }
        let path = info.path();
        if rule.contains(&info) || group.rename.mentions(path) || self.in_stability_window(path)
        {
            return;
        }
        if group.file_modify.contains(path) {
            return;
        }
        // Image editors replace atomically: remove, then add, no modify.
        let replaced = group
            .file_remove
            .find(path)
            .is_some_and(|removed| removed.created_at() < info.created_at());
        if replaced {
            self.emit(
                sink,
                SemanticEvent::Modify {
                    path: path.to_path_buf(),
                },
            );
            group.erase_file_traces(path);
            group.file_add.advance();
        }
    }

    // ---- rule 10: copy ----------------------------------------------------

    fn check_copy(
        &self,
        rule: &ExclusionRule,
        sink: &dyn EventSink,
        group: &WatchingGroup,
        idx: usize,
    ) {
        let Some(info) = group.file_add.front() else {
            return;
        };
        if !self.is_ripe(&info) {
            return;
        }
        let path = info.path();
        if rule.contains(&info) || group.rename.mentions(path) || self.in_stability_window(path)
        {
            return;
        }
        let removed_elsewhere = self.groups.iter().enumerate().any(|(i, other)| {
            i != idx
                && other
                    .file_remove
                    .find_if(|removed| removed.file_name() == info.file_name())
                    .is_some()
        });
        if group.file_modify.contains(path)
            && !group.file_remove.contains(path)
            && !removed_elsewhere
        {
            self.emit(
                sink,
                SemanticEvent::Copy {
                    path: path.to_path_buf(),
                },
            );
            group.erase_file_traces(path);
            group.file_add.advance();
        }
    }

    // ---- rule 11: move ----------------------------------------------------

    fn check_move(
        &self,
        rule: &ExclusionRule,
        sink: &dyn EventSink,
        group: &WatchingGroup,
        _idx: usize,
    ) {
        let Some(info) = group.file_add.front() else {
            group.file_add.advance();
            return;
        };
        if !self.is_ripe(&info) {
            return;
        }
        let path = info.path();
        if rule.contains(&info) || self.in_stability_window(path) {
            return;
        }
        if group.rename.mentions(path) {
            // A rename sub-pattern owns the entry; rotate so the queue
            // keeps draining until that pattern settles.
            group.file_add.advance();
            return;
        }
        if group.file_remove.contains(path) {
            // Same-path remove means replace, not relocation; rotate past
            // so the queue keeps draining while rules 6/9 wait it out.
            group.file_add.advance();
            return;
        }
        for other in &self.groups {
            let source = other
                .file_remove
                .find_if(|removed| info.is_relocation_of(removed));
            if let Some(source) = source {
                self.emit(
                    sink,
                    SemanticEvent::Move {
                        source: source.path().to_path_buf(),
                        dest: path.to_path_buf(),
                    },
                );
                other.erase_file_traces(source.path());
                group.erase_file_traces(path);
                group.file_add.advance();
                return;
            }
        }
        // Nothing in the add-driven chain claimed the entry this tick;
        // rotate so entries behind it are not starved.
        group.file_add.advance();
    }
}

/// Two pairs forming a temporally forward chain: `first` renamed some
/// temp onto a middle name, `second` renamed that middle name onward.
fn find_forward_chain(family: &[RenamePair]) -> Option<(&RenamePair, &RenamePair)> {
    for first in family {
        for second in family {
            if std::ptr::eq(first, second) {
                continue;
            }
            if first.new_name.path() == second.old_name.path()
                && first.committed_at() <= second.committed_at()
            {
                return Some((first, second));
            }
        }
    }
    None
}

/// Two pairs sharing a name in reverse temporal order: `early` renamed
/// the shared name away, `late` renamed something else onto it.
fn find_reverse_chain(family: &[RenamePair]) -> Option<(&RenamePair, &RenamePair)> {
    for late in family {
        for early in family {
            if std::ptr::eq(late, early) {
                continue;
            }
            if late.new_name.path() == early.old_name.path()
                && late.committed_at() > early.committed_at()
            {
                return Some((late, early));
            }
        }
    }
    None
}
