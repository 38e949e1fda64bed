use crate::watch::circle_map::CircleMap;
use crate::watch::notify_info::{NotifyInfo, RawAction};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A matched `RenameOld` / `RenameNew` couple. Valid only when both
/// halves share a parent directory; the kernel reports the two phases of
/// one rename back to back, so a parent mismatch means the halves belong
/// to different operations.
#[derive(Debug, Clone, PartialEq)]
pub struct RenamePair {
    pub old_name: NotifyInfo,
    pub new_name: NotifyInfo,
}

impl RenamePair {
    pub fn is_valid(&self) -> bool {
        self.old_name.is_valid()
            && self.new_name.is_valid()
            && self.old_name.parent_path() == self.new_name.parent_path()
    }

    /// Queue key: the post-rename path.
    pub fn key(&self) -> PathBuf {
        self.new_name.path().to_path_buf()
    }

    pub fn matches_any(&self, path: &Path) -> bool {
        path == self.old_name.path() || path == self.new_name.path()
    }

    /// Instant the pair completed (the new-name half landed).
    pub fn committed_at(&self) -> Instant {
        self.new_name.created_at()
    }

    pub fn alive(&self) -> Duration {
        self.new_name.alive()
    }
}

/// Rename queue of one volume: assembles half-pairs and answers family
/// queries (all pairs touching a given name) for the correlation rules.
pub struct RenameModel {
    /// `RenameOld` half waiting for its `RenameNew`.
    staged: Mutex<Option<NotifyInfo>>,
    data: CircleMap<PathBuf, RenamePair>,
}

impl RenameModel {
    pub fn new(capacity: usize) -> Self {
        Self {
            staged: Mutex::new(None),
            data: CircleMap::new(capacity),
        }
    }

    /// Feed one rename-phase edit. The old half waits in the staging
    /// slot; the matching new half commits the pair. A new half with no
    /// staged old (kernel dropped it) is discarded, as is a completed
    /// pair whose halves do not share a parent.
    pub fn push(&self, info: NotifyInfo) {
        match info.action() {
            RawAction::RenameOld => {
                let mut staged = self.staged.lock().unwrap_or_else(|e| e.into_inner());
                *staged = Some(info);
            }
            RawAction::RenameNew => {
                let old = {
                    let mut staged = self.staged.lock().unwrap_or_else(|e| e.into_inner());
                    staged.take()
                };
                let Some(old_name) = old else {
                    return;
                };
                let pair = RenamePair {
                    old_name,
                    new_name: info,
                };
                if pair.is_valid() {
                    self.data.insert(pair.key(), pair);
                }
            }
            _ => {}
        }
    }

    pub fn front(&self) -> Option<RenamePair> {
        self.data.front()
    }

    /// Look up a pair by its post-rename path.
    pub fn find(&self, new_path: &Path) -> Option<RenamePair> {
        self.data.find(&new_path.to_path_buf())
    }

    pub fn find_by_old_name(&self, old_path: &Path) -> Option<RenamePair> {
        self.data.find_if(|pair| pair.old_name.path() == old_path)
    }

    /// Does any resident pair mention `path` on either side?
    pub fn mentions(&self, path: &Path) -> bool {
        self.data.find_if(|pair| pair.matches_any(path)).is_some()
    }

    /// All pairs sharing either side of `pair`, in queue order.
    pub fn get_family(&self, pair: &RenamePair) -> Vec<RenamePair> {
        let old = pair.old_name.path().to_path_buf();
        let new = pair.new_name.path().to_path_buf();
        let mut family = Vec::new();
        self.data.loop_all(|item| {
            if item.matches_any(&old) || item.matches_any(&new) {
                family.push(item.clone());
            }
        });
        family
    }

    /// Number of pairs mentioning `path`.
    pub fn get_number_family(&self, path: &Path) -> usize {
        let mut count = 0;
        self.data.loop_all(|item| {
            if item.matches_any(path) {
                count += 1;
            }
        });
        count
    }

    pub fn is_only_one_family_info(&self, pair: &RenamePair) -> bool {
        self.get_family(pair).len() == 1
    }

    pub fn erase(&self, new_path: &Path) {
        self.data.erase(&new_path.to_path_buf());
    }

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

#[cfg(test)]
mod tests {
    use super::*;

    fn half(path: &str, action: RawAction) -> NotifyInfo {
        NotifyInfo::with_directory(PathBuf::from(path), action, false)
    }

    fn feed(model: &RenameModel, old: &str, new: &str) {
        model.push(half(old, RawAction::RenameOld));
        model.push(half(new, RawAction::RenameNew));
    }

    #[test]
    fn old_then_new_commits_a_pair() {
        let model = RenameModel::new(8);
        feed(&model, "/t/a.txt", "/t/b.txt");
        assert_eq!(model.len(), 1);
        let pair = model.find(Path::new("/t/b.txt")).expect("pair keyed by new path");
        assert_eq!(pair.old_name.path(), Path::new("/t/a.txt"));
        assert!(pair.is_valid());
    }

    #[test]
    fn new_without_staged_old_is_discarded() {
        let model = RenameModel::new(8);
        model.push(half("/t/b.txt", RawAction::RenameNew));
        assert_eq!(model.len(), 0);
    }

    #[test]
    fn cross_directory_halves_do_not_pair() {
        let model = RenameModel::new(8);
        feed(&model, "/t/a.txt", "/u/b.txt");
        assert_eq!(model.len(), 0);
    }

    #[test]
    fn second_old_overwrites_stale_staging() {
        let model = RenameModel::new(8);
        model.push(half("/t/stale.txt", RawAction::RenameOld));
        feed(&model, "/t/a.txt", "/t/b.txt");
        let pair = model.find(Path::new("/t/b.txt")).expect("committed pair");
        assert_eq!(pair.old_name.path(), Path::new("/t/a.txt"));
    }

    #[test]
    fn find_by_old_name_scans_pairs() {
        let model = RenameModel::new(8);
        feed(&model, "/t/a.txt", "/t/b.txt");
        let pair = model.find_by_old_name(Path::new("/t/a.txt")).expect("found");
        assert_eq!(pair.new_name.path(), Path::new("/t/b.txt"));
        assert!(model.find_by_old_name(Path::new("/t/b.txt")).is_none());
    }

    #[test]
    fn family_counts_pairs_sharing_either_side() {
        let model = RenameModel::new(8);
        // Chain: temp -> middle -> final, plus one unrelated pair.
        feed(&model, "/d/x.tmp", "/d/y.crdownload");
        feed(&model, "/d/y.crdownload", "/d/y.jpg");
        feed(&model, "/d/other.a", "/d/other.b");

        let first = model.find(Path::new("/d/y.crdownload")).expect("first pair");
        let family = model.get_family(&first);
        assert_eq!(family.len(), 2);
        assert!(!model.is_only_one_family_info(&first));

        assert_eq!(model.get_number_family(Path::new("/d/y.crdownload")), 2);
        assert_eq!(model.get_number_family(Path::new("/d/other.b")), 1);

        let lone = model.find(Path::new("/d/other.b")).expect("unrelated pair");
        assert!(model.is_only_one_family_info(&lone));
    }

    #[test]
    fn mentions_covers_both_roles() {
        let model = RenameModel::new(8);
        feed(&model, "/t/a.txt", "/t/b.txt");
        assert!(model.mentions(Path::new("/t/a.txt")));
        assert!(model.mentions(Path::new("/t/b.txt")));
        assert!(!model.mentions(Path::new("/t/c.txt")));
    }
}
