use crate::err::Result;
use crate::global_var::LOGGER;
use crate::watch::driver::{NotifySubscription, RawEdit, WatchFlags};
use crate::watch::exclusion::ExclusionRule;
use crate::watch::group::WatchingGroup;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

const STOP_WAIT: Duration = Duration::from_secs(3);

/// Ingestion side of one volume: a task that drains the driver channel,
/// applies the exclusion rule, and routes each edit into the volume's
/// queues. The kernel subscription (when live) is owned here so that
/// dropping the watcher cancels the outstanding reads.
pub struct VolumeWatcher {
    root: PathBuf,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    _subscription: Option<NotifySubscription>,
}

impl VolumeWatcher {
    /// Subscribe to the volume root and start ingesting.
    pub fn start(
        group: Arc<WatchingGroup>,
        rule: Arc<ExclusionRule>,
        flags: WatchFlags,
        subtree: bool,
    ) -> Result<Self> {
        let (subscription, rx) = NotifySubscription::start(group.root(), flags, subtree)?;
        let mut watcher = Self::spawn(group, rule, rx);
        watcher._subscription = Some(subscription);
        Ok(watcher)
    }

    /// Ingest from an externally fed channel. Tests and embedders script
    /// raw edits through this.
    pub fn spawn(
        group: Arc<WatchingGroup>,
        rule: Arc<ExclusionRule>,
        mut rx: mpsc::Receiver<RawEdit>,
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let root = group.root().to_path_buf();
        let task_root = root.clone();

        let task = tokio::spawn(async move {
            LOGGER.debug(format!("ingestion started for {}", task_root.display()));
            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => {
                        break;
                    }
                    edit = rx.recv() => {
                        let Some(edit) = edit else {
                            // Driver closed the channel.
                            break;
                        };
                        if rule.contains_path(&edit.path.to_string_lossy()) {
                            continue;
                        }
                        group.route(edit);
                    }
                }
            }
            LOGGER.debug(format!("ingestion stopped for {}", task_root.display()));
        });

        Self {
            root,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
            _subscription: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Graceful stop: cancel the subscription, signal the task, and wait
    /// for it to drain (bounded).
    pub async fn stop(&mut self) {
        self._subscription = None;
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(STOP_WAIT, &mut task).await.is_err() {
                LOGGER.warn(format!(
                    "ingestion for {} did not stop in time; aborting",
                    self.root.display()
                ));
                task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::driver::EditClass;
    use crate::watch::notify_info::RawAction;

    fn edit(path: &str, action: RawAction) -> RawEdit {
        RawEdit::new(path, action, EditClass::FileName)
    }

    #[tokio::test]
    async fn routes_edits_into_the_group() {
        let group = Arc::new(WatchingGroup::new(PathBuf::from("/c"), 8));
        let rule = Arc::new(ExclusionRule::new());
        let (tx, rx) = mpsc::channel(16);
        let mut watcher = VolumeWatcher::spawn(group.clone(), rule, rx);

        tx.send(edit("/c/a.txt", RawAction::Added)).await.unwrap();
        tx.send(edit("/c/b.txt", RawAction::Modified)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(group.file_add.contains(Path::new("/c/a.txt")));
        assert!(group.file_modify.contains(Path::new("/c/b.txt")));
        watcher.stop().await;
    }

    #[tokio::test]
    async fn excluded_paths_are_dropped_before_queueing() {
        let group = Arc::new(WatchingGroup::new(PathBuf::from("/c"), 8));
        let mut rule = ExclusionRule::new();
        rule.add_user_path("/c/cache");
        let (tx, rx) = mpsc::channel(16);
        let mut watcher = VolumeWatcher::spawn(group.clone(), Arc::new(rule), rx);

        tx.send(edit("/c/cache/obj.bin", RawAction::Added)).await.unwrap();
        tx.send(edit("/c/keep.txt", RawAction::Added)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!group.file_add.contains(Path::new("/c/cache/obj.bin")));
        assert!(group.file_add.contains(Path::new("/c/keep.txt")));
        watcher.stop().await;
    }

    #[tokio::test]
    async fn stop_terminates_the_task() {
        let group = Arc::new(WatchingGroup::new(PathBuf::from("/c"), 8));
        let rule = Arc::new(ExclusionRule::new());
        let (tx, rx) = mpsc::channel(16);
        let mut watcher = VolumeWatcher::spawn(group, rule, rx);

        watcher.stop().await;
        // The task is gone; further sends land nowhere but do not panic.
        let _ = tx.send(edit("/c/late.txt", RawAction::Added)).await;
    }

    #[tokio::test]
    async fn closed_channel_ends_ingestion() {
        let group = Arc::new(WatchingGroup::new(PathBuf::from("/c"), 8));
        let rule = Arc::new(ExclusionRule::new());
        let (tx, rx) = mpsc::channel(16);
        let mut watcher = VolumeWatcher::spawn(group, rule, rx);
        drop(tx);
        tokio::time::sleep(Duration::from_millis(20)).await;
        // Stop returns promptly because the loop already exited.
        watcher.stop().await;
    }
}
