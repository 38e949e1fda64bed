use crate::config::Config;
use crate::err::Result;
use crate::global_var::LOGGER;
use crate::watch::driver::WatchFlags;
use crate::watch::engine::{
    CorrelationEngine, EngineSettings, ProcessingProbe, default_processing_probe,
};
use crate::watch::exclusion::ExclusionRule;
use crate::watch::group::WatchingGroup;
use crate::watch::sink::{EventSink, LogSink};
use crate::watch::volume_watcher::VolumeWatcher;
use crate::watch::volumes::enumerate_volumes;
use crate::watch_error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const TIMER_STOP_WAIT: Duration = Duration::from_secs(3);

struct Running {
    engine: Arc<CorrelationEngine>,
    watchers: Vec<VolumeWatcher>,
    timer_shutdown: Option<oneshot::Sender<()>>,
    timer_task: Option<JoinHandle<()>>,
}

/// Top of the component tree: enumerates volumes, owns one ingestion
/// watcher per volume plus the correlation timer, and carries the shared
/// exclusion rule and event sink.
pub struct WatcherManager {
    config: Config,
    rule: Arc<ExclusionRule>,
    sink: Arc<dyn EventSink>,
    probe: ProcessingProbe,
    running: Option<Running>,
}

impl WatcherManager {
    pub fn new(config: Config) -> Self {
        let rule = Arc::new(ExclusionRule::from_config(&config.exclusion));
        Self {
            config,
            rule,
            sink: Arc::new(LogSink),
            probe: default_processing_probe(),
            running: None,
        }
    }

    /// Replace the exclusion rule. Applies to classification immediately;
    /// ingestion tasks pick it up on the next start.
    pub fn set_rule(&mut self, rule: ExclusionRule) {
        self.rule = Arc::new(rule);
        if let Some(running) = &self.running {
            running.engine.set_rule(self.rule.clone());
        }
    }

    /// Replace the event sink.
    pub fn set_sink(&mut self, sink: Arc<dyn EventSink>) {
        self.sink = sink.clone();
        if let Some(running) = &self.running {
            running.engine.set_sink(sink);
        }
    }

    /// Replace the is-currently-open probe. Only honored before `start`.
    pub fn set_processing_probe(&mut self, probe: ProcessingProbe) {
        self.probe = probe;
    }

    /// Enumerate volumes, subscribe a watcher to each, and start the
    /// correlation timer. A volume that cannot be subscribed is logged
    /// and skipped; the rest proceed.
    pub async fn start(&mut self, flags: WatchFlags, subtree: bool) -> Result<()> {
        LOGGER.debug("watcher manager starting");
        if self.running.is_some() {
            return Err(watch_error!("watcher manager is already started").into());
        }
        if flags.is_empty() {
            return Err(watch_error!("no raw-edit classes selected").into());
        }

        let volumes = enumerate_volumes(&self.config.watch.roots);
        if volumes.is_empty() {
            return Err(watch_error!("no volumes to watch").into());
        }

        let capacity = self.config.watch.queue_capacity;
        let mut groups: Vec<Arc<WatchingGroup>> = Vec::with_capacity(volumes.len());
        let mut watchers: Vec<VolumeWatcher> = Vec::with_capacity(volumes.len());

        for volume in &volumes {
            let group = Arc::new(WatchingGroup::new(volume.root.clone(), capacity));
            match VolumeWatcher::start(group.clone(), self.rule.clone(), flags, subtree) {
                Ok(watcher) => {
                    LOGGER.info(format!(
                        "watching {:?} volume {}",
                        volume.kind,
                        volume.root.display()
                    ));
                    groups.push(group);
                    watchers.push(watcher);
                }
                Err(e) => {
                    LOGGER.warn(format!(
                        "skipping volume {}: {}",
                        volume.root.display(),
                        e
                    ));
                }
            }
        }

        if watchers.is_empty() {
            return Err(watch_error!("no volume could be subscribed").into());
        }

        let engine = Arc::new(CorrelationEngine::new(
            groups,
            self.rule.clone(),
            self.sink.clone(),
            EngineSettings::from(&self.config.watch),
            self.probe.clone(),
        ));

        let (timer_shutdown, timer_task) =
            spawn_timer(engine.clone(), Duration::from_millis(self.config.watch.interval_ms));

        self.running = Some(Running {
            engine,
            watchers,
            timer_shutdown: Some(timer_shutdown),
            timer_task: Some(timer_task),
        });
        LOGGER.debug("watcher manager started");
        Ok(())
    }

    /// Stop the timer first, then every ingestion watcher, then drain.
    pub async fn stop(&mut self) {
        LOGGER.debug("watcher manager stopping");
        let Some(mut running) = self.running.take() else {
            return;
        };

        if let Some(tx) = running.timer_shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(mut task) = running.timer_task.take() {
            if tokio::time::timeout(TIMER_STOP_WAIT, &mut task).await.is_err() {
                LOGGER.warn("correlation timer did not stop in time; aborting");
                task.abort();
            }
        }

        for watcher in &mut running.watchers {
            watcher.stop().await;
        }
        LOGGER.debug("watcher manager stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Roots currently being watched.
    pub fn watched_roots(&self) -> Vec<PathBuf> {
        self.running
            .as_ref()
            .map(|r| r.watchers.iter().map(|w| w.root().to_path_buf()).collect())
            .unwrap_or_default()
    }
}

fn spawn_timer(
    engine: Arc<CorrelationEngine>,
    interval: Duration,
) -> (oneshot::Sender<()>, JoinHandle<()>) {
    let (tx, mut rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = &mut rx => {
                    LOGGER.debug("correlation timer shutting down");
                    break;
                }
                _ = tokio::time::sleep(interval) => {
                    engine.tick();
                }
            }
        }
    });
    (tx, task)
}
