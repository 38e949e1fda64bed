use crate::err::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

fn default_interval_ms() -> u64 {
    300
}
fn default_delay_process_ms() -> u64 {
    3000
}
fn default_stability_window_ms() -> u64 {
    1000
}
fn default_queue_capacity() -> usize {
    128
}
fn default_subtree() -> bool {
    true
}
fn default_exclude_app_data() -> bool {
    true
}
fn default_log_dir() -> String {
    String::from("logs")
}

/// Timing and sizing knobs of the watcher pool and correlation engine.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WatchSection {
    /// Correlation timer cadence.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// An entry must be at least this old before a classifier touches it.
    #[serde(default = "default_delay_process_ms")]
    pub delay_process_ms: u64,

    /// Quiet period after an open-contention hit; rename classification of
    /// the contended path is postponed while it runs.
    #[serde(default = "default_stability_window_ms")]
    pub stability_window_ms: u64,

    /// Slot count of every per-volume queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Watch volume roots recursively.
    #[serde(default = "default_subtree")]
    pub subtree: bool,

    /// Explicit volume roots. Empty means "enumerate the host's fixed and
    /// removable volumes".
    #[serde(default)]
    pub roots: Vec<PathBuf>,
}

impl Default for WatchSection {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            delay_process_ms: default_delay_process_ms(),
            stability_window_ms: default_stability_window_ms(),
            queue_capacity: default_queue_capacity(),
            subtree: default_subtree(),
            roots: Vec::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ExclusionSection {
    /// Drop events under per-user application-data directories.
    #[serde(default = "default_exclude_app_data")]
    pub exclude_app_data: bool,

    /// User-supplied path prefixes to drop.
    #[serde(default)]
    pub user_prefixes: Vec<String>,
}

impl Default for ExclusionSection {
    fn default() -> Self {
        Self {
            exclude_app_data: default_exclude_app_data(),
            user_prefixes: Vec::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LogSection {
    #[serde(default = "default_log_dir")]
    pub dir: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub watch: WatchSection,
    #[serde(default)]
    pub exclusion: ExclusionSection,
    #[serde(default)]
    pub log: LogSection,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Ok(toml::from_str(&content)?)
    }

    pub fn dump<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = fs::File::create(path)?;
        let mut writer = std::io::BufWriter::new(file);
        writer.write_all(toml::to_string(self)?.as_bytes())?;
        Ok(())
    }
}

/// Load the config at `path`, writing a default file there first when it
/// does not exist yet.
pub fn get_or_create_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        let config = Config::default();
        config.dump(path)?;
        return Ok(config);
    }
    Config::from_file(path)
}
