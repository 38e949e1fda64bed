//! Per-volume watcher pool and the correlation engine that collapses raw
//! kernel change primitives into semantic file-activity events.

mod circle_map;
pub use circle_map::CircleMap;
mod notify_info;
pub use notify_info::{NotifyInfo, RawAction};
mod file_model;
pub use file_model::FileModel;
mod rename_model;
pub use rename_model::{RenameModel, RenamePair};
mod group;
pub use group::WatchingGroup;
mod driver;
pub use driver::{EditClass, NotifySubscription, RawEdit, WatchFlags, translate_event};
mod exclusion;
pub use exclusion::ExclusionRule;
mod volumes;
pub use volumes::{Volume, VolumeKind, enumerate_volumes};
mod sink;
pub use sink::{EventSink, LogSink, SemanticEvent};
mod engine;
pub use engine::{
    CorrelationEngine, EngineSettings, ProcessingProbe, default_processing_probe,
};
mod volume_watcher;
pub use volume_watcher::VolumeWatcher;
mod manager;
pub use manager::WatcherManager;
