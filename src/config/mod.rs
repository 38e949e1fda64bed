mod config;
pub use config::{Config, ExclusionSection, LogSection, WatchSection, get_or_create_config};
mod opts;
pub use opts::Opts;
