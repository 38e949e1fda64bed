pub mod config;
pub mod err;
pub mod global_var;
pub mod utilities;
pub mod watch;

// Re-export the surface embedders touch.
pub use watch::{EventSink, SemanticEvent, WatchFlags, WatcherManager};
