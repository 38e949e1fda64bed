use std::fmt::{Debug, Display, Formatter};
use std::path::{Path, PathBuf};

pub type Error = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, Error>;

/// Error raised by the watcher stack. Besides the message it records the
/// raising site and, when the failure concerns a concrete filesystem
/// object (a volume root that cannot be subscribed, a path a classifier
/// choked on), the path it was working on.
pub struct WatchError {
    msg: String,
    path: Option<PathBuf>,
    raised_at: (&'static str, u32),
    source: Option<Error>,
}

impl WatchError {
    pub fn new(
        msg: impl Into<String>,
        file: &'static str,
        line: u32,
        source: Option<Error>,
    ) -> Self {
        Self {
            msg: msg.into(),
            path: None,
            raised_at: (file, line),
            source,
        }
    }

    /// Attach the filesystem object the failure was about.
    pub fn with_path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

#[macro_export]
macro_rules! watch_error {
    ($fmt:expr $(, $($args:tt)*)?) => {
        $crate::err::WatchError::new(
            format!($fmt $(,$($args)*)?),
            file!(), line!(), None)
    };
}

#[macro_export]
macro_rules! watch_error_with_source {
    ($source:expr, $fmt:expr $(, $($args:tt)*)?) => {
        $crate::err::WatchError::new(
            format!($fmt $(,$($args)*)?),
            file!(), line!(), Some(Box::new($source) as $crate::err::Error))
    }
}

impl Display for WatchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}: {}", self.msg, path.display()),
            None => write!(f, "{}", self.msg),
        }
    }
}

impl Debug for WatchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let (file, line) = self.raised_at;
        write!(f, "[{}]:{} {}", file, line, self)
    }
}

impl std::error::Error for WatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_the_bare_message_without_a_path() {
        let err = watch_error!("no volumes to watch");
        assert_eq!(format!("{}", err), "no volumes to watch");
        assert!(err.path().is_none());
    }

    #[test]
    fn path_context_shows_in_display_and_accessor() {
        let err = watch_error!("cannot subscribe to volume").with_path("/mnt/usb");
        assert_eq!(format!("{}", err), "cannot subscribe to volume: /mnt/usb");
        assert_eq!(err.path(), Some(Path::new("/mnt/usb")));
    }

    #[test]
    fn debug_names_the_raising_site() {
        let err = watch_error!("queue reset");
        let dbg = format!("{:?}", err);
        assert!(
            dbg.contains("err/mod.rs"),
            "debug should name the file: {}",
            dbg
        );
    }

    #[test]
    fn source_is_preserved_through_the_macro() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = watch_error_with_source!(io, "open failed").with_path("/c/a.txt");
        let src = std::error::Error::source(&err).expect("source should be set");
        assert_eq!(format!("{}", src), "gone");
    }
}
