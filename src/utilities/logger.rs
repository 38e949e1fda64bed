//! Asynchronous file logger.
//!
//! Log calls push a record onto a bounded mpsc channel; a background task
//! owns the `BufWriter` and drains the channel, so callers never block on
//! disk. The global handle lives in [`crate::global_var::LOGGER_CELL`];
//! until it is initialised, a leaked no-op channel swallows messages so
//! early (or test) callers never panic.

use crate::err::Result;
use crate::global_var::{DEBUG_MODE, LOGGER_CELL};
use chrono::{SecondsFormat, Utc};
use std::fmt;
use std::ops::Deref;
use std::path::Path;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Trace => "\x1b[36mTRACE\x1b[0m",
            LogLevel::Debug => "\x1b[34mDEBUG\x1b[0m",
            LogLevel::Info => "INFO ",
            LogLevel::Warn => "\x1b[33mWARN \x1b[0m",
            LogLevel::Error => "\x1b[31mERROR\x1b[0m",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug)]
enum LogRecord {
    Message { level: LogLevel, msg: String, ts_millis: i64 },
    Shutdown,
}

impl LogRecord {
    fn message(level: LogLevel, msg: String) -> Self {
        Self::Message {
            level,
            msg,
            ts_millis: Utc::now().timestamp_millis(),
        }
    }

    fn format_line(&self) -> Option<String> {
        match self {
            LogRecord::Message { level, msg, ts_millis } => {
                let dt = chrono::DateTime::from_timestamp_millis(*ts_millis)
                    .unwrap_or_else(Utc::now);
                let stamp = dt.to_rfc3339_opts(SecondsFormat::Millis, true);
                Some(format!("{} [{}] {}\n", stamp, level, msg))
            }
            LogRecord::Shutdown => None,
        }
    }
}

/// Cloneable sender handle. Dropping the last handle closes the channel
/// and lets the writer task flush and exit.
#[derive(Clone, Debug)]
pub struct AsyncLogger {
    tx: mpsc::Sender<LogRecord>,
}

impl AsyncLogger {
    fn log<S: Into<String>>(&self, level: LogLevel, msg: S) {
        // Channel full or writer gone: drop the line rather than block
        // the watcher threads.
        let _ = self.tx.try_send(LogRecord::message(level, msg.into()));
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(LogRecord::Shutdown).await;
    }

    pub fn trace<S: Into<String>>(&self, msg: S) {
        self.log(LogLevel::Trace, msg);
    }
    pub fn debug<S: Into<String>>(&self, msg: S) {
        if *DEBUG_MODE {
            self.log(LogLevel::Debug, msg);
        }
    }
    pub fn info<S: Into<String>>(&self, msg: S) {
        self.log(LogLevel::Info, msg);
    }
    pub fn warn<S: Into<String>>(&self, msg: S) {
        self.log(LogLevel::Warn, msg);
    }
    pub fn error<S: Into<String>>(&self, msg: S) {
        self.log(LogLevel::Error, msg);
    }
}

/// Open (append) the log file and spawn the writer task.
pub async fn init_file_logger<P: AsRef<Path>>(path: P) -> Result<(AsyncLogger, JoinHandle<()>)> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path.as_ref())
        .await?;

    let (tx, mut rx) = mpsc::channel::<LogRecord>(1024);

    let task = tokio::spawn(async move {
        let mut writer = BufWriter::new(file);
        while let Some(rec) = rx.recv().await {
            match rec.format_line() {
                Some(line) => {
                    let _ = writer.write_all(line.as_bytes()).await;
                    let _ = writer.flush().await;
                }
                None => break, // Shutdown
            }
        }
        let _ = writer.flush().await;
    });

    Ok((AsyncLogger { tx }, task))
}

/// Zero-sized front for the global logger. Dereferences to the installed
/// [`AsyncLogger`], or to a leaked no-op channel before initialisation.
pub(crate) struct Logger;

impl Deref for Logger {
    type Target = AsyncLogger;
    fn deref(&self) -> &Self::Target {
        if let Some(l) = LOGGER_CELL.get() {
            return l;
        }
        let _ = LOGGER_CELL.set(noop_logger());
        LOGGER_CELL.get().expect("LOGGER_CELL just installed")
    }
}

fn noop_logger() -> AsyncLogger {
    // Keep the receiver alive forever so try_send never errors loudly;
    // nothing drains it, so messages are dropped once the buffer fills.
    let (tx, rx) = mpsc::channel::<LogRecord>(64);
    let _ = Box::leak(Box::new(rx));
    AsyncLogger { tx }
}
