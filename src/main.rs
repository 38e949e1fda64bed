use crate::config::{Config, Opts, get_or_create_config};
use crate::err::Result;
use crate::global_var::{LOGGER, LOGGER_CELL};
use crate::utilities::init_file_logger;
use crate::watch::{WatchFlags, WatcherManager};
use std::path::{Path, PathBuf};
use tokio::task::JoinHandle;

mod config;
mod err;
mod global_var;
mod utilities;
mod watch;

fn print_version_and_exit() -> ! {
    // Stamped by build.rs; unknown when built outside a checkout.
    let pkg_version = env!("CARGO_PKG_VERSION");
    let commit = option_env!("GIT_COMMIT").unwrap_or("unknown");
    let state = option_env!("GIT_STATE").unwrap_or("unknown");
    let built = option_env!("BUILD_TIME").unwrap_or("unknown time");
    println!(
        "file-activity {} (commit: {}, state: {}, built: {})",
        pkg_version, commit, state, built
    );
    std::process::exit(0)
}

async fn init_logging(config: &Config) -> Result<JoinHandle<()>> {
    let log_dir = Path::new(&config.log.dir);
    std::fs::create_dir_all(log_dir)?;
    let log_file = log_dir.join("file-activity.log");
    let (logger, handle) = init_file_logger(&log_file).await?;
    LOGGER_CELL
        .set(logger)
        .map_err(|_| crate::watch_error!("logger already initialized"))?;
    Ok(handle)
}

#[tokio::main]
async fn main() {
    let opts = Opts::from_args();

    if opts.version {
        print_version_and_exit();
    }
    if opts.debug {
        // SAFETY: set before any thread reads the flag.
        unsafe { std::env::set_var("DEBUG_MODE", "1") };
    }

    let config_path = opts
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from("file-activity.toml"));
    let config = match get_or_create_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration {}: {}", config_path.display(), e);
            std::process::exit(1);
        }
    };

    let logger_handle = match init_logging(&config).await {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("failed to initialize logging: {}", e);
            std::process::exit(1);
        }
    };

    LOGGER.info(format!(
        "file-activity starting (config: {})",
        config_path.display()
    ));

    let mut manager = WatcherManager::new(config);
    if let Err(e) = manager.start(WatchFlags::all(), true).await {
        LOGGER.error(format!("failed to start watchers: {}", e));
        eprintln!("failed to start watchers: {}", e);
        std::process::exit(1);
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => LOGGER.info("interrupt received; shutting down"),
        Err(e) => LOGGER.error(format!("cannot listen for interrupt: {}", e)),
    }

    manager.stop().await;

    LOGGER.shutdown().await;
    let _ = logger_handle.await;
}
