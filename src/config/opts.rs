use std::path::PathBuf;
use structopt::StructOpt;
use structopt::clap::ErrorKind;

/// Command-line options for the watcher daemon.
///
/// Examples:
/// - Run with a specific config file:
///   cargo run -- --config activity.toml
/// - Show version:
///   cargo run -- --version
#[derive(StructOpt, Debug)]
pub struct Opts {
    #[structopt(short = "v", long = "version")]
    pub version: bool,

    #[structopt(short, long, help = "Enable debug mode (verbose logging)")]
    pub debug: bool,

    #[structopt(
        short = "c",
        long = "config",
        help = "Path to the configuration file; a default file is created there when missing."
    )]
    pub config: Option<PathBuf>,
}

impl Opts {
    /// Parse CLI arguments. On failure, print the error and the full help,
    /// then exit.
    pub fn from_args() -> Self {
        let app = Opts::clap();
        match app.get_matches_safe() {
            Ok(m) => Opts::from_clap(&m),
            Err(e) => {
                let kind = e.kind;
                eprintln!("{}", e);
                let mut app = Opts::clap();
                eprintln!();
                let _ = app.print_long_help();
                eprintln!();
                std::process::exit(match kind {
                    ErrorKind::HelpDisplayed | ErrorKind::VersionDisplayed => 0,
                    _ => 2,
                });
            }
        }
    }
}
