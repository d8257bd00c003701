use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::path::{Path, PathBuf};

/// pingmond: privilege-separated host reachability monitor
///
/// A privileged supervisor forks an unprivileged, chrooted worker that
/// sends ICMP echo probes to the configured hosts; up/down transitions
/// are logged and recorded in the event database.
#[derive(Debug, Parser, Clone)]
#[command(about, long_about, version)]
pub(crate) struct Cli {
    /// Path to configuration file.
    #[arg(short, long, value_parser = validate_file)]
    pub(crate) conffile: Option<PathBuf>,

    /// Run in foreground, do not daemonize.
    #[arg(short, long)]
    pub(crate) foreground: bool,

    /// Path to log file.
    ///
    /// Empty string means log to stderr; daemon mode detaches stderr,
    /// so without a log file a daemonized pingmond is silent.
    #[arg(short, long)]
    pub(crate) logfile: Option<PathBuf>,

    #[command(flatten)]
    pub(crate) verbosity: Verbosity<InfoLevel>,
}

/// Check if the file exists.
#[inline(always)]
fn validate_file(file: &str) -> Result<PathBuf, String> {
    let path = Path::new(file);
    if path.exists() {
        Ok(path.to_owned())
    } else {
        Err(format!("File not found: {:?}", path))
    }
}
