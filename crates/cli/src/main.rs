mod cli;

use crate::cli::Cli;
use anyhow::Context;
use clap::Parser;
use config::Config;
use kernel::store::{EventStore, NoopStore, SqliteStore};
use kernel::{probe, proc, supervisor};
use nix::sys::signal::{SigHandler, Signal};
use nix::unistd::{Uid, User, daemon};
use std::fs::File;
use std::sync::Mutex;
use tracing::{debug, warn};
use tracing_log::AsTrace;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    debug!(config = ?cli);

    if !Uid::effective().is_root() {
        anyhow::bail!("need root privileges");
    }

    let config = match &cli.conffile {
        Some(path) => Config::load(path)?,
        None => Config::load(config::DEFAULT_CONFIG_PATH)?,
    };

    // validate everything the fork depends on before forking
    if let Some(chroot) = &config.chroot {
        if !chroot.is_dir() {
            anyhow::bail!("could not open chroot directory {}", chroot.display());
        }
    }
    if User::from_name(&config.user)?.is_none() {
        anyhow::bail!("unknown user {}", config.user);
    }

    if !cli.foreground {
        daemon(true, false).context("daemonize")?;
    }

    // the worker installs its own dispositions after the fork
    // SAFETY: only the disposition changes, no handler is installed.
    unsafe { nix::sys::signal::signal(Signal::SIGPIPE, SigHandler::SigIgn) }?;

    let settings = config.probe;
    let hosts = config.hosts.clone();
    let worker = proc::spawn(&config, "icmp probe", move |endpoint| {
        probe::worker_main(endpoint, settings, hosts)
    })?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        let store: Box<dyn EventStore> = match &config.database {
            Some(path) => match SqliteStore::open(path).await {
                Ok(store) => Box::new(store),
                Err(err) => {
                    warn!(error = %err, "failed to open event database");
                    Box::new(NoopStore)
                }
            },
            None => Box::new(NoopStore),
        };
        supervisor::run(&config, store.as_ref(), worker).await
    })?;
    Ok(())
}

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_max_level(cli.verbosity.log_level_filter().as_trace())
        .with_level(true)
        .with_file(true)
        .with_line_number(true);
    match &cli.logfile {
        Some(path) => {
            let file = File::options().create(true).append(true).open(path)?;
            builder.with_writer(Mutex::new(file)).with_ansi(false).init();
        }
        None => builder.init(),
    }
    Ok(())
}
