//! Privileged parent process: raw-socket handoff, report relay, and
//! worker lifecycle.

use crate::Error;
use crate::proc::{self, WorkerHandle};
use crate::store::EventStore;
use config::Config;
use ipc::{Channel, ChannelWriter, Message, MsgKind, ReportedStatus};
use std::os::fd::{FromRawFd, OwnedFd};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, info, warn};

/// Open the raw ICMP socket the worker is not privileged to create.
fn icmp_socket() -> Result<OwnedFd, Error> {
    // SAFETY: socket(2) either fails or returns a fresh descriptor that
    // nothing else owns.
    let fd = unsafe {
        libc::socket(
            libc::AF_INET,
            libc::SOCK_RAW | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            libc::IPPROTO_ICMP,
        )
    };
    if fd == -1 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Supervise the worker until a termination signal or its exit.
///
/// Exits the process with status 0 on the graceful paths; returns an
/// error only for fatal runtime failures.
pub async fn run(
    config: &Config,
    store: &dyn EventStore,
    worker: WorkerHandle,
) -> Result<(), Error> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigchld = signal(SignalKind::child())?;
    let mut sighup = signal(SignalKind::hangup())?;

    let children = [worker.pid];
    let (mut reader, mut writer) = Channel::from_fd(worker.endpoint)?;

    // every configured host gets a row before any event references it
    for host in &config.hosts {
        if let Err(err) = store.register_host(&host.name, &host.address).await {
            warn!(host = %host.name, error = %err, "failed to register host");
        }
    }

    info!("started");

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!(signal = "SIGTERM", "shutting down");
                proc::terminate(&children);
            }
            _ = sigint.recv() => {
                info!(signal = "SIGINT", "shutting down");
                proc::terminate(&children);
            }
            _ = sigchld.recv() => {
                info!("child exited, shutting down");
                proc::terminate(&children);
            }
            _ = sighup.recv() => {
                info!("received SIGHUP, reload not implemented");
            }
            message = reader.recv() => match message {
                Ok(message) => dispatch(message, store, &mut writer).await?,
                Err(ipc::Error::Closed) => {
                    info!("worker closed the channel, shutting down");
                    proc::terminate(&children);
                }
                Err(err) => return Err(err.into()),
            },
            result = writer.flush(), if writer.has_pending() => result?,
        }
    }
}

async fn dispatch(
    message: Message,
    store: &dyn EventStore,
    writer: &mut ChannelWriter,
) -> Result<(), Error> {
    match message.kind {
        MsgKind::RawSocket => {
            debug!("worker requested a raw icmp socket");
            let fd = icmp_socket()?;
            writer.send(Message::raw_socket(fd))?;
        }
        MsgKind::HostUp | MsgKind::HostDown => {
            let Some(snapshot) = message.host else {
                debug!(kind = ?message.kind, "host report without snapshot");
                return Ok(());
            };
            match snapshot.status {
                ReportedStatus::Up => {
                    info!(host = %snapshot.name, address = %snapshot.address, "host is now online");
                }
                ReportedStatus::Down => {
                    info!(host = %snapshot.name, address = %snapshot.address, "host is now offline");
                }
            }
            if let Err(err) = store.log_event(&snapshot.name, snapshot.status).await {
                warn!(host = %snapshot.name, error = %err, "failed to record host event");
            }
        }
    }
    Ok(())
}
