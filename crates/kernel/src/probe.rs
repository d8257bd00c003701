//! Worker-side probe engine.
//!
//! Runs unprivileged and chrooted. The only capabilities it ever holds
//! are the channel endpoint it was born with and the raw ICMP socket the
//! supervisor hands over that channel; everything here is driven by one
//! current-thread select loop over the channel, the raw socket, the
//! per-host timers, and the termination signals.

use crate::Error;
use crate::host::{HostTable, TimeoutOutcome};
use crate::packet::{self, PacketError};
use config::{HostEntry, ProbeSettings};
use ipc::{Channel, ChannelWriter, Message, MsgKind};
use nix::sys::signal::{SigHandler, Signal};
use nix::sys::socket::{
    AddressFamily, MsgFlags, SockaddrIn, SockaddrLike, SockaddrStorage, recvfrom, sendto,
};
use std::net::SocketAddrV4;
use std::os::fd::{AsRawFd, OwnedFd};
use tokio::io::unix::AsyncFd;
use tokio::signal::unix::{SignalKind, signal};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, warn};

/// Worker process entry point. Must be called after the privilege drop,
/// never from inside an existing runtime: the worker builds its own.
/// Returns the process exit code.
pub fn worker_main(endpoint: OwnedFd, settings: ProbeSettings, entries: Vec<HostEntry>) -> i32 {
    match run_worker(endpoint, settings, entries) {
        Ok(()) => 0,
        Err(err) => {
            error!(error = %err, "icmp probe failed");
            1
        }
    }
}

fn run_worker(
    endpoint: OwnedFd,
    settings: ProbeSettings,
    entries: Vec<HostEntry>,
) -> Result<(), Error> {
    // none of these affect probing
    for sig in [Signal::SIGPIPE, Signal::SIGHUP, Signal::SIGCHLD] {
        // SAFETY: only the disposition changes, no handler is installed.
        unsafe { nix::sys::signal::signal(sig, SigHandler::SigIgn) }?;
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(endpoint, settings, entries))
}

async fn run(
    endpoint: OwnedFd,
    settings: ProbeSettings,
    entries: Vec<HostEntry>,
) -> Result<(), Error> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let (mut reader, mut writer) = Channel::from_fd(endpoint)?;
    let mut table = HostTable::from_entries(&entries, settings)?;
    for host in table.hosts() {
        debug!(host = %host.name, address = %host.address, id = host.id, "registered icmp probe");
    }

    let mut raw: Option<AsyncFd<OwnedFd>> = None;

    // ask the supervisor for the raw socket; probing starts when it
    // arrives
    writer.send(Message::raw_socket_request())?;

    loop {
        let next_deadline = table.next_deadline();
        tokio::select! {
            _ = sigterm.recv() => exit_now("SIGTERM"),
            _ = sigint.recv() => exit_now("SIGINT"),
            message = reader.recv() => {
                handle_message(message?, &mut table, &mut raw)?;
            }
            result = writer.flush(), if writer.has_pending() => result?,
            datagram = recv_from_raw(&raw), if raw.is_some() => {
                let (buf, src) = datagram?;
                handle_datagram(&buf, src, &mut table, &mut writer)?;
            }
            _ = sleep_until(next_deadline.unwrap()),
                if next_deadline.is_some() =>
            {
                handle_timeouts(&mut table, &mut writer, raw.as_ref())?;
            }
        }
    }
}

fn exit_now(signal: &str) -> ! {
    debug!(signal, "icmp probe exiting");
    std::process::exit(0);
}

fn handle_message(
    message: Message,
    table: &mut HostTable,
    raw: &mut Option<AsyncFd<OwnedFd>>,
) -> Result<(), Error> {
    match message.kind {
        MsgKind::RawSocket => {
            let fd = message.fd.ok_or(Error::MissingDescriptor)?;
            let socket = AsyncFd::new(fd)?;
            debug!("received raw icmp socket");

            // probe every configured host right away
            let now = Instant::now();
            for id in table.ids() {
                send_probe(table, &socket, id, now);
            }
            if raw.replace(socket).is_some() {
                warn!("raw socket handed off twice");
            }
        }
        kind => debug!(?kind, "unhandled message type"),
    }
    Ok(())
}

/// Build, track, and transmit one echo request, then rearm the host's
/// timer. A transmit failure is logged and leaves the schedule intact.
fn send_probe(table: &mut HostTable, socket: &AsyncFd<OwnedFd>, id: u16, now: Instant) {
    let settings = table.settings;
    let Some(host) = table.host_mut(id) else {
        return;
    };
    let seq = host.next_seq();
    let bytes = packet::echo_request(host.id, seq);
    host.record_probe(seq, bytes.clone(), now);

    let dest = SockaddrIn::from(SocketAddrV4::new(host.addr, 0));
    match sendto(socket.as_raw_fd(), &bytes, &dest, MsgFlags::empty()) {
        Ok(_) => {
            debug!(host = %host.name, address = %host.address, id = host.id, seq, "sent echo request");
        }
        Err(err) => {
            warn!(host = %host.name, address = %host.address, error = %err, "sendto failed");
        }
    }
    host.arm_timer(now, &settings);
}

/// Read one datagram off the raw socket, retrying only on would-block.
async fn recv_from_raw(
    raw: &Option<AsyncFd<OwnedFd>>,
) -> Result<(Vec<u8>, Option<SockaddrStorage>), Error> {
    let Some(socket) = raw else {
        return std::future::pending().await;
    };
    let mut buf = [0u8; 1536];
    loop {
        let mut guard = socket.readable().await?;
        let result = guard.try_io(|inner| {
            recvfrom::<SockaddrStorage>(inner.as_raw_fd(), &mut buf)
                .map_err(std::io::Error::from)
        });
        match result {
            Ok(Ok((len, src))) => return Ok((buf[..len].to_vec(), src)),
            Ok(Err(err)) => return Err(err.into()),
            Err(_would_block) => continue,
        }
    }
}

fn handle_datagram(
    datagram: &[u8],
    src: Option<SockaddrStorage>,
    table: &mut HostTable,
    writer: &mut ChannelWriter,
) -> Result<(), Error> {
    match src.as_ref().and_then(SockaddrStorage::family) {
        Some(AddressFamily::Inet) => {}
        family => {
            debug!(?family, "unsupported source family");
            return Ok(());
        }
    }

    let reply = match packet::parse_reply(datagram) {
        Ok(reply) => reply,
        Err(PacketError::TooShort(len)) => {
            debug!(len, "packet too small");
            return Ok(());
        }
        Err(PacketError::NotEchoReply(icmp_type)) => {
            debug!(icmp_type, kind = packet::type_name(icmp_type), "ignoring non-reply icmp");
            return Ok(());
        }
    };

    let now = Instant::now();
    let settings = table.settings;
    let Some(host) = table.host_mut(reply.id) else {
        debug!(id = reply.id, "received icmp reply, but it's not for us");
        return Ok(());
    };
    let Some(outcome) = host.on_reply(reply.seq, now, settings.retries) else {
        debug!(host = %host.name, seq = reply.seq, "out-of-sequence reply");
        return Ok(());
    };

    debug!(host = %host.name, seq = reply.seq, rtt_us = outcome.rtt.as_micros() as u64, "reply matched");
    if outcome.came_up {
        debug!(host = %host.name, address = %host.address, "host is up");
        writer.send(Message::host_up(host.snapshot()))?;
    }
    host.arm_timer(now, &settings);
    Ok(())
}

fn handle_timeouts(
    table: &mut HostTable,
    writer: &mut ChannelWriter,
    socket: Option<&AsyncFd<OwnedFd>>,
) -> Result<(), Error> {
    let now = Instant::now();
    let settings = table.settings;
    for id in table.due(now) {
        let outcome = match table.host_mut(id) {
            Some(host) => host.on_timeout(),
            None => continue,
        };
        match outcome {
            TimeoutOutcome::WentDown => {
                if let Some(host) = table.host_mut(id) {
                    debug!(host = %host.name, address = %host.address, "host is down");
                    host.arm_timer(now, &settings);
                    writer.send(Message::host_down(host.snapshot()))?;
                }
            }
            TimeoutOutcome::Retry => match socket {
                Some(socket) => send_probe(table, socket, id, now),
                None => {
                    // no socket yet; keep the schedule alive
                    if let Some(host) = table.host_mut(id) {
                        host.arm_timer(now, &settings);
                    }
                }
            },
        }
    }
    Ok(())
}
