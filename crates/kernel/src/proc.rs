//! Worker spawning and privilege separation.
//!
//! The supervisor is the only privileged process. Each worker is forked
//! with one end of a socketpair, chrooted, and stripped of group and
//! user identity before its role code runs; the raw ICMP socket it
//! needs later is handed to it over the channel instead.

use crate::Error;
use config::Config;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::socket::{AddressFamily, SockFlag, SockType, socketpair};
use nix::sys::wait::waitpid;
use nix::unistd::{ForkResult, Pid, User, chdir, chroot, fork, setgroups, setresgid, setresuid};
use std::os::fd::OwnedFd;
use tracing::{debug, error, warn};

/// Parent-side record of a spawned worker.
#[derive(Debug)]
pub struct WorkerHandle {
    pub name: &'static str,
    pub pid: Pid,
    pub endpoint: OwnedFd,
}

/// Fork a worker: socketpair, fork, chroot and privilege drop in the
/// child, then the role entry point. The child never returns from this
/// call; a failure before the privilege drop aborts it, which the
/// supervisor observes as SIGCHLD and treats as a termination request.
///
/// Must be called while the process is still single-threaded, before
/// any runtime is built.
pub fn spawn<F>(config: &Config, name: &'static str, role: F) -> Result<WorkerHandle, Error>
where
    F: FnOnce(OwnedFd) -> i32,
{
    let (parent_end, child_end) = socketpair(
        AddressFamily::Unix,
        SockType::Stream,
        None,
        SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
    )?;

    // SAFETY: single-threaded here; only async-signal-safe state exists
    // between fork and the child's exit path.
    match unsafe { fork() }? {
        ForkResult::Parent { child } => {
            drop(child_end);
            debug!(name, pid = child.as_raw(), "spawned worker");
            Ok(WorkerHandle {
                name,
                pid: child,
                endpoint: parent_end,
            })
        }
        ForkResult::Child => {
            drop(parent_end);
            let code = match drop_privileges(config) {
                Ok(()) => role(child_end),
                Err(err) => {
                    error!(error = %err, "failed to drop privileges");
                    1
                }
            };
            std::process::exit(code);
        }
    }
}

/// Chroot and irreversibly become the configured unprivileged user.
fn drop_privileges(config: &Config) -> Result<(), Error> {
    let user = User::from_name(&config.user)?
        .ok_or_else(|| Error::UnknownUser(config.user.clone()))?;

    // the user's home is the chroot unless one is configured
    let root = match &config.chroot {
        Some(dir) => dir.clone(),
        None => user.dir.clone(),
    };
    chroot(root.as_path())?;
    chdir("/")?;

    setgroups(&[user.gid])?;
    setresgid(user.gid, user.gid, user.gid)?;
    setresuid(user.uid, user.uid, user.uid)?;
    Ok(())
}

/// SIGTERM every child, reap them all retrying interrupted waits, then
/// exit 0: the graceful shutdown path.
pub fn terminate(children: &[Pid]) -> ! {
    for pid in children {
        if let Err(err) = kill(*pid, Signal::SIGTERM) {
            warn!(pid = pid.as_raw(), error = %err, "failed to signal child");
        }
    }
    loop {
        match waitpid(None::<Pid>, None) {
            Ok(_) => {}
            Err(Errno::EINTR) => {}
            Err(Errno::ECHILD) => break,
            Err(err) => {
                warn!(error = %err, "wait failed");
                break;
            }
        }
    }
    std::process::exit(0);
}
