#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::os::fd::OwnedFd;

/// Message type discriminant on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MsgKind {
    /// Raw ICMP socket: a request when sent by the worker (no payload,
    /// no descriptor), a handoff when sent by the supervisor (descriptor
    /// attached).
    RawSocket = 0,
    HostUp = 1,
    HostDown = 2,
}

impl MsgKind {
    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::RawSocket),
            1 => Some(Self::HostUp),
            2 => Some(Self::HostDown),
            _ => None,
        }
    }
}

/// Reachability as carried in host reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportedStatus {
    Up,
    Down,
}

/// The host fields reported with a state transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostSnapshot {
    pub name: String,
    pub address: String,
    pub status: ReportedStatus,
}

/// A typed envelope, consumed exactly once by the receiver.
#[derive(Debug)]
pub struct Message {
    pub kind: MsgKind,
    pub host: Option<HostSnapshot>,
    pub fd: Option<OwnedFd>,
}

impl Message {
    pub fn raw_socket_request() -> Self {
        Self {
            kind: MsgKind::RawSocket,
            host: None,
            fd: None,
        }
    }

    pub fn raw_socket(fd: OwnedFd) -> Self {
        Self {
            kind: MsgKind::RawSocket,
            host: None,
            fd: Some(fd),
        }
    }

    pub fn host_up(host: HostSnapshot) -> Self {
        Self {
            kind: MsgKind::HostUp,
            host: Some(host),
            fd: None,
        }
    }

    pub fn host_down(host: HostSnapshot) -> Self {
        Self {
            kind: MsgKind::HostDown,
            host: Some(host),
            fd: None,
        }
    }
}
