#![forbid(unsafe_code)]

//! Monitored hosts and the per-host reachability state machine.
//!
//! The table owns every host, keyed by ICMP identifier; each host owns
//! its outstanding probes, keyed by sequence number. State transitions
//! are computed here and returned as outcomes; the probe engine turns
//! them into packets, reports, and timer deadlines.

use crate::Error;
use config::{HostEntry, ProbeSettings};
use ipc::{HostSnapshot, ReportedStatus};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::time::Instant;

/// Reachability of one monitored host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostStatus {
    /// No reply seen yet; compares as not-up.
    Unknown,
    Up,
    Down,
}

/// One in-flight echo request.
#[derive(Debug)]
pub struct Probe {
    pub seq: u16,
    pub sent_at: Instant,
    pub bytes: Vec<u8>,
}

/// Outcome of a timer expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutOutcome {
    /// Retry budget exhausted: the host was marked down and its
    /// outstanding probes discarded. Report it and reschedule on the
    /// down-state interval.
    WentDown,
    /// Send another probe.
    Retry,
}

/// Outcome of a matched echo reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyOutcome {
    /// The reply moved the host out of a not-up state; report it.
    pub came_up: bool,
    /// Round-trip time of the matched probe.
    pub rtt: Duration,
}

/// One monitored target and its probe state.
#[derive(Debug)]
pub struct Host {
    pub id: u16,
    pub name: String,
    pub address: String,
    pub addr: Ipv4Addr,
    status: HostStatus,
    seq: u16,
    retries_left: u32,
    outstanding: BTreeMap<u16, Probe>,
    deadline: Option<Instant>,
}

impl Host {
    fn new(id: u16, entry: &HostEntry, addr: Ipv4Addr, retries: u32) -> Self {
        Self {
            id,
            name: entry.name.clone(),
            address: entry.address.clone(),
            addr,
            status: HostStatus::Unknown,
            seq: 0,
            retries_left: retries,
            outstanding: BTreeMap::new(),
            deadline: None,
        }
    }

    pub fn status(&self) -> HostStatus {
        self.status
    }

    pub fn retries_left(&self) -> u32 {
        self.retries_left
    }

    pub fn outstanding_len(&self) -> usize {
        self.outstanding.len()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Sequence number for the next probe (post-increment, wrapping).
    pub fn next_seq(&mut self) -> u16 {
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);
        seq
    }

    /// Track an in-flight probe. A wraparound collision replaces the
    /// stale entry, keeping sequence numbers unique among outstanding
    /// probes.
    pub fn record_probe(&mut self, seq: u16, bytes: Vec<u8>, now: Instant) {
        self.outstanding.insert(
            seq,
            Probe {
                seq,
                sent_at: now,
                bytes,
            },
        );
    }

    /// Overwrite the host's timer deadline. Down hosts are rechecked on
    /// the longer interval.
    pub fn arm_timer(&mut self, now: Instant, settings: &ProbeSettings) {
        let interval = match self.status {
            HostStatus::Down => settings.down_interval,
            _ => settings.interval,
        };
        self.deadline = Some(now + interval);
    }

    /// The timer fired: either the host exhausted its retry budget and
    /// goes down, or a retry is due.
    pub fn on_timeout(&mut self) -> TimeoutOutcome {
        if self.status != HostStatus::Down && self.retries_left == 0 {
            self.status = HostStatus::Down;
            // no more replies are expected from a down host
            self.outstanding.clear();
            return TimeoutOutcome::WentDown;
        }
        if self.retries_left > 0 {
            self.retries_left -= 1;
        }
        TimeoutOutcome::Retry
    }

    /// A reply matched this host's identifier. Returns `None` when the
    /// sequence number has no outstanding probe (stale or duplicate);
    /// host state is untouched in that case.
    pub fn on_reply(&mut self, seq: u16, now: Instant, retries: u32) -> Option<ReplyOutcome> {
        let probe = self.outstanding.remove(&seq)?;
        let came_up = self.status != HostStatus::Up;
        self.status = HostStatus::Up;
        self.retries_left = retries;
        Some(ReplyOutcome {
            came_up,
            rtt: now.duration_since(probe.sent_at),
        })
    }

    /// The fields reported to the supervisor.
    pub fn snapshot(&self) -> HostSnapshot {
        HostSnapshot {
            name: self.name.clone(),
            address: self.address.clone(),
            status: match self.status {
                HostStatus::Up => ReportedStatus::Up,
                _ => ReportedStatus::Down,
            },
        }
    }
}

/// All monitored hosts, keyed by ICMP identifier.
#[derive(Debug)]
pub struct HostTable {
    hosts: BTreeMap<u16, Host>,
    pub settings: ProbeSettings,
}

impl HostTable {
    /// Build the table from configuration. Identifiers are assigned
    /// densely from 1 in configuration order; the identifier doubles as
    /// the ICMP echo id, so the host count is bounded by the 16-bit
    /// space. Addresses must be IPv4 literals.
    pub fn from_entries(entries: &[HostEntry], settings: ProbeSettings) -> Result<Self, Error> {
        if entries.len() > usize::from(u16::MAX) {
            return Err(Error::TooManyHosts(entries.len()));
        }
        let mut hosts = BTreeMap::new();
        for (index, entry) in entries.iter().enumerate() {
            let id = index as u16 + 1;
            let addr: Ipv4Addr =
                entry
                    .address
                    .parse()
                    .map_err(|_| Error::UnsupportedAddress {
                        name: entry.name.clone(),
                        address: entry.address.clone(),
                    })?;
            hosts.insert(id, Host::new(id, entry, addr, settings.retries));
        }
        Ok(Self { hosts, settings })
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn ids(&self) -> Vec<u16> {
        self.hosts.keys().copied().collect()
    }

    pub fn hosts(&self) -> impl Iterator<Item = &Host> {
        self.hosts.values()
    }

    /// Route an identifier to its host, the sole key used for inbound
    /// replies.
    pub fn host_mut(&mut self, id: u16) -> Option<&mut Host> {
        self.hosts.get_mut(&id)
    }

    pub fn host(&self, id: u16) -> Option<&Host> {
        self.hosts.get(&id)
    }

    /// Hosts whose timer deadline has passed.
    pub fn due(&self, now: Instant) -> Vec<u16> {
        self.hosts
            .values()
            .filter(|host| host.deadline.is_some_and(|deadline| deadline <= now))
            .map(|host| host.id)
            .collect()
    }

    /// The earliest armed deadline, if any host has one.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.hosts.values().filter_map(|host| host.deadline).min()
    }
}
