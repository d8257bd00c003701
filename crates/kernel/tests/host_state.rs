//! End-to-end drives of the host state machine, mirroring the daemon's
//! timer and reply paths without sockets.

use config::{HostEntry, ProbeSettings};
use ipc::ReportedStatus;
use kernel::host::{HostStatus, HostTable, TimeoutOutcome};
use tokio::time::Instant;

fn table(names: &[(&str, &str)], retries: u32) -> HostTable {
    let entries: Vec<HostEntry> = names
        .iter()
        .map(|(name, address)| HostEntry {
            name: (*name).into(),
            address: (*address).into(),
        })
        .collect();
    let settings = ProbeSettings {
        retries,
        ..ProbeSettings::default()
    };
    HostTable::from_entries(&entries, settings).unwrap()
}

#[test]
fn silent_host_reports_down_exactly_once() {
    let mut table = table(&[("h1", "10.0.0.1")], 3);
    let now = Instant::now();

    let host = table.host_mut(1).unwrap();
    let seq = host.next_seq();
    host.record_probe(seq, vec![], now);

    // drive the timer far past the retry budget, counting down reports
    let mut down_reports = 0;
    for _ in 0..20 {
        if host.on_timeout() == TimeoutOutcome::WentDown {
            down_reports += 1;
            assert_eq!(host.snapshot().status, ReportedStatus::Down);
        } else {
            let seq = host.next_seq();
            host.record_probe(seq, vec![], now);
        }
    }
    assert_eq!(down_reports, 1);
    assert_eq!(host.status(), HostStatus::Down);
}

#[test]
fn down_host_recovery_reports_up_exactly_once() {
    let mut table = table(&[("h1", "10.0.0.1")], 3);
    let now = Instant::now();
    let settings = table.settings;

    let host = table.host_mut(1).unwrap();
    while host.on_timeout() != TimeoutOutcome::WentDown {}
    host.arm_timer(now, &settings);
    assert_eq!(host.deadline(), Some(now + settings.down_interval));

    // a down-state recheck whose probe is answered
    let seq = host.next_seq();
    host.record_probe(seq, vec![], now);
    let outcome = host.on_reply(seq, now, settings.retries).unwrap();
    assert!(outcome.came_up);
    assert_eq!(host.status(), HostStatus::Up);
    assert_eq!(host.retries_left(), settings.retries);
    assert_eq!(host.snapshot().status, ReportedStatus::Up);

    // replies while up do not report again
    let seq = host.next_seq();
    host.record_probe(seq, vec![], now);
    assert!(!host.on_reply(seq, now, settings.retries).unwrap().came_up);
}

#[test]
fn socket_handoff_with_no_hosts_is_a_noop() {
    let table = table(&[], 3);
    assert!(table.is_empty());
    assert!(table.ids().is_empty());
    assert_eq!(table.next_deadline(), None);
    assert!(table.due(Instant::now()).is_empty());
}

#[test]
fn stale_replies_never_disturb_a_determined_host() {
    let mut table = table(&[("h1", "10.0.0.1"), ("h2", "10.0.0.2")], 3);
    let now = Instant::now();
    let settings = table.settings;

    let host = table.host_mut(2).unwrap();
    let seq = host.next_seq();
    host.record_probe(seq, vec![], now);
    host.on_reply(seq, now, settings.retries).unwrap();
    assert_eq!(host.status(), HostStatus::Up);

    // duplicate of the already-matched sequence
    assert!(host.on_reply(seq, now, settings.retries).is_none());
    assert_eq!(host.status(), HostStatus::Up);
    assert_eq!(host.retries_left(), settings.retries);
}

#[test]
fn identifier_space_is_bounded() {
    let entries: Vec<HostEntry> = (0..=u16::MAX as usize)
        .map(|i| HostEntry {
            name: format!("h{i}"),
            address: "10.0.0.1".into(),
        })
        .collect();
    let err = HostTable::from_entries(&entries, ProbeSettings::default()).unwrap_err();
    assert!(matches!(err, kernel::Error::TooManyHosts(_)));
}
