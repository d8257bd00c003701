#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::time::Duration;

#[serde_as]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProbeSettings {
    /// Seconds between probes while a host is reachable or undetermined.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub interval: Duration,

    /// Seconds between probes once a host has been marked down.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub down_interval: Duration,

    /// Consecutive missed replies tolerated before a host is marked down.
    pub retries: u32,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            down_interval: Duration::from_secs(60),
            retries: 3,
        }
    }
}
