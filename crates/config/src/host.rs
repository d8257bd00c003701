#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

/// One monitored target as written in the configuration file.
///
/// The address must be an IPv4 literal; host names are not resolved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostEntry {
    pub name: String,
    pub address: String,
}
