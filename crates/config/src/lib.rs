#![forbid(unsafe_code)]

mod error;
mod host;
mod probe;

pub use error::Error;
pub use host::HostEntry;
pub use probe::ProbeSettings;

use figment::{
    Figment,
    providers::{Format, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Configuration path used when none is given on the command line.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/pingmond.conf";

/// Daemon configuration, loaded once at startup.
///
/// The supervisor keeps the whole value; the worker only ever sees the
/// probe settings and the host list, since everything else concerns the
/// privileged side of the fork.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Unprivileged user the worker runs as.
    pub user: String,

    /// Worker chroot directory. Defaults to the user's home directory.
    pub chroot: Option<PathBuf>,

    /// Path to the SQLite event database. Unset means events are not
    /// persisted.
    pub database: Option<PathBuf>,

    pub probe: ProbeSettings,

    pub hosts: Vec<HostEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user: "nobody".into(),
            chroot: None,
            database: None,
            probe: ProbeSettings::default(),
            hosts: Vec::new(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let config: Config = Figment::new().merge(Toml::file(path.as_ref())).extract()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.user.is_empty() {
            return Err(Error::MissingUser);
        }
        let mut seen = HashSet::new();
        for host in &self.hosts {
            if !seen.insert(host.name.as_str()) {
                return Err(Error::DuplicateHost(host.name.clone()));
            }
            if host.address.is_empty() {
                return Err(Error::EmptyAddress(host.name.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_match_daemon_constants() {
        let config = Config::new();
        assert_eq!(config.user, "nobody");
        assert_eq!(config.probe.interval, Duration::from_secs(10));
        assert_eq!(config.probe.down_interval, Duration::from_secs(60));
        assert_eq!(config.probe.retries, 3);
        assert!(config.hosts.is_empty());
    }

    #[test]
    fn load_full_config() {
        let file = write_config(
            r#"
            user = "_pingmond"
            chroot = "/var/empty"
            database = "/var/db/pingmond.sqlite3"

            [probe]
            interval = 5
            down_interval = 120
            retries = 5

            [[hosts]]
            name = "gw"
            address = "192.168.1.1"

            [[hosts]]
            name = "dns"
            address = "9.9.9.9"
            "#,
        );

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.user, "_pingmond");
        assert_eq!(config.chroot.as_deref(), Some(Path::new("/var/empty")));
        assert_eq!(config.probe.interval, Duration::from_secs(5));
        assert_eq!(config.probe.down_interval, Duration::from_secs(120));
        assert_eq!(config.probe.retries, 5);
        assert_eq!(config.hosts.len(), 2);
        assert_eq!(config.hosts[1].name, "dns");
        assert_eq!(config.hosts[1].address, "9.9.9.9");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load("/nonexistent/pingmond.conf").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn malformed_toml_is_rejected() {
        let file = write_config("user = [broken");
        assert!(matches!(Config::load(file.path()), Err(Error::Load(_))));
    }

    #[test]
    fn duplicate_host_names_are_rejected() {
        let file = write_config(
            r#"
            [[hosts]]
            name = "gw"
            address = "192.168.1.1"

            [[hosts]]
            name = "gw"
            address = "192.168.1.2"
            "#,
        );
        assert!(matches!(
            Config::load(file.path()),
            Err(Error::DuplicateHost(name)) if name == "gw"
        ));
    }

    #[test]
    fn empty_address_is_rejected() {
        let file = write_config(
            r#"
            [[hosts]]
            name = "gw"
            address = ""
            "#,
        );
        assert!(matches!(
            Config::load(file.path()),
            Err(Error::EmptyAddress(name)) if name == "gw"
        ));
    }
}
