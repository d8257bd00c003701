/// Represents all possible errors that can occur in this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The channel to the peer process failed.
    #[error("channel failed: {0}")]
    Ipc(#[from] ipc::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A system call failed.
    #[error("system call failed: {0}")]
    Sys(#[from] nix::errno::Errno),

    /// Error occurred while performing a database operation.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The configured unprivileged user does not exist.
    #[error("unknown user {0}")]
    UnknownUser(String),

    /// More hosts than the 16-bit ICMP identifier space can key.
    #[error("{0} hosts configured, at most 65535 supported")]
    TooManyHosts(usize),

    /// Only IPv4 literals can be probed.
    #[error("cannot probe {name}: {address} is not an IPv4 address")]
    UnsupportedAddress { name: String, address: String },

    /// A raw-socket handoff arrived without its descriptor.
    #[error("raw socket handoff carried no descriptor")]
    MissingDescriptor,
}
