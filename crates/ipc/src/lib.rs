//! Framed message transport between the supervisor and its workers.
//!
//! Each endpoint of a `socketpair(AF_UNIX, SOCK_STREAM)` carries a stream
//! of length-framed, typed messages. A message may have a host snapshot
//! payload and may carry a file descriptor as ancillary data; delivering
//! a descriptor transfers its ownership to the receiver. The channel is
//! the only connection between the privileged and unprivileged halves of
//! the daemon, and it is single-use: any error other than would-block is
//! fatal for the owning process.

mod channel;
mod error;
mod frame;
mod message;

pub use channel::{Channel, ChannelReader, ChannelWriter};
pub use error::Error;
pub use message::{HostSnapshot, Message, MsgKind, ReportedStatus};
