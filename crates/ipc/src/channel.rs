use crate::error::Error;
use crate::frame;
use crate::message::{Message, MsgKind};
use nix::cmsg_space;
use nix::sys::socket::{ControlMessage, ControlMessageOwned, MsgFlags, recvmsg, sendmsg};
use std::collections::VecDeque;
use std::io::{IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::Arc;
use tokio::io::unix::AsyncFd;
use tracing::debug;

const READ_CHUNK: usize = 16 * 1024;

/// One endpoint of the supervisor/worker channel.
///
/// The endpoint splits into a receive half and a send half sharing the
/// same descriptor, so a single select loop can wait on inbound frames
/// while opportunistically flushing queued outbound ones.
pub struct Channel;

impl Channel {
    /// Wrap one side of the spawn socketpair. The descriptor must be
    /// non-blocking, and the call must happen inside a runtime.
    pub fn from_fd(fd: OwnedFd) -> Result<(ChannelReader, ChannelWriter), Error> {
        let fd = Arc::new(AsyncFd::new(fd)?);
        let reader = ChannelReader {
            fd: Arc::clone(&fd),
            buf: Vec::new(),
            fds: VecDeque::new(),
        };
        let writer = ChannelWriter {
            fd,
            queue: VecDeque::new(),
        };
        Ok((reader, writer))
    }
}

/// Receive half: buffers partial frames and queued descriptors.
pub struct ChannelReader {
    fd: Arc<AsyncFd<OwnedFd>>,
    buf: Vec<u8>,
    fds: VecDeque<OwnedFd>,
}

impl ChannelReader {
    /// Receive the next complete message, waiting for readability as
    /// needed. Frames with an unknown type discriminant are dropped.
    /// Returns [`Error::Closed`] once the peer has shut down.
    pub async fn recv(&mut self) -> Result<Message, Error> {
        loop {
            while let Some((raw, consumed)) = frame::decode(&self.buf)? {
                self.buf.drain(..consumed);
                let Some(kind) = MsgKind::from_u32(raw.kind) else {
                    debug!(kind = raw.kind, "unhandled message type");
                    continue;
                };
                let host = if raw.payload.is_empty() {
                    None
                } else {
                    Some(bincode::deserialize(&raw.payload)?)
                };
                let fd = match kind {
                    MsgKind::RawSocket => self.fds.pop_front(),
                    _ => None,
                };
                return Ok(Message { kind, host, fd });
            }
            self.fill().await?;
        }
    }

    /// Read whatever is available, collecting any passed descriptors.
    async fn fill(&mut self) -> Result<(), Error> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let mut guard = self.fd.readable().await?;
            let result = guard.try_io(|inner| {
                let mut iov = [IoSliceMut::new(&mut chunk)];
                let mut cmsg = cmsg_space!([RawFd; 4]);
                let msg = recvmsg::<()>(
                    inner.as_raw_fd(),
                    &mut iov,
                    Some(&mut cmsg),
                    MsgFlags::MSG_CMSG_CLOEXEC,
                )
                .map_err(std::io::Error::from)?;
                let mut fds = Vec::new();
                for cmsg in msg.cmsgs().map_err(std::io::Error::from)? {
                    if let ControlMessageOwned::ScmRights(received) = cmsg {
                        fds.extend(received);
                    }
                }
                Ok((msg.bytes, fds))
            });
            match result {
                Ok(Ok((bytes, fds))) => {
                    for fd in fds {
                        // SAFETY: SCM_RIGHTS installed a fresh descriptor
                        // that nothing else owns.
                        self.fds.push_back(unsafe { OwnedFd::from_raw_fd(fd) });
                    }
                    if bytes == 0 {
                        return Err(Error::Closed);
                    }
                    self.buf.extend_from_slice(&chunk[..bytes]);
                    return Ok(());
                }
                Ok(Err(err)) => return Err(err.into()),
                Err(_would_block) => continue,
            }
        }
    }
}

struct PendingFrame {
    bytes: Vec<u8>,
    offset: usize,
    fd: Option<OwnedFd>,
}

/// Send half: `send` frames and enqueues without blocking; `flush`
/// drives the queue whenever the owning loop sees output pending.
pub struct ChannelWriter {
    fd: Arc<AsyncFd<OwnedFd>>,
    queue: VecDeque<PendingFrame>,
}

impl ChannelWriter {
    /// Frame and enqueue a message. Delivery happens in [`flush`].
    ///
    /// [`flush`]: ChannelWriter::flush
    pub fn send(&mut self, message: Message) -> Result<(), Error> {
        let bytes = frame::encode(message.kind, message.host.as_ref())?;
        self.queue.push_back(PendingFrame {
            bytes,
            offset: 0,
            fd: message.fd,
        });
        Ok(())
    }

    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Write queued frames until the queue is empty, waiting for
    /// writability between partial writes. An attached descriptor
    /// travels with its frame's first chunk and is closed locally once
    /// the kernel has duplicated it for the peer.
    pub async fn flush(&mut self) -> Result<(), Error> {
        while let Some(front) = self.queue.front_mut() {
            let mut guard = self.fd.writable().await?;
            let result = guard.try_io(|inner| {
                let iov = [IoSlice::new(&front.bytes[front.offset..])];
                let sent = match &front.fd {
                    Some(fd) => {
                        let rights = [fd.as_raw_fd()];
                        let cmsgs = [ControlMessage::ScmRights(&rights)];
                        sendmsg::<()>(inner.as_raw_fd(), &iov, &cmsgs, MsgFlags::empty(), None)
                    }
                    None => sendmsg::<()>(inner.as_raw_fd(), &iov, &[], MsgFlags::empty(), None),
                };
                sent.map_err(std::io::Error::from)
            });
            match result {
                Ok(Ok(sent)) => {
                    front.fd = None;
                    front.offset += sent;
                    if front.offset >= front.bytes.len() {
                        self.queue.pop_front();
                    }
                }
                Ok(Err(err)) => return Err(err.into()),
                Err(_would_block) => continue,
            }
        }
        Ok(())
    }
}
