#![forbid(unsafe_code)]

//! Wire framing: an 8-byte header (u32 message type, u32 payload length,
//! both little-endian) followed by the bincode-encoded payload.

use crate::error::Error;
use crate::message::{HostSnapshot, MsgKind};

pub(crate) const HEADER_LEN: usize = 8;

/// Frames above this are stream corruption, not messages.
pub(crate) const MAX_PAYLOAD: usize = 16 * 1024;

/// A decoded frame whose type has not been interpreted yet. Unknown
/// discriminants are passed through so the receiver can drop them
/// without tearing down the channel.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct RawFrame {
    pub kind: u32,
    pub payload: Vec<u8>,
}

pub(crate) fn encode(kind: MsgKind, host: Option<&HostSnapshot>) -> Result<Vec<u8>, Error> {
    let payload = match host {
        Some(host) => bincode::serialize(host)?,
        None => Vec::new(),
    };
    if payload.len() > MAX_PAYLOAD {
        return Err(Error::FrameTooLarge(payload.len()));
    }

    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(&(kind as u32).to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Try to decode one frame from the front of `buf`. Returns the frame
/// and the number of bytes it occupied, or `None` while the buffer does
/// not yet hold a complete frame.
pub(crate) fn decode(buf: &[u8]) -> Result<Option<(RawFrame, usize)>, Error> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }
    let kind = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let len = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
    if len > MAX_PAYLOAD {
        return Err(Error::FrameTooLarge(len));
    }
    if buf.len() < HEADER_LEN + len {
        return Ok(None);
    }
    let frame = RawFrame {
        kind,
        payload: buf[HEADER_LEN..HEADER_LEN + len].to_vec(),
    };
    Ok(Some((frame, HEADER_LEN + len)))
}
