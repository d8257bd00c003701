#![forbid(unsafe_code)]

//! ICMP echo packet construction and parsing.

pub const IP_HEADER_MIN: usize = 20;
pub const ICMP_HEADER_LEN: usize = 8;

/// Payload carried in every echo request, after the 8-byte ICMP header.
pub const ECHO_PAYLOAD_LEN: usize = 56;

const TYPE_ECHO_REPLY: u8 = 0;
const TYPE_DEST_UNREACHABLE: u8 = 3;
const TYPE_ECHO_REQUEST: u8 = 8;
const TYPE_TIME_EXCEEDED: u8 = 11;

/// RFC 1071 one's-complement checksum, computed over the full message
/// with the checksum field zeroed.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum = sum.wrapping_add(u16::from_be_bytes([chunk[0], chunk[1]]) as u32);
    }
    if let Some(&odd) = chunks.remainder().first() {
        sum = sum.wrapping_add((odd as u32) << 8);
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Whether a message checksums to zero with its checksum field in place.
pub fn verify(data: &[u8]) -> bool {
    checksum(data) == 0
}

/// Build an echo request for the given identifier and sequence number.
pub fn echo_request(id: u16, seq: u16) -> Vec<u8> {
    let mut buf = vec![0u8; ICMP_HEADER_LEN + ECHO_PAYLOAD_LEN];
    buf[0] = TYPE_ECHO_REQUEST;
    buf[1] = 0;
    buf[4..6].copy_from_slice(&id.to_be_bytes());
    buf[6..8].copy_from_slice(&seq.to_be_bytes());
    for (i, byte) in buf[ICMP_HEADER_LEN..].iter_mut().enumerate() {
        *byte = i as u8;
    }
    let sum = checksum(&buf);
    buf[2..4].copy_from_slice(&sum.to_be_bytes());
    buf
}

/// Correlation fields of an inbound echo reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    pub id: u16,
    pub seq: u16,
}

/// Why an inbound datagram was not an echo reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    /// Shorter than an IP header plus the minimum ICMP header.
    TooShort(usize),
    /// Some other ICMP type; the value is the raw type field.
    NotEchoReply(u8),
}

/// Name an ICMP type for diagnostics.
pub fn type_name(icmp_type: u8) -> &'static str {
    match icmp_type {
        TYPE_ECHO_REPLY => "echo reply",
        TYPE_DEST_UNREACHABLE => "destination unreachable",
        TYPE_ECHO_REQUEST => "echo request",
        TYPE_TIME_EXCEEDED => "time exceeded",
        _ => "other",
    }
}

/// Parse an inbound datagram, IP header included, into an echo reply.
///
/// The ICMP header position comes from the IP header-length field; a
/// datagram too short for that claim is rejected without reading past
/// the buffer.
pub fn parse_reply(data: &[u8]) -> Result<Reply, PacketError> {
    if data.len() < IP_HEADER_MIN {
        return Err(PacketError::TooShort(data.len()));
    }
    let ip_header_len = ((data[0] & 0x0f) as usize) * 4;
    if ip_header_len < IP_HEADER_MIN || data.len() < ip_header_len + ICMP_HEADER_LEN {
        return Err(PacketError::TooShort(data.len()));
    }
    let icmp = &data[ip_header_len..];
    if icmp[0] != TYPE_ECHO_REPLY {
        return Err(PacketError::NotEchoReply(icmp[0]));
    }
    Ok(Reply {
        id: u16::from_be_bytes([icmp[4], icmp[5]]),
        seq: u16::from_be_bytes([icmp[6], icmp[7]]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    /// Wrap an ICMP message in a minimal IPv4 header, optionally with
    /// IP options to exercise the header-length field.
    fn wrap_in_ip(icmp: &[u8], option_words: u8) -> Vec<u8> {
        let ihl = 5 + option_words;
        let mut datagram = vec![0u8; ihl as usize * 4];
        datagram[0] = 0x40 | ihl;
        datagram.extend_from_slice(icmp);
        datagram
    }

    fn echo_reply(id: u16, seq: u16) -> Vec<u8> {
        let mut buf = echo_request(id, seq);
        buf[0] = TYPE_ECHO_REPLY;
        buf[2] = 0;
        buf[3] = 0;
        let sum = checksum(&buf);
        buf[2..4].copy_from_slice(&sum.to_be_bytes());
        buf
    }

    #[test]
    fn echo_request_layout() {
        let buf = echo_request(0x1234, 7);
        assert_eq!(buf.len(), ICMP_HEADER_LEN + ECHO_PAYLOAD_LEN);
        assert_eq!(buf[0], TYPE_ECHO_REQUEST);
        assert_eq!(buf[1], 0);
        assert_eq!(u16::from_be_bytes([buf[4], buf[5]]), 0x1234);
        assert_eq!(u16::from_be_bytes([buf[6], buf[7]]), 7);
    }

    #[test]
    fn request_checksum_verifies() {
        assert!(verify(&echo_request(1, 0)));
        assert!(verify(&echo_request(u16::MAX, u16::MAX)));
    }

    #[test]
    fn corrupted_request_does_not_verify() {
        let mut buf = echo_request(1, 0);
        buf[9] ^= 0xff;
        assert!(!verify(&buf));
    }

    #[test]
    fn parse_reply_roundtrip() {
        let datagram = wrap_in_ip(&echo_reply(42, 3), 0);
        let reply = parse_reply(&datagram).unwrap();
        assert_eq!(reply, Reply { id: 42, seq: 3 });
    }

    #[test]
    fn parse_honors_ip_options() {
        let datagram = wrap_in_ip(&echo_reply(42, 3), 2);
        let reply = parse_reply(&datagram).unwrap();
        assert_eq!(reply.id, 42);
    }

    #[test]
    fn short_datagrams_are_rejected() {
        assert_eq!(parse_reply(&[]), Err(PacketError::TooShort(0)));
        let datagram = wrap_in_ip(&[], 0);
        assert_eq!(
            parse_reply(&datagram),
            Err(PacketError::TooShort(datagram.len()))
        );
        // claims 24 header bytes but only has 20 plus a truncated ICMP
        let mut short = wrap_in_ip(&[0u8; 4], 0);
        short[0] = 0x46;
        assert!(matches!(
            parse_reply(&short),
            Err(PacketError::TooShort(_))
        ));
    }

    #[test]
    fn non_reply_types_are_named() {
        let datagram = wrap_in_ip(&{
            let mut icmp = echo_reply(1, 1);
            icmp[0] = TYPE_DEST_UNREACHABLE;
            icmp
        }, 0);
        assert_eq!(
            parse_reply(&datagram),
            Err(PacketError::NotEchoReply(TYPE_DEST_UNREACHABLE))
        );
        assert_eq!(type_name(TYPE_DEST_UNREACHABLE), "destination unreachable");
        assert_eq!(type_name(TYPE_TIME_EXCEEDED), "time exceeded");
        assert_eq!(type_name(250), "other");
    }

    proptest! {
        // computing a checksum and writing it back always verifies to
        // zero, for any message with an aligned checksum field
        #[test]
        fn checksum_self_verifies(mut data in proptest::collection::vec(any::<u8>(), 8..256)) {
            data[2] = 0;
            data[3] = 0;
            let sum = checksum(&data);
            data[2..4].copy_from_slice(&sum.to_be_bytes());
            prop_assert!(verify(&data));
        }

        #[test]
        fn parse_never_panics(data in proptest::collection::vec(any::<u8>(), 0..128)) {
            let _ = parse_reply(&data);
        }
    }
}
