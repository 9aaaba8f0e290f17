//! Catch-all DNS responder.
//!
//! Every query is answered with a single A record pointing at the access
//! point, so any name a joining phone looks up resolves to the portal.
//!
//! # Wire format
//!
//! ```text
//! Response = header (12 bytes) | question (copied) | answer (16 bytes)
//!
//! header:  id(2) flags=0x8180 qd=1 an=1 ns=0 ar=0
//! answer:  name=0xC00C type=A class=IN ttl=10 rdlen=4 addr(4)
//! ```
//!
//! # Example
//!
//! ```
//! use std::net::Ipv4Addr;
//! use audio_link_esp32::portal::DnsQuery;
//!
//! let mut query = vec![0x12, 0x34, 0x01, 0x00, 0, 1, 0, 0, 0, 0, 0, 0];
//! query.extend_from_slice(b"\x07example\x03com\x00\x00\x01\x00\x01");
//!
//! let parsed = DnsQuery::parse(&query).unwrap();
//! assert_eq!(parsed.qname(), "example.com");
//!
//! let answer = parsed.answer(Ipv4Addr::new(192, 168, 4, 1));
//! assert_eq!(&answer[..2], &[0x12, 0x34]);
//! assert_eq!(&answer[answer.len() - 4..], &[192, 168, 4, 1]);
//! ```

use log::{debug, error, info, warn};
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Standard DNS port.
pub const DNS_PORT: u16 = 53;

/// Largest DNS message carried over plain UDP.
pub const MAX_UDP_MESSAGE: usize = 512;

const HEADER_LEN: usize = 12;
const ANSWER_LEN: usize = 16;
const ANSWER_TTL_SECS: u32 = 10;

/// Stack size for the responder thread.
const DNS_STACK_SIZE: usize = 4096;

/// Socket read timeout; bounds how long [`DnsResponder::stop`] takes.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Why a datagram was not answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsError {
    /// Shorter than the fixed header.
    TooShort,
    /// A label or QTYPE/QCLASS runs past the end of the datagram.
    Truncated,
    /// The question uses a compression pointer.
    CompressedName,
    /// The answer would not fit a UDP message.
    TooLarge,
}

impl fmt::Display for DnsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort => write!(f, "query shorter than DNS header"),
            Self::Truncated => write!(f, "question runs past end of datagram"),
            Self::CompressedName => write!(f, "compression pointer in question"),
            Self::TooLarge => write!(f, "response would exceed {} bytes", MAX_UDP_MESSAGE),
        }
    }
}

impl std::error::Error for DnsError {}

/// A validated query: transaction id plus the raw question section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuery {
    id: u16,
    question: Vec<u8>,
}

impl DnsQuery {
    /// Validate a datagram and extract the first question.
    pub fn parse(packet: &[u8]) -> Result<Self, DnsError> {
        if packet.len() < HEADER_LEN {
            return Err(DnsError::TooShort);
        }

        let mut pos = HEADER_LEN;
        loop {
            let len = *packet.get(pos).ok_or(DnsError::Truncated)? as usize;
            if len == 0 {
                pos += 1;
                break;
            }
            if len & 0xC0 != 0 {
                return Err(DnsError::CompressedName);
            }
            pos += 1 + len;
            if pos > packet.len() {
                return Err(DnsError::Truncated);
            }
        }

        // QTYPE + QCLASS
        let question_end = pos + 4;
        if question_end > packet.len() {
            return Err(DnsError::Truncated);
        }
        if question_end + ANSWER_LEN > MAX_UDP_MESSAGE {
            return Err(DnsError::TooLarge);
        }

        Ok(Self {
            id: u16::from_be_bytes([packet[0], packet[1]]),
            question: packet[HEADER_LEN..question_end].to_vec(),
        })
    }

    /// Transaction id.
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Raw question section (name, QTYPE, QCLASS).
    pub fn question(&self) -> &[u8] {
        &self.question
    }

    /// Queried name in dotted form, for logging.
    pub fn qname(&self) -> String {
        let mut labels = Vec::new();
        let mut pos = 0;
        while let Some(&len) = self.question.get(pos) {
            if len == 0 {
                break;
            }
            let start = pos + 1;
            let end = start + len as usize;
            let Some(label) = self.question.get(start..end) else {
                break;
            };
            labels.push(String::from_utf8_lossy(label).into_owned());
            pos = end;
        }
        labels.join(".")
    }

    /// Build the response resolving the question to `ip`.
    pub fn answer(&self, ip: Ipv4Addr) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.question.len() + ANSWER_LEN);

        out.extend_from_slice(&self.id.to_be_bytes());
        // Standard response, recursion desired + available, no error
        out.extend_from_slice(&[0x81, 0x80]);
        out.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
        out.extend_from_slice(&1u16.to_be_bytes()); // ANCOUNT
        out.extend_from_slice(&0u16.to_be_bytes()); // NSCOUNT
        out.extend_from_slice(&0u16.to_be_bytes()); // ARCOUNT

        out.extend_from_slice(&self.question);

        out.extend_from_slice(&[0xC0, 0x0C]); // pointer to the question name
        out.extend_from_slice(&1u16.to_be_bytes()); // TYPE A
        out.extend_from_slice(&1u16.to_be_bytes()); // CLASS IN
        out.extend_from_slice(&ANSWER_TTL_SECS.to_be_bytes());
        out.extend_from_slice(&4u16.to_be_bytes());
        out.extend_from_slice(&ip.octets());

        out
    }
}

/// UDP responder thread.
///
/// Drop it (or call [`stop`](Self::stop)) to shut it down.
pub struct DnsResponder {
    handle: Option<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    local_addr: SocketAddr,
}

impl DnsResponder {
    /// Bind `bind_addr` and answer every query with `ip`.
    pub fn start(bind_addr: SocketAddr, ip: Ipv4Addr) -> io::Result<Self> {
        let socket = UdpSocket::bind(bind_addr)?;
        socket.set_read_timeout(Some(POLL_INTERVAL))?;
        let local_addr = socket.local_addr()?;

        info!("DNS responder listening on {}, answering {}", local_addr, ip);

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        let handle = thread::Builder::new()
            .name("dns".into())
            .stack_size(DNS_STACK_SIZE)
            .spawn(move || Self::run(socket, ip, shutdown_clone))?;

        Ok(Self {
            handle: Some(handle),
            shutdown,
            local_addr,
        })
    }

    /// Address the socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn run(socket: UdpSocket, ip: Ipv4Addr, shutdown: Arc<AtomicBool>) {
        let mut buf = [0u8; MAX_UDP_MESSAGE];

        while !shutdown.load(Ordering::Acquire) {
            let (len, peer) = match socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(e) => {
                    error!("DNS socket error: {}", e);
                    break;
                }
            };

            let query = match DnsQuery::parse(&buf[..len]) {
                Ok(query) => query,
                Err(e) => {
                    debug!("Dropping {} byte DNS query from {}: {}", len, peer, e);
                    continue;
                }
            };

            debug!("DNS {} -> {} for {}", query.qname(), ip, peer);
            if let Err(e) = socket.send_to(&query.answer(ip), peer) {
                warn!("Failed to send DNS answer to {}: {}", peer, e);
            }
        }

        info!("DNS responder shutting down");
    }

    /// Stop the responder.
    ///
    /// Note: May take up to 100ms due to the read timeout.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DnsResponder {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AP: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 1);

    fn query_for(id: u16, labels: &[&str]) -> Vec<u8> {
        let mut packet = id.to_be_bytes().to_vec();
        packet.extend_from_slice(&[0x01, 0x00, 0, 1, 0, 0, 0, 0, 0, 0]);
        for label in labels {
            packet.push(label.len() as u8);
            packet.extend_from_slice(label.as_bytes());
        }
        packet.push(0);
        packet.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]);
        packet
    }

    #[test]
    fn test_answer_layout() {
        let packet = query_for(0xBEEF, &["connectivitycheck", "gstatic", "com"]);
        let query = DnsQuery::parse(&packet).unwrap();
        let answer = query.answer(AP);

        let question = &packet[12..];
        assert_eq!(&answer[0..2], &[0xBE, 0xEF]);
        assert_eq!(&answer[2..4], &[0x81, 0x80]);
        assert_eq!(&answer[4..12], &[0, 1, 0, 1, 0, 0, 0, 0]);
        assert_eq!(&answer[12..12 + question.len()], question);
        assert_eq!(
            &answer[12 + question.len()..],
            &[0xC0, 0x0C, 0, 1, 0, 1, 0, 0, 0, 10, 0, 4, 192, 168, 4, 1]
        );
        assert_eq!(query.qname(), "connectivitycheck.gstatic.com");
    }

    #[test]
    fn test_trailing_bytes_are_not_copied() {
        let mut packet = query_for(1, &["a"]);
        let question_len = packet.len() - 12;
        packet.extend_from_slice(&[0xAA; 11]);
        let query = DnsQuery::parse(&packet).unwrap();
        assert_eq!(query.question().len(), question_len);
    }

    #[test]
    fn test_short_packet_rejected() {
        assert_eq!(DnsQuery::parse(&[0u8; 11]), Err(DnsError::TooShort));
        // Header only: the name terminator is missing.
        assert_eq!(DnsQuery::parse(&[0u8; 12]), Err(DnsError::Truncated));
    }

    #[test]
    fn test_label_past_end_rejected() {
        let mut packet = query_for(1, &["example"]);
        packet.truncate(12 + 4);
        assert_eq!(DnsQuery::parse(&packet), Err(DnsError::Truncated));
    }

    #[test]
    fn test_missing_qtype_rejected() {
        let mut packet = query_for(1, &["example", "com"]);
        packet.truncate(packet.len() - 2);
        assert_eq!(DnsQuery::parse(&packet), Err(DnsError::Truncated));
    }

    #[test]
    fn test_compression_pointer_rejected() {
        let mut packet = vec![0, 1, 1, 0, 0, 1, 0, 0, 0, 0, 0, 0];
        packet.extend_from_slice(&[0xC0, 0x0C, 0, 1, 0, 1]);
        assert_eq!(DnsQuery::parse(&packet), Err(DnsError::CompressedName));
    }

    #[test]
    fn test_oversized_question_rejected() {
        let long = "a".repeat(63);
        let labels: Vec<&str> = std::iter::repeat(long.as_str()).take(8).collect();
        let packet = query_for(1, &labels);
        assert_eq!(DnsQuery::parse(&packet), Err(DnsError::TooLarge));
    }

    #[test]
    fn test_responder_answers_over_udp() {
        let mut responder = DnsResponder::start("127.0.0.1:0".parse().unwrap(), AP).unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        client
            .send_to(&query_for(0x4242, &["captive", "apple", "com"]), responder.local_addr())
            .unwrap();

        let mut buf = [0u8; 512];
        let (len, _) = client.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[0..2], &[0x42, 0x42]);
        assert_eq!(&buf[len - 4..len], &[192, 168, 4, 1]);

        responder.stop();
    }
}
