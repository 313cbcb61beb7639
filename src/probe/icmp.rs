// Unprivileged ICMP echo over a datagram socket (SOCK_DGRAM + IPPROTO_ICMP{,V6}).
// Linux rewrites the echo identifier to the socket's local port and filters replies per socket,
// so replies are matched by sequence number only.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, instrument};

use super::{LatencyProbe, ProbeSetupError, summarize};
use crate::models::ProbeResult;

const ECHO_REQUEST_V4: u8 = 8;
const ECHO_REPLY_V4: u8 = 0;
const ECHO_REQUEST_V6: u8 = 128;
const ECHO_REPLY_V6: u8 = 129;
const PAYLOAD: &[u8] = b"relaymon-probe";

pub struct IcmpProbe {
    ident: u16,
}

impl IcmpProbe {
    /// Fails when this process may not open an ICMP datagram socket.
    pub fn new() -> Result<Self, ProbeSetupError> {
        Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4))
            .map_err(ProbeSetupError::IcmpUnavailable)?;
        Ok(Self {
            ident: (std::process::id() & 0xffff) as u16,
        })
    }
}

fn open_socket(addr: &IpAddr) -> std::io::Result<UdpSocket> {
    let (domain, protocol) = match addr {
        IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4),
        IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6),
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(protocol))?;
    socket.set_nonblocking(true)?;
    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket)
}

/// RFC 1071 ones' complement sum.
pub fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for pair in &mut chunks {
        sum += u32::from(u16::from_be_bytes([pair[0], pair[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Echo request header + payload. The v4 checksum is filled in; the kernel computes the v6 one.
pub fn build_echo_request(v6: bool, ident: u16, seq: u16, payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(8 + payload.len());
    packet.push(if v6 { ECHO_REQUEST_V6 } else { ECHO_REQUEST_V4 });
    packet.push(0);
    packet.extend_from_slice(&[0, 0]);
    packet.extend_from_slice(&ident.to_be_bytes());
    packet.extend_from_slice(&seq.to_be_bytes());
    packet.extend_from_slice(payload);
    if !v6 {
        let sum = icmp_checksum(&packet);
        packet[2..4].copy_from_slice(&sum.to_be_bytes());
    }
    packet
}

/// Sequence number of an echo reply, or `None` for anything else. A leading IPv4 header
/// (delivered on some BSD-derived stacks) is skipped.
pub fn parse_echo_reply(buf: &[u8], v6: bool) -> Option<u16> {
    let icmp = if !v6 && buf.first().map(|b| b >> 4) == Some(4) {
        let header_len = usize::from(buf[0] & 0x0f) * 4;
        buf.get(header_len..)?
    } else {
        buf
    };
    if icmp.len() < 8 {
        return None;
    }
    let expected = if v6 { ECHO_REPLY_V6 } else { ECHO_REPLY_V4 };
    if icmp[0] != expected || icmp[1] != 0 {
        return None;
    }
    Some(u16::from_be_bytes([icmp[6], icmp[7]]))
}

async fn wait_for_reply(socket: &UdpSocket, seq: u16, v6: bool, deadline: Instant) -> bool {
    let mut buf = [0u8; 1500];
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return false;
        }
        match tokio::time::timeout(remaining, socket.recv(&mut buf)).await {
            Ok(Ok(n)) => {
                if parse_echo_reply(&buf[..n], v6) == Some(seq) {
                    return true;
                }
            }
            Ok(Err(e)) => {
                debug!(error = %e, "icmp recv failed");
                return false;
            }
            Err(_) => return false,
        }
    }
}

#[async_trait]
impl LatencyProbe for IcmpProbe {
    #[instrument(skip(self), fields(probe = "icmp"))]
    async fn probe(
        &self,
        addr: IpAddr,
        count: u32,
        timeout: Duration,
        gap: Duration,
    ) -> ProbeResult {
        let socket = match open_socket(&addr) {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, "icmp socket open failed");
                return ProbeResult::total_loss(count);
            }
        };
        let v6 = addr.is_ipv6();
        let dest = SocketAddr::new(addr, 0);
        let mut rtts_ms = Vec::with_capacity(count as usize);

        for i in 0..count {
            if i > 0 {
                tokio::time::sleep(gap).await;
            }
            let seq = (i & 0xffff) as u16;
            let packet = build_echo_request(v6, self.ident, seq, PAYLOAD);
            let start = Instant::now();
            if let Err(e) = socket.send_to(&packet, dest).await {
                debug!(error = %e, seq, "icmp send failed");
                continue;
            }
            if wait_for_reply(&socket, seq, v6, start + timeout).await {
                rtts_ms.push(start.elapsed().as_secs_f64() * 1000.0);
            }
        }
        summarize(&rtts_ms, count)
    }

    fn name(&self) -> &'static str {
        "icmp"
    }
}
