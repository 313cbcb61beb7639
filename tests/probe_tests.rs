// Ping output parsing and ICMP packet helpers

use relaymon::models::{PingTarget, ProbeResult};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use relaymon::probe::{
    build_echo_request, icmp_checksum, parse_echo_reply, parse_ping_output, ping_args,
};

const IPUTILS_OK: &str = "PING 1.1.1.1 (1.1.1.1) 56(84) bytes of data.
64 bytes from 1.1.1.1: icmp_seq=1 ttl=57 time=10.9 ms

--- 1.1.1.1 ping statistics ---
5 packets transmitted, 4 received, 20% packet loss, time 4006ms
rtt min/avg/max/mdev = 10.123/12.345/15.678/1.234 ms
";

const BSD_OK: &str = "--- 8.8.8.8 ping statistics ---
3 packets transmitted, 3 packets received, 0.0% packet loss
round-trip min/avg/max/stddev = 20.1/21.5/23.0/1.1 ms
";

const ALL_LOST: &str = "--- 10.0.0.1 ping statistics ---
5 packets transmitted, 0 received, 100% packet loss, time 4100ms
";

#[test]
fn parses_iputils_summary() {
    let r = parse_ping_output(IPUTILS_OK, 5);
    assert_eq!(r, ProbeResult { avg_rtt_ms: Some(12.345), sent: 5, lost: 1 });
}

#[test]
fn parses_bsd_summary() {
    let r = parse_ping_output(BSD_OK, 5);
    assert_eq!(r, ProbeResult { avg_rtt_ms: Some(21.5), sent: 3, lost: 0 });
}

#[test]
fn zero_received_has_no_rtt() {
    let r = parse_ping_output(ALL_LOST, 5);
    assert_eq!(r, ProbeResult { avg_rtt_ms: None, sent: 5, lost: 5 });
}

#[test]
fn duplicates_clamp_loss_at_zero() {
    let out = "4 packets transmitted, 6 received, +2 duplicates\nrtt min/avg/max/mdev = 1.0/2.0/3.0/0.5 ms\n";
    let r = parse_ping_output(out, 4);
    assert_eq!(r.lost, 0);
    assert_eq!(r.avg_rtt_ms, Some(2.0));
}

#[test]
fn unparseable_output_is_full_loss() {
    let r = parse_ping_output("ping: unknown host nowhere", 5);
    assert_eq!(r, ProbeResult::total_loss(5));
    assert_eq!(parse_ping_output("", 3), ProbeResult { avg_rtt_ms: None, sent: 3, lost: 3 });
}

#[test]
fn echo_request_checksum_verifies() {
    let packet = build_echo_request(false, 0x1234, 7, b"payload!");
    assert_eq!(packet[0], 8);
    assert_eq!(&packet[4..6], &0x1234u16.to_be_bytes());
    assert_eq!(&packet[6..8], &7u16.to_be_bytes());
    // A correct checksum makes the whole message sum to zero.
    assert_eq!(icmp_checksum(&packet), 0);
}

#[test]
fn odd_length_checksum_pads_last_byte() {
    assert_eq!(icmp_checksum(&[0x01]), !0x0100u16);
}

#[test]
fn v6_echo_request_leaves_checksum_to_kernel() {
    let packet = build_echo_request(true, 1, 2, b"x");
    assert_eq!(packet[0], 128);
    assert_eq!(&packet[2..4], &[0, 0]);
}

fn reply(kind: u8, seq: u16) -> Vec<u8> {
    let mut p = vec![kind, 0, 0, 0, 0, 1];
    p.extend_from_slice(&seq.to_be_bytes());
    p.extend_from_slice(b"data");
    p
}

#[test]
fn echo_reply_yields_sequence() {
    assert_eq!(parse_echo_reply(&reply(0, 42), false), Some(42));
    assert_eq!(parse_echo_reply(&reply(129, 9), true), Some(9));
}

#[test]
fn non_reply_messages_are_ignored() {
    // Destination unreachable, and our own request looped back.
    assert_eq!(parse_echo_reply(&reply(3, 42), false), None);
    assert_eq!(parse_echo_reply(&reply(8, 42), false), None);
    assert_eq!(parse_echo_reply(&[0, 0, 0], false), None);
}

#[test]
fn leading_ipv4_header_is_skipped() {
    let mut packet = vec![0x45, 0, 0, 0, 0, 0, 0, 0, 64, 1, 0, 0, 1, 1, 1, 1, 10, 0, 0, 1];
    packet.extend(reply(0, 5));
    assert_eq!(parse_echo_reply(&packet, false), Some(5));
}

#[test]
fn ping_target_forms() {
    let tagged = PingTarget::parse("JP:jp.example.net").unwrap();
    assert_eq!((tagged.tag.as_str(), tagged.addr.as_str()), ("JP", "jp.example.net"));
    let v6 = PingTarget::parse("2001:db8::1").unwrap();
    assert_eq!(v6.addr, "2001:db8::1");
    let tagged_v6 = PingTarget::parse("SG:2001:db8::1").unwrap();
    assert_eq!((tagged_v6.tag.as_str(), tagged_v6.addr.as_str()), ("SG", "2001:db8::1"));
    assert_eq!(tagged_v6.to_string(), "SG:2001:db8::1");
    assert!(PingTarget::parse("  ").is_err());
    assert!(PingTarget::parse("HK:").is_err());
}

#[cfg(target_os = "linux")]
#[test]
fn ping_wait_is_whole_seconds_on_linux() {
    let addr = IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1));
    let args = ping_args(addr, 5, Duration::from_millis(1500), Duration::from_millis(50));
    assert_eq!(args, ["-c", "5", "-W", "2", "-i", "0.2", "1.1.1.1"]);
}

#[cfg(target_os = "macos")]
#[test]
fn ping_wait_is_milliseconds_on_macos() {
    let addr = IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1));
    let args = ping_args(addr, 5, Duration::from_millis(1500), Duration::from_millis(500));
    assert_eq!(args, ["-c", "5", "-W", "1500", "-i", "0.5", "1.1.1.1"]);
}
