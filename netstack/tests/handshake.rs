//! Integration tests for the passive-open handshake over real UDP.
//!
//! The stack under test runs inside [`Driver::run_until`] on a loopback
//! `tokio::net::UdpSocket`.  The peer is a bare UDP socket that plays the
//! stack's only neighbor: it frames hand-built IPv4/TCP datagrams, and the
//! driver stops once the peer's script finishes.

use std::cell::Cell;
use std::net::{Ipv4Addr, SocketAddr};
use std::rc::Rc;
use std::time::Duration;

use tokio::net::UdpSocket;

use netstack::framing::{self, FrameDecoder};
use netstack::route::RoutingTable;
use netstack::socket::Driver;
use netstack::state::ConnectionState;
use netstack::wire::{flags, protocol, Ipv4Header, TcpHeader};
use netstack::{ConnectionId, Stack};

const HOST: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
const PEER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
const PORT: u16 = 9000;
const PEER_PORT: u16 = 41000;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A stack at `HOST` with one UDP link to `PEER`, and the peer's socket.
async fn setup() -> (Stack, Driver, UdpSocket) {
    let peer = UdpSocket::bind("127.0.0.1:0").await.expect("bind peer socket");
    let mut driver = Driver::bind("127.0.0.1:0".parse::<SocketAddr>().unwrap())
        .await
        .expect("bind driver socket");

    let mut stack = Stack::default();
    stack.set_local_address(HOST);
    stack.set_routing_table(RoutingTable::from_pairs([("10.0.0.2/32", "10.0.0.2")]).unwrap());
    driver.connect_link(&mut stack, PEER, peer.local_addr().unwrap());

    peer.connect(driver.local_addr().unwrap()).await.expect("connect peer");
    (stack, driver, peer)
}

fn frame(seq: u32, bits: u8, payload: &[u8]) -> Vec<u8> {
    let segment = TcpHeader::new(PEER_PORT, PORT, seq, 0, bits, 8192).encode(payload, PEER, HOST);
    let mut datagram = Ipv4Header::new(PEER, HOST, protocol::TCP, segment.len())
        .encode()
        .to_vec();
    datagram.extend_from_slice(&segment);
    framing::encode(&datagram)
}

/// Wait for the next segment the stack sends to the peer.
async fn next_segment(peer: &UdpSocket) -> (TcpHeader, Vec<u8>) {
    let mut buf = vec![0u8; 4096];
    let n = tokio::time::timeout(Duration::from_secs(5), peer.recv(&mut buf))
        .await
        .expect("no reply within 5s")
        .expect("peer recv failed");
    let frames = FrameDecoder::new().push(&buf[..n]);
    assert_eq!(frames.len(), 1, "one datagram per UDP block");

    let (ip, segment) = Ipv4Header::parse(&frames[0]).expect("valid IPv4");
    assert_eq!((ip.src, ip.dst), (HOST, PEER));
    assert!(Ipv4Header::checksum_valid(&frames[0]));
    let (tcp, payload) = TcpHeader::parse(segment).expect("valid TCP");
    (tcp, payload.to_vec())
}

fn peer_id() -> ConnectionId {
    ConnectionId {
        peer_addr: PEER,
        peer_port: PEER_PORT,
        local_addr: HOST,
        local_port: PORT,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// SYN seq=1000 is answered by SYN+ACK ack=1001, and the final ACK
/// establishes the connection and is itself acknowledged.
#[tokio::test]
async fn handshake_reaches_established() {
    let (mut stack, driver, peer) = setup().await;
    let accepted = Rc::new(Cell::new(0));
    let count = accepted.clone();
    stack.listen(PORT).on_accept(move |_| count.set(count.get() + 1));

    let mut replies = None;
    let script = async {
        peer.send(&frame(1000, flags::SYN, b"")).await.unwrap();
        let (syn_ack, _) = next_segment(&peer).await;
        peer.send(&frame(1001, flags::ACK, b"")).await.unwrap();
        let (ack, _) = next_segment(&peer).await;
        replies = Some((syn_ack, ack));
    };
    driver.run_until(&mut stack, script).await;

    let (syn_ack, ack) = replies.expect("script completed");
    assert_eq!(syn_ack.flags, flags::SYN | flags::ACK);
    assert_eq!(syn_ack.ack, 1001);
    assert_eq!((syn_ack.src_port, syn_ack.dst_port), (PORT, PEER_PORT));
    assert!(syn_ack.seq <= u32::from(u16::MAX));
    assert_eq!(accepted.get(), 1);
    // The pure ACK is acknowledged in turn.
    assert_eq!(ack.flags, flags::ACK);
    assert_eq!((ack.seq, ack.ack), (syn_ack.seq + 1, 1001));

    let conn = stack.server().unwrap().connection(&peer_id()).unwrap();
    assert_eq!(conn.state(), ConnectionState::Established);
    assert_eq!(conn.seq_no(), syn_ack.seq + 1);
    assert_eq!(conn.ack_no(), 1001);
}

/// Data is echoed back by the application and acknowledged, then a FIN
/// makes the application close.
#[tokio::test]
async fn echo_then_close_over_udp() {
    let (mut stack, driver, peer) = setup().await;
    stack.listen(PORT).on_accept(|conn| {
        conn.on_receive(|conn, data| {
            if conn.peer_finished() {
                conn.close().unwrap();
            } else if !data.is_empty() {
                conn.send(data).unwrap();
            }
        });
    });

    let mut seen = Vec::new();
    let script = async {
        peer.send(&frame(1000, flags::SYN, b"")).await.unwrap();
        seen.push(next_segment(&peer).await);
        peer.send(&frame(1001, flags::ACK | flags::PSH, b"hello")).await.unwrap();
        seen.push(next_segment(&peer).await);
        seen.push(next_segment(&peer).await);
        peer.send(&frame(1006, flags::FIN | flags::ACK, b"")).await.unwrap();
        seen.push(next_segment(&peer).await);
        seen.push(next_segment(&peer).await);
    };
    driver.run_until(&mut stack, script).await;

    let isn = seen[0].0.seq;
    let (echo, payload) = &seen[1];
    assert_eq!(payload, b"hello");
    assert_eq!((echo.seq, echo.ack), (isn + 1, 1001));

    let (ack, _) = &seen[2];
    assert_eq!(ack.flags, flags::ACK);
    assert_eq!(ack.ack, 1006);

    let (fin, _) = &seen[3];
    assert_eq!(fin.flags, flags::FIN | flags::ACK);
    assert_eq!((fin.seq, fin.ack), (isn + 6, 1007));
    let (last, _) = &seen[4];
    assert_eq!(last.flags, flags::ACK);

    assert!(stack.server().unwrap().is_empty());
}

/// Every SYN from the same four-tuple starts over and runs accept again.
#[tokio::test]
async fn repeated_syn_accepts_again() {
    let (mut stack, driver, peer) = setup().await;
    let accepted = Rc::new(Cell::new(0));
    let count = accepted.clone();
    stack.listen(PORT).on_accept(move |_| count.set(count.get() + 1));

    let mut acks = Vec::new();
    let script = async {
        for seq in [1000, 5000] {
            peer.send(&frame(seq, flags::SYN, b"")).await.unwrap();
            acks.push(next_segment(&peer).await.0.ack);
        }
    };
    driver.run_until(&mut stack, script).await;

    assert_eq!(acks, vec![1001, 5001]);
    assert_eq!(accepted.get(), 2);
    let server = stack.server().unwrap();
    assert_eq!(server.len(), 1);
    assert_eq!(server.connection(&peer_id()).unwrap().ack_no(), 5001);
}

/// A connection timer set in the accept callback fires through the driver's
/// sleep branch.
#[tokio::test]
async fn timer_fires_inside_the_event_loop() {
    let (mut stack, driver, peer) = setup().await;
    stack.listen(PORT).on_accept(|conn| {
        conn.on_timeout(|conn| {
            conn.send(b"idle").unwrap();
        });
        conn.set_timer(Duration::from_millis(20));
    });

    let mut nudge = None;
    let script = async {
        peer.send(&frame(1000, flags::SYN, b"")).await.unwrap();
        next_segment(&peer).await;
        nudge = Some(next_segment(&peer).await.1);
    };
    driver.run_until(&mut stack, script).await;

    assert_eq!(nudge.as_deref(), Some(&b"idle"[..]));
    assert_eq!(stack.next_deadline(), None);
}

/// A neighbor the socket cannot reach does not stop the event loop from
/// serving the others.
#[tokio::test]
async fn unreachable_neighbor_does_not_stop_the_loop() {
    let (mut stack, mut driver, peer) = setup().await;
    let stray = Ipv4Addr::new(10, 0, 0, 3);
    stack.set_routing_table(
        RoutingTable::from_pairs([("10.0.0.2/32", "10.0.0.2"), ("10.0.0.3/32", "10.0.0.3")]).unwrap(),
    );
    driver.connect_link(&mut stack, stray, "[::1]:9".parse().unwrap());
    stack.listen(PORT);

    let segment = TcpHeader::new(PORT, 7, 0, 0, flags::SYN, 0).encode(b"", HOST, stray);
    stack.send_segment(&segment, stray).unwrap();
    assert_eq!(driver.queued(), 1);

    let mut syn_ack = None;
    let script = async {
        peer.send(&frame(1000, flags::SYN, b"")).await.unwrap();
        syn_ack = Some(next_segment(&peer).await.0);
    };
    driver.run_until(&mut stack, script).await;

    assert_eq!(syn_ack.map(|h| h.ack), Some(1001));
    assert_eq!(driver.queued(), 0);
}
