//! A SYN that doesn't carry the handshake-marker option is refused outright:
//! the listener answers with RST|ACK and never queues a child connection,
//! rather than treating it as a dropped packet to be retried.

extern crate ripstcp;
extern crate pnet;

mod common;

use std::net::SocketAddrV4;
use std::time::Duration;

use pnet::packet::tcp::TcpFlags;

use ripstcp::socket::TcpSocket;

use common::{Harness, build_arp_announcement, build_tcp_segment, parse_tcp};

#[test]
fn syn_without_marker_is_reset() {
    let h = Harness::new();
    h.inject(build_arp_announcement());
    h.settle();

    let listener = TcpSocket::listen(h.stack.clone(),
                                     SocketAddrV4::new(common::LOCAL_IP, 8081),
                                     4)
        .expect("listen");

    let bad_syn = build_tcp_segment(5556, 8081, 2000, 0, TcpFlags::SYN, false, &[]);
    h.inject(bad_syn);

    let reset_frame = h.recv_frame(Duration::from_secs(1)).expect("reset sent back");
    let reset = parse_tcp(&reset_frame);
    assert_eq!(reset.flags, TcpFlags::RST | TcpFlags::ACK);

    // The listener must still be healthy: a properly marked SYN afterwards
    // completes the handshake and is the only thing `accept` ever yields.
    let good_syn = build_tcp_segment(5557, 8081, 3000, 0, TcpFlags::SYN, true, &[]);
    h.inject(good_syn);

    let synack_frame = h.recv_frame(Duration::from_secs(1)).expect("syn-ack sent back");
    let synack = parse_tcp(&synack_frame);
    assert_eq!(synack.flags, TcpFlags::SYN | TcpFlags::ACK);
    assert_eq!(synack.ack, 3001);

    let ack = build_tcp_segment(5557, 8081, 3001, synack.seq.wrapping_add(1), TcpFlags::ACK, false, &[]);
    h.inject(ack);
    h.settle();

    let accepted = listener.accept().expect("accept the one good connection");
    drop(accepted);
}
