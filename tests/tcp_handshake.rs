//! Exercises the passive-open path end to end against a mock Ethernet
//! backend: a simulated peer completes the three-way handshake with a
//! listening socket, the accepted connection delivers a payload, and the
//! listener's reply carries the data back out on the wire.

extern crate ripstcp;
extern crate pnet;

mod common;

use std::net::SocketAddrV4;
use std::time::Duration;

use pnet::packet::tcp::TcpFlags;

use ripstcp::socket::TcpSocket;

use common::{Harness, build_arp_announcement, build_tcp_segment, parse_tcp};

#[test]
fn three_way_handshake_then_data_then_ack() {
    let h = Harness::new();

    // Let the stack learn the simulated peer's mac before it ever needs to
    // send a reply to it, avoiding a resolve-and-block step inside the rx
    // thread that processes the SYN.
    h.inject(build_arp_announcement());
    h.settle();

    let listener = TcpSocket::listen(h.stack.clone(),
                                     SocketAddrV4::new(common::LOCAL_IP, 8080),
                                     4)
        .expect("listen");

    let client_iss: u32 = 1000;
    let syn = build_tcp_segment(5555, 8080, client_iss, 0, TcpFlags::SYN, true, &[]);
    h.inject(syn);

    let synack_frame = h.recv_frame(Duration::from_secs(1)).expect("syn-ack sent back");
    let synack = parse_tcp(&synack_frame);
    assert_eq!(synack.flags, TcpFlags::SYN | TcpFlags::ACK);
    assert_eq!(synack.ack, client_iss.wrapping_add(1));

    let server_iss = synack.seq;
    let ack = build_tcp_segment(5555,
                               8080,
                               client_iss.wrapping_add(1),
                               server_iss.wrapping_add(1),
                               TcpFlags::ACK,
                               false,
                               &[]);
    h.inject(ack);
    h.settle();

    let accepted = listener.accept().expect("accept should not block once established");

    let data_seq = client_iss.wrapping_add(1);
    let data_ack = server_iss.wrapping_add(1);
    let data = build_tcp_segment(5555, 8080, data_seq, data_ack, TcpFlags::ACK, false, b"ping");
    h.inject(data);

    let mut buf = [0u8; 16];
    let n = accepted.recv(&mut buf).expect("recv");
    assert_eq!(&buf[..n], b"ping");

    let data_ack_frame = h.recv_frame(Duration::from_secs(1)).expect("ack for data");
    let data_ack_seg = parse_tcp(&data_ack_frame);
    assert_eq!(data_ack_seg.flags, TcpFlags::ACK);
    assert_eq!(data_ack_seg.ack, data_ack.wrapping_add(4));

    let sent = accepted.send(b"pong").expect("send");
    assert_eq!(sent, 4);
    let echoed_frame = h.recv_frame(Duration::from_secs(1)).expect("echo sent");
    let echoed = parse_tcp(&echoed_frame);
    assert_eq!(echoed.payload, b"pong");
}
