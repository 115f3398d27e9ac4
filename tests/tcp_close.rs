//! A local-initiated close: `TcpSocket::close` sends FIN|ACK, blocks while
//! the engine walks FinWait1 -> FinWait2 -> TimeWait as the peer acks the
//! FIN and then closes its own half, and returns once `TimeWait` is
//! observed. `close()` blocks for this, so it runs on its own thread while
//! the test drives the peer's side of the teardown.

extern crate ripstcp;
extern crate pnet;

mod common;

use std::thread;
use std::time::Duration;
use std::net::SocketAddrV4;

use pnet::packet::tcp::TcpFlags;

use ripstcp::socket::TcpSocket;

use common::{Harness, build_arp_announcement, build_tcp_segment, parse_tcp};

#[test]
fn active_close_completes_teardown() {
    let h = Harness::new();
    h.inject(build_arp_announcement());
    h.settle();

    let listener = TcpSocket::listen(h.stack.clone(),
                                     SocketAddrV4::new(common::LOCAL_IP, 8082),
                                     4)
        .expect("listen");

    let client_iss: u32 = 4000;
    let syn = build_tcp_segment(5558, 8082, client_iss, 0, TcpFlags::SYN, true, &[]);
    h.inject(syn);

    let synack_frame = h.recv_frame(Duration::from_secs(1)).expect("syn-ack sent back");
    let synack = parse_tcp(&synack_frame);
    let server_iss = synack.seq;

    let ack = build_tcp_segment(5558,
                               8082,
                               client_iss.wrapping_add(1),
                               server_iss.wrapping_add(1),
                               TcpFlags::ACK,
                               false,
                               &[]);
    h.inject(ack);
    h.settle();

    let accepted = listener.accept().expect("accept");

    // close() blocks until TimeWait is reached, which needs the rest of this
    // test to feed it the peer's half of the teardown, so it can't run
    // inline on this thread.
    let closer = thread::spawn(move || accepted.close());

    let fin_frame = h.recv_frame(Duration::from_secs(1)).expect("fin sent");
    let fin = parse_tcp(&fin_frame);
    assert_eq!(fin.flags, TcpFlags::FIN | TcpFlags::ACK);
    assert_eq!(fin.seq, server_iss.wrapping_add(1));
    assert_eq!(fin.ack, client_iss.wrapping_add(1));

    // Peer acks our FIN (no flags of its own), driving FinWait1 -> FinWait2.
    let ack_of_fin = build_tcp_segment(5558,
                                       8082,
                                       client_iss.wrapping_add(1),
                                       server_iss.wrapping_add(2),
                                       TcpFlags::ACK,
                                       false,
                                       &[]);
    h.inject(ack_of_fin);
    h.settle();

    // Peer closes its own half; the engine must ack it and reach TimeWait,
    // which is what unblocks the `close()` call running on `closer`.
    let peer_fin = build_tcp_segment(5558,
                                     8082,
                                     client_iss.wrapping_add(1),
                                     server_iss.wrapping_add(2),
                                     TcpFlags::FIN | TcpFlags::ACK,
                                     false,
                                     &[]);
    h.inject(peer_fin);

    let final_ack_frame = h.recv_frame(Duration::from_secs(1)).expect("final ack sent");
    let final_ack = parse_tcp(&final_ack_frame);
    assert_eq!(final_ack.flags, TcpFlags::ACK);
    assert_eq!(final_ack.seq, server_iss.wrapping_add(2));
    assert_eq!(final_ack.ack, client_iss.wrapping_add(2));

    closer.join().expect("closer thread panicked").expect("close");
}
