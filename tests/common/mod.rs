//! Shared scaffolding for the scenario tests: wires a `NetworkStack` up to a
//! `testing::MockEthernetProvider` and provides raw frame builders for the
//! simulated remote peer, following the same `Mutable*Packet` field-setter
//! patterns used by `ipv4/mod.rs`'s own rx tests and by `tcp/tcp_tx.rs`.

extern crate ripstcp;
extern crate pnet;
extern crate ipnetwork;

use std::io;
use std::net::Ipv4Addr;
use std::sync::mpsc::{self, Sender, Receiver};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use self::pnet::packet::{Packet, MutablePacket};
use self::pnet::packet::ethernet::{EtherTypes, MutableEthernetPacket, EthernetPacket};
use self::pnet::packet::ip::IpNextHeaderProtocols;
use self::pnet::packet::ipv4::{MutableIpv4Packet, Ipv4Packet, checksum as ipv4_header_checksum};
use self::pnet::packet::tcp::{MutableTcpPacket, TcpPacket, ipv4_checksum_adv};
use self::pnet::util::MacAddr;
use self::ipnetwork::Ipv4Network;

use self::ripstcp::NetworkStack;
use self::ripstcp::testing::MockEthernetProvider;

pub const LOCAL_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
pub const PEER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

/// Matches `testing::dummy_iface(0)`'s deterministic mac.
pub fn local_mac() -> MacAddr {
    MacAddr::new(1, 2, 3, 4, 5, 6)
}

pub fn peer_mac() -> MacAddr {
    MacAddr::new(0xde, 0xad, 0xbe, 0xef, 0x00, 0x01)
}

/// Time given to the interface's background threads (`StackInterfaceThread`,
/// the rx thread) to process an injected frame before the test asserts on
/// the result. Generous since CI machines can be slow/contended.
pub const SETTLE: Duration = Duration::from_millis(150);

pub struct Harness {
    pub stack: Arc<Mutex<NetworkStack>>,
    inject: Sender<io::Result<Box<[u8]>>>,
    captured: Receiver<Vec<u8>>,
}

impl Harness {
    /// Brings up a single-interface stack with `LOCAL_IP/24` configured,
    /// backed by the mock provider instead of a live NIC.
    pub fn new() -> Harness {
        let (in_tx, in_rx) = mpsc::channel();
        let (out_tx, out_rx) = mpsc::channel();
        let provider = MockEthernetProvider::new(Some(in_rx), Some(out_tx));
        let mut stack = NetworkStack::discover(Box::new(provider)).expect("discover");
        let interface = stack.interfaces().into_iter().next().expect("one interface");
        let net = Ipv4Network::from_cidr("10.0.0.1/24").unwrap();
        stack.add_ipv4(&interface, net).expect("add_ipv4");
        Harness {
            stack: Arc::new(Mutex::new(stack)),
            inject: in_tx,
            captured: out_rx,
        }
    }

    /// Pushes a raw Ethernet frame onto the stack's single interface, as if
    /// it had just arrived on the wire.
    pub fn inject(&self, frame: Vec<u8>) {
        self.inject.send(Ok(frame.into_boxed_slice())).unwrap();
    }

    /// Waits up to `timeout` for the stack to transmit a frame, returning it.
    pub fn recv_frame(&self, timeout: Duration) -> Option<Vec<u8>> {
        self.captured.recv_timeout(timeout).ok()
    }

    pub fn settle(&self) {
        ::std::thread::sleep(SETTLE);
    }
}

/// A parsed view of a captured outgoing TCP segment's interesting fields.
pub struct CapturedSegment {
    pub flags: u8,
    pub seq: u32,
    pub ack: u32,
    pub payload: Vec<u8>,
}

/// Parses a captured Ethernet frame as an IPv4/TCP segment, panicking if it
/// isn't one (tests assert on the shape they expect to see).
pub fn parse_tcp(frame: &[u8]) -> CapturedSegment {
    let eth = EthernetPacket::new(frame).expect("ethernet frame");
    assert_eq!(eth.get_ethertype(), EtherTypes::Ipv4);
    let ip = Ipv4Packet::new(eth.payload()).expect("ipv4 packet");
    assert_eq!(ip.get_next_level_protocol(), IpNextHeaderProtocols::Tcp);
    let header_len = (ip.get_header_length() as usize) * 4;
    let tcp_bytes = &ip.payload()[..(ip.get_total_length() as usize - header_len)];
    let tcp = TcpPacket::new(tcp_bytes).expect("tcp segment");
    let data_offset = (tcp.get_data_offset() as usize) * 4;
    CapturedSegment {
        flags: tcp.get_flags(),
        seq: tcp.get_sequence(),
        ack: tcp.get_acknowledgement(),
        payload: tcp_bytes[data_offset..].to_vec(),
    }
}

/// Builds a full Ethernet+ARP frame where `PEER_IP`/`peer_mac()` announces
/// itself to `local_mac()`, letting the stack resolve the peer without
/// sending (and blocking on) its own Arp request first.
pub fn build_arp_announcement() -> Vec<u8> {
    use self::pnet::packet::arp::{ArpHardwareTypes, ArpOperations, MutableArpPacket, ArpPacket};

    let arp_len = ArpPacket::minimum_packet_size();
    let total = EthernetPacket::minimum_packet_size() + arp_len;
    let mut buffer = vec![0u8; total];
    {
        let mut eth = MutableEthernetPacket::new(&mut buffer).unwrap();
        eth.set_source(peer_mac());
        eth.set_destination(local_mac());
        eth.set_ethertype(EtherTypes::Arp);
        let mut arp = MutableArpPacket::new(eth.payload_mut()).unwrap();
        arp.set_hardware_type(ArpHardwareTypes::Ethernet);
        arp.set_protocol_type(EtherTypes::Ipv4);
        arp.set_hw_addr_len(6);
        arp.set_proto_addr_len(4);
        arp.set_operation(ArpOperations::Reply);
        arp.set_sender_hw_addr(peer_mac());
        arp.set_sender_proto_addr(PEER_IP);
        arp.set_target_hw_addr(local_mac());
        arp.set_target_proto_addr(LOCAL_IP);
    }
    buffer
}

/// Builds a full Ethernet+IPv4+TCP frame from `PEER_IP:src_port` to
/// `LOCAL_IP:dst_port`, optionally stamping the handshake-marker option.
pub fn build_tcp_segment(src_port: u16,
                         dst_port: u16,
                         seq: u32,
                         ack: u32,
                         flags: u8,
                         marker: bool,
                         payload: &[u8])
                         -> Vec<u8> {
    let tcp_header_len = if marker { 24 } else { 20 };
    let ip_header_len = 20;
    let total_ip_len = ip_header_len + tcp_header_len + payload.len();
    let total = EthernetPacket::minimum_packet_size() + total_ip_len;
    let mut buffer = vec![0u8; total];
    {
        let mut eth = MutableEthernetPacket::new(&mut buffer).unwrap();
        eth.set_source(peer_mac());
        eth.set_destination(local_mac());
        eth.set_ethertype(EtherTypes::Ipv4);
        let mut ip = MutableIpv4Packet::new(eth.payload_mut()).unwrap();
        ip.set_version(4);
        ip.set_header_length(5);
        ip.set_dscp(0);
        ip.set_ecn(0);
        ip.set_total_length(total_ip_len as u16);
        ip.set_identification(0);
        ip.set_flags(0); // no flags, single unfragmented datagram
        ip.set_fragment_offset(0);
        ip.set_ttl(64);
        ip.set_next_level_protocol(IpNextHeaderProtocols::Tcp);
        ip.set_source(PEER_IP);
        ip.set_destination(LOCAL_IP);
        {
            let mut tcp = MutableTcpPacket::new(&mut ip.payload_mut()[..tcp_header_len + payload.len()])
                .unwrap();
            tcp.set_source(src_port);
            tcp.set_destination(dst_port);
            tcp.set_sequence(seq);
            tcp.set_acknowledgement(ack);
            tcp.set_data_offset((tcp_header_len / 4) as u8);
            tcp.set_flags(flags);
            tcp.set_window(4096);
            tcp.set_urgent_ptr(0);
            tcp.set_checksum(0);
            if marker {
                let options = tcp.get_options_raw_mut();
                options[0] = self::ripstcp::tcp::HANDSHAKE_MARKER_KIND;
                options[1] = self::ripstcp::tcp::HANDSHAKE_MARKER_LEN;
                options[2] = self::ripstcp::tcp::HANDSHAKE_MARKER_VALUE;
                options[3] = 0;
            }
            tcp.payload_mut()[..payload.len()].copy_from_slice(payload);
            let csum = ipv4_checksum_adv(&tcp.to_immutable(), &[], PEER_IP, LOCAL_IP);
            tcp.set_checksum(csum);
        }
        let ip_csum = ipv4_header_checksum(&ip.to_immutable());
        ip.set_checksum(ip_csum);
    }
    buffer
}
