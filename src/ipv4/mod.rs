mod ipv4_rx;
mod ipv4_tx;

pub use self::ipv4_rx::{Ipv4Listener, IpListenerLookup, Ipv4Rx, LIMITED_BROADCAST};
pub use self::ipv4_tx::{BasicIpv4Protocol, Ipv4Builder, Ipv4Protocol, Ipv4Tx, Ipv4TxImpl};

pub const MORE_FRAGMENTS: u8 = 0b001;
pub const DONT_FRAGMENT: u8 = 0b010;
pub const NO_FLAGS: u8 = 0b000;

/// Default TTL set on every packet this stack transmits, matching the
/// original implementation's `IP_TTL_DEFAULT`.
pub const IPV4_TTL: u8 = 255;

#[cfg(test)]
mod tests {
    use RxError;
    use ethernet::EthernetListener;

    use pnet::packet::MutablePacket;
    use pnet::packet::ethernet::MutableEthernetPacket;
    use pnet::packet::ip::IpNextHeaderProtocols;
    use pnet::packet::ipv4::{MutableIpv4Packet, checksum};

    use std::collections::{HashMap, HashSet};
    use std::net::Ipv4Addr;
    use std::sync::{Arc, Mutex};
    use std::sync::mpsc::{self, Receiver, Sender};
    use std::time::SystemTime;

    use super::*;

    struct TestListener(Sender<()>);

    impl Ipv4Listener for TestListener {
        fn recv(&mut self, _time: SystemTime, _pkt: ::pnet::packet::ipv4::Ipv4Packet) -> ::RxResult {
            self.0.send(()).unwrap();
            Ok(())
        }
    }

    fn setup_rx(dst: Ipv4Addr, broadcasts: HashSet<Ipv4Addr>)
                -> (Box<EthernetListener>, Receiver<()>) {
        let (tx, rx) = mpsc::channel();
        let listener = Box::new(TestListener(tx));

        let mut ip_listeners = HashMap::new();
        ip_listeners.insert(IpNextHeaderProtocols::Icmp, listener);

        let mut listeners = HashMap::new();
        listeners.insert(dst, ip_listeners);

        let listeners = Arc::new(Mutex::new(listeners));
        let broadcasts = Arc::new(Mutex::new(broadcasts));
        let ipv4_rx = Ipv4Rx::new(listeners, broadcasts);
        (ipv4_rx, rx)
    }

    fn build_packet(buffer: &mut [u8], dst: Ipv4Addr, flags: u8, fragment_offset: u16, ttl: u8) {
        let mut pkg = MutableEthernetPacket::new(buffer).unwrap();
        let mut ip_pkg = MutableIpv4Packet::new(pkg.payload_mut()).unwrap();
        ip_pkg.set_version(4);
        ip_pkg.set_destination(dst);
        ip_pkg.set_next_level_protocol(IpNextHeaderProtocols::Icmp);
        ip_pkg.set_flags(flags);
        ip_pkg.set_fragment_offset(fragment_offset);
        ip_pkg.set_header_length(5);
        ip_pkg.set_ttl(ttl);
        ip_pkg.set_total_length(20 + 15);
        let csum = checksum(&ip_pkg.to_immutable());
        ip_pkg.set_checksum(csum);
    }

    #[test]
    fn rx_delivers_unfragmented_packet_to_exact_listener() {
        let dst = Ipv4Addr::new(127, 0, 0, 1);
        let (mut ipv4_rx, rx) = setup_rx(dst, HashSet::new());

        let mut buffer = vec![0u8; 100];
        build_packet(&mut buffer, dst, NO_FLAGS, 0, 64);
        let pkg = MutableEthernetPacket::new(&mut buffer).unwrap();

        ipv4_rx.recv(SystemTime::now(), &pkg.to_immutable()).unwrap();
        rx.try_recv().expect("packet should have been delivered");
    }

    #[test]
    fn rx_drops_fragments_instead_of_reassembling() {
        let dst = Ipv4Addr::new(127, 0, 0, 1);
        let (mut ipv4_rx, rx) = setup_rx(dst, HashSet::new());

        let mut buffer = vec![0u8; 100];
        build_packet(&mut buffer, dst, MORE_FRAGMENTS, 0, 64);
        let pkg = MutableEthernetPacket::new(&mut buffer).unwrap();

        assert_eq!(ipv4_rx.recv(SystemTime::now(), &pkg.to_immutable()),
                   Err(RxError::InvalidContent));
        assert!(rx.try_recv().is_err());

        let mut buffer2 = vec![0u8; 100];
        build_packet(&mut buffer2, dst, NO_FLAGS, 2, 64);
        let pkg2 = MutableEthernetPacket::new(&mut buffer2).unwrap();
        assert_eq!(ipv4_rx.recv(SystemTime::now(), &pkg2.to_immutable()),
                   Err(RxError::InvalidContent));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn rx_drops_expired_ttl() {
        let dst = Ipv4Addr::new(127, 0, 0, 1);
        let (mut ipv4_rx, _rx) = setup_rx(dst, HashSet::new());

        let mut buffer = vec![0u8; 100];
        build_packet(&mut buffer, dst, NO_FLAGS, 0, 0);
        let pkg = MutableEthernetPacket::new(&mut buffer).unwrap();

        assert_eq!(ipv4_rx.recv(SystemTime::now(), &pkg.to_immutable()),
                   Err(RxError::InvalidContent));
    }

    #[test]
    fn rx_delivers_limited_broadcast_to_all_local_listeners() {
        let dst = Ipv4Addr::new(127, 0, 0, 1);
        let (mut ipv4_rx, rx) = setup_rx(dst, HashSet::new());

        let mut buffer = vec![0u8; 100];
        build_packet(&mut buffer, LIMITED_BROADCAST, NO_FLAGS, 0, 64);
        let pkg = MutableEthernetPacket::new(&mut buffer).unwrap();

        ipv4_rx.recv(SystemTime::now(), &pkg.to_immutable()).unwrap();
        rx.try_recv().expect("broadcast packet should have been delivered");
    }

    #[test]
    fn rx_drops_packet_to_unowned_address() {
        let dst = Ipv4Addr::new(127, 0, 0, 1);
        let other = Ipv4Addr::new(10, 0, 0, 99);
        let (mut ipv4_rx, rx) = setup_rx(dst, HashSet::new());

        let mut buffer = vec![0u8; 100];
        build_packet(&mut buffer, other, NO_FLAGS, 0, 64);
        let pkg = MutableEthernetPacket::new(&mut buffer).unwrap();

        assert!(ipv4_rx.recv(SystemTime::now(), &pkg.to_immutable()).is_err());
        assert!(rx.try_recv().is_err());
    }
}
