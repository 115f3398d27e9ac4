use {RxError, RxResult};
use ethernet::EthernetListener;

use pnet::packet::Packet;
use pnet::packet::ethernet::{EtherType, EtherTypes, EthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocol;
use pnet::packet::ipv4::{Ipv4Packet, checksum};

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use super::MORE_FRAGMENTS;

/// `255.255.255.255`, the limited-broadcast address. Always delivered
/// locally regardless of subnet.
pub const LIMITED_BROADCAST: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 255);

/// Anyone interested in receiving IPv4 packets from `Ipv4` must implement this.
pub trait Ipv4Listener: Send {
    /// Called by the library to deliver an `Ipv4Packet` to a listener.
    fn recv(&mut self, time: SystemTime, packet: Ipv4Packet) -> RxResult;
}

/// Type binding for how the listeners in `Ipv4Rx` are structured.
pub type IpListenerLookup = HashMap<Ipv4Addr, HashMap<IpNextHeaderProtocol, Box<Ipv4Listener>>>;

/// Listener and parser for IPv4 packets. Receives ethernet frames from the
/// `EthernetRx` it's owned by and forwards them to the correct `Ipv4Listener`.
///
/// Fragments (`MF` set or a non-zero fragment offset) are dropped rather
/// than reassembled; this stack never reassembles incoming fragments.
pub struct Ipv4Rx {
    listeners: Arc<Mutex<IpListenerLookup>>,
    broadcasts: Arc<Mutex<HashSet<Ipv4Addr>>>,
}

impl Ipv4Rx {
    /// Creates a new `Ipv4Rx` with the given listeners and the set of
    /// broadcast addresses owned by the interface. Returns the instance
    /// casted for easy addition to the `EthernetRx` listener `Vec`.
    pub fn new(listeners: Arc<Mutex<IpListenerLookup>>,
               broadcasts: Arc<Mutex<HashSet<Ipv4Addr>>>)
               -> Box<EthernetListener> {
        let this = Ipv4Rx {
            listeners: listeners,
            broadcasts: broadcasts,
        };
        Box::new(this) as Box<EthernetListener>
    }

    /// Returns the Ipv4Packet contained in this EthernetPacket if it looks
    /// valid. Drops packets shorter than a bare header, with a bad version,
    /// a total length field exceeding the available buffer, a bad checksum
    /// or an expired TTL.
    fn get_ipv4_pkg<'a>(eth_pkg: &'a EthernetPacket) -> Result<Ipv4Packet<'a>, RxError> {
        let eth_payload = eth_pkg.payload();
        if eth_payload.len() < Ipv4Packet::minimum_packet_size() {
            return Err(RxError::InvalidLength);
        }
        let (version, total_length) = {
            let ip_pkg = Ipv4Packet::new(eth_payload).unwrap();
            (ip_pkg.get_version(), ip_pkg.get_total_length() as usize)
        };
        if version != 4 {
            return Err(RxError::InvalidContent);
        }
        if total_length > eth_payload.len() || total_length < Ipv4Packet::minimum_packet_size() {
            return Err(RxError::InvalidLength);
        }
        let ip_pkg = Ipv4Packet::new(&eth_payload[..total_length]).unwrap();
        if ip_pkg.get_checksum() != checksum(&ip_pkg) {
            return Err(RxError::InvalidChecksum);
        }
        if ip_pkg.get_ttl() == 0 {
            return Err(RxError::InvalidContent);
        }
        Ok(ip_pkg)
    }

    fn is_fragment(ip_pkg: &Ipv4Packet) -> bool {
        let mf = (ip_pkg.get_flags() & MORE_FRAGMENTS) != 0;
        let offset = ip_pkg.get_fragment_offset() != 0;
        mf || offset
    }

    /// Forwards a complete packet to its listener(s). Delivers to every
    /// owned address when `dest_ip` is the limited-broadcast address or one
    /// of the interface's subnet broadcast addresses, otherwise to the exact
    /// matching local address only.
    fn forward(&self, time: SystemTime, ip_pkg: Ipv4Packet) -> RxResult {
        let dest_ip = ip_pkg.get_destination();
        let next_level_protocol = ip_pkg.get_next_level_protocol();
        trace!("Ipv4 got a packet to {}!", dest_ip);
        let mut listeners = self.listeners.lock().unwrap();
        if listeners.contains_key(&dest_ip) {
            let proto_listeners = listeners.get_mut(&dest_ip).unwrap();
            if let Some(listener) = proto_listeners.get_mut(&next_level_protocol) {
                listener.recv(time, ip_pkg)
            } else {
                Err(RxError::NoListener(format!("Ipv4 {:?}", next_level_protocol)))
            }
        } else if dest_ip == LIMITED_BROADCAST || self.broadcasts.lock().unwrap().contains(&dest_ip) {
            let mut delivered = false;
            for proto_listeners in listeners.values_mut() {
                if let Some(listener) = proto_listeners.get_mut(&next_level_protocol) {
                    delivered = listener.recv(time, ip_pkg.clone()).is_ok() || delivered;
                }
            }
            if delivered {
                Ok(())
            } else {
                Err(RxError::NoListener(format!("Ipv4 broadcast {:?}", next_level_protocol)))
            }
        } else {
            Err(RxError::NoListener(format!("Ipv4 {}", dest_ip)))
        }
    }
}

impl EthernetListener for Ipv4Rx {
    fn recv(&mut self, time: SystemTime, eth_pkg: &EthernetPacket) -> RxResult {
        let ip_pkg = try!(Self::get_ipv4_pkg(eth_pkg));
        if Self::is_fragment(&ip_pkg) {
            debug!("Dropping IPv4 fragment from {} (reassembly not supported)",
                   ip_pkg.get_source());
            Err(RxError::InvalidContent)
        } else {
            self.forward(time, ip_pkg)
        }
    }

    fn ether_type(&self) -> EtherType {
        EtherTypes::Ipv4
    }
}
