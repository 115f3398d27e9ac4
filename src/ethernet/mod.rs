//! Provides functionality for reading and writing ethernet frames from and to
//! an underlying network adapter.

use std::io;

use pnet::datalink::{Config, Channel, EthernetDataLinkSender, EthernetDataLinkReceiver};
use pnet::util::NetworkInterface;

mod ethernet_rx;
mod ethernet_tx;

pub use self::ethernet_rx::{BasicEthernetListener, EthernetListener, EthernetRx};
pub use self::ethernet_tx::{BasicEthernetProtocol, EthernetBuilder, EthernetProtocol, EthernetTx,
                            EthernetTxImpl};

/// Flags describing the state and capabilities of a network device, mirroring
/// the subset of `SIOCGIFFLAGS` bits that matter to this stack.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NetDeviceFlags {
    pub up: bool,
    pub running: bool,
    pub broadcast: bool,
    pub multicast: bool,
    pub loopback: bool,
    pub no_arp: bool,
    pub point_to_point: bool,
    pub promiscuous: bool,
}

impl NetDeviceFlags {
    /// Builds a `NetDeviceFlags` from the bitmask `pnet::util::NetworkInterface`
    /// reports, following the same bit layout as Linux's `net_device_flags`.
    pub fn from_pnet_flags(bits: u32) -> NetDeviceFlags {
        NetDeviceFlags {
            up: bits & 0x1 != 0,
            broadcast: bits & 0x2 != 0,
            loopback: bits & 0x8 != 0,
            point_to_point: bits & 0x10 != 0,
            running: bits & 0x40 != 0,
            no_arp: bits & 0x80 != 0,
            promiscuous: bits & 0x100 != 0,
            multicast: bits & 0x1000 != 0,
        }
    }
}

/// Abstraction over the datalink backend used to open Ethernet channels and
/// enumerate interfaces. Lets `NetworkStack` be constructed against either the
/// real `pnet` backend or a mock, for tests.
pub trait EthernetProvider {
    fn channel(&mut self,
               iface: &NetworkInterface,
               config: Config)
               -> io::Result<(Box<EthernetDataLinkSender>, Box<EthernetDataLinkReceiver>)>;

    fn get_network_interfaces(&self) -> Vec<NetworkInterface>;
}

/// Production `EthernetProvider` backed by the real `pnet` datalink layer.
pub struct PnetEthernetProvider;

impl EthernetProvider for PnetEthernetProvider {
    fn channel(&mut self,
               iface: &NetworkInterface,
               config: Config)
               -> io::Result<(Box<EthernetDataLinkSender>, Box<EthernetDataLinkReceiver>)> {
        use pnet::datalink::channel;
        match channel(iface, config) {
            Ok(Channel::Ethernet(sender, receiver)) => Ok((sender, receiver)),
            Ok(_) => Err(io::Error::new(io::ErrorKind::Other, "Invalid channel type")),
            Err(e) => {
                Err(io::Error::new(io::ErrorKind::Other,
                                   format!("Unable to create data link channel: {}", e)))
            }
        }
    }

    fn get_network_interfaces(&self) -> Vec<NetworkInterface> {
        use pnet::datalink::interfaces;
        interfaces()
    }
}
