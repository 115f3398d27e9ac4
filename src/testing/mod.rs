//! Mock Ethernet backend used by integration-style scenario tests under
//! `tests/`, so the stack can be exercised end to end without a live NIC.
//! Reconciled from the teacher's `tests/mockpnet` helper into a proper
//! `EthernetProvider` implementation.

use std::io;
use std::sync::mpsc::{self, Sender, Receiver};
use std::thread;
use std::time;

use pnet::datalink::{Config, EthernetDataLinkSender, EthernetDataLinkReceiver,
                     EthernetDataLinkChannelIterator};
use pnet::packet::ethernet::{MutableEthernetPacket, EthernetPacket};
use pnet::packet::Packet;
use pnet::util::{NetworkInterface, MacAddr};

use ethernet::EthernetProvider;

/// A `NetworkInterface` with a deterministic MAC, suitable for tests.
pub fn dummy_iface(i: u8) -> NetworkInterface {
    NetworkInterface {
        name: format!("eth{}", i),
        index: i as u32,
        mac: Some(MacAddr::new(1, 2, 3, 4, 5, 6 + i)),
        ips: None,
        flags: 0,
    }
}

pub fn dummy_conf() -> Config {
    Config::default()
}

/// `EthernetProvider` that hands out a single mock channel instead of
/// talking to a real network interface. Packets pushed onto `in_packets`'s
/// `Sender` are delivered to the stack as if received from the wire;
/// packets the stack transmits are forwarded to `out_channel`.
pub struct MockEthernetProvider {
    in_packets: Option<Receiver<io::Result<Box<[u8]>>>>,
    out_channel: Option<Sender<Vec<u8>>>,
}

impl MockEthernetProvider {
    pub fn new(in_packets: Option<Receiver<io::Result<Box<[u8]>>>>,
               out_channel: Option<Sender<Vec<u8>>>)
               -> MockEthernetProvider {
        MockEthernetProvider {
            in_packets: in_packets,
            out_channel: out_channel,
        }
    }
}

impl EthernetProvider for MockEthernetProvider {
    fn channel(&mut self,
               _iface: &NetworkInterface,
               _config: Config)
               -> io::Result<(Box<EthernetDataLinkSender>, Box<EthernetDataLinkReceiver>)> {
        let sender = Box::new(MockEthernetDataLinkSender { out_channel: self.out_channel.take() });
        let receiver = Box::new(MockEthernetDataLinkReceiver {
            in_packets: Some(match self.in_packets.take() {
                Some(chan) => chan,
                None => {
                    let (_, rx) = mpsc::channel();
                    rx
                }
            }),
        });
        Ok((sender, receiver))
    }

    fn get_network_interfaces(&self) -> Vec<NetworkInterface> {
        vec![dummy_iface(0)]
    }
}

pub struct MockEthernetDataLinkSender {
    out_channel: Option<Sender<Vec<u8>>>,
}

impl EthernetDataLinkSender for MockEthernetDataLinkSender {
    fn build_and_send(&mut self,
                      _num_packets: usize,
                      packet_size: usize,
                      func: &mut FnMut(MutableEthernetPacket))
                      -> Option<io::Result<()>> {
        let mut buffer = vec![0; packet_size];
        {
            let pkg = MutableEthernetPacket::new(&mut buffer[..]).unwrap();
            func(pkg);
        }
        if let Some(chan) = self.out_channel.as_ref() {
            chan.send(buffer).unwrap();
        }
        Some(Ok(()))
    }

    fn send_to(&mut self,
               _packet: &EthernetPacket,
               _dst: Option<NetworkInterface>)
               -> Option<io::Result<()>> {
        panic!("Not implemented in mock");
    }
}

pub struct MockEthernetDataLinkReceiver {
    in_packets: Option<Receiver<io::Result<Box<[u8]>>>>,
}

impl EthernetDataLinkReceiver for MockEthernetDataLinkReceiver {
    fn iter<'a>(&'a mut self) -> Box<EthernetDataLinkChannelIterator + 'a> {
        Box::new(MockEthernetDataLinkChannelIterator {
            in_packets: self.in_packets.take().expect("Only one receiver allowed"),
            used_packets: vec![],
        })
    }
}

pub struct MockEthernetDataLinkChannelIterator {
    in_packets: Receiver<io::Result<Box<[u8]>>>,
    used_packets: Vec<Box<[u8]>>,
}

impl<'a> EthernetDataLinkChannelIterator<'a> for MockEthernetDataLinkChannelIterator {
    fn next(&mut self) -> io::Result<EthernetPacket> {
        match self.in_packets.recv() {
            Ok(result) => {
                match result {
                    Ok(buffer) => {
                        self.used_packets.push(buffer);
                        let buffer_ref = &*self.used_packets[self.used_packets.len() - 1];
                        let packet = EthernetPacket::new(buffer_ref).unwrap();
                        Ok(packet)
                    }
                    Err(e) => Err(e),
                }
            }
            Err(_) => {
                // Out of injected test packets: block instead of returning
                // EOF, matching a real interface that just has no traffic.
                loop {
                    thread::sleep(time::Duration::new(1, 0));
                }
            }
        }
    }
}
