// Copyright (c) 2016 Linus FÃ¤rnstrand <faern@faern.net>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! # ripstcp
//!
//! A userspace TCP/IP stack backed by [`libpnet`](https://github.com/libpnet/libpnet)
//! for raw ethernet access: Ethernet framing, Arp, IPv4 routing and
//! fragmentation, a from-scratch TCP engine and a small BSD-style socket API
//! on top of it.
//!
//! ## Usage
//!
//! ```rust,ignore
//! extern crate ripstcp;
//!
//! let stack = ripstcp::default_stack();
//! ...
//! ```
//!
//! ## Architecture and terminology
//!
//! ### Sending
//!
//! This crate contains a number of structs with names ending in *Tx*,
//! eg. `EthernetTx`, `ArpTx`, `Ipv4Tx`, `UdpTx`, `TcpTx`. We call them
//! *tx-objects*, or transmit objects. The tx-objects build the header for
//! their protocol and are supposed to be as simple as possible.
//! The constructors of the tx-objects take an instance of a tx-object
//! belonging to the underlying protocol, eg. both `ArpTx` and `Ipv4Tx`
//! take an `EthernetTx`, while `UdpTx` and `TcpTx` take an `Ipv4Tx`.
//!
//! At the bottom of the stack there is a `TxBarrier` for every interface.
//! It holds the sending part of the `pnet` backend and a version counter
//! behind a `Mutex`. Whenever anything in the stack changes, such as updates
//! to the Arp or routing tables, the counter is incremented. Every `Tx`
//! instance snapshots the counter at creation time; sending through a stale
//! `Tx` returns `TxError::InvalidTx` and the caller reconstructs (cheap) and
//! retries via the `tx_send!` macro.
//!
//! ### Receiving
//!
//! Just as every protocol has a struct whose name ends in *Tx* for
//! transmission, it has a corresponding struct ending in *Rx* used for
//! parsing incoming packets. At the bottom the listeners are fixed at
//! construction time; further up the stack listeners live behind `Mutex`es
//! so sockets can come and go over the life of the stack.
//!
//! ### tests
//!
//! Unit tests live alongside the code they test. Integration-style scenario
//! tests live under `tests/` and run against a mock Ethernet backend
//! (`testing::MockEthernetProvider`) so the stack can be exercised without a
//! live NIC.

// #![deny(missing_docs)]

extern crate rand;
extern crate pnet;
extern crate ipnetwork;

use std::io;

#[macro_use]
extern crate log;

use pnet::datalink::{self, NetworkInterface};
use pnet::util::MacAddr;

#[macro_use]
mod macros;

pub mod ethernet;

/// Module containing everything related to the address resolution protocol
/// (Arp)
pub mod arp;

/// Module containing IPv4 functionality
pub mod ipv4;

/// Module containing internet control message procotol (icmp) functionality
pub mod icmp;

/// Module containing Udp functionality.
pub mod udp;

/// Module containing the TCP engine: TCB table, state machine and
/// retransmission.
pub mod tcp;

/// BSD-style socket API dispatching to the Tcp and Udp engines.
pub mod socket;

mod routing;
pub use routing::RoutingTable;

mod util;

mod tx;
pub use tx::{Tx, TxBarrier, TxImpl};

#[cfg(any(test, feature = "unit-tests", feature = "integration-tests", feature = "benchmarks"))]
pub mod testing;

mod stack;

pub use stack::{NetworkStack, StackError, StackResult};

pub static DEFAULT_BUFFER_SIZE: usize = 1024 * 128;

/// Representation for one network interface. More or less a subset of
/// `pnet::util::NetworkInterface`, but with guaranteed MAC address.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Interface {
    /// The name of this interface. Used only for providing something readable
    /// to the user
    pub name: String,

    /// The MAC address of this interface
    pub mac: MacAddr,
}

impl Interface {
    /// Creates a new `Interface` with the given properties
    pub fn new(name: String, mac: MacAddr) -> Interface {
        Interface {
            name: name,
            mac: mac,
        }
    }
}

/// Super trait to any protocol
pub trait Protocol {
    /// Returns how many bytes this packet will occupy
    fn len(&self) -> usize;

    /// Construct this packet into the given `buffer`
    fn build(&mut self, buffer: &mut [u8]);
}

/// Represents the channel used for sending to and reading from one network
/// interface.
/// Basically a simplification of `pnet::datalink::Channel` but guaranteed to
/// be be ethernet.
pub struct EthernetChannel(pub Box<datalink::EthernetDataLinkSender>,
                           pub Box<datalink::EthernetDataLinkReceiver>);

/// Enum representing errors happening while trying to send packets to the
/// network
#[derive(Debug)]
pub enum TxError {
    /// Returned by `Tx` when trying to use an outdated `*Tx` instance. Please
    /// construct a new one
    InvalidTx,

    /// Returned when the payload does not fit in the given protocol. For
    /// example sending a
    /// packet with more than 2^16 bytes in a protocol with a 16 bit length
    /// field
    TooLargePayload,

    /// Returned when the stack was not able to lock an internal lock. Should
    /// not happen,
    /// indicates an internal error or an invalid usage of this library.
    PoisonedLock,

    /// Returned when there was an `IoError` during transmission
    IoError(io::Error),

    /// Any other error not covered by the more specific enum variants
    Other(String),
}

impl From<io::Error> for TxError {
    fn from(e: io::Error) -> Self {
        TxError::IoError(e)
    }
}

impl From<TxError> for io::Error {
    fn from(e: TxError) -> Self {
        let other = |msg| io::Error::new(io::ErrorKind::Other, msg);
        match e {
            TxError::InvalidTx => other("Outdated constructor".to_owned()),
            TxError::TooLargePayload => other("Too large payload".to_owned()),
            TxError::PoisonedLock => other("Poisoned lock".to_owned()),
            TxError::IoError(e2) => e2,
            TxError::Other(msg) => other(format!("Other: {}", msg)),
        }
    }
}

/// Type binding for the type of `Result` that a send method returns.
pub type TxResult = Result<(), TxError>;

fn io_result_to_tx_result(r: Option<io::Result<()>>) -> TxResult {
    match r {
        None => Err(TxError::Other("Insufficient buffer space".to_owned())),
        Some(ior) => {
            match ior {
                Err(e) => Err(TxError::from(e)),
                Ok(()) => Ok(()),
            }
        }
    }
}

/// Error returned by the `recv` method of `*Rx` objects when there is
/// something wrong with the
/// incoming packet.
#[derive(Debug, Eq, PartialEq)]
pub enum RxError {
    /// When nothing is listening for this packet, so it becomes silently
    /// discarded.
    NoListener(String),

    /// When a packet contains an invalid checksum.
    InvalidChecksum,

    /// When the length of the packet does not match the
    /// requirements or header content of a protocol
    InvalidLength,

    /// When other packet content is invalid.
    InvalidContent,

    /// When a lock inside the stack is poisoned so locking can't be performed.
    /// Should not happen.
    PoisonedLock,

    /// Some error that was not covered by the more specific errors in this
    /// enum.
    Other(String),
}

/// Simple type definition for return type of `recv` on `*Rx` objects.
pub type RxResult = Result<(), RxError>;

/// Create a default stack managing all interfaces given by
/// `pnet::datalink::interfaces()`.
pub fn default_stack() -> StackResult<NetworkStack> {
    NetworkStack::discover(Box::new(ethernet::PnetEthernetProvider))
}

/// Converts a pnet `NetworkInterface` into a rips `Interface`.
/// Will fail if the given `NetworkInterface` does not have an associated MAC
/// address.
/// Can be changed into a `TryFrom` impl when that trait is stabilized
pub fn convert_interface(interface: &NetworkInterface) -> Result<Interface, ()> {
    if let Some(mac) = interface.mac {
        Ok(Interface {
            name: interface.name.clone(),
            mac: mac,
        })
    } else {
        Err(())
    }
}
