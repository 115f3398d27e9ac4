//! A from-scratch TCP engine (RFC 793), layered the same way the rest of
//! this crate layers protocols: a `TcpTx` tx-object sits on top of an
//! `Ipv4Tx`, and a `TcpRx` implements `Ipv4Listener` to receive segments.
//! Unlike Icmp/Udp, which only ever react to what a socket asks of them,
//! TCP owns real protocol state (the TCB table) and replies to incoming
//! segments on its own, so it additionally carries its own `TcpLink`
//! (interface mac/mtu/Arp/tx) to build outgoing segments without going
//! back through a `StackInterface`.
//!
//! Grounded throughout on `original_source/tcp.c`'s `tcp_cb`/`tcp_rx`/
//! `tcp_incoming_event`/`tcp_api_*` family.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use pnet::util::MacAddr;

use arp::{self, ArpTable};
use ethernet::EthernetTxImpl;
use ipv4::Ipv4TxImpl;
use tx::{TxBarrier, TxImpl};
use {TxError, TxResult};

mod crypto;
mod retransmit;
mod tcb;
mod table;
mod tcp_rx;
mod tcp_tx;

pub use self::crypto::CryptoState;
pub use self::retransmit::spawn_retransmit_thread;
pub use self::tcb::{RecvSequence, RetransmitEntry, SendSequence, Tcb, TcpOptions, TcpState};
pub use self::table::{TcpTableHandle, TcpTables};
pub use self::tcp_rx::TcpRx;
pub use self::tcp_tx::{TcpSegmentBuilder, TcpTx};

/// Fixed number of slots in the TCB table, mirroring the original's static
/// `cb_table[TCP_CB_TABLE_SIZE]` array. Never grown dynamically.
pub const TCP_CB_TABLE_SIZE: usize = 16;

/// Size of a Tcb's fixed receive window/buffer (`cb->window` in the original).
pub const TCP_WINDOW_SIZE: usize = 4096;

/// Default backlog capacity for a passively-opened (listening) Tcb when the
/// caller does not otherwise constrain it.
pub const TCP_DEFAULT_BACKLOG: usize = 16;

/// Option kind used for the handshake marker (arbitrarily chosen by the
/// original, kept as-is for wire compatibility with it).
pub const HANDSHAKE_MARKER_KIND: u8 = 69;

/// Option length (including kind+length bytes) of the handshake marker.
pub const HANDSHAKE_MARKER_LEN: u8 = 3;

/// Option value carried by the handshake marker.
pub const HANDSHAKE_MARKER_VALUE: u8 = 0x99;

/// After this many unacked retransmissions of the same segment, the
/// connection is forced closed. (SUPPLEMENT: the original never retransmits.)
pub const MAX_RETRANSMITS: u32 = 5;

/// How long a Tcb sits in `TimeWait` before the retransmit thread frees its
/// slot, chosen well under RFC 793's customary 2*MSL (which assumes a
/// multi-minute real-network MSL) since this engine only ever runs against
/// directly-attached peers. (SUPPLEMENT: the original has no TIME_WAIT at
/// all; a Tcb that reaches it here would otherwise hold a table slot
/// forever, see `TCP_CB_TABLE_SIZE`.)
pub const TIME_WAIT_SECS: u64 = 30;

/// Errors a TCP operation can produce.
#[derive(Debug)]
pub enum TcpError {
    /// The fixed-size TCB table has no free slot (`TCP_CB_TABLE_SIZE`).
    NoFreeSlot,
    /// Operation attempted on a Tcb in the wrong state.
    NotConnected,
    /// The peer reset the connection.
    ConnectionReset,
    /// The peer closed its write side; no more data will arrive.
    PeerClosed,
    /// No route/Arp entry could be found for the peer.
    NoRoute,
    /// Argument was invalid for the requested operation.
    InvalidArgument,
    /// Failure to transmit a segment.
    TxError(TxError),
}

impl From<TxError> for TcpError {
    fn from(e: TxError) -> TcpError {
        TcpError::TxError(e)
    }
}

pub type TcpResult<T> = Result<T, TcpError>;

/// Everything a Tcb needs to build and send segments directly over one
/// interface, without needing to borrow the owning `StackInterface`. TCP
/// never routes through a gateway: replies always leave on the interface a
/// segment arrived on, matching `original_source/tcp.c`'s `cb->iface`.
#[derive(Clone)]
pub struct TcpLink {
    tx: Arc<Mutex<TxBarrier>>,
    mac: MacAddr,
    mtu: usize,
    arp_table: ArpTable,
}

impl TcpLink {
    pub fn new(tx: Arc<Mutex<TxBarrier>>, mac: MacAddr, mtu: usize, arp_table: ArpTable) -> TcpLink {
        TcpLink {
            tx: tx,
            mac: mac,
            mtu: mtu,
            arp_table: arp_table,
        }
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    fn tx_impl(&self) -> TxImpl {
        let version = self.tx.lock().unwrap().version();
        TxImpl::new(self.tx.clone(), version)
    }

    fn arp_tx(&self) -> arp::ArpTx<EthernetTxImpl<TxImpl>> {
        let broadcast = MacAddr::new(0xff, 0xff, 0xff, 0xff, 0xff, 0xff);
        arp::ArpTx::new(EthernetTxImpl::new(self.tx_impl(), self.mac, broadcast))
    }

    /// Resolves `peer`'s mac (blocking on Arp if needed) and builds an
    /// `Ipv4Tx` straight to it.
    pub fn ipv4_tx(&mut self,
                   src: Ipv4Addr,
                   peer: Ipv4Addr)
                   -> TcpResult<Ipv4TxImpl<EthernetTxImpl<TxImpl>>> {
        let dst_mac = match self.arp_table.get(peer) {
            arp::ArpResolution::Found(mac) => mac,
            arp::ArpResolution::Query(rx) => {
                tx_send!(|| self.arp_tx(); src, peer)?;
                rx.recv().map_err(|_| TcpError::NoRoute)?
            }
            arp::ArpResolution::Error => return Err(TcpError::NoRoute),
        };
        let ethernet_tx = EthernetTxImpl::new(self.tx_impl(), self.mac, dst_mac);
        Ok(Ipv4TxImpl::new(ethernet_tx, src, peer, self.mtu))
    }
}

/// Scans a raw TCP options buffer for the handshake marker. Any other option
/// kind present is skipped over via its length byte and never parsed, per
/// the wire format this engine understands.
pub fn has_handshake_marker(options: &[u8]) -> bool {
    let mut i = 0;
    while i < options.len() {
        let kind = options[i];
        if kind == 0 {
            break;
        }
        if kind == 1 {
            i += 1;
            continue;
        }
        if i + 1 >= options.len() {
            break;
        }
        let len = options[i + 1] as usize;
        if len < 2 || i + len > options.len() {
            break;
        }
        if kind == HANDSHAKE_MARKER_KIND && len as u8 >= HANDSHAKE_MARKER_LEN {
            return options[i + 2] == HANDSHAKE_MARKER_VALUE;
        }
        i += len;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_found_alone() {
        let options = [HANDSHAKE_MARKER_KIND, 3, 0x99, 0];
        assert!(has_handshake_marker(&options));
    }

    #[test]
    fn marker_missing() {
        let options = [0, 0, 0, 0];
        assert!(!has_handshake_marker(&options));
    }

    #[test]
    fn marker_wrong_value_rejected() {
        let options = [HANDSHAKE_MARKER_KIND, 3, 0x42, 0];
        assert!(!has_handshake_marker(&options));
    }

    #[test]
    fn unrelated_option_is_skipped_over() {
        // A bogus 4-byte option (e.g. a fake MSS) followed by our marker.
        let options = [2, 4, 0x05, 0xb4, HANDSHAKE_MARKER_KIND, 3, 0x99, 0];
        assert!(has_handshake_marker(&options));
    }
}
