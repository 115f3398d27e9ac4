use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::{Duration, Instant};

use pnet::packet::tcp::TcpFlags;

use {TxResult, TxError};

use super::crypto::CryptoState;
use super::tcp_tx::TcpTx;
use super::{TcpError, TcpLink, TcpResult, TCP_WINDOW_SIZE};

/// RFC 793 connection states, plus `Closed` for an unused/torn-down slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    Closed,
    Listen,
    SynSent,
    SynRcvd,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

/// Send sequence space variables, named as in RFC 793 fig. 4.
#[derive(Default, Clone, Copy)]
pub struct SendSequence {
    pub nxt: u32,
    pub una: u32,
    pub wnd: u16,
    pub up: u16,
    pub wl1: u32,
    pub wl2: u32,
}

/// Receive sequence space variables.
#[derive(Default, Clone, Copy)]
pub struct RecvSequence {
    pub nxt: u32,
    pub wnd: u16,
    pub up: u16,
}

/// One outstanding segment, kept around so the retransmit timer can resend
/// it. (SUPPLEMENT: the original never retransmits.)
pub struct RetransmitEntry {
    pub seq: u32,
    pub flags: u8,
    pub payload: Vec<u8>,
    pub queued_at: Instant,
    pub backoff: Duration,
    pub attempts: u32,
}

impl RetransmitEntry {
    pub fn new(seq: u32, flags: u8, payload: Vec<u8>) -> RetransmitEntry {
        RetransmitEntry {
            seq: seq,
            flags: flags,
            payload: payload,
            queued_at: Instant::now(),
            backoff: Duration::from_millis(500),
            attempts: 0,
        }
    }

    pub fn due(&self, now: Instant) -> bool {
        now.duration_since(self.queued_at) >= self.backoff
    }

    /// Doubles the backoff (capped at 30s) and records an attempt.
    pub fn backed_off(&mut self, now: Instant) {
        self.attempts += 1;
        self.queued_at = now;
        self.backoff = Duration::from_secs(30).min(self.backoff * 2);
    }
}

/// Options controlling a Tcb's behavior beyond the base protocol.
#[derive(Clone, Copy, Default)]
pub struct TcpOptions {
    /// Enables the experimental Diffie-Hellman + XOR-stream payload
    /// obfuscation extension. This is **not secure** - the modulus (23) and
    /// keyspace are tiny and the keystream is a predictable LCG. It exists
    /// to mirror `original_source/tcp.c`'s `mod_exp`/`encdec` machinery, not
    /// to protect anything.
    pub encrypt: bool,
}

/// Transmission Control Block: all state for one TCP connection (or, while
/// in `Listen`, one passive-open slot with a backlog of completed children).
pub struct Tcb {
    pub id: usize,
    pub state: TcpState,
    pub link: TcpLink,
    pub local_ip: Ipv4Addr,
    pub local_port: u16,
    pub peer: Option<SocketAddrV4>,
    pub snd: SendSequence,
    pub rcv: RecvSequence,
    pub iss: u32,
    pub irs: u32,
    pub retransmit_queue: VecDeque<RetransmitEntry>,
    pub recv_buffer: VecDeque<u8>,
    pub parent: Option<usize>,
    pub backlog: VecDeque<usize>,
    pub backlog_cap: usize,
    pub options: TcpOptions,
    pub crypto: Option<CryptoState>,
    /// Set the moment this Tcb enters `TimeWait`; the retransmit thread
    /// frees the slot once `TIME_WAIT_SECS` has passed since then.
    pub time_wait_since: Option<Instant>,
}

impl Tcb {
    pub fn new(id: usize, link: TcpLink, local_ip: Ipv4Addr, options: TcpOptions) -> Tcb {
        Tcb {
            id: id,
            state: TcpState::Closed,
            link: link,
            local_ip: local_ip,
            local_port: 0,
            peer: None,
            snd: SendSequence::default(),
            rcv: RecvSequence {
                nxt: 0,
                wnd: TCP_WINDOW_SIZE as u16,
                up: 0,
            },
            iss: 0,
            irs: 0,
            retransmit_queue: VecDeque::new(),
            recv_buffer: VecDeque::new(),
            parent: None,
            backlog: VecDeque::new(),
            backlog_cap: 0,
            options: options,
            crypto: None,
            time_wait_since: None,
        }
    }

    /// Send-side maximum segment size for this connection's interface.
    /// (SUPPLEMENT: the original never segments outgoing writes.)
    pub fn link_mss(&self) -> usize {
        self.link.mtu().saturating_sub(40)
    }

    pub fn rx_is_ready(&self) -> bool {
        match self.state {
            TcpState::Established | TcpState::FinWait1 | TcpState::FinWait2 => true,
            _ => false,
        }
    }

    pub fn tx_is_ready(&self) -> bool {
        match self.state {
            TcpState::Established | TcpState::CloseWait => true,
            _ => false,
        }
    }

    /// Builds and sends one segment, queueing it for retransmit unless it is
    /// a pure ACK (no SYN/FIN, no payload), mirroring `tcp_tx`/`tcp_txq_add`.
    pub fn transmit(&mut self, seq: u32, ack: u32, flags: u8, payload: &[u8]) -> TxResult {
        let peer = self.peer.ok_or(TxError::Other("not connected".to_owned()))?;
        let ipv4_tx = self.link
            .ipv4_tx(self.local_ip, *peer.ip())
            .map_err(|e| match e {
                TcpError::TxError(te) => te,
                _ => TxError::Other("no route to tcp peer".to_owned()),
            })?;
        let mut tcp_tx = TcpTx::new(ipv4_tx, self.local_port, peer.port());
        tcp_tx.send(seq, ack, flags, self.rcv.wnd, payload)?;
        let has_syn_or_fin = flags & (TcpFlags::SYN | TcpFlags::FIN) != 0;
        if has_syn_or_fin || !payload.is_empty() {
            self.retransmit_queue.push_back(RetransmitEntry::new(seq, flags, payload.to_vec()));
        }
        Ok(())
    }

    /// Appends received payload to the window, respecting `rcv.wnd`,
    /// decrypting first if the experimental crypto extension is active.
    pub fn deliver(&mut self, mut payload: Vec<u8>) {
        if let Some(ref mut crypto) = self.crypto {
            crypto.encdec(&mut payload);
        }
        let accept = payload.len().min(self.rcv.wnd as usize);
        self.recv_buffer.extend(payload.into_iter().take(accept));
        self.rcv.wnd -= accept as u16;
    }

    /// Drains up to `buf.len()` bytes from the receive window into `buf`.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.recv_buffer.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.recv_buffer.pop_front().unwrap();
        }
        self.rcv.wnd += n as u16;
        n
    }

    pub fn reset(&mut self) {
        *self = Tcb::new(self.id, self.link.clone(), self.local_ip, self.options);
    }

    /// Resends the head of the retransmit queue if it is due, without
    /// re-queueing a duplicate entry. Returns `Some(attempts)` after
    /// resending (the caller forces closure once `attempts` exceeds
    /// `MAX_RETRANSMITS`), or `None` if nothing was due.
    pub fn retransmit_due(&mut self, now: Instant) -> Option<u32> {
        let due = self.retransmit_queue.front().map_or(false, |e| e.due(now));
        if !due {
            return None;
        }
        let peer = match self.peer {
            Some(peer) => peer,
            None => return None,
        };
        let (seq, ack, flags, payload) = {
            let entry = self.retransmit_queue.front().unwrap();
            (entry.seq, self.rcv.nxt, entry.flags, entry.payload.clone())
        };
        if let Ok(ipv4_tx) = self.link.ipv4_tx(self.local_ip, *peer.ip()) {
            let mut tcp_tx = TcpTx::new(ipv4_tx, self.local_port, peer.port());
            let _ = tcp_tx.send(seq, ack, flags, self.rcv.wnd, &payload);
        }
        let entry = self.retransmit_queue.front_mut().unwrap();
        entry.backed_off(now);
        Some(entry.attempts)
    }
}
