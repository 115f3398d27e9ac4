use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::tcp::{TcpPacket, TcpFlags, ipv4_checksum_adv};
use pnet::packet::Packet;

use {RxError, RxResult};
use ipv4::Ipv4Listener;

use super::crypto::{CryptoState, INIT_MAGIC};
use super::table::{TcpTableHandle, TcpTables};
use super::tcb::TcpState;
use super::{has_handshake_marker, TcpLink};

/// Listener registered under `IpNextHeaderProtocols::Tcp` for one owned
/// local address. Demuxes incoming segments against the shared TCB table
/// and drives the RFC 793 state machine, replying (SYN-ACK/ACK/RST) using
/// its own `TcpLink` rather than routing back through `StackInterface`.
pub struct TcpRx {
    tables: Arc<TcpTableHandle>,
    link: TcpLink,
}

impl TcpRx {
    pub fn new(tables: Arc<TcpTableHandle>, link: TcpLink) -> TcpRx {
        TcpRx {
            tables: tables,
            link: link,
        }
    }
}

struct ParsedSegment {
    src_port: u16,
    dst_port: u16,
    seq: u32,
    ack: u32,
    flags: u8,
    window: u16,
    marker: bool,
}

fn parse(ip_pkg: &Ipv4Packet) -> Result<(ParsedSegment, Vec<u8>), RxError> {
    let data = ip_pkg.payload();
    let tcp_pkg = TcpPacket::new(data).ok_or(RxError::InvalidLength)?;
    let header_len = (tcp_pkg.get_data_offset() as usize) * 4;
    if header_len < 20 || header_len > data.len() {
        return Err(RxError::InvalidLength);
    }
    if tcp_pkg.get_checksum() !=
       ipv4_checksum_adv(&tcp_pkg, &[], ip_pkg.get_source(), ip_pkg.get_destination()) {
        return Err(RxError::InvalidChecksum);
    }
    let segment = ParsedSegment {
        src_port: tcp_pkg.get_source(),
        dst_port: tcp_pkg.get_destination(),
        seq: tcp_pkg.get_sequence(),
        ack: tcp_pkg.get_acknowledgement(),
        flags: tcp_pkg.get_flags(),
        window: tcp_pkg.get_window(),
        marker: has_handshake_marker(tcp_pkg.get_options_raw()),
    };
    let payload = data[header_len..].to_vec();
    Ok((segment, payload))
}

fn be_u32(buf: &[u8]) -> u32 {
    ((buf[0] as u32) << 24) | ((buf[1] as u32) << 16) | ((buf[2] as u32) << 8) | (buf[3] as u32)
}

fn be_u32_bytes(v: u32) -> [u8; 4] {
    [(v >> 24) as u8, (v >> 16) as u8, (v >> 8) as u8, v as u8]
}

/// Is exactly the given combination of flags set, ignoring reserved bits
/// (mirrors the original's `TCP_FLG_IS` macro).
fn flags_is(flags: u8, wanted: u8) -> bool {
    (flags & 0x3f) == wanted
}

fn flags_isset(flags: u8, bits: u8) -> bool {
    (flags & 0x3f) & bits != 0
}

impl Ipv4Listener for TcpRx {
    fn recv(&mut self, _time: SystemTime, ip_pkg: Ipv4Packet) -> RxResult {
        let local_ip = ip_pkg.get_destination();
        let peer_ip = ip_pkg.get_source();
        let (seg, payload) = parse(&ip_pkg)?;
        let peer = SocketAddrV4::new(peer_ip, seg.src_port);

        let mut tables = self.tables.lock();
        let id = match tables.find_connection(local_ip, seg.dst_port, peer) {
            Some(id) => Some(id),
            None => {
                match tables.find_listener(local_ip, seg.dst_port) {
                    Some(listener_id) => {
                        if !flags_is(seg.flags, TcpFlags::SYN) {
                            None
                        } else {
                            let options = tables.get(listener_id)
                                .map(|cb| cb.options)
                                .unwrap_or_default();
                            match tables.open(self.link.clone(), local_ip, options) {
                                Ok(child_id) => {
                                    {
                                        let child = tables.get_mut(child_id).unwrap();
                                        child.state = TcpState::Listen;
                                        child.local_port = seg.dst_port;
                                        child.peer = Some(peer);
                                        child.parent = Some(listener_id);
                                    }
                                    Some(child_id)
                                }
                                Err(_) => None,
                            }
                        }
                    }
                    None => None,
                }
            }
        };

        let id = match id {
            Some(id) => id,
            None => {
                if !flags_isset(seg.flags, TcpFlags::RST) {
                    let (rseq, rack) = closed_reset_numbers(&seg, &payload);
                    let mut link = self.link.clone();
                    if let Ok(ipv4_tx) = link.ipv4_tx(local_ip, peer_ip) {
                        let mut tcp_tx = super::TcpTx::new(ipv4_tx, seg.dst_port, seg.src_port);
                        let _ = tcp_tx.send(rseq, rack, TcpFlags::RST, 0, &[]);
                    }
                }
                return Err(RxError::NoListener(format!("Tcp {}:{}", local_ip, seg.dst_port)));
            }
        };

        incoming_event(&mut tables, id, &seg, &payload);
        drop(tables);
        self.tables.notify_all();
        Ok(())
    }
}

fn closed_reset_numbers(seg: &ParsedSegment, payload: &[u8]) -> (u32, u32) {
    if flags_isset(seg.flags, TcpFlags::ACK) {
        (seg.ack, 0)
    } else {
        let mut ack = seg.seq;
        if flags_isset(seg.flags, TcpFlags::SYN) {
            ack = ack.wrapping_add(1);
        }
        ack = ack.wrapping_add(payload.len() as u32);
        if flags_isset(seg.flags, TcpFlags::FIN) {
            ack = ack.wrapping_add(1);
        }
        (0, ack)
    }
}

/// The RFC 793 state machine, ported from `tcp_incoming_event` in
/// `original_source/tcp.c`.
fn incoming_event(tables: &mut TcpTables, id: usize, seg: &ParsedSegment, payload: &[u8]) {
    let state = match tables.get(id) {
        Some(cb) => cb.state,
        None => return,
    };

    match state {
        TcpState::Closed => {
            if flags_isset(seg.flags, TcpFlags::RST) {
                return;
            }
            let (rseq, rack) = closed_reset_numbers(seg, payload);
            if let Some(cb) = tables.get_mut(id) {
                let _ = cb.transmit(rseq, rack, TcpFlags::RST, &[]);
            }
            tables.remove(id);
            return;
        }
        TcpState::Listen => {
            if flags_isset(seg.flags, TcpFlags::RST) {
                tables.remove(id);
                return;
            }
            if flags_isset(seg.flags, TcpFlags::ACK) {
                if let Some(cb) = tables.get_mut(id) {
                    let _ = cb.transmit(seg.ack, 0, TcpFlags::RST, &[]);
                }
                tables.remove(id);
                return;
            }
            if flags_isset(seg.flags, TcpFlags::SYN) {
                if !seg.marker {
                    if let Some(cb) = tables.get_mut(id) {
                        let _ = cb.transmit(seg.ack, 0, TcpFlags::RST | TcpFlags::ACK, &[]);
                    }
                    tables.remove(id);
                    return;
                }
                let (send_seq, send_ack) = {
                    let cb = tables.get_mut(id).unwrap();
                    cb.rcv.nxt = seg.seq.wrapping_add(1);
                    cb.irs = seg.seq;
                    cb.iss = rand_u32();
                    cb.snd.nxt = cb.iss.wrapping_add(1);
                    cb.snd.una = cb.iss;
                    (cb.iss, cb.rcv.nxt)
                };
                if let Some(cb) = tables.get_mut(id) {
                    let _ = cb.transmit(send_seq, send_ack, TcpFlags::SYN | TcpFlags::ACK, &[]);
                    cb.state = TcpState::SynRcvd;
                }
            }
            return;
        }
        TcpState::SynSent => {
            if flags_isset(seg.flags, TcpFlags::ACK) {
                let (iss, nxt) = {
                    let cb = tables.get(id).unwrap();
                    (cb.iss, cb.snd.nxt)
                };
                if seg.ack <= iss || seg.ack > nxt {
                    if !flags_isset(seg.flags, TcpFlags::RST) {
                        if let Some(cb) = tables.get_mut(id) {
                            let _ = cb.transmit(seg.ack, 0, TcpFlags::RST, &[]);
                        }
                    }
                    return;
                }
            }
            if flags_isset(seg.flags, TcpFlags::RST) {
                if flags_isset(seg.flags, TcpFlags::ACK) {
                    tables.remove(id);
                }
                return;
            }
            if flags_isset(seg.flags, TcpFlags::SYN) {
                {
                    let cb = tables.get_mut(id).unwrap();
                    cb.rcv.nxt = seg.seq.wrapping_add(1);
                    cb.irs = seg.seq;
                }
                if flags_isset(seg.flags, TcpFlags::ACK) {
                    let established = {
                        let cb = tables.get_mut(id).unwrap();
                        cb.snd.una = seg.ack;
                        cb.snd.una > cb.iss
                    };
                    if established {
                        let (seq2, ack2, init_payload) = {
                            let cb = tables.get_mut(id).unwrap();
                            cb.state = TcpState::Established;
                            let init_payload = if cb.options.encrypt {
                                let crypto = CryptoState::new();
                                let pubkey = crypto.public_key();
                                cb.crypto = Some(crypto);
                                let mut buf = Vec::with_capacity(8);
                                buf.extend_from_slice(&be_u32_bytes(INIT_MAGIC));
                                buf.extend_from_slice(&be_u32_bytes(pubkey));
                                buf
                            } else {
                                Vec::new()
                            };
                            (cb.snd.nxt, cb.rcv.nxt, init_payload)
                        };
                        if let Some(cb) = tables.get_mut(id) {
                            let _ = cb.transmit(seq2, ack2, TcpFlags::ACK, &init_payload);
                        }
                    }
                    return;
                }
                let (send_seq, send_ack) = {
                    let cb = tables.get_mut(id).unwrap();
                    cb.state = TcpState::SynRcvd;
                    (cb.iss, cb.rcv.nxt)
                };
                if let Some(cb) = tables.get_mut(id) {
                    let _ = cb.transmit(send_seq, send_ack, TcpFlags::ACK, &[]);
                }
            }
            return;
        }
        _ => {}
    }

    // Common processing shared by SynRcvd/Established/FinWait1/FinWait2/
    // CloseWait/Closing/LastAck, per the original's fallthrough switch.
    let rcv_nxt = match tables.get(id) {
        Some(cb) => cb.rcv.nxt,
        None => return,
    };
    if seg.seq != rcv_nxt {
        return;
    }
    if flags_isset(seg.flags, TcpFlags::RST | TcpFlags::SYN) {
        return;
    }
    if !flags_isset(seg.flags, TcpFlags::ACK) {
        return;
    }
    if let Some(cb) = tables.get_mut(id) {
        cb.snd.wnd = seg.window;
    }

    match state {
        TcpState::SynRcvd => {
            let (una, nxt) = {
                let cb = tables.get(id).unwrap();
                (cb.snd.una, cb.snd.nxt)
            };
            if una <= seg.ack && seg.ack <= nxt {
                let parent = {
                    let cb = tables.get_mut(id).unwrap();
                    cb.state = TcpState::Established;
                    cb.snd.una = seg.ack;
                    cb.parent
                };
                if let Some(parent_id) = parent {
                    if let Some(parent_cb) = tables.get_mut(parent_id) {
                        if parent_cb.backlog.len() < parent_cb.backlog_cap.max(1) {
                            parent_cb.backlog.push_back(id);
                        }
                    }
                }
            } else {
                if let Some(cb) = tables.get_mut(id) {
                    let _ = cb.transmit(seg.ack, 0, TcpFlags::RST, &[]);
                }
                return;
            }
        }
        TcpState::LastAck => {
            tables.remove(id);
            return;
        }
        TcpState::Established | TcpState::FinWait1 | TcpState::FinWait2 | TcpState::CloseWait |
        TcpState::Closing => {}
        _ => return,
    }

    {
        let (una, nxt) = {
            let cb = tables.get(id).unwrap();
            (cb.snd.una, cb.snd.nxt)
        };
        if una < seg.ack && seg.ack <= nxt {
            if let Some(cb) = tables.get_mut(id) {
                cb.snd.una = seg.ack;
                while let Some(seg_end) = cb.retransmit_queue
                    .front()
                    .map(|e| e.seq.wrapping_add(e.payload.len() as u32)
                                 .wrapping_add(if e.flags &
                                                  (TcpFlags::SYN | TcpFlags::FIN) != 0 {
                        1
                    } else {
                        0
                    })) {
                    if seg_end <= seg.ack {
                        cb.retransmit_queue.pop_front();
                    } else {
                        break;
                    }
                }
            }
        } else if seg.ack > nxt {
            if let Some(cb) = tables.get_mut(id) {
                let (s, a) = (cb.snd.nxt, cb.rcv.nxt);
                let _ = cb.transmit(s, a, TcpFlags::ACK, &[]);
            }
            return;
        }
        let cur_state = tables.get(id).unwrap().state;
        if cur_state == TcpState::FinWait1 && seg.ack == nxt {
            tables.get_mut(id).unwrap().state = TcpState::FinWait2;
        } else if cur_state == TcpState::Closing && seg.ack == nxt {
            let cb = tables.get_mut(id).unwrap();
            cb.state = TcpState::TimeWait;
            cb.time_wait_since = Some(Instant::now());
            return;
        }
    }

    if !payload.is_empty() {
        let cur_state = tables.get(id).unwrap().state;
        match cur_state {
            TcpState::Established | TcpState::FinWait1 | TcpState::FinWait2 => {
                if let Some(cb) = tables.get_mut(id) {
                    let awaiting_key = cb.options.encrypt &&
                                        !cb.crypto.as_ref().map_or(false, |c| c.has_shared_key());
                    if awaiting_key {
                        if payload.len() < 8 || be_u32(&payload[0..4]) != INIT_MAGIC {
                            let _ = cb.transmit(seg.ack, 0, TcpFlags::RST, &[]);
                            return;
                        }
                        let peer_pubkey = be_u32(&payload[4..8]);
                        let mut crypto = cb.crypto.take().unwrap_or_else(CryptoState::new);
                        crypto.derive_shared(peer_pubkey);
                        cb.crypto = Some(crypto);
                        cb.rcv.nxt = cb.rcv.nxt.wrapping_add(payload.len() as u32);
                    } else {
                        cb.deliver(payload.to_vec());
                        cb.rcv.nxt = cb.rcv.nxt.wrapping_add(payload.len() as u32);
                    }
                    let (s, a) = (cb.snd.nxt, cb.rcv.nxt);
                    let _ = cb.transmit(s, a, TcpFlags::ACK, &[]);
                }
            }
            _ => {}
        }
    }

    if flags_isset(seg.flags, TcpFlags::FIN) {
        if let Some(cb) = tables.get_mut(id) {
            cb.rcv.nxt = cb.rcv.nxt.wrapping_add(1);
            let (s, a) = (cb.snd.nxt, cb.rcv.nxt);
            let _ = cb.transmit(s, a, TcpFlags::ACK, &[]);
            cb.state = match cb.state {
                TcpState::SynRcvd | TcpState::Established => TcpState::CloseWait,
                TcpState::FinWait1 => TcpState::FinWait2,
                TcpState::FinWait2 => TcpState::TimeWait,
                other => other,
            };
            if cb.state == TcpState::TimeWait {
                cb.time_wait_since = Some(Instant::now());
            }
        }
    }
}

fn rand_u32() -> u32 {
    ::rand::random::<u32>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_is_matches_exact_combination() {
        assert!(flags_is(TcpFlags::SYN, TcpFlags::SYN));
        assert!(!flags_is(TcpFlags::SYN | TcpFlags::ACK, TcpFlags::SYN));
    }

    #[test]
    fn flags_isset_matches_any_overlap() {
        assert!(flags_isset(TcpFlags::SYN | TcpFlags::ACK, TcpFlags::SYN));
        assert!(!flags_isset(TcpFlags::ACK, TcpFlags::SYN));
    }

    #[test]
    fn be_u32_roundtrips() {
        let v = 0xdead_beef;
        assert_eq!(be_u32(&be_u32_bytes(v)), v);
    }
}
