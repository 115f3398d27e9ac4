use std::net::Ipv4Addr;

use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::tcp::{MutableTcpPacket, TcpPacket, TcpFlags, ipv4_checksum_adv};

use {Protocol, TxResult};

use ipv4::{Ipv4Protocol, Ipv4Tx};

use super::{HANDSHAKE_MARKER_KIND, HANDSHAKE_MARKER_LEN, HANDSHAKE_MARKER_VALUE};

/// Fixed TCP header length with no options.
pub const TCP_MIN_HEADER_LEN: usize = 20;

/// Header length when the handshake-marker option is present (3 option
/// bytes padded to a 4-byte boundary with an end-of-options byte).
pub const TCP_MARKER_HEADER_LEN: usize = TCP_MIN_HEADER_LEN + 4;

/// Tcp segment builder and sender. Always stamps the handshake-marker
/// option on outgoing SYNs, matching `original_source/tcp.c`'s `tcp_tx`.
pub struct TcpTx<T: Ipv4Tx> {
    ipv4: T,
    src: u16,
    dst: u16,
}

impl<T: Ipv4Tx> TcpTx<T> {
    pub fn new(ipv4: T, src: u16, dst: u16) -> TcpTx<T> {
        TcpTx {
            ipv4: ipv4,
            src: src,
            dst: dst,
        }
    }

    pub fn send(&mut self, seq: u32, ack: u32, flags: u8, window: u16, payload: &[u8]) -> TxResult {
        let src_ip = self.ipv4.src();
        let dst_ip = self.ipv4.dst();
        let marker = flags & TcpFlags::SYN != 0;
        let builder = TcpSegmentBuilder::new(src_ip, dst_ip, self.src, self.dst, seq, ack, flags,
                                             window, marker, payload);
        self.ipv4.send(builder)
    }
}

pub struct TcpSegmentBuilder<'a> {
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    src: u16,
    dst: u16,
    seq: u32,
    ack: u32,
    flags: u8,
    window: u16,
    marker: bool,
    payload: &'a [u8],
}

impl<'a> TcpSegmentBuilder<'a> {
    pub fn new(src_ip: Ipv4Addr,
               dst_ip: Ipv4Addr,
               src: u16,
               dst: u16,
               seq: u32,
               ack: u32,
               flags: u8,
               window: u16,
               marker: bool,
               payload: &'a [u8])
               -> TcpSegmentBuilder<'a> {
        TcpSegmentBuilder {
            src_ip: src_ip,
            dst_ip: dst_ip,
            src: src,
            dst: dst,
            seq: seq,
            ack: ack,
            flags: flags,
            window: window,
            marker: marker,
            payload: payload,
        }
    }

    fn header_len(&self) -> usize {
        if self.marker {
            TCP_MARKER_HEADER_LEN
        } else {
            TCP_MIN_HEADER_LEN
        }
    }
}

impl<'a> Ipv4Protocol for TcpSegmentBuilder<'a> {
    fn next_level_protocol(&self) -> IpNextHeaderProtocol {
        IpNextHeaderProtocols::Tcp
    }
}

impl<'a> Protocol for TcpSegmentBuilder<'a> {
    fn len(&self) -> usize {
        self.header_len() + self.payload.len()
    }

    fn build(&mut self, buffer: &mut [u8]) {
        let header_len = self.header_len();
        {
            let header_buffer = &mut buffer[..header_len];
            let mut pkg = MutableTcpPacket::new(header_buffer).unwrap();
            pkg.set_source(self.src);
            pkg.set_destination(self.dst);
            pkg.set_sequence(self.seq);
            pkg.set_acknowledgement(self.ack);
            pkg.set_data_offset((header_len / 4) as u8);
            pkg.set_flags(self.flags);
            pkg.set_window(self.window);
            pkg.set_urgent_ptr(0);
            pkg.set_checksum(0);
            if self.marker {
                let options = pkg.get_options_raw_mut();
                options[0] = HANDSHAKE_MARKER_KIND;
                options[1] = HANDSHAKE_MARKER_LEN;
                options[2] = HANDSHAKE_MARKER_VALUE;
                options[3] = 0; // end-of-options padding
            }
            let checksum = ipv4_checksum_adv(&pkg.to_immutable(), self.payload, self.src_ip,
                                              self.dst_ip);
            pkg.set_checksum(checksum);
        }
        buffer[header_len..header_len + self.payload.len()].copy_from_slice(self.payload);
    }
}

/// Reconstructs a `TcpPacket` view over a received segment, for callers that
/// already have a length-checked buffer in hand.
pub fn parse(buffer: &[u8]) -> Option<TcpPacket> {
    TcpPacket::new(buffer)
}
