//! BSD-style socket dispatch on top of the Tcp and Udp engines, grounded on
//! `original_source/socket.c`'s `socketalloc`/`socketconnect`/`socketbind`/
//! `socketlisten`/`socketaccept`/`socketread`/`socketwrite`. Only
//! `AF_INET`/`SOCK_STREAM`/`SOCK_DGRAM` with protocol `0` are accepted, same
//! as the original.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};
use std::sync::{Arc, Mutex};

use {NetworkStack, StackError};
use tcp::{self, TcpOptions, TcpState};
use udp::UdpSocket;
use util;

/// Mirrors the original's `AF_INET`.
pub const AF_INET: i32 = 2;
/// Mirrors the original's `SOCK_STREAM`.
pub const SOCK_STREAM: i32 = 1;
/// Mirrors the original's `SOCK_DGRAM`.
pub const SOCK_DGRAM: i32 = 2;

/// Validates `domain`/`type`/`protocol` as `socketalloc` does, returning a
/// handle the caller then binds/connects or listens on. Unlike the
/// original's file-descriptor-backed socket (which already owns a Tcb the
/// moment `socketalloc` returns), a freshly dispatched stream socket here
/// allocates its Tcb lazily, once `connect`/`listen` knows which local
/// address to bind to.
pub fn socket(stack: Arc<Mutex<NetworkStack>>,
              domain: i32,
              socket_type: i32,
              protocol: i32)
              -> io::Result<Socket> {
    if domain != AF_INET || protocol != 0 {
        return Err(invalid_input("unsupported socket domain/protocol"));
    }
    match socket_type {
        SOCK_STREAM => Ok(Socket::Stream(stack)),
        SOCK_DGRAM => {
            let local_addr = SocketAddrV4::new(Ipv4Addr::new(0, 0, 0, 0), 0);
            let bound = UdpSocket::bind(stack, local_addr)?;
            Ok(Socket::Dgram(bound))
        }
        _ => Err(invalid_input("unsupported socket type")),
    }
}

/// Either half of the dispatch `socket()` can return. `Stream` has not yet
/// allocated a Tcb; call `TcpSocket::connect`/`TcpSocket::listen` with the
/// wrapped stack handle to do so.
pub enum Socket {
    Stream(Arc<Mutex<NetworkStack>>),
    Dgram(UdpSocket),
}

fn invalid_input(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg.to_owned())
}

fn stack_err(e: StackError) -> io::Error {
    e.into()
}

fn tcp_err(e: tcp::TcpError) -> io::Error {
    match e {
        tcp::TcpError::ConnectionReset => io::Error::new(io::ErrorKind::ConnectionReset, "reset"),
        tcp::TcpError::PeerClosed => io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed"),
        tcp::TcpError::NoRoute => io::Error::new(io::ErrorKind::AddrNotAvailable, "no route"),
        tcp::TcpError::NotConnected => io::Error::new(io::ErrorKind::NotConnected, "not connected"),
        tcp::TcpError::NoFreeSlot => io::Error::new(io::ErrorKind::Other, "tcb table full"),
        tcp::TcpError::InvalidArgument => invalid_input("invalid argument"),
        tcp::TcpError::TxError(te) => te.into(),
    }
}

/// A bound TCP socket. Mirrors the blocking API shape of
/// `std::net::TcpStream`/`TcpListener`, backed by this crate's own TCB table
/// instead of the OS network stack.
pub struct TcpSocket {
    stack: Arc<Mutex<NetworkStack>>,
    tables: Arc<tcp::TcpTableHandle>,
    id: usize,
}

impl TcpSocket {
    fn from_id(stack: Arc<Mutex<NetworkStack>>, tables: Arc<tcp::TcpTableHandle>, id: usize) -> TcpSocket {
        TcpSocket {
            stack: stack,
            tables: tables,
            id: id,
        }
    }

    /// Actively opens a connection to `addr`, blocking until the three-way
    /// handshake completes (or fails). Mirrors `tcp_api_connect`.
    pub fn connect<A: ToSocketAddrs>(stack: Arc<Mutex<NetworkStack>>, addr: A) -> io::Result<TcpSocket> {
        let peer = match util::first_socket_addr(addr)? {
            SocketAddr::V4(v4) => v4,
            SocketAddr::V6(_) => {
                return Err(invalid_input("Rips does not support IPv6 yet"));
            }
        };
        let id = {
            let mut stack_guard = stack.lock().unwrap();
            stack_guard.tcp_connect(peer, TcpOptions::default()).map_err(stack_err)?
        };
        let tables = stack.lock().unwrap().tcp_tables();
        let socket = TcpSocket::from_id(stack, tables, id);
        socket.wait_until(|state| match state {
            TcpState::Established => Some(Ok(())),
            TcpState::Closed => Some(Err(tcp_err(tcp::TcpError::ConnectionReset))),
            _ => None,
        })?;
        Ok(socket)
    }

    /// Passively opens a listening socket bound to `addr` with the given
    /// backlog. Mirrors `tcp_api_bind` + `tcp_api_listen`.
    pub fn listen<A: ToSocketAddrs>(stack: Arc<Mutex<NetworkStack>>,
                                    addr: A,
                                    backlog: usize)
                                    -> io::Result<TcpSocket> {
        let local = match util::first_socket_addr(addr)? {
            SocketAddr::V4(v4) => v4,
            SocketAddr::V6(_) => {
                return Err(invalid_input("Rips does not support IPv6 yet"));
            }
        };
        let id = {
            let mut stack_guard = stack.lock().unwrap();
            stack_guard.tcp_listen(local, backlog, TcpOptions::default()).map_err(stack_err)?
        };
        let tables = stack.lock().unwrap().tcp_tables();
        Ok(TcpSocket::from_id(stack, tables, id))
    }

    /// Blocks until an incoming connection completes its handshake, returning
    /// a `TcpSocket` for it. Mirrors `tcp_api_accept`.
    pub fn accept(&self) -> io::Result<TcpSocket> {
        let child_id = {
            let mut guard = self.tables.lock();
            loop {
                {
                    let cb = guard.get_mut(self.id).ok_or_else(|| tcp_err(tcp::TcpError::NotConnected))?;
                    if let Some(child) = cb.backlog.pop_front() {
                        break child;
                    }
                }
                guard = self.tables.wait(guard);
            }
        };
        Ok(TcpSocket::from_id(self.stack.clone(), self.tables.clone(), child_id))
    }

    /// Writes `buf` as new outgoing data. Mirrors `tcp_api_send`, with
    /// SUPPLEMENT send-side MSS segmentation: payloads larger than `mtu - 40`
    /// are split across multiple segments.
    pub fn send(&self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.tables.lock();
        let cb = guard.get_mut(self.id).ok_or_else(|| tcp_err(tcp::TcpError::NotConnected))?;
        if !cb.tx_is_ready() {
            return Err(tcp_err(tcp::TcpError::NotConnected));
        }
        let mss = cb.link_mss();
        let mut sent = 0;
        for chunk in buf.chunks(mss) {
            let seq = cb.snd.nxt;
            let ack = cb.rcv.nxt;
            let mut payload = chunk.to_vec();
            if let Some(ref mut crypto) = cb.crypto {
                crypto.encdec(&mut payload);
            }
            cb.transmit(seq, ack, ::pnet::packet::tcp::TcpFlags::ACK, &payload)
                .map_err(tcp::TcpError::from).map_err(tcp_err)?;
            cb.snd.nxt = cb.snd.nxt.wrapping_add(chunk.len() as u32);
            sent += chunk.len();
        }
        Ok(sent)
    }

    /// Blocks until at least one byte is available (or the peer closed),
    /// draining into `buf`. Mirrors `tcp_api_recv`.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut guard = self.tables.lock();
        loop {
            {
                let cb = guard.get_mut(self.id).ok_or_else(|| tcp_err(tcp::TcpError::NotConnected))?;
                if !cb.recv_buffer.is_empty() {
                    return Ok(cb.read(buf));
                }
                if !cb.rx_is_ready() {
                    return Ok(0);
                }
            }
            guard = self.tables.wait(guard);
        }
    }

    /// Sends a FIN and transitions out of the data-transfer states, then
    /// blocks until that transition's terminal state is observed: `TimeWait`
    /// for a close from `Established`, or the slot's removal for a close
    /// from `CloseWait` (the `LastAck` step that follows frees it as soon as
    /// the peer acks). Mirrors `tcp_api_close`.
    pub fn close(&self) -> io::Result<()> {
        let new_state = {
            let mut guard = self.tables.lock();
            let cb = guard.get_mut(self.id).ok_or_else(|| tcp_err(tcp::TcpError::NotConnected))?;
            let (seq, ack) = (cb.snd.nxt, cb.rcv.nxt);
            cb.transmit(seq, ack, ::pnet::packet::tcp::TcpFlags::FIN | ::pnet::packet::tcp::TcpFlags::ACK, &[])
                .map_err(tcp::TcpError::from).map_err(tcp_err)?;
            cb.snd.nxt = cb.snd.nxt.wrapping_add(1);
            cb.state = match cb.state {
                TcpState::Established => TcpState::FinWait1,
                TcpState::CloseWait => TcpState::LastAck,
                other => other,
            };
            cb.state
        };
        match new_state {
            TcpState::FinWait1 => {
                self.wait_until_gone_or(|state| match state {
                    TcpState::TimeWait => Some(Ok(())),
                    TcpState::FinWait1 | TcpState::FinWait2 | TcpState::Closing => None,
                    _ => Some(Ok(())),
                })
            }
            TcpState::LastAck => self.wait_until_gone_or(|state| match state {
                TcpState::LastAck => None,
                _ => Some(Ok(())),
            }),
            _ => Ok(()),
        }
    }

    /// Like `wait_until`, but the slot disappearing entirely (the `LastAck`
    /// and post-`TimeWait` removal paths both free it rather than leaving it
    /// in a terminal state) counts as the wait succeeding, not as an error.
    fn wait_until_gone_or<F>(&self, mut predicate: F) -> io::Result<()>
        where F: FnMut(TcpState) -> Option<io::Result<()>>
    {
        let mut guard = self.tables.lock();
        loop {
            let state = match guard.get(self.id) {
                Some(cb) => cb.state,
                None => return Ok(()),
            };
            if let Some(result) = predicate(state) {
                return result;
            }
            guard = self.tables.wait(guard);
        }
    }

    fn wait_until<F>(&self, mut predicate: F) -> io::Result<()>
        where F: FnMut(TcpState) -> Option<io::Result<()>>
    {
        let mut guard = self.tables.lock();
        loop {
            let state = guard.get(self.id).ok_or_else(|| tcp_err(tcp::TcpError::NotConnected))?.state;
            if let Some(result) = predicate(state) {
                return result;
            }
            guard = self.tables.wait(guard);
        }
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn constants_match_original_values() {
        assert_eq!(super::AF_INET, 2);
        assert_eq!(super::SOCK_STREAM, 1);
        assert_eq!(super::SOCK_DGRAM, 2);
    }
}
