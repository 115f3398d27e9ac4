use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use super::tcb::{Tcb, TcpOptions, TcpState};
use super::{TcpError, TcpLink, TcpResult, TCP_CB_TABLE_SIZE};

/// The fixed-size TCB table. `None` marks a free slot, exactly like the
/// original's `cb->used` flag on a static array.
pub struct TcpTables {
    slots: Vec<Option<Tcb>>,
}

impl TcpTables {
    fn new() -> TcpTables {
        let mut slots = Vec::with_capacity(TCP_CB_TABLE_SIZE);
        for _ in 0..TCP_CB_TABLE_SIZE {
            slots.push(None);
        }
        TcpTables { slots: slots }
    }

    /// Allocates a free slot, as `tcp_api_open` does.
    pub fn open(&mut self, link: TcpLink, local_ip: Ipv4Addr, options: TcpOptions) -> TcpResult<usize> {
        for (id, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(Tcb::new(id, link, local_ip, options));
                return Ok(id);
            }
        }
        Err(TcpError::NoFreeSlot)
    }

    pub fn get(&self, id: usize) -> Option<&Tcb> {
        self.slots.get(id).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Tcb> {
        self.slots.get_mut(id).and_then(|s| s.as_mut())
    }

    pub fn remove(&mut self, id: usize) {
        if let Some(slot) = self.slots.get_mut(id) {
            *slot = None;
        }
    }

    /// Exact 4-tuple match: this local ip/port, bound to this peer.
    pub fn find_connection(&self, local_ip: Ipv4Addr, local_port: u16, peer: SocketAddrV4) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .find(|&(_, slot)| match *slot {
                Some(ref cb) => {
                    cb.local_ip == local_ip && cb.local_port == local_port && cb.peer == Some(peer)
                }
                None => false,
            })
            .map(|(id, _)| id)
    }

    /// A Tcb in `Listen` bound to `local_port` with no fixed peer.
    pub fn find_listener(&self, local_ip: Ipv4Addr, local_port: u16) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .find(|&(_, slot)| match *slot {
                Some(ref cb) => {
                    cb.state == TcpState::Listen && cb.local_ip == local_ip &&
                    cb.local_port == local_port
                }
                None => false,
            })
            .map(|(id, _)| id)
    }

    pub fn port_in_use(&self, local_port: u16) -> bool {
        self.slots.iter().any(|slot| match *slot {
            Some(ref cb) => cb.local_port == local_port,
            None => false,
        })
    }

    pub fn ids(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|&(_, slot)| slot.is_some())
            .map(|(id, _)| id)
            .collect()
    }
}

/// Shared handle wrapping the table behind a `Mutex` + `Condvar`, matching
/// `original_source/tcp.c`'s single `tcplock` plus `sleep(cb, &lock)`/
/// `wakeup(cb)` discipline. Every blocking socket call revalidates its
/// predicate after waking, rather than trusting the wakeup alone.
pub struct TcpTableHandle {
    tables: Mutex<TcpTables>,
    condvar: Condvar,
}

impl TcpTableHandle {
    pub fn new() -> Arc<TcpTableHandle> {
        Arc::new(TcpTableHandle {
            tables: Mutex::new(TcpTables::new()),
            condvar: Condvar::new(),
        })
    }

    pub fn lock(&self) -> MutexGuard<TcpTables> {
        self.tables.lock().unwrap()
    }

    /// Wakes every blocked waiter. The original wakes a specific `cb`; since
    /// a single table-wide `Condvar` is much simpler and every waiter
    /// re-checks its own predicate anyway, waking everyone is equivalent.
    pub fn notify_all(&self) {
        self.condvar.notify_all();
    }

    /// Blocks the caller until `notify_all` fires, returning the guard to be
    /// re-checked by the caller's predicate loop.
    pub fn wait<'a>(&self, guard: MutexGuard<'a, TcpTables>) -> MutexGuard<'a, TcpTables> {
        self.condvar.wait(guard).unwrap()
    }
}
