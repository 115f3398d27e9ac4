use stack::StackInterfaceMsg;

use std::sync::mpsc::{self, Receiver, Sender};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use pnet::util::MacAddr;

use ethernet::EthernetListener;

mod arp_rx;
mod arp_tx;

pub use self::arp_rx::ArpRx;
pub use self::arp_tx::{ArpBuilder, ArpTx};

/// Maximum number of live entries kept in an `ArpTable`. Insertion past the
/// bound evicts the oldest entry, mirroring the original's fixed-size table.
pub const ARP_TABLE_SIZE: usize = 4096;

/// Entries older than this are evicted by the patrol sweep.
pub const ARP_TABLE_TIMEOUT_SEC: u64 = 300;

/// The patrol sweep that ages out stale entries runs at most this often.
const ARP_SWEEP_INTERVAL_SEC: u64 = 10;

/// Outcome of an `ArpTable::get` lookup.
pub enum ArpResolution {
    /// The MAC address was already cached.
    Found(MacAddr),

    /// No cached entry; a request has been sent and the given `Receiver`
    /// will yield the MAC address once a reply arrives (or nothing if the
    /// pending entry gets aged out first).
    Query(Receiver<MacAddr>),

    /// The query itself was invalid, e.g. resolving `0.0.0.0`.
    Error,
}

struct ArpEntry {
    mac: MacAddr,
    inserted_at: Instant,
}

#[derive(Default)]
pub struct TableData {
    table: HashMap<Ipv4Addr, ArpEntry>,
    listeners: HashMap<Ipv4Addr, Vec<Sender<MacAddr>>>,
    last_sweep: Option<Instant>,
}

impl TableData {
    pub fn new() -> Self {
        TableData {
            table: HashMap::new(),
            listeners: HashMap::new(),
            last_sweep: None,
        }
    }

    /// Evicts entries older than `ARP_TABLE_TIMEOUT_SEC`, at most once per
    /// `ARP_SWEEP_INTERVAL_SEC`. Dropping a pending listener's `Sender`
    /// fails its `Receiver::recv()`, which callers map to an error.
    fn sweep(&mut self) {
        let now = Instant::now();
        let due = match self.last_sweep {
            Some(t) => now.duration_since(t) >= Duration::from_secs(ARP_SWEEP_INTERVAL_SEC),
            None => true,
        };
        if !due {
            return;
        }
        self.last_sweep = Some(now);
        let timeout = Duration::from_secs(ARP_TABLE_TIMEOUT_SEC);
        let stale: Vec<Ipv4Addr> = self.table
            .iter()
            .filter(|&(_, entry)| now.duration_since(entry.inserted_at) >= timeout)
            .map(|(ip, _)| *ip)
            .collect();
        for ip in stale {
            self.table.remove(&ip);
            self.listeners.remove(&ip);
        }
    }

    /// Updates `ip`'s entry, waking any blocked resolvers. Returns `true`
    /// if the MAC actually changed (or is new), `false` if it was a refresh
    /// of an already-known mapping.
    pub fn update(&mut self, ip: Ipv4Addr, mac: MacAddr) -> bool {
        self.evict_oldest_if_full();
        let old = self.table.insert(ip,
                                    ArpEntry {
                                        mac: mac,
                                        inserted_at: Instant::now(),
                                    });
        let changed = match old {
            Some(entry) => entry.mac != mac,
            None => true,
        };
        if let Some(listeners) = self.listeners.remove(&ip) {
            for listener in listeners {
                listener.send(mac).unwrap_or(());
            }
        }
        changed
    }

    fn evict_oldest_if_full(&mut self) {
        if self.table.len() < ARP_TABLE_SIZE {
            return;
        }
        if let Some(oldest_ip) = self.table
            .iter()
            .min_by_key(|&(_, entry)| entry.inserted_at)
            .map(|(ip, _)| *ip) {
            self.table.remove(&oldest_ip);
        }
    }
}

/// The main Arp table struct. Contains the actual data behind a `Mutex` so it
/// can be shared with `ArpRx` instances.
#[derive(Clone)]
pub struct ArpTable {
    data: Arc<Mutex<TableData>>,
}

impl ArpTable {
    /// Creates a new `ArpTable` with no entries in it.
    pub fn new() -> ArpTable {
        let data = Arc::new(Mutex::new(TableData::new()));
        ArpTable { data: data }
    }

    pub fn data(&self) -> Arc<Mutex<TableData>> {
        self.data.clone()
    }

    /// Creates a new `ArpRx` cast to a `Box<EthernetListener>` so that it can
    /// easily be added to a `Vec` and passed to `EthernetRx` as a listener.
    /// The `ArpRx` created here will share the table with this `ArpTable`.
    pub fn arp_rx(&self, listener: Sender<StackInterfaceMsg>) -> Box<EthernetListener> {
        Box::new(ArpRx::new(listener)) as Box<EthernetListener>
    }

    /// Queries the table for a MAC. If it does not exist a request is sent
    /// and the returned `Receiver` will yield the answer once a reply
    /// arrives.
    pub fn get(&mut self, target_ip: Ipv4Addr) -> ArpResolution {
        if target_ip == Ipv4Addr::new(0, 0, 0, 0) {
            return ArpResolution::Error;
        }
        let mut data = self.data.lock().unwrap();
        data.sweep();
        if let Some(entry) = data.table.get(&target_ip) {
            return ArpResolution::Found(entry.mac);
        }
        ArpResolution::Query(Self::add_listener(&mut data, target_ip))
    }

    /// Manually insert an IP -> MAC mapping into this Arp table
    pub fn insert(&mut self, ip: Ipv4Addr, mac: MacAddr) {
        let mut data = self.data.lock().expect("Unable to lock Arp::table for writing");
        data.sweep();
        data.evict_oldest_if_full();
        data.table.insert(ip,
                          ArpEntry {
                              mac: mac,
                              inserted_at: Instant::now(),
                          });
    }

    fn add_listener(data: &mut TableData, ip: Ipv4Addr) -> Receiver<MacAddr> {
        let (tx, rx) = mpsc::channel();
        data.listeners.entry(ip).or_insert_with(Vec::new).push(tx);
        rx
    }
}

impl Default for ArpTable {
    fn default() -> Self {
        Self::new()
    }
}
