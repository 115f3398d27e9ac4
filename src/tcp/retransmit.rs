//! Background retransmission timer. (SUPPLEMENT: `original_source/tcp.c`
//! never retransmits anything; once a segment is sent it is forgotten.)
//! Walks every live Tcb at a fixed tick, resending the head of its
//! retransmit queue once its exponential backoff elapses, freeing the slot
//! outright after `MAX_RETRANSMITS` unanswered attempts, and freeing any
//! Tcb that has sat in `TimeWait` for longer than `TIME_WAIT_SECS`.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::tcb::TcpState;
use super::table::TcpTableHandle;
use super::{MAX_RETRANSMITS, TIME_WAIT_SECS};

/// Spawns the timer as a detached background thread, returning immediately.
/// One thread serves the whole table (shared across every interface), since
/// the table itself is global.
pub fn spawn_retransmit_thread(tables: Arc<TcpTableHandle>) {
    thread::spawn(move || {
        loop {
            thread::sleep(Duration::from_millis(200));
            tick(&tables);
        }
    });
}

fn tick(tables: &Arc<TcpTableHandle>) {
    let now = Instant::now();
    let mut guard = tables.lock();
    let ids = guard.ids();
    let mut freed_any = false;
    for id in ids {
        let attempts = match guard.get_mut(id) {
            Some(cb) => cb.retransmit_due(now),
            None => None,
        };
        if let Some(attempts) = attempts {
            if attempts > MAX_RETRANSMITS {
                guard.remove(id);
                freed_any = true;
                continue;
            }
        }
        let time_wait_expired = guard.get(id)
            .map_or(false, |cb| {
                cb.state == TcpState::TimeWait &&
                cb.time_wait_since
                    .map_or(false, |since| now.duration_since(since) >= Duration::from_secs(TIME_WAIT_SECS))
            });
        if time_wait_expired {
            guard.remove(id);
            freed_any = true;
        }
    }
    drop(guard);
    if freed_any {
        tables.notify_all();
    }
}
