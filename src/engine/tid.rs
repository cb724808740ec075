//! Transaction ID pool: 4095 IDs (`0x0000..=0x0FFE`), handed out in
//! ascending order (the free stack is seeded descending, so the first
//! `acquire` returns `0x0000`), with a quarantine period between a timed-out
//! transaction's release and the ID becoming available again.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Number of usable transaction IDs: `0x0000..=0x0FFE`.
pub(crate) const POOL_SIZE: usize = 0x0FFF;
/// Highest usable transaction ID.
pub(crate) const MAX_TID: u16 = 0x0FFE;

pub(crate) struct TidPool {
    free: Mutex<Vec<u16>>,
    quarantine: Mutex<HashMap<u16, Instant>>,
    grace: Duration,
}

impl TidPool {
    pub(crate) fn new(grace: Duration) -> Self {
        // Descending push order so the last element (0x0000) is the first
        // one `Vec::pop` returns.
        let free = (0..=MAX_TID).rev().collect();
        Self {
            free: Mutex::new(free),
            quarantine: Mutex::new(HashMap::new()),
            grace,
        }
    }

    /// Moves any quarantined ID whose grace period has elapsed back onto the
    /// free stack.
    fn sweep(&self) {
        let now = Instant::now();
        let mut quarantine = self.quarantine.lock();
        let expired: Vec<u16> = quarantine
            .iter()
            .filter(|(_, since)| now.duration_since(**since) >= self.grace)
            .map(|(tid, _)| *tid)
            .collect();
        if expired.is_empty() {
            return;
        }
        let mut free = self.free.lock();
        for tid in expired {
            quarantine.remove(&tid);
            free.push(tid);
        }
    }

    /// Blocks (briefly sleeping between attempts) until a free ID is
    /// available, sweeping expired quarantine entries each attempt.
    pub(crate) fn acquire(&self) -> u16 {
        loop {
            self.sweep();
            if let Some(tid) = self.free.lock().pop() {
                return tid;
            }
            spin_sleep::sleep(Duration::from_millis(10));
        }
    }

    /// Releases `tid`. A `timed_out` release is quarantined for the
    /// configured grace period rather than returned to the free stack
    /// immediately, so a reply that arrives late for a retried-away
    /// transaction cannot be mistaken for a reply to whatever transaction
    /// reuses the ID next.
    pub(crate) fn release(&self, tid: u16, timed_out: bool) {
        if timed_out {
            self.quarantine.lock().insert(tid, Instant::now());
        } else {
            self.free.lock().push(tid);
        }
    }
}
