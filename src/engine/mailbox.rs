//! One single-slot mailbox per transaction ID: the receiver task delivers a
//! decoded reply by TID, the socket that allocated that TID is the only
//! reader.

use parking_lot::Mutex;

use crate::engine::tid::POOL_SIZE;
use crate::rmap::Reply;

pub(crate) struct MailboxTable {
    slots: Vec<Mutex<Option<flume::Sender<Reply>>>>,
}

impl MailboxTable {
    pub(crate) fn new() -> Self {
        let mut slots = Vec::with_capacity(POOL_SIZE);
        slots.resize_with(POOL_SIZE, || Mutex::new(None));
        Self { slots }
    }

    /// Registers a fresh single-slot channel for `tid`, returning the
    /// receiving half.
    pub(crate) fn register(&self, tid: u16) -> flume::Receiver<Reply> {
        let (tx, rx) = flume::bounded(1);
        *self.slots[tid as usize].lock() = Some(tx);
        rx
    }

    /// Tears down the channel for `tid`. Any reply delivered afterwards is
    /// silently dropped by `deliver`.
    pub(crate) fn unregister(&self, tid: u16) {
        *self.slots[tid as usize].lock() = None;
    }

    /// Delivers `reply` to the mailbox for its TID, if one is registered.
    /// Never blocks: a full or absent slot just drops the reply.
    pub(crate) fn deliver(&self, reply: Reply) {
        let Some(slot) = self.slots.get(reply.tid as usize) else {
            return;
        };
        if let Some(tx) = slot.lock().as_ref() {
            let _ignore = tx.try_send(reply);
        }
    }
}
