//! One RMAP transaction socket: a destination, a reserved transaction ID,
//! and the retry-and-timeout loop that turns a single command into a
//! (possibly repeated) request/reply exchange.
//!
//! A `Socket` is not `Sync` for concurrent use from two threads at once —
//! `read`/`write` take `&mut self`, so the borrow checker itself enforces
//! the "one in-flight transaction per socket" rule the source protocol only
//! documents.

use std::sync::Arc;

use crate::destination::Destination;
use crate::engine::Engine;
use crate::error::Result;
use crate::rmap::{self, CommandOptions};

/// A reserved transaction ID bound to one destination, with its own reply
/// mailbox and retry bookkeeping.
pub struct Socket {
    engine: Arc<Engine>,
    dest: Destination,
    retry_budget: Option<usize>,
    retries: usize,
    tid: u16,
    mailbox: flume::Receiver<rmap::Reply>,
}

impl Socket {
    /// Reserves a transaction ID against `engine` for `dest`. `retry_budget`
    /// bounds how many times a single `read`/`write` call retries after a
    /// reply timeout before giving up and returning the sentinel
    /// `(None, -1)` / `Some(-1)`; `None` retries indefinitely.
    #[must_use]
    pub fn new(engine: Arc<Engine>, dest: Destination, retry_budget: Option<usize>) -> Self {
        let (tid, mailbox) = engine.acquire_tid();
        Self {
            engine,
            dest,
            retry_budget,
            retries: 0,
            tid,
            mailbox,
        }
    }

    /// The transaction ID currently reserved by this socket.
    #[must_use]
    pub fn tid(&self) -> u16 {
        self.tid
    }

    /// Total retries this socket has spent across its lifetime.
    #[must_use]
    pub fn retries(&self) -> usize {
        self.retries
    }

    /// Issues an RMAP read of `length` words starting at `address`.
    ///
    /// Returns `(Some(data), status)` on a reply, or `(None, -1)` once the
    /// retry budget is exhausted without one — a sentinel, not an error, so
    /// existing callers built against that contract keep working unmodified.
    pub fn read(&mut self, address: u32, length: u32, opts: CommandOptions) -> Result<(Option<Vec<u32>>, i32)> {
        let mut call_retries = 0usize;
        loop {
            let packet = rmap::packetize(self.tid, &self.dest, address, length, None, &opts)?;
            self.engine.enqueue(packet)?;

            match self.mailbox.recv_timeout(self.engine.reply_timeout()) {
                Ok(reply) => return Ok((reply.data, i32::from(reply.status))),
                Err(flume::RecvTimeoutError::Timeout) => {
                    if self.exhausted_after_timeout(&mut call_retries) {
                        return Ok((None, -1));
                    }
                }
                Err(flume::RecvTimeoutError::Disconnected) => {
                    return Err(crate::error::RmapError::EngineNotRunning);
                }
            }
        }
    }

    /// Issues an RMAP write of `data` to `address`.
    ///
    /// With `opts.ack == false` this is fire-and-forget: the command is
    /// enqueued and `Ok(None)` returns immediately, no reply is awaited.
    /// Otherwise returns `Some(status)` on a reply, or `Some(-1)` once the
    /// retry budget is exhausted — the same sentinel contract as `read`.
    pub fn write(&mut self, address: u32, data: &[u32], opts: CommandOptions) -> Result<Option<i32>> {
        let mut call_retries = 0usize;
        loop {
            let packet = rmap::packetize(self.tid, &self.dest, address, data.len() as u32, Some(data), &opts)?;
            self.engine.enqueue(packet)?;

            if !opts.ack {
                return Ok(None);
            }

            match self.mailbox.recv_timeout(self.engine.reply_timeout()) {
                Ok(reply) => return Ok(Some(i32::from(reply.status))),
                Err(flume::RecvTimeoutError::Timeout) => {
                    if self.exhausted_after_timeout(&mut call_retries) {
                        return Ok(Some(-1));
                    }
                }
                Err(flume::RecvTimeoutError::Disconnected) => {
                    return Err(crate::error::RmapError::EngineNotRunning);
                }
            }
        }
    }

    /// Called on a reply timeout: retires the current (now-stale) TID into
    /// quarantine, draining anything that slipped into its mailbox in the
    /// last instant, then reserves a fresh one for the retry.
    ///
    /// `call_retries` is local to the calling `read`/`write` invocation and
    /// is what the retry budget is gated on, matching the source protocol's
    /// per-call `retry` counter; `self.retries` is a separate, never-reset
    /// lifetime total kept for `Socket::retries`. Returns `true` once the
    /// per-call retry budget is spent.
    fn exhausted_after_timeout(&mut self, call_retries: &mut usize) -> bool {
        let _stray = self.mailbox.try_recv();
        self.engine.release_tid(self.tid, true);
        let (tid, mailbox) = self.engine.acquire_tid();
        self.tid = tid;
        self.mailbox = mailbox;
        self.retries += 1;
        *call_retries += 1;
        matches!(self.retry_budget, Some(budget) if *call_retries > budget)
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        self.engine.release_tid(self.tid, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::crc::CrcVariant;
    use crate::transport::Interface;
    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;

    fn engine_with_fast_timeout() -> Arc<Engine> {
        let _ignore = env_logger::try_init();
        let config = EngineConfig {
            timeout_secs: 0.05,
            ..EngineConfig::default()
        };
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let interface = Interface::new(addr.ip().to_string(), addr.port(), config);
        let handle = thread::spawn(move || listener.accept().unwrap().0);
        let engine = Engine::new(interface, config);
        engine.start().unwrap();
        // No peer ever replies: leak the accepted socket so it stays open.
        std::mem::forget(handle.join().unwrap());
        engine
    }

    #[test]
    fn read_returns_sentinel_after_retry_budget_exhausted() {
        let engine = engine_with_fast_timeout();
        let dest = Destination::new(0xFE, 0x30, Some(0x02), Some(CrcVariant::None), Some(1)).unwrap();
        let mut socket = Socket::new(Arc::clone(&engine), dest, Some(2));
        let (data, status) = socket.read(0, 1, CommandOptions::default()).unwrap();
        assert!(data.is_none());
        assert_eq!(status, -1);
        assert_eq!(socket.retries(), 3);
    }

    #[test]
    fn retry_budget_is_scoped_to_a_single_call() {
        // Each call against a silent peer should independently retry up to
        // the budget before returning the sentinel; the per-call count
        // must not carry over from a previous call on the same socket.
        let engine = engine_with_fast_timeout();
        let dest = Destination::new(0xFE, 0x30, Some(0x02), Some(CrcVariant::None), Some(1)).unwrap();
        let mut socket = Socket::new(Arc::clone(&engine), dest, Some(1));

        let (first_data, first_status) = socket.read(0, 1, CommandOptions::default()).unwrap();
        assert!(first_data.is_none());
        assert_eq!(first_status, -1);
        assert_eq!(socket.retries(), 2);

        let (second_data, second_status) = socket.read(0, 1, CommandOptions::default()).unwrap();
        assert!(second_data.is_none());
        assert_eq!(second_status, -1);
        // The lifetime counter keeps accumulating across calls...
        assert_eq!(socket.retries(), 4);
    }

    #[test]
    fn write_without_ack_does_not_wait_for_a_reply() {
        let engine = engine_with_fast_timeout();
        let dest = Destination::new(0xFE, 0x30, Some(0x02), Some(CrcVariant::None), Some(1)).unwrap();
        let mut socket = Socket::new(Arc::clone(&engine), dest, Some(0));
        let opts = CommandOptions {
            ack: false,
            ..CommandOptions::default()
        };
        let start = std::time::Instant::now();
        let result = socket.write(0, &[0xAB], opts).unwrap();
        assert_eq!(result, None);
        assert!(start.elapsed() < Duration::from_millis(40));
    }

    #[test]
    fn dropping_a_socket_frees_its_transaction_id() {
        let engine = engine_with_fast_timeout();
        let dest = Destination::new(0xFE, 0x30, Some(0x02), Some(CrcVariant::None), Some(1)).unwrap();
        let socket = Socket::new(Arc::clone(&engine), dest, Some(0));
        let tid = socket.tid();
        drop(socket);
        let (reacquired, _rx) = engine.acquire_tid();
        assert_eq!(reacquired, tid);
    }
}
