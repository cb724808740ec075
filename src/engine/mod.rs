//! The transaction engine: one sender task, one receiver task, and the
//! transaction-ID bookkeeping that lets many concurrent [`Socket`](crate::socket::Socket)s
//! share a single SSDTP2 connection.
//!
//! Constructed stopped; [`Engine::start`] opens the transport (if needed)
//! and spawns the two background tasks, [`Engine::stop`] tears them down.
//! Both are idempotent: calling either while already in that state is a
//! no-op. Operations that need the engine running (enqueueing a packet)
//! fail with [`RmapError::EngineNotRunning`] while it is stopped.

mod mailbox;
mod tasks;
mod tid;

use std::sync::Arc;
use std::time::Duration;

use log::warn;
use parking_lot::Mutex;

use crate::config::EngineConfig;
use crate::destination::Destination;
use crate::error::{Result, RmapError};
use crate::rmap::Reply;
use crate::socket::Socket;
use crate::spawner::{self, AbortSignal, TaskTx};
use crate::transport::Interface;
use mailbox::MailboxTable;
use tid::TidPool;

/// The receiver task's socket read timeout: short enough that `stop()`
/// returns promptly, long enough not to dominate CPU with wakeups.
const RECEIVER_POLL_INTERVAL: Duration = Duration::from_secs(1);

struct RunningState {
    send_tx: TaskTx<Option<Vec<u8>>>,
    abort: AbortSignal,
    sender: std::thread::JoinHandle<()>,
    receiver: std::thread::JoinHandle<()>,
}

/// Owns the SSDTP2 transport and the RMAP transaction bookkeeping (free and
/// quarantined transaction IDs, per-transaction reply mailboxes).
pub struct Engine {
    interface: Arc<Interface>,
    config: EngineConfig,
    tids: TidPool,
    mailboxes: Arc<MailboxTable>,
    state: Mutex<Option<RunningState>>,
}

impl Engine {
    /// Builds an engine around `interface`, stopped. Call [`Engine::start`]
    /// before creating sockets that need to exchange traffic.
    #[must_use]
    pub fn new(interface: Interface, config: EngineConfig) -> Arc<Self> {
        Arc::new(Self {
            interface: Arc::new(interface),
            tids: TidPool::new(Duration::from_secs(config.quarantine_grace_secs)),
            mailboxes: Arc::new(MailboxTable::new()),
            config,
            state: Mutex::new(None),
        })
    }

    /// The configured per-transaction reply timeout.
    pub(crate) fn reply_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.config.timeout_secs)
    }

    /// Whether the engine's background tasks are running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.lock().is_some()
    }

    /// Opens the transport if needed and spawns the sender/receiver tasks.
    /// A no-op (with a warning logged) if already running.
    pub fn start(&self) -> Result<()> {
        let mut guard = self.state.lock();
        if guard.is_some() {
            warn!("engine already running, ignoring start()");
            return Ok(());
        }
        if !self.interface.is_open() {
            self.interface.open()?;
        }
        self.interface.set_timeout(Some(RECEIVER_POLL_INTERVAL))?;

        let (send_tx, send_rx) = spawner::task_channel::<Option<Vec<u8>>>();
        let abort = AbortSignal::new();
        let sender = tasks::spawn_sender(Arc::clone(&self.interface), send_rx, abort.clone());
        let receiver = tasks::spawn_receiver(Arc::clone(&self.interface), Arc::clone(&self.mailboxes), abort.clone());

        *guard = Some(RunningState {
            send_tx,
            abort,
            sender,
            receiver,
        });
        Ok(())
    }

    /// Signals both tasks to stop and joins them. A no-op (with a warning
    /// logged) if already stopped.
    pub fn stop(&self) -> Result<()> {
        let mut guard = self.state.lock();
        let Some(state) = guard.take() else {
            warn!("engine already stopped, ignoring stop()");
            return Ok(());
        };
        state.abort.stop();
        state.send_tx.send(None);
        let _ignore = state.sender.join();
        let _ignore = state.receiver.join();
        Ok(())
    }

    /// Enqueues `packet` on the sender task's queue. Fails with
    /// [`RmapError::EngineNotRunning`] while stopped.
    pub(crate) fn enqueue(&self, packet: Vec<u8>) -> Result<()> {
        let guard = self.state.lock();
        match guard.as_ref() {
            Some(state) => {
                state.send_tx.send(Some(packet));
                Ok(())
            }
            None => Err(RmapError::EngineNotRunning),
        }
    }

    /// Creates a socket bound to `dest`, reserving a transaction ID
    /// immediately. `retry` bounds how many times a single `read`/`write`
    /// call on the returned socket retries after a reply timeout before
    /// returning the exhaustion sentinel; `None` retries indefinitely.
    ///
    /// Mirrors the source protocol's `Engine.socket` factory — the
    /// documented way callers obtain a socket, rather than constructing
    /// one directly.
    #[must_use]
    pub fn socket(self: &Arc<Self>, dest: Destination, retry: Option<usize>) -> Socket {
        Socket::new(Arc::clone(self), dest, retry)
    }

    /// Allocates a transaction ID and registers its reply mailbox.
    pub(crate) fn acquire_tid(&self) -> (u16, flume::Receiver<Reply>) {
        let tid = self.tids.acquire();
        let rx = self.mailboxes.register(tid);
        (tid, rx)
    }

    /// Releases a transaction ID. `timed_out` quarantines it instead of
    /// returning it to the free pool immediately (§4.5.4: a reply that
    /// arrives after the caller gave up must not be mistaken for whoever
    /// reuses the ID next).
    pub(crate) fn release_tid(&self, tid: u16, timed_out: bool) {
        self.mailboxes.unregister(tid);
        self.tids.release(tid, timed_out);
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.is_running() {
            let _ignore = self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc::CrcVariant;
    use crate::destination::Destination;
    use std::io::Read as _;
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    fn loopback_engine() -> (Arc<Engine>, TcpStream) {
        let _ignore = env_logger::try_init();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let interface = Interface::new(addr.ip().to_string(), addr.port(), EngineConfig::default());
        let handle = thread::spawn(move || listener.accept().unwrap().0);
        let engine = Engine::new(interface, EngineConfig::default());
        engine.start().unwrap();
        let peer = handle.join().unwrap();
        (engine, peer)
    }

    #[test]
    fn start_is_idempotent() {
        let (engine, _peer) = loopback_engine();
        assert!(engine.is_running());
        engine.start().unwrap();
        assert!(engine.is_running());
    }

    #[test]
    fn stop_is_idempotent() {
        let (engine, _peer) = loopback_engine();
        engine.stop().unwrap();
        assert!(!engine.is_running());
        engine.stop().unwrap();
    }

    #[test]
    fn enqueue_before_start_fails() {
        let interface = Interface::with_defaults("127.0.0.1");
        let engine = Engine::new(interface, EngineConfig::default());
        let err = engine.enqueue(vec![1, 2, 3]).unwrap_err();
        assert!(matches!(err, RmapError::EngineNotRunning));
    }

    #[test]
    fn tid_allocation_is_unique_and_conserved() {
        let interface = Interface::with_defaults("127.0.0.1");
        let engine = Engine::new(interface, EngineConfig::default());
        let (a, _rx_a) = engine.acquire_tid();
        let (b, _rx_b) = engine.acquire_tid();
        assert_ne!(a, b);
        engine.release_tid(a, false);
        let (c, _rx_c) = engine.acquire_tid();
        assert_eq!(a, c);
    }

    #[test]
    fn reply_routes_to_the_matching_socket() {
        let (engine, mut peer) = loopback_engine();
        let dest = Destination::new(0xFE, 0x30, Some(0x02), Some(CrcVariant::None), Some(1)).unwrap();
        let mut socket = engine.socket(dest.clone(), Some(0));

        thread::spawn(move || {
            let mut header = [0u8; 12];
            peer.read_exact(&mut header).unwrap();
            let len = u32::from_be_bytes(header[8..12].try_into().unwrap()) as usize;
            let mut cmd = vec![0u8; len];
            peer.read_exact(&mut cmd).unwrap();
            let tid = u16::from_be_bytes([cmd[5], cmd[6]]);

            let mut reply = vec![dest.src_addr, 0x01, 0x20 | 0x08, 0x00, dest.dest_addr];
            reply.extend_from_slice(&tid.to_be_bytes());
            reply.push(crate::crc::crc8(&dest.variant, &reply));

            let mut frame = Vec::new();
            frame.push(0x00u8);
            frame.push(0x00u8);
            frame.extend_from_slice(&[0u8; 6]);
            frame.extend_from_slice(&(reply.len() as u32).to_be_bytes());
            frame.extend_from_slice(&reply);
            use std::io::Write as _;
            peer.write_all(&frame).unwrap();
        });

        let status = socket.write(0x1000, &[0xAB], crate::rmap::CommandOptions::default()).unwrap();
        assert_eq!(status, Some(0));
    }
}
