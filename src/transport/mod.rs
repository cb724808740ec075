//! SSDTP2: the SpaceWire-over-TCP tunnelling transport. Owns a TCP socket
//! and frames outbound SpaceWire packets and inbound replies, with optional
//! auto-reconnect and TCP keepalive tuning.

mod frame;
mod keepalive;

use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use log::{info, warn};
use parking_lot::Mutex;

use crate::config::{EngineConfig, DEFAULT_PORT};
use crate::error::{Result, RmapError};
use frame::FrameFlag;

/// Owns a TCP connection to a SpaceWire-to-Ethernet bridge and frames
/// traffic according to SSDTP2.
///
/// `send` and `receive` each hold their own lock (§4.4.5) for the duration
/// of a single frame. A reconnect, whichever direction triggers it, always
/// acquires both locks together in the fixed order `send` then `recv`
/// before tearing down and re-opening the connection: a single consistent
/// order rules out the lock-order-inversion hazard a "grab only the other
/// side's lock" scheme would otherwise invite if both directions tried to
/// reconnect at once, while still guaranteeing the two directions never
/// interleave a partial frame with a freshly (re)opened socket.
pub struct Interface {
    host: String,
    port: u16,
    config: EngineConfig,
    send: Mutex<Option<TcpStream>>,
    recv: Mutex<Option<TcpStream>>,
    tx_divider: Mutex<Option<u8>>,
    read_timeout: Mutex<Option<Duration>>,
}

impl Interface {
    /// Creates an interface to `host:port`, not yet connected.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, config: EngineConfig) -> Self {
        Self {
            host: host.into(),
            port,
            config,
            send: Mutex::new(None),
            recv: Mutex::new(None),
            tx_divider: Mutex::new(None),
            read_timeout: Mutex::new(None),
        }
    }

    /// Creates an interface to `host` on the default RMAP/SSDTP2 port
    /// (10030) with default engine tunables.
    #[must_use]
    pub fn with_defaults(host: impl Into<String>) -> Self {
        Self::new(host, DEFAULT_PORT, EngineConfig::default())
    }

    /// Whether the interface currently holds an open connection.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.send.lock().is_some()
    }

    /// Opens the TCP connection, applying keepalive tuning and any
    /// previously-set read timeout or Tx divider.
    pub fn open(&self) -> Result<()> {
        let mut send_guard = self.send.lock();
        let mut recv_guard = self.recv.lock();
        self.connect_locked(&mut send_guard, &mut recv_guard)
    }

    /// Closes the connection, if open. Idempotent.
    pub fn close(&self) {
        let mut send_guard = self.send.lock();
        let mut recv_guard = self.recv.lock();
        Self::disconnect_locked(&mut send_guard, &mut recv_guard);
    }

    /// Tears down whatever connection `send_guard`/`recv_guard` hold.
    /// Callers must already hold both locks; this never locks either
    /// mutex itself, so it is safe to call from a context that is already
    /// holding them (unlike calling [`Interface::close`], which would
    /// deadlock re-acquiring a lock its caller still holds).
    fn disconnect_locked(send_guard: &mut Option<TcpStream>, recv_guard: &mut Option<TcpStream>) {
        if let Some(stream) = send_guard.take() {
            let _ignore = stream.shutdown(Shutdown::Both);
        }
        recv_guard.take();
    }

    /// Establishes a fresh connection into `send_guard`/`recv_guard`.
    /// Callers must already hold both locks; see [`Interface::disconnect_locked`].
    fn connect_locked(&self, send_guard: &mut Option<TcpStream>, recv_guard: &mut Option<TcpStream>) -> Result<()> {
        info!("connecting to {}:{}", self.host, self.port);
        let stream = TcpStream::connect((self.host.as_str(), self.port))?;
        if self.config.keepalive.enabled {
            keepalive::configure(&stream, &self.config.keepalive)?;
        }
        let recv_half = stream.try_clone()?;
        if let Some(timeout) = *self.read_timeout.lock() {
            recv_half.set_read_timeout(Some(timeout))?;
        }
        *send_guard = Some(stream);
        *recv_guard = Some(recv_half);

        if let Some(divider) = *self.tx_divider.lock() {
            let stream = send_guard.as_mut().ok_or(RmapError::TransportClosed)?;
            frame::write_frame(stream, FrameFlag::ChangeTxSpeed, &[divider, 0x00])?;
        }
        Ok(())
    }

    /// Sets the receive-side socket read timeout (used by the transaction
    /// engine's receiver task to periodically observe its stop flag).
    pub fn set_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        *self.read_timeout.lock() = timeout;
        if let Some(stream) = self.recv.lock().as_ref() {
            stream.set_read_timeout(timeout)?;
        }
        Ok(())
    }

    /// Sets the SpaceWire Tx clock divider, clamped to `[0, 63]`. The
    /// transmit clock runs at `125 MHz / (divider + 1)`. If the connection
    /// is open, a `0x38` control frame is emitted immediately; otherwise
    /// the value is applied on the next `open`.
    pub fn set_tx_divider(&self, divider: u8) -> Result<()> {
        let divider = divider.min(63);
        *self.tx_divider.lock() = Some(divider);
        if self.is_open() {
            self.write_tx_divider_frame(divider)?;
        }
        Ok(())
    }

    fn write_tx_divider_frame(&self, divider: u8) -> Result<()> {
        let mut guard = self.send.lock();
        let stream = guard.as_mut().ok_or(RmapError::TransportClosed)?;
        frame::write_frame(stream, FrameFlag::ChangeTxSpeed, &[divider, 0x00])?;
        Ok(())
    }

    /// Sends one SpaceWire packet as a single complete-EOP SSDTP2 frame.
    pub fn send(&self, packet: &[u8]) -> Result<()> {
        self.send_retrying(packet, self.config.reconnect)
    }

    fn send_retrying(&self, packet: &[u8], allow_retry: bool) -> Result<()> {
        let outcome = {
            let mut guard = self.send.lock();
            let stream = guard.as_mut().ok_or(RmapError::TransportClosed)?;
            frame::write_frame(stream, FrameFlag::CompleteEop, packet).map_err(RmapError::from)
        };
        match outcome {
            Ok(()) => Ok(()),
            Err(e) if allow_retry && e.is_broken_pipe() => {
                warn!("send observed a broken pipe, reconnecting");
                self.reconnect()?;
                self.send_retrying(packet, false)
            }
            Err(e) => Err(e),
        }
    }

    /// Receives one assembled SpaceWire packet, concatenating any
    /// non-terminal fragments with the terminating frame.
    ///
    /// Time-code control frames drain their two payload bytes and cause
    /// this call to return early with whatever has been assembled so far
    /// — documented (if surprising) behaviour of the source protocol, kept
    /// verbatim; see the design notes.
    pub fn receive(&self) -> Result<Vec<u8>> {
        self.receive_retrying(self.config.reconnect)
    }

    fn receive_retrying(&self, allow_retry: bool) -> Result<Vec<u8>> {
        match self.receive_once() {
            Ok(data) => Ok(data),
            Err(e) if allow_retry && e.is_connection_reset() => {
                warn!("receive observed connection reset by peer, reconnecting");
                self.reconnect()?;
                self.receive_retrying(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Tears down and re-opens the connection. Always locks `send` then
    /// `recv`, whichever direction's error triggered it, so the two
    /// directions can never invert the lock order against each other; both
    /// are excluded from sending/receiving for the whole reconnect.
    fn reconnect(&self) -> Result<()> {
        let mut send_guard = self.send.lock();
        let mut recv_guard = self.recv.lock();
        Self::disconnect_locked(&mut send_guard, &mut recv_guard);
        self.connect_locked(&mut send_guard, &mut recv_guard)
    }

    fn receive_once(&self) -> Result<Vec<u8>> {
        let mut assembled = Vec::new();
        loop {
            let (flag, body) = {
                let mut guard = self.recv.lock();
                let stream = guard.as_mut().ok_or(RmapError::TransportClosed)?;
                frame::read_frame(stream)?
            };
            if flag.is_time_code() {
                return Ok(assembled);
            }
            if flag.is_data() {
                assembled.extend_from_slice(&body);
                if flag.is_terminal() {
                    return Ok(assembled);
                }
                continue;
            }
            // ChangeTxSpeed / register-access frames arriving on the
            // receive side are outside this engine's scope; drop them.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;
    use std::net::TcpListener;
    use std::thread;

    fn loopback_pair() -> (Interface, TcpStream) {
        let _ignore = env_logger::try_init();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let iface = Interface::new(addr.ip().to_string(), addr.port(), EngineConfig::default());
        let handle = thread::spawn(move || listener.accept().unwrap().0);
        iface.open().unwrap();
        let peer = handle.join().unwrap();
        (iface, peer)
    }

    #[test]
    fn send_emits_a_complete_eop_frame() {
        let (iface, mut peer) = loopback_pair();
        iface.send(&[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
        let mut header = [0u8; frame::HEADER_LEN];
        peer.read_exact(&mut header).unwrap();
        assert_eq!(header[0], FrameFlag::CompleteEop.to_byte());
        let len = frame::decode_length(&header[2..12]).unwrap();
        assert_eq!(len, 4);
        let mut body = vec![0u8; 4];
        peer.read_exact(&mut body).unwrap();
        assert_eq!(body, vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn s5_receive_reassembles_fragments() {
        let (iface, mut peer) = loopback_pair();
        frame::write_frame(&mut peer, FrameFlag::Fragment, &[b'A', b'B', b'C']).unwrap();
        frame::write_frame(&mut peer, FrameFlag::CompleteEop, &[b'D', b'E']).unwrap();
        let packet = iface.receive().unwrap();
        assert_eq!(packet, b"ABCDE");
    }

    #[test]
    fn time_code_frame_truncates_the_current_assembly() {
        let (iface, mut peer) = loopback_pair();
        frame::write_frame(&mut peer, FrameFlag::Fragment, &[b'A', b'B']).unwrap();
        frame::write_frame(&mut peer, FrameFlag::SendTimeCode, &[0x00, 0x00]).unwrap();
        let packet = iface.receive().unwrap();
        assert_eq!(packet, b"AB");
    }

    #[test]
    fn closed_interface_rejects_send() {
        let iface = Interface::with_defaults("127.0.0.1");
        let err = iface.send(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, RmapError::TransportClosed));
    }

    #[test]
    fn set_tx_divider_clamps_and_emits_control_frame() {
        let (iface, mut peer) = loopback_pair();
        iface.set_tx_divider(200).unwrap();
        let mut header = [0u8; frame::HEADER_LEN];
        peer.read_exact(&mut header).unwrap();
        assert_eq!(header[0], FrameFlag::ChangeTxSpeed.to_byte());
        let mut body = [0u8; 2];
        peer.read_exact(&mut body).unwrap();
        assert_eq!(body, [63, 0x00]);
    }
}
