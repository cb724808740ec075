//! The engine's two background tasks: one sender draining the outbound
//! queue, one receiver decoding inbound SSDTP2 frames and routing replies by
//! transaction ID.

use std::sync::Arc;

use log::{debug, error};

use crate::destination::Destination;
use crate::engine::mailbox::MailboxTable;
use crate::error::RmapError;
use crate::rmap;
use crate::spawner::{self, AbortSignal};
use crate::transport::Interface;

/// Drains `rx` and writes each packet to `interface`, until a `None`
/// shutdown sentinel (or the send queue being dropped) ends the loop.
///
/// The sender has no use for `abort` itself (the shutdown sentinel is what
/// actually ends its loop), but it is spawned through the same
/// [`spawner::spawn_named`] primitive as the receiver for a single,
/// consistent task-lifecycle story across the engine.
pub(crate) fn spawn_sender(
    interface: Arc<Interface>,
    rx: flume::Receiver<Option<Vec<u8>>>,
    abort: AbortSignal,
) -> std::thread::JoinHandle<()> {
    spawner::spawn_named("rmap-sender", abort, move |_abort| loop {
        match rx.recv() {
            Ok(Some(packet)) => {
                if let Err(e) = interface.send(&packet) {
                    error!("sender task: {e}");
                }
            }
            Ok(None) | Err(_) => break,
        }
    })
}

/// Reads assembled SpaceWire packets from `interface` and decodes each as an
/// RMAP reply, delivering it to the matching mailbox by transaction ID.
/// Observes `abort` between reads; `interface`'s read timeout (set by the
/// engine before this task starts) is what gives it the chance to notice.
pub(crate) fn spawn_receiver(
    interface: Arc<Interface>,
    mailboxes: Arc<MailboxTable>,
    abort: AbortSignal,
) -> std::thread::JoinHandle<()> {
    spawner::spawn_named("rmap-receiver", abort, move |abort| {
        while abort.is_running() {
            match interface.receive() {
                Ok(packet) => match decode_reply(&packet) {
                    Ok(reply) => mailboxes.deliver(reply),
                    Err(e) => debug!("receiver task: dropping undecodable reply: {e}"),
                },
                Err(RmapError::TransportIo(ref io_err))
                    if io_err.kind() == std::io::ErrorKind::WouldBlock
                        || io_err.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(e) => {
                    error!("receiver task: {e}");
                }
            }
        }
    })
}

fn decode_reply(packet: &[u8]) -> crate::error::Result<rmap::Reply> {
    if packet.len() < 8 {
        return Err(RmapError::FrameMalformed("reply shorter than minimum header".into()));
    }
    let dest = Destination::from_reply(packet[0], packet[4])?;
    rmap::depacketize(packet, dest, true)
}
