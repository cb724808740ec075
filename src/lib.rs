//! Client-side engine for the Remote Memory Access Protocol (RMAP) carried
//! over SpaceWire, tunnelled through the SSDTP2-over-TCP transport used by
//! SpaceWire-to-Ethernet bridge boxes.
//!
//! The crate is organised, leaf modules first, the way the wire protocol is
//! layered:
//!
//! - [`crc`] — the three RMAP CRC-8 variants.
//! - [`destination`] — the process-wide destination registry.
//! - [`rmap`] — the command/reply codec (`packetize` / `depacketize`).
//! - [`transport`] — the SSDTP2 framing layer over a TCP socket.
//! - [`engine`] — the transaction engine: TID pool, sender/receiver tasks,
//!   reply mailboxes.
//! - [`socket`] — the per-caller handle callers actually read and write
//!   through.

pub mod error;

pub mod config;

pub mod crc;

pub mod destination;

pub mod rmap;

pub mod transport;

pub(crate) mod spawner;

pub mod engine;

pub mod socket;

pub use crc::CrcVariant;
pub use destination::Destination;
pub use engine::Engine;
pub use error::{Result, RmapError};
pub use socket::Socket;
