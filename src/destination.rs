//! Destination descriptors and the process-wide registry that lets a
//! partially-specified destination recover its remaining fields from an
//! earlier, fully-specified registration of the same `(dest, src)` pair.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::crc::CrcVariant;
use crate::error::{Result, RmapError};

/// One `(dest_key, crc_variant, word_width)` entry, keyed by `(dest_addr,
/// src_addr)` in the registry.
#[derive(Debug, Clone)]
struct RegistryEntry {
    dest_key: u8,
    variant: CrcVariant,
    word_width: u8,
}

/// Process-wide destination registry, shared by every [`Destination`]
/// constructed without an explicit registry handle.
///
/// Lifetime is the program's lifetime, matching the source protocol's
/// class-level dictionary (§9 Design Notes: a systems rewrite exposes this
/// as a shared associative container behind a lock rather than a bare
/// global mutable dict).
#[derive(Debug, Default)]
pub struct Registry {
    inner: Mutex<HashMap<(u8, u8), RegistryEntry>>,
}

impl Registry {
    /// Creates a fresh, empty registry. Most callers want
    /// [`Destination::new`], which uses the process-wide default registry;
    /// construct one of these directly only to isolate tests or to pass an
    /// explicit handle to [`Destination::with_registry`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lookup_or_default(&self, dest_addr: u8, src_addr: u8) -> (u8, CrcVariant, u8) {
        let guard = self.inner.lock();
        match guard.get(&(dest_addr, src_addr)) {
            Some(entry) => (entry.dest_key, entry.variant.clone(), entry.word_width),
            None => (0x00, CrcVariant::None, 1),
        }
    }

    fn register(&self, dest_addr: u8, src_addr: u8, dest_key: u8, variant: CrcVariant, word_width: u8) {
        let mut guard = self.inner.lock();
        let _previous = guard.insert(
            (dest_addr, src_addr),
            RegistryEntry {
                dest_key,
                variant,
                word_width,
            },
        );
    }
}

fn global_registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(Registry::default)
}

/// An RMAP destination: the addresses, key, CRC variant and word width that
/// identify a remote target.
///
/// Constructed with only `dest_addr`/`src_addr`, a `Destination` populates
/// its remaining fields from the registry (falling back to
/// `dest_key=0x00`, `variant=None`, `word_width=1` if the pair was never
/// registered). Constructed with any of the remaining fields present, it
/// writes those fields through to the registry under `(dest_addr,
/// src_addr)`, last-writer-wins.
#[derive(Debug, Clone)]
pub struct Destination {
    pub dest_addr: u8,
    pub src_addr: u8,
    pub dest_key: u8,
    pub variant: CrcVariant,
    pub word_width: u8,
}

impl Destination {
    /// Looks up `(dest_addr, src_addr)` against the process-wide registry,
    /// or registers `dest_key`/`variant`/`word_width` into it when any of
    /// those three are supplied.
    pub fn new(
        src_addr: u8,
        dest_addr: u8,
        dest_key: Option<u8>,
        variant: Option<CrcVariant>,
        word_width: Option<u8>,
    ) -> Result<Self> {
        Self::with_registry(global_registry(), src_addr, dest_addr, dest_key, variant, word_width)
    }

    /// Same as [`Destination::new`] but against an explicit [`Registry`]
    /// rather than the process-wide default (§9 Design Notes: useful for
    /// tests, and for callers who don't want global shared state).
    pub fn with_registry(
        registry: &Registry,
        src_addr: u8,
        dest_addr: u8,
        dest_key: Option<u8>,
        variant: Option<CrcVariant>,
        word_width: Option<u8>,
    ) -> Result<Self> {
        let (dest_key, variant, word_width) = if dest_key.is_none() && variant.is_none() && word_width.is_none() {
            registry.lookup_or_default(dest_addr, src_addr)
        } else {
            let dest_key = dest_key.unwrap_or(0x00);
            let variant = variant.unwrap_or(CrcVariant::None);
            let word_width = word_width.unwrap_or(1);
            registry.register(dest_addr, src_addr, dest_key, variant.clone(), word_width);
            (dest_key, variant, word_width)
        };
        validate_word_width(word_width)?;
        Ok(Self {
            dest_addr,
            src_addr,
            dest_key,
            variant,
            word_width,
        })
    }

    /// Recovers a destination descriptor from the fields present on an
    /// inbound reply (`dst`/`src` as seen on the wire), consulting the
    /// process-wide registry for the remaining fields.
    pub(crate) fn from_reply(src_addr: u8, dest_addr: u8) -> Result<Self> {
        Self::new(src_addr, dest_addr, None, None, None)
    }
}

pub(crate) fn validate_word_width(word_width: u8) -> Result<()> {
    match word_width {
        1 | 2 | 4 => Ok(()),
        other => Err(RmapError::UnsupportedWordWidth(other)),
    }
}

/// Shared handle to a [`Registry`], for callers who want to pass one
/// explicit registry around instead of relying on the process-wide default.
pub type SharedRegistry = Arc<Registry>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_pair_gets_defaults() {
        let registry = Registry::new();
        let dest = Destination::with_registry(&registry, 0xAA, 0xBB, None, None, None).unwrap();
        assert_eq!(dest.dest_key, 0x00);
        assert_eq!(dest.variant, CrcVariant::None);
        assert_eq!(dest.word_width, 1);
    }

    #[test]
    fn fully_specified_destination_writes_through() {
        let registry = Registry::new();
        let _first =
            Destination::with_registry(&registry, 0xFE, 0x30, Some(0x02), Some(CrcVariant::DraftF), Some(1))
                .unwrap();
        let looked_up = Destination::with_registry(&registry, 0xFE, 0x30, None, None, None).unwrap();
        assert_eq!(looked_up.dest_key, 0x02);
        assert_eq!(looked_up.variant, CrcVariant::DraftF);
        assert_eq!(looked_up.word_width, 1);
    }

    #[test]
    fn last_writer_wins_on_reregistration() {
        let registry = Registry::new();
        let _first = Destination::with_registry(&registry, 0xFE, 0x30, Some(0x02), Some(CrcVariant::DraftE), Some(1))
            .unwrap();
        let _second =
            Destination::with_registry(&registry, 0xFE, 0x30, Some(0x09), Some(CrcVariant::DraftF), Some(2))
                .unwrap();
        let looked_up = Destination::with_registry(&registry, 0xFE, 0x30, None, None, None).unwrap();
        assert_eq!(looked_up.dest_key, 0x09);
        assert_eq!(looked_up.variant, CrcVariant::DraftF);
        assert_eq!(looked_up.word_width, 2);
    }

    #[test]
    fn invalid_word_width_is_rejected() {
        let registry = Registry::new();
        let err = Destination::with_registry(&registry, 0xFE, 0x30, Some(0x00), Some(CrcVariant::None), Some(3))
            .unwrap_err();
        assert!(matches!(err, RmapError::UnsupportedWordWidth(3)));
    }

    #[test]
    fn distinct_pairs_do_not_collide() {
        let registry = Registry::new();
        let _a = Destination::with_registry(&registry, 0xFE, 0x30, Some(0x01), Some(CrcVariant::DraftE), Some(1))
            .unwrap();
        let _b = Destination::with_registry(&registry, 0xFE, 0x31, Some(0x02), Some(CrcVariant::DraftF), Some(2))
            .unwrap();
        let a = Destination::with_registry(&registry, 0xFE, 0x30, None, None, None).unwrap();
        let b = Destination::with_registry(&registry, 0xFE, 0x31, None, None, None).unwrap();
        assert_eq!(a.dest_key, 0x01);
        assert_eq!(b.dest_key, 0x02);
    }
}
