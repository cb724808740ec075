//! The RMAP instruction byte: command-type bit, read/write discriminant,
//! and the verify/ack/increment flags, on both the command and reply side.

use super::CommandOptions;

/// Bit 6 marks an RMAP command packet.
const COMMAND_BIT: u8 = 0x40;

/// Flags decoded from a reply's instruction byte.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplyFlags {
    /// `true` for a write reply, `false` for a read reply.
    pub rw: bool,
    pub verify: bool,
    pub ack: bool,
    pub increment: bool,
}

/// Encodes the instruction byte for a read (`is_write = false`) or write
/// (`is_write = true`) command.
///
/// Read: `0x40 | ((0x2 | increment) << 2)`.
/// Write: `0x40 | ((0x8 | (verify<<2) | (ack<<1) | increment) << 2)` —
/// reproduced verbatim from the source protocol, double-shift and all; see
/// the module-level docs on [`super::packetize`].
pub(super) fn encode(is_write: bool, opts: &CommandOptions) -> u8 {
    let increment = u8::from(opts.increment);
    if is_write {
        let verify = u8::from(opts.verify);
        let ack = u8::from(opts.ack);
        let field = 0x8 | (verify << 2) | (ack << 1) | increment;
        COMMAND_BIT | (field << 2)
    } else {
        let field = 0x2 | increment;
        COMMAND_BIT | (field << 2)
    }
}

/// Decodes the flags carried in a reply's instruction byte (byte 2 of the
/// reply): `rw = bit5`, `verify = bit4`, `ack = bit3`, `increment = bit2`.
pub(super) fn decode(byte: u8) -> ReplyFlags {
    ReplyFlags {
        rw: byte & 0x20 != 0,
        verify: byte & 0x10 != 0,
        ack: byte & 0x08 != 0,
        increment: byte & 0x04 != 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_default_flags_match_spec_example() {
        let opts = CommandOptions::default();
        assert_eq!(encode(false, &opts), 0x4C);
    }

    #[test]
    fn write_default_flags_match_verbatim_formula() {
        let opts = CommandOptions::default();
        assert_eq!(encode(true, &opts), 0x7C);
    }

    #[test]
    fn non_incrementing_read_clears_the_increment_bit() {
        let opts = CommandOptions {
            increment: false,
            ..CommandOptions::default()
        };
        assert_eq!(encode(false, &opts), 0x48);
    }

    #[test]
    fn decode_recovers_all_four_flags() {
        let flags = decode(0x20 | 0x10 | 0x08 | 0x04);
        assert!(flags.rw);
        assert!(flags.verify);
        assert!(flags.ack);
        assert!(flags.increment);
    }

    #[test]
    fn decode_clears_absent_flags() {
        let flags = decode(0x00);
        assert!(!flags.rw);
        assert!(!flags.verify);
        assert!(!flags.ack);
        assert!(!flags.increment);
    }
}
