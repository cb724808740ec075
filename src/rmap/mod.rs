//! The RMAP command/reply codec: `packetize` encodes a read or write
//! command, `depacketize` decodes a reply. Both are pure functions over
//! byte buffers — no I/O, no transaction-ID bookkeeping.

mod instruction;

pub use instruction::ReplyFlags;

use crate::crc::crc8;
use crate::destination::{validate_word_width, Destination};
use crate::error::{Result, RmapError};

/// Header length, in bytes, before the header CRC byte.
const HEADER_LEN_BEFORE_CRC: usize = 15;
/// RMAP protocol ID, carried in byte 1 of a command and byte 1 of a reply.
const PROTOCOL_ID: u8 = 0x01;

/// Flags controlling how `packetize` encodes the instruction byte.
///
/// Defaults match the source protocol's keyword defaults:
/// `increment=1`, `verify=1`, `ack=1`, `extended_address=0x00`.
#[derive(Debug, Clone, Copy)]
pub struct CommandOptions {
    pub increment: bool,
    pub verify: bool,
    pub ack: bool,
    pub extended_address: u8,
}

impl Default for CommandOptions {
    fn default() -> Self {
        Self {
            increment: true,
            verify: true,
            ack: true,
            extended_address: 0x00,
        }
    }
}

/// A decoded RMAP reply.
#[derive(Debug, Clone)]
pub struct Reply {
    pub tid: u16,
    pub dest: Destination,
    pub status: u8,
    /// Present only for read replies.
    pub data: Option<Vec<u32>>,
    pub flags: ReplyFlags,
}

fn encode_word(value: u32, word_width: u8) -> Result<Vec<u8>> {
    match word_width {
        1 => {
            let b = u8::try_from(value)
                .map_err(|_| RmapError::FrameMalformed(format!("value {value:#x} does not fit in 1 byte")))?;
            Ok(vec![b])
        }
        2 => {
            let w = u16::try_from(value)
                .map_err(|_| RmapError::FrameMalformed(format!("value {value:#x} does not fit in 2 bytes")))?;
            Ok(w.to_le_bytes().to_vec())
        }
        4 => Ok(value.to_le_bytes().to_vec()),
        other => Err(RmapError::UnsupportedWordWidth(other)),
    }
}

fn encode_data(data: &[u32], word_width: u8) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * usize::from(word_width));
    for &word in data {
        out.extend(encode_word(word, word_width)?);
    }
    Ok(out)
}

fn decode_data(bytes: &[u8], word_width: u8) -> Result<Vec<u32>> {
    match word_width {
        1 => Ok(bytes.iter().map(|&b| u32::from(b)).collect()),
        2 => bytes
            .chunks_exact(2)
            .map(|chunk| {
                let array: [u8; 2] = chunk
                    .try_into()
                    .map_err(|_| RmapError::FrameMalformed("truncated 2-byte word".into()))?;
                Ok(u32::from(u16::from_le_bytes(array)))
            })
            .collect(),
        4 => bytes
            .chunks_exact(4)
            .map(|chunk| {
                let array: [u8; 4] = chunk
                    .try_into()
                    .map_err(|_| RmapError::FrameMalformed("truncated 4-byte word".into()))?;
                Ok(u32::from_le_bytes(array))
            })
            .collect(),
        other => Err(RmapError::UnsupportedWordWidth(other)),
    }
}

/// Encodes a read or write command addressed to `dest` with transaction ID
/// `tid`.
///
/// `length` is the number of words to access; for a write, it must equal
/// `data.unwrap().len()`. Leave `data` as `None` to encode a read command;
/// any `Some` encodes a write.
///
/// The write-instruction formula double-shifts the flag bits
/// (`(0x8 | (verify<<2) | (ack<<1) | increment) << 2`); this is reproduced
/// verbatim from the source protocol for wire interoperability and must not
/// be "corrected".
pub fn packetize(
    tid: u16,
    dest: &Destination,
    address: u32,
    length: u32,
    data: Option<&[u32]>,
    opts: &CommandOptions,
) -> Result<Vec<u8>> {
    validate_word_width(dest.word_width)?;

    let instruction = instruction::encode(data.is_some(), opts);
    let blength = length
        .checked_mul(u32::from(dest.word_width))
        .ok_or_else(|| RmapError::FrameMalformed("data length overflow".into()))?;

    let mut packet = Vec::with_capacity(HEADER_LEN_BEFORE_CRC + 1);
    packet.push(dest.dest_addr);
    packet.push(PROTOCOL_ID);
    packet.push(instruction);
    packet.push(dest.dest_key);
    packet.push(dest.src_addr);
    packet.extend_from_slice(&tid.to_be_bytes());
    packet.push(opts.extended_address);
    packet.extend_from_slice(&address.to_be_bytes());
    packet.extend_from_slice(&blength.to_be_bytes()[1..4]); // u24 BE
    debug_assert_eq!(packet.len(), HEADER_LEN_BEFORE_CRC);
    packet.push(crc8(&dest.variant, &packet));

    if let Some(words) = data {
        let encoded = encode_data(words, dest.word_width)?;
        packet.push(crc8(&dest.variant, &encoded));
        // Data CRC must trail the payload; the encoded bytes themselves are
        // inserted before it, so splice them in at the right offset.
        let crc_byte = packet.pop().expect("just pushed");
        packet.extend_from_slice(&encoded);
        packet.push(crc_byte);
    }

    Ok(packet)
}

/// Decodes an RMAP reply packet.
///
/// Consults `dest.variant`/`dest.word_width` (typically recovered from the
/// destination registry by the caller via `Destination::from_reply`) to
/// interpret the data payload and verify CRCs.
pub fn depacketize(bytes: &[u8], dest: Destination, check_crc: bool) -> Result<Reply> {
    if bytes.len() < 8 {
        return Err(RmapError::FrameMalformed("reply shorter than minimum header".into()));
    }
    if bytes[1] != PROTOCOL_ID {
        return Err(RmapError::FrameMalformed(format!(
            "unexpected protocol ID {:#x}",
            bytes[1]
        )));
    }
    let flags = instruction::decode(bytes[2]);
    let status = bytes[3];
    let tid = u16::from_be_bytes([bytes[5], bytes[6]]);

    validate_word_width(dest.word_width)?;

    if flags.rw {
        // Write reply: byte 7 is the header CRC, no data.
        if bytes.len() < 8 {
            return Err(RmapError::FrameMalformed("write reply truncated".into()));
        }
        if check_crc {
            let expected = crc8(&dest.variant, &bytes[0..7]);
            if expected != bytes[7] {
                return Err(RmapError::CrcMismatch);
            }
        }
        Ok(Reply {
            tid,
            dest,
            status,
            data: None,
            flags,
        })
    } else {
        if bytes.len() < 12 {
            return Err(RmapError::FrameMalformed("read reply shorter than minimum header".into()));
        }
        let blength = u32::from(bytes[8]) << 16 | u32::from(bytes[9]) << 8 | u32::from(bytes[10]);
        let blength = blength as usize;
        if check_crc {
            let expected = crc8(&dest.variant, &bytes[0..11]);
            if expected != bytes[11] {
                return Err(RmapError::CrcMismatch);
            }
        }
        let data_start = 12;
        let data_end = data_start
            .checked_add(blength)
            .ok_or_else(|| RmapError::FrameMalformed("data length overflow".into()))?;
        if bytes.len() < data_end + 1 {
            return Err(RmapError::FrameMalformed("read reply payload truncated".into()));
        }
        let payload = &bytes[data_start..data_end];
        if check_crc {
            let expected = crc8(&dest.variant, payload);
            if expected != bytes[data_end] {
                return Err(RmapError::CrcMismatch);
            }
        }
        let data = decode_data(payload, dest.word_width)?;
        Ok(Reply {
            tid,
            dest,
            status,
            data: Some(data),
            flags,
        })
    }
}
