//! Packet framing for XMODEM-8K (spec.md §4.3).
//!
//! `MARK | seq | 255-seq | payload[N] | crc_hi | crc_lo` (CRC mode) or
//! `MARK | seq | 255-seq | payload[N] | checksum` (checksum mode),
//! where `N` is 128 (`SOH`) or 8192 (`STX`).

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use std::io::Cursor;

use super::crc::{checksum8, crc16_ccitt};

/// Padding byte used to fill out the final, short block to the full
/// packet size.
pub const PAD_BYTE: u8 = 0x1A;

pub const SOH_PAYLOAD_LEN: usize = 128;
pub const STX_PAYLOAD_LEN: usize = 8192;

/// Single-byte protocol markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum ControlByte {
    Soh = 0x01,
    Stx = 0x02,
    Eot = 0x04,
    Ack = 0x06,
    Nak = 0x15,
    Can = 0x18,
    C = 0x43,
}

impl ControlByte {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::from_u8(byte)
    }
}

/// Integrity scheme negotiated during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketMode {
    Crc,
    Checksum,
}

/// A decoded data block: its wrapping sequence number and raw
/// (possibly padded) payload.
#[derive(Debug, Clone)]
pub struct Block {
    pub seq: u8,
    pub payload: Vec<u8>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("sequence complement mismatch: seq={seq} comp={comp}")]
    BadComplement { seq: u8, comp: u8 },
    #[error("integrity check failed")]
    IntegrityMismatch,
    #[error("truncated frame")]
    Truncated,
}

impl Block {
    /// Encodes this block as a complete wire frame, including the
    /// leading mark byte and the trailing CRC/checksum.
    pub fn encode(&self, use_stx: bool, mode: PacketMode) -> Vec<u8> {
        let mark = if use_stx { ControlByte::Stx } else { ControlByte::Soh } as u8;
        let mut out = Vec::with_capacity(3 + self.payload.len() + 2);
        out.push(mark);
        out.push(self.seq);
        out.push(255u8.wrapping_sub(self.seq));
        out.extend_from_slice(&self.payload);
        match mode {
            PacketMode::Crc => {
                out.write_u16::<BigEndian>(crc16_ccitt(&self.payload)).expect("write to Vec");
            }
            PacketMode::Checksum => {
                out.push(checksum8(&self.payload));
            }
        }
        out
    }

    /// Decodes the body of a frame (everything *after* the mark byte
    /// has already been read off the wire by the caller, which is the
    /// one that knows whether `SOH`/`STX` selected 128/8192 bytes).
    pub fn decode(body: &[u8], payload_len: usize, mode: PacketMode) -> Result<Block, FrameError> {
        let trailer_len = match mode {
            PacketMode::Crc => 2,
            PacketMode::Checksum => 1,
        };
        if body.len() != 2 + payload_len + trailer_len {
            return Err(FrameError::Truncated);
        }
        let seq = body[0];
        let comp = body[1];
        if comp != 255u8.wrapping_sub(seq) {
            return Err(FrameError::BadComplement { seq, comp });
        }
        let payload = &body[2..2 + payload_len];
        let trailer = &body[2 + payload_len..];
        match mode {
            PacketMode::Crc => {
                let mut cursor = Cursor::new(trailer);
                let received = cursor.read_u16::<BigEndian>().map_err(|_| FrameError::Truncated)?;
                if received != crc16_ccitt(payload) {
                    return Err(FrameError::IntegrityMismatch);
                }
            }
            PacketMode::Checksum => {
                if trailer[0] != checksum8(payload) {
                    return Err(FrameError::IntegrityMismatch);
                }
            }
        }
        Ok(Block { seq, payload: payload.to_vec() })
    }
}

/// Pads `data` with [`PAD_BYTE`] up to `len`; `data` must not already
/// exceed `len`.
pub fn pad_to(mut data: Vec<u8>, len: usize) -> Vec<u8> {
    debug_assert!(data.len() <= len);
    data.resize(len, PAD_BYTE);
    data
}
