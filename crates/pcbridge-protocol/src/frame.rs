//! Frame headers for the ring message protocol.
//!
//! Requests and responses share a 16-byte little-endian header shape; only
//! bytes 4..8 differ (`dispatcher, command` vs `status, reserved`). The
//! payload follows the header immediately in the ring.

use thiserror::Error;

use crate::consts::{MAX_PAYLOAD, MSG_MAGIC};

/// Size of both header forms, in bytes.
pub const HEADER_SIZE: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("truncated message: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("bad frame magic {found:#010x}")]
    BadMagic { found: u32 },

    #[error("declared payload length {0} exceeds protocol maximum")]
    OversizedPayload(u32),

    #[error("invalid field value: {0}")]
    InvalidField(&'static str),
}

/// Header of a host→guest or guest→host command frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub dispatcher: u16,
    pub command: u16,
    pub sequence: u32,
    pub payload_len: u32,
}

impl RequestHeader {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&MSG_MAGIC.to_le_bytes());
        out[4..6].copy_from_slice(&self.dispatcher.to_le_bytes());
        out[6..8].copy_from_slice(&self.command.to_le_bytes());
        out[8..12].copy_from_slice(&self.sequence.to_le_bytes());
        out[12..16].copy_from_slice(&self.payload_len.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let (w0, w1, sequence, payload_len) = decode_common(bytes)?;
        Ok(Self {
            dispatcher: w0,
            command: w1,
            sequence,
            payload_len,
        })
    }
}

/// Header of a response frame. `sequence` echoes the request it answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub status: u16,
    pub sequence: u32,
    pub payload_len: u32,
}

impl ResponseHeader {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&MSG_MAGIC.to_le_bytes());
        out[4..6].copy_from_slice(&self.status.to_le_bytes());
        // bytes 6..8: reserved, zero
        out[8..12].copy_from_slice(&self.sequence.to_le_bytes());
        out[12..16].copy_from_slice(&self.payload_len.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let (w0, _reserved, sequence, payload_len) = decode_common(bytes)?;
        Ok(Self {
            status: w0,
            sequence,
            payload_len,
        })
    }
}

fn decode_common(bytes: &[u8]) -> Result<(u16, u16, u32, u32), DecodeError> {
    if bytes.len() < HEADER_SIZE {
        return Err(DecodeError::Truncated {
            need: HEADER_SIZE,
            have: bytes.len(),
        });
    }
    let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if magic != MSG_MAGIC {
        return Err(DecodeError::BadMagic { found: magic });
    }
    let w0 = u16::from_le_bytes([bytes[4], bytes[5]]);
    let w1 = u16::from_le_bytes([bytes[6], bytes[7]]);
    let sequence = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    let payload_len = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
    if payload_len as usize > MAX_PAYLOAD {
        return Err(DecodeError::OversizedPayload(payload_len));
    }
    Ok((w0, w1, sequence, payload_len))
}

/// Bounds-checked little-endian reader used by the payload codecs.
pub(crate) struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let b = *self.bytes.get(self.pos).ok_or(DecodeError::Truncated {
            need: self.pos + 1,
            have: self.bytes.len(),
        })?;
        self.pos += 1;
        Ok(b)
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.bytes.len() - self.pos < len {
            return Err(DecodeError::Truncated {
                need: self.pos + len,
                have: self.bytes.len(),
            });
        }
        let start = self.pos;
        self.pos += len;
        Ok(&self.bytes[start..start + len])
    }
}

pub(crate) fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}
