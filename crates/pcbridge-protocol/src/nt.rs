//! Alternate request/response byte layout used by the NT guest driver family.
//!
//! The NT bridge drivers do not speak the field-named storage structs; they
//! send a fixed 5-byte header followed by command-specific data, addressed
//! through a named channel rather than a raw dispatcher ID. The session
//! layer translates between this shape and the canonical storage payloads.

use crate::frame::{DecodeError, Reader};
use crate::payload::CDB_LEN;

/// NT disk command codes (request header byte 1).
pub mod cmd {
    pub const READ: u8 = 0x0A;
    pub const WRITE: u8 = 0x0B;
    pub const GET_PARAMS: u8 = 0x0C;
    pub const SCSI: u8 = 0x0F;
    pub const EXT_INFO: u8 = 0x10;
    pub const MEDIA_INFO: u8 = 0x11;
}

/// NT response type codes (response header byte 1).
pub mod rsp {
    pub const DISK_READ: u8 = 0x97;
    pub const GET_PARAMS: u8 = 0x99;
    pub const SCSI: u8 = 0x9C;
    pub const EXT_INFO: u8 = 0x9D;
    pub const MEDIA_INFO: u8 = 0x9E;
    pub const ERROR: u8 = 0x9F;
}

/// NT drive numbers (request header byte 4): 0=A:, 1=B:, 2=C:, 3=D:, 4=CD.
pub mod drive_num {
    pub const FLOPPY_A: u8 = 0;
    pub const FLOPPY_B: u8 = 1;
    pub const DISK_C: u8 = 2;
    pub const DISK_D: u8 = 3;
    pub const CDROM: u8 = 4;
}

/// Fixed 5-byte NT disk request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NtDiskRequest {
    pub drive_type: u8,
    pub command: u8,
    /// Expected response size, big-endian split across two bytes.
    pub size_hi: u8,
    pub size_lo: u8,
    pub drive_num: u8,
}

impl NtDiskRequest {
    pub const SIZE: usize = 5;

    pub fn encode(&self) -> Vec<u8> {
        vec![
            self.drive_type,
            self.command,
            self.size_hi,
            self.size_lo,
            self.drive_num,
        ]
    }

    /// Decode the header, returning the command-specific trailer.
    pub fn decode(bytes: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        let mut r = Reader::new(bytes);
        let req = Self {
            drive_type: r.read_u8()?,
            command: r.read_u8()?,
            size_hi: r.read_u8()?,
            size_lo: r.read_u8()?,
            drive_num: r.read_u8()?,
        };
        Ok((req, r.remaining()))
    }
}

/// LBA + count trailer carried by NT read/write requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NtTransfer {
    pub lba: u32,
    pub count: u16,
}

impl NtTransfer {
    pub const SIZE: usize = 8;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&self.lba.to_le_bytes());
        out.extend_from_slice(&self.count.to_le_bytes());
        out.extend_from_slice(&[0, 0]);
        out
    }

    /// Decode the transfer trailer, returning any write data that follows.
    pub fn decode(bytes: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        let mut r = Reader::new(bytes);
        let lba = r.read_u32()?;
        let count = r.read_u16()?;
        r.read_bytes(2)?;
        Ok((Self { lba, count }, r.remaining()))
    }
}

/// Nested SCSI sub-request following an NT disk header for [`cmd::SCSI`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NtScsiRequest {
    pub cdb_len: u8,
    pub xfer_in_len: u32,
    pub xfer_out_len: u32,
    pub cdb: [u8; CDB_LEN],
}

impl NtScsiRequest {
    pub const SIZE: usize = 11 + CDB_LEN;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.push(self.cdb_len);
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&self.xfer_in_len.to_le_bytes());
        out.extend_from_slice(&self.xfer_out_len.to_le_bytes());
        out.extend_from_slice(&self.cdb);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        let mut r = Reader::new(bytes);
        let cdb_len = r.read_u8()?;
        r.read_bytes(2)?;
        let xfer_in_len = r.read_u32()?;
        let xfer_out_len = r.read_u32()?;
        let mut cdb = [0u8; CDB_LEN];
        cdb.copy_from_slice(r.read_bytes(CDB_LEN)?);
        Ok((
            Self {
                cdb_len,
                xfer_in_len,
                xfer_out_len,
                cdb,
            },
            r.remaining(),
        ))
    }
}

/// 8-byte NT disk response header; sector or SCSI data follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NtDiskResponse {
    /// Echo of the request command byte.
    pub command: u8,
    pub response_type: u8,
    /// Payload size in 16-bit words.
    pub size_words: u16,
    /// BIOS status byte on error, zero on success.
    pub error_code: u8,
    pub error_detail: u8,
    /// Sectors transferred.
    pub count: u8,
}

impl NtDiskResponse {
    pub const SIZE: usize = 8;

    pub fn encode_with_data(&self, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE + data.len());
        out.push(self.command);
        out.push(self.response_type);
        out.push((self.size_words >> 8) as u8);
        out.push(self.size_words as u8);
        out.push(self.error_code);
        out.push(self.error_detail);
        out.push(self.count);
        out.push(0);
        out.extend_from_slice(data);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        let mut r = Reader::new(bytes);
        let command = r.read_u8()?;
        let response_type = r.read_u8()?;
        let size_hi = r.read_u8()?;
        let size_lo = r.read_u8()?;
        let error_code = r.read_u8()?;
        let error_detail = r.read_u8()?;
        let count = r.read_u8()?;
        r.read_u8()?;
        Ok((
            Self {
                command,
                response_type,
                size_words: (u16::from(size_hi) << 8) | u16::from(size_lo),
                error_code,
                error_detail,
                count,
            },
            r.remaining(),
        ))
    }
}
