//! Typed payloads carried inside frames, with explicit little-endian codecs.
//!
//! Variable-length trailers (sector data, SCSI transfer data) follow the
//! fixed part of each payload; `decode` returns the trailer slice so callers
//! never have to do offset arithmetic themselves.

use crate::consts::CHANNEL_NAME_MAX;
use crate::frame::{push_u32, DecodeError, Reader};

/// Fixed-format SCSI sense buffer length.
pub const SENSE_LEN: usize = 18;

/// Maximum SCSI CDB length carried on the wire.
pub const CDB_LEN: usize = 16;

/// SCSI data-transfer direction values.
pub mod scsi_dir {
    pub const NONE: u32 = 0;
    pub const READ: u32 = 1;
    pub const WRITE: u32 = 2;
}

/// SCSI status bytes returned to the guest.
pub mod scsi_status {
    pub const GOOD: u8 = 0x00;
    pub const CHECK_CONDITION: u8 = 0x02;
    pub const BUSY: u8 = 0x08;
}

/// Init handshake request (host → guest).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreInit {
    pub host_version: u32,
    pub features_supported: u32,
}

impl CoreInit {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8);
        push_u32(&mut out, self.host_version);
        push_u32(&mut out, self.features_supported);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(bytes);
        Ok(Self {
            host_version: r.read_u32()?,
            features_supported: r.read_u32()?,
        })
    }
}

/// Init handshake reply (guest → host).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreInitReply {
    pub guest_version: u32,
    pub features_enabled: u32,
    pub shmem_size: u32,
    pub framebuffer_size: u32,
}

impl CoreInitReply {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        push_u32(&mut out, self.guest_version);
        push_u32(&mut out, self.features_enabled);
        push_u32(&mut out, self.shmem_size);
        push_u32(&mut out, self.framebuffer_size);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(bytes);
        Ok(Self {
            guest_version: r.read_u32()?,
            features_enabled: r.read_u32()?,
            shmem_size: r.read_u32()?,
            framebuffer_size: r.read_u32()?,
        })
    }
}

/// BIOS storage request. Sector data for writes follows the fixed part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StorageRequest {
    pub drive: u32,
    pub command: u32,
    pub cylinder: u32,
    pub head: u32,
    /// 1-based for CHS addressing.
    pub sector: u32,
    pub count: u32,
    pub lba_lo: u32,
    pub lba_hi: u32,
}

impl StorageRequest {
    pub const SIZE: usize = 32;

    /// Extended-addressing LBA, or `None` when the request is CHS-addressed
    /// (both LBA words zero).
    pub fn lba(&self) -> Option<u64> {
        if self.lba_lo == 0 && self.lba_hi == 0 {
            None
        } else {
            Some((u64::from(self.lba_hi) << 32) | u64::from(self.lba_lo))
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        for v in [
            self.drive,
            self.command,
            self.cylinder,
            self.head,
            self.sector,
            self.count,
            self.lba_lo,
            self.lba_hi,
        ] {
            push_u32(&mut out, v);
        }
        out
    }

    /// Decode the fixed part, returning the trailing write data (if any).
    pub fn decode(bytes: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        let mut r = Reader::new(bytes);
        let req = Self {
            drive: r.read_u32()?,
            command: r.read_u32()?,
            cylinder: r.read_u32()?,
            head: r.read_u32()?,
            sector: r.read_u32()?,
            count: r.read_u32()?,
            lba_lo: r.read_u32()?,
            lba_hi: r.read_u32()?,
        };
        Ok((req, r.remaining()))
    }
}

/// BIOS storage reply header; sector data for reads follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageReply {
    /// BIOS status byte (see [`crate::consts::bios_status`]).
    pub status: u32,
    /// Sectors actually transferred (or a command-specific value).
    pub count: u32,
}

impl StorageReply {
    pub const SIZE: usize = 8;

    pub fn encode_with_data(&self, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE + data.len());
        push_u32(&mut out, self.status);
        push_u32(&mut out, self.count);
        out.extend_from_slice(data);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        let mut r = Reader::new(bytes);
        let rsp = Self {
            status: r.read_u32()?,
            count: r.read_u32()?,
        };
        Ok((rsp, r.remaining()))
    }
}

/// Drive-parameters block returned by the get-parameters command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveParams {
    pub drive_type: u32,
    pub cylinders: u32,
    pub heads: u32,
    pub sectors: u32,
    pub total_sectors: u64,
    pub sector_size: u32,
}

impl DriveParams {
    pub const SIZE: usize = 28;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        push_u32(&mut out, self.drive_type);
        push_u32(&mut out, self.cylinders);
        push_u32(&mut out, self.heads);
        push_u32(&mut out, self.sectors);
        push_u32(&mut out, self.total_sectors as u32);
        push_u32(&mut out, (self.total_sectors >> 32) as u32);
        push_u32(&mut out, self.sector_size);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(bytes);
        let drive_type = r.read_u32()?;
        let cylinders = r.read_u32()?;
        let heads = r.read_u32()?;
        let sectors = r.read_u32()?;
        let total_lo = r.read_u32()?;
        let total_hi = r.read_u32()?;
        let sector_size = r.read_u32()?;
        Ok(Self {
            drive_type,
            cylinders,
            heads,
            sectors,
            total_sectors: (u64::from(total_hi) << 32) | u64::from(total_lo),
            sector_size,
        })
    }
}

/// SCSI pass-through request. Write data follows when `direction` is
/// [`scsi_dir::WRITE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScsiRequest {
    pub cdb: [u8; CDB_LEN],
    pub cdb_len: u32,
    pub direction: u32,
    pub data_len: u32,
}

impl ScsiRequest {
    pub const SIZE: usize = CDB_LEN + 12;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&self.cdb);
        push_u32(&mut out, self.cdb_len);
        push_u32(&mut out, self.direction);
        push_u32(&mut out, self.data_len);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        let mut r = Reader::new(bytes);
        let mut cdb = [0u8; CDB_LEN];
        cdb.copy_from_slice(r.read_bytes(CDB_LEN)?);
        let req = Self {
            cdb,
            cdb_len: r.read_u32()?,
            direction: r.read_u32()?,
            data_len: r.read_u32()?,
        };
        Ok((req, r.remaining()))
    }
}

/// SCSI pass-through reply header; read data follows when `data_len` > 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScsiReply {
    pub status: u8,
    pub sense_len: u8,
    pub data_len: u32,
    pub sense: [u8; SENSE_LEN],
}

impl ScsiReply {
    pub const SIZE: usize = 8 + SENSE_LEN;

    pub fn encode_with_data(&self, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE + data.len());
        out.push(self.status);
        out.push(self.sense_len);
        out.extend_from_slice(&[0, 0]);
        push_u32(&mut out, self.data_len);
        out.extend_from_slice(&self.sense);
        out.extend_from_slice(data);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        let mut r = Reader::new(bytes);
        let status = r.read_u8()?;
        let sense_len = r.read_u8()?;
        r.read_bytes(2)?;
        let data_len = r.read_u32()?;
        let mut sense = [0u8; SENSE_LEN];
        sense.copy_from_slice(r.read_bytes(SENSE_LEN)?);
        Ok((
            Self {
                status,
                sense_len,
                data_len,
                sense,
            },
            r.remaining(),
        ))
    }
}

/// Channel-create request. The name is a fixed 64-code-unit UTF-16LE field;
/// `name_utf16` holds only the meaningful prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelCreateRequest {
    pub flags: u32,
    pub name_utf16: Vec<u16>,
}

impl ChannelCreateRequest {
    pub const SIZE: usize = 8 + CHANNEL_NAME_MAX * 2;

    pub fn new(flags: u32, name: &str) -> Self {
        Self {
            flags,
            name_utf16: name.encode_utf16().take(CHANNEL_NAME_MAX).collect(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        push_u32(&mut out, self.flags);
        push_u32(&mut out, (self.name_utf16.len() * 2) as u32);
        for i in 0..CHANNEL_NAME_MAX {
            let unit = self.name_utf16.get(i).copied().unwrap_or(0);
            out.extend_from_slice(&unit.to_le_bytes());
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(bytes);
        let flags = r.read_u32()?;
        let name_len = r.read_u32()? as usize;
        let units = (name_len / 2).min(CHANNEL_NAME_MAX);
        let raw = r.read_bytes(CHANNEL_NAME_MAX * 2)?;
        let name_utf16 = raw[..units * 2]
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        Ok(Self { flags, name_utf16 })
    }
}

/// Channel-create reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelCreateReply {
    /// See [`crate::consts::channel_status`].
    pub status: u32,
    pub channel_id: u32,
}

impl ChannelCreateReply {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8);
        push_u32(&mut out, self.status);
        push_u32(&mut out, self.channel_id);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(bytes);
        Ok(Self {
            status: r.read_u32()?,
            channel_id: r.read_u32()?,
        })
    }
}

/// Channel bind/unbind/delete request: just the channel handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelRef {
    pub channel_id: u32,
}

impl ChannelRef {
    pub fn encode(&self) -> Vec<u8> {
        self.channel_id.to_le_bytes().to_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(bytes);
        Ok(Self {
            channel_id: r.read_u32()?,
        })
    }
}

/// Media mount notification (host → guest).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountNotify {
    pub drive: u32,
    pub flags: u32,
}

impl MountNotify {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8);
        push_u32(&mut out, self.drive);
        push_u32(&mut out, self.flags);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(bytes);
        Ok(Self {
            drive: r.read_u32()?,
            flags: r.read_u32()?,
        })
    }
}

/// Media unmount/eject notification (host → guest): just the drive number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveNotify {
    pub drive: u32,
}

impl DriveNotify {
    pub fn encode(&self) -> Vec<u8> {
        self.drive.to_le_bytes().to_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(bytes);
        Ok(Self {
            drive: r.read_u32()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_request_trailer_is_returned() {
        let req = StorageRequest {
            drive: 0x80,
            command: 2,
            count: 1,
            lba_lo: 5,
            ..Default::default()
        };
        let mut bytes = req.encode();
        bytes.extend_from_slice(&[0xAB; 512]);
        let (decoded, data) = StorageRequest::decode(&bytes).unwrap();
        assert_eq!(decoded, req);
        assert_eq!(data.len(), 512);
        assert!(data.iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn storage_request_lba_addressing() {
        let chs = StorageRequest {
            cylinder: 3,
            head: 1,
            sector: 5,
            ..Default::default()
        };
        assert_eq!(chs.lba(), None);

        let ext = StorageRequest {
            lba_lo: 0x1000,
            lba_hi: 0x2,
            ..Default::default()
        };
        assert_eq!(ext.lba(), Some(0x2_0000_1000));
    }

    #[test]
    fn channel_create_name_is_fixed_width() {
        let req = ChannelCreateRequest::new(1, "NewInt13Dispatcher");
        let bytes = req.encode();
        assert_eq!(bytes.len(), ChannelCreateRequest::SIZE);
        let decoded = ChannelCreateRequest::decode(&bytes).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn scsi_reply_layout() {
        let reply = ScsiReply {
            status: scsi_status::CHECK_CONDITION,
            sense_len: SENSE_LEN as u8,
            data_len: 0,
            sense: [7u8; SENSE_LEN],
        };
        let bytes = reply.encode_with_data(&[]);
        assert_eq!(bytes.len(), ScsiReply::SIZE);
        let (decoded, rest) = ScsiReply::decode(&bytes).unwrap();
        assert_eq!(decoded, reply);
        assert!(rest.is_empty());
    }

    #[test]
    fn drive_params_split_total() {
        let params = DriveParams {
            drive_type: 3,
            cylinders: 1024,
            heads: 16,
            sectors: 63,
            total_sectors: 0x1_0000_0001,
            sector_size: 512,
        };
        let bytes = params.encode();
        assert_eq!(bytes.len(), DriveParams::SIZE);
        assert_eq!(DriveParams::decode(&bytes).unwrap(), params);
    }
}
