//! INT-13h-style BIOS disk service handler.
//!
//! Requests address a drive by BIOS drive number and either CHS or an
//! extended LBA. Results are reported in the guest's own vocabulary: a
//! BIOS status byte plus a transfer count, with sector data appended for
//! reads. Only a failing backing file escapes as `Err`.

use tracing::debug;

use pcbridge_protocol::consts::{bios_status, storage_cmd};
use pcbridge_protocol::payload::{DriveParams, StorageRequest};

use crate::device::DriveSet;
use crate::error::{Result, StorageError};

/// Per-request transfer cap, bounding how long a worker can block on one
/// file I/O. Oversized requests are truncated, not failed.
pub const MAX_SECTORS_PER_IO: u32 = 128;

/// Result of one BIOS request: status byte, sectors transferred (or a
/// command-specific value), and response data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BiosOutcome {
    pub status: u32,
    pub count: u32,
    pub data: Vec<u8>,
}

impl BiosOutcome {
    fn status_only(status: u32) -> Self {
        Self {
            status,
            count: 0,
            data: Vec::new(),
        }
    }
}

/// Answer one BIOS storage request against the drive set. `write_data` is
/// the sector payload following the request header; `max_data` bounds the
/// response data (the space left in the response frame).
pub fn handle_request(
    drives: &DriveSet,
    req: &StorageRequest,
    write_data: &[u8],
    max_data: usize,
) -> Result<BiosOutcome> {
    let Some(dev) = drives.device_for(req.drive) else {
        return Ok(BiosOutcome::status_only(bios_status::NO_MEDIA));
    };

    let lba = match req.lba() {
        Some(lba) => lba,
        None => dev
            .geometry()
            .chs_to_lba(req.cylinder, req.head, req.sector),
    };

    let command = u16::try_from(req.command).unwrap_or(u16::MAX);
    let sector_size = dev.sector_size() as usize;

    let outcome = match command {
        storage_cmd::READ => {
            let count = clamp_count(req.count, sector_size, max_data);
            match dev.read_sectors(lba, count) {
                Ok(data) => BiosOutcome {
                    status: bios_status::OK,
                    count,
                    data,
                },
                Err(StorageError::OutOfRange { .. }) => {
                    BiosOutcome::status_only(bios_status::SECTOR_NOT_FOUND)
                }
                Err(err) => return Err(err),
            }
        }

        storage_cmd::WRITE => {
            let count = req.count.min(MAX_SECTORS_PER_IO);
            if count < req.count {
                debug!(requested = req.count, count, "write truncated");
            }
            if write_data.len() < count as usize * sector_size {
                return Ok(BiosOutcome::status_only(bios_status::BAD_COMMAND));
            }
            match dev.write_sectors(lba, count, write_data) {
                Ok(()) => BiosOutcome {
                    status: bios_status::OK,
                    count,
                    data: Vec::new(),
                },
                Err(StorageError::ReadOnly) => {
                    BiosOutcome::status_only(bios_status::WRITE_PROTECTED)
                }
                Err(StorageError::OutOfRange { .. }) => {
                    BiosOutcome::status_only(bios_status::SECTOR_NOT_FOUND)
                }
                Err(err) => return Err(err),
            }
        }

        storage_cmd::VERIFY => match dev.verify_sectors(lba, req.count) {
            Ok(()) => BiosOutcome {
                status: bios_status::OK,
                count: req.count,
                data: Vec::new(),
            },
            Err(StorageError::OutOfRange { .. }) => {
                BiosOutcome::status_only(bios_status::SECTOR_NOT_FOUND)
            }
            Err(err) => return Err(err),
        },

        // Image files have nothing to reset or recalibrate.
        storage_cmd::RESET | storage_cmd::RECAL => BiosOutcome::status_only(bios_status::OK),

        storage_cmd::GET_PARAMS => {
            let geo = dev.geometry();
            let params = DriveParams {
                drive_type: drive_type_for(req.drive, false),
                cylinders: geo.cylinders,
                heads: geo.heads,
                sectors: geo.sectors,
                total_sectors: dev.total_sectors(),
                sector_size: dev.sector_size(),
            };
            let data = params.encode();
            BiosOutcome {
                status: bios_status::OK,
                count: data.len() as u32,
                data,
            }
        }

        storage_cmd::GET_TYPE => BiosOutcome {
            status: bios_status::OK,
            count: drive_type_for(req.drive, true),
            data: Vec::new(),
        },

        _ => BiosOutcome::status_only(bios_status::BAD_COMMAND),
    };

    Ok(outcome)
}

fn clamp_count(requested: u32, sector_size: usize, budget: usize) -> u32 {
    let by_budget = (budget / sector_size.max(1)) as u32;
    let count = requested.min(MAX_SECTORS_PER_IO).min(by_budget);
    if count < requested {
        debug!(requested, count, "transfer truncated");
    }
    count
}

/// BIOS drive type codes: 3 = fixed disk, 4 = removable, 5 = CD-ROM. The
/// get-parameters call predates CD-ROM types and only distinguishes fixed
/// from removable.
fn drive_type_for(drive_num: u32, distinguish_cdrom: bool) -> u32 {
    if distinguish_cdrom && drive_num >= 0xE0 {
        5
    } else if drive_num >= 0x80 {
        3
    } else {
        4
    }
}
