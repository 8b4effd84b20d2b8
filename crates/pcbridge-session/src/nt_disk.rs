//! Adaptation between the NT driver family's fixed-offset disk requests and
//! the canonical storage handlers.
//!
//! Pure translation: parse the 5-byte header and command trailer, run the
//! canonical BIOS or SCSI handler, and re-frame the result with the NT
//! response-type codes. No state lives here.

use tracing::debug;

use pcbridge_protocol::consts::{bios_status, drive, storage_cmd};
use pcbridge_protocol::nt::{self, NtDiskRequest, NtDiskResponse, NtScsiRequest, NtTransfer};
use pcbridge_protocol::payload::{scsi_status, StorageRequest};
use pcbridge_protocol::MAX_PAYLOAD;

use pcbridge_storage::bios;
use pcbridge_storage::scsi;
use pcbridge_storage::DriveSet;

use crate::error::SessionError;

/// Data budget for one NT response, bounded by what fits in a frame after
/// the NT response header.
const NT_DATA_BUDGET: usize = MAX_PAYLOAD - NtDiskResponse::SIZE;

fn bios_drive(drive_num: u8) -> Option<u32> {
    match drive_num {
        nt::drive_num::FLOPPY_A => Some(drive::FLOPPY_A),
        nt::drive_num::FLOPPY_B => Some(drive::FLOPPY_B),
        nt::drive_num::DISK_C => Some(drive::DISK_0),
        nt::drive_num::DISK_D => Some(drive::DISK_1),
        nt::drive_num::CDROM => Some(drive::CDROM),
        _ => None,
    }
}

/// Canonical storage request for an NT transfer. LBA 0 cannot be expressed
/// through the extended fields (both-zero selects CHS addressing), so it is
/// carried as cylinder 0, head 0, sector 1.
fn transfer_request(drive: u32, command: u16, xfer: NtTransfer) -> StorageRequest {
    let mut req = StorageRequest {
        drive,
        command: u32::from(command),
        count: u32::from(xfer.count),
        ..Default::default()
    };
    if xfer.lba == 0 {
        req.sector = 1;
    } else {
        req.lba_lo = xfer.lba;
    }
    req
}

fn error_response(command: u8, bios_status: u32) -> Vec<u8> {
    NtDiskResponse {
        command,
        response_type: nt::rsp::ERROR,
        error_code: bios_status as u8,
        ..Default::default()
    }
    .encode_with_data(&[])
}

/// Handle one NT-format disk request against the drive set, returning the
/// NT-framed response bytes. `Err` is reserved for malformed requests and
/// failing backing files; guest-visible errors ride the NT error response.
pub fn handle_request(drives: &DriveSet, request: &[u8]) -> Result<Vec<u8>, SessionError> {
    let (header, trailer) = NtDiskRequest::decode(request)?;
    let Some(drive) = bios_drive(header.drive_num) else {
        debug!(drive_num = header.drive_num, "NT request for unknown drive");
        return Err(SessionError::Unsupported);
    };

    match header.command {
        nt::cmd::READ => {
            let (xfer, _) = NtTransfer::decode(trailer)?;
            let req = transfer_request(drive, storage_cmd::READ, xfer);
            let outcome = bios::handle_request(drives, &req, &[], NT_DATA_BUDGET)?;
            if outcome.status == bios_status::OK {
                Ok(NtDiskResponse {
                    command: header.command,
                    response_type: nt::rsp::DISK_READ,
                    size_words: (outcome.data.len() / 2) as u16,
                    count: outcome.count as u8,
                    ..Default::default()
                }
                .encode_with_data(&outcome.data))
            } else {
                Ok(error_response(header.command, outcome.status))
            }
        }

        nt::cmd::WRITE => {
            let (xfer, write_data) = NtTransfer::decode(trailer)?;
            let req = transfer_request(drive, storage_cmd::WRITE, xfer);
            let outcome = bios::handle_request(drives, &req, write_data, NT_DATA_BUDGET)?;
            if outcome.status == bios_status::OK {
                // Write success reuses the read response type; there is no
                // data to carry back.
                Ok(NtDiskResponse {
                    command: header.command,
                    response_type: nt::rsp::DISK_READ,
                    count: outcome.count as u8,
                    ..Default::default()
                }
                .encode_with_data(&[]))
            } else {
                Ok(error_response(header.command, outcome.status))
            }
        }

        nt::cmd::GET_PARAMS => {
            let req = StorageRequest {
                drive,
                command: u32::from(storage_cmd::GET_PARAMS),
                ..Default::default()
            };
            let outcome = bios::handle_request(drives, &req, &[], NT_DATA_BUDGET)?;
            if outcome.status == bios_status::OK {
                Ok(NtDiskResponse {
                    command: header.command,
                    response_type: nt::rsp::GET_PARAMS,
                    size_words: (outcome.data.len() / 2) as u16,
                    ..Default::default()
                }
                .encode_with_data(&outcome.data))
            } else {
                Ok(error_response(header.command, outcome.status))
            }
        }

        nt::cmd::SCSI => {
            let (sub, _) = NtScsiRequest::decode(trailer)?;
            let budget = (sub.xfer_in_len as usize).min(NT_DATA_BUDGET);
            let outcome = scsi::handle_command(drives.optical(), &sub.cdb, budget)?;
            if outcome.status == scsi_status::GOOD {
                Ok(NtDiskResponse {
                    command: header.command,
                    response_type: nt::rsp::SCSI,
                    size_words: (outcome.data.len() / 2) as u16,
                    count: (outcome.data.len() / 512) as u8,
                    ..Default::default()
                }
                .encode_with_data(&outcome.data))
            } else {
                Ok(error_response(header.command, bios_status::UNDEFINED))
            }
        }

        other => {
            debug!(command = other, "unsupported NT disk command");
            Err(SessionError::Unsupported)
        }
    }
}
