//! SCSI CDB pass-through for the optical drive.
//!
//! Emulates the slice of SPC-2/MMC-2 a read-only CD-ROM needs. Errors
//! travel to the guest as CHECK CONDITION status plus fixed-format sense
//! data — the guest's CD driver stack expects SCSI semantics, not
//! transport failures. Only a failing backing file escapes as `Err`.

use pcbridge_protocol::payload::{scsi_status, CDB_LEN, SENSE_LEN};

use crate::device::StorageDevice;
use crate::error::{Result, StorageError};
use crate::geometry::SECTOR_SIZE_OPTICAL;

// SPC-2/MMC-2 opcodes.
const TEST_UNIT_READY: u8 = 0x00;
const REQUEST_SENSE: u8 = 0x03;
const INQUIRY: u8 = 0x12;
const MODE_SENSE_6: u8 = 0x1A;
const PREVENT_ALLOW_REMOVAL: u8 = 0x1E;
const READ_CAPACITY: u8 = 0x25;
const READ_10: u8 = 0x28;
const READ_TOC: u8 = 0x43;
const GET_CONFIGURATION: u8 = 0x46;
const GET_EVENT_STATUS: u8 = 0x4A;
const READ_DISC_INFORMATION: u8 = 0x51;
const MODE_SENSE_10: u8 = 0x5A;
const READ_12: u8 = 0xA8;

// Sense keys.
const SENSE_NOT_READY: u8 = 0x02;
const SENSE_MEDIUM_ERROR: u8 = 0x03;
const SENSE_ILLEGAL_REQUEST: u8 = 0x05;

// Additional sense codes.
const ASC_INVALID_COMMAND: u8 = 0x20;
const ASC_LBA_OUT_OF_RANGE: u8 = 0x21;
const ASC_INVALID_FIELD_IN_CDB: u8 = 0x24;
const ASC_MEDIUM_NOT_PRESENT: u8 = 0x3A;
const ASC_UNRECOVERED_READ_ERROR: u8 = 0x11;

/// Sense triple reported with a CHECK CONDITION.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sense {
    pub key: u8,
    pub asc: u8,
    pub ascq: u8,
}

impl Sense {
    /// Fixed-format sense data (response code 0x70).
    pub fn to_fixed(self) -> [u8; SENSE_LEN] {
        let mut sense = [0u8; SENSE_LEN];
        sense[0] = 0x70;
        sense[2] = self.key;
        sense[7] = 10; // additional sense length
        sense[12] = self.asc;
        sense[13] = self.ascq;
        sense
    }
}

/// Result of one CDB: SCSI status, sense (for CHECK CONDITION), and any
/// data-in bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScsiOutcome {
    pub status: u8,
    pub sense: Option<Sense>,
    pub data: Vec<u8>,
}

impl ScsiOutcome {
    fn good(data: Vec<u8>) -> Self {
        Self {
            status: scsi_status::GOOD,
            sense: None,
            data,
        }
    }

    fn check(key: u8, asc: u8, ascq: u8) -> Self {
        Self {
            status: scsi_status::CHECK_CONDITION,
            sense: Some(Sense { key, asc, ascq }),
            data: Vec::new(),
        }
    }

    fn not_ready() -> Self {
        Self::check(SENSE_NOT_READY, ASC_MEDIUM_NOT_PRESENT, 0x01)
    }
}

/// Execute one CDB against the (possibly absent) optical device. `max_data`
/// bounds data-in transfers to what the response frame can carry.
pub fn handle_command(
    device: Option<&StorageDevice>,
    cdb: &[u8; CDB_LEN],
    max_data: usize,
) -> Result<ScsiOutcome> {
    let opcode = cdb[0];
    let outcome = match opcode {
        TEST_UNIT_READY => match device {
            Some(_) => ScsiOutcome::good(Vec::new()),
            None => ScsiOutcome::not_ready(),
        },

        REQUEST_SENSE => {
            // Sense is cleared after every command; report no-sense.
            let alloc = cdb[4] as usize;
            let sense = Sense {
                key: 0,
                asc: 0,
                ascq: 0,
            }
            .to_fixed();
            ScsiOutcome::good(sense[..alloc.min(sense.len())].to_vec())
        }

        INQUIRY => {
            let alloc = cdb[4] as usize;
            let data = inquiry_data();
            ScsiOutcome::good(data[..alloc.min(data.len())].to_vec())
        }

        READ_CAPACITY => match device {
            Some(dev) => {
                let last_lba = dev.total_sectors().saturating_sub(1) as u32;
                let mut data = vec![0u8; 8];
                data[..4].copy_from_slice(&last_lba.to_be_bytes());
                data[4..].copy_from_slice(&SECTOR_SIZE_OPTICAL.to_be_bytes());
                ScsiOutcome::good(data)
            }
            None => ScsiOutcome::not_ready(),
        },

        READ_10 => match device {
            Some(dev) => {
                let lba = u32::from_be_bytes([cdb[2], cdb[3], cdb[4], cdb[5]]);
                let count = u32::from(u16::from_be_bytes([cdb[7], cdb[8]]));
                read_blocks(dev, lba, count, max_data)?
            }
            None => ScsiOutcome::not_ready(),
        },

        READ_12 => match device {
            Some(dev) => {
                let lba = u32::from_be_bytes([cdb[2], cdb[3], cdb[4], cdb[5]]);
                let count = u32::from_be_bytes([cdb[6], cdb[7], cdb[8], cdb[9]]);
                read_blocks(dev, lba, count, max_data)?
            }
            None => ScsiOutcome::not_ready(),
        },

        READ_TOC => match device {
            Some(dev) => {
                let format = cdb[2] & 0x0F;
                if format != 0 && format != 2 {
                    ScsiOutcome::check(SENSE_ILLEGAL_REQUEST, ASC_INVALID_FIELD_IN_CDB, 0)
                } else {
                    let alloc = u16::from_be_bytes([cdb[7], cdb[8]]) as usize;
                    let toc = read_toc_data(dev);
                    ScsiOutcome::good(toc[..alloc.min(toc.len())].to_vec())
                }
            }
            None => ScsiOutcome::not_ready(),
        },

        MODE_SENSE_6 | MODE_SENSE_10 => {
            let is_10 = opcode == MODE_SENSE_10;
            let page_code = cdb[2] & 0x3F;
            let alloc = if is_10 {
                u16::from_be_bytes([cdb[7], cdb[8]]) as usize
            } else {
                cdb[4] as usize
            };
            match mode_sense_data(page_code, is_10) {
                Some(data) => ScsiOutcome::good(data[..alloc.min(data.len())].to_vec()),
                None => ScsiOutcome::check(SENSE_ILLEGAL_REQUEST, ASC_INVALID_COMMAND, 0),
            }
        }

        // Nothing to hold or release on an image file.
        PREVENT_ALLOW_REMOVAL => ScsiOutcome::good(Vec::new()),

        GET_CONFIGURATION | GET_EVENT_STATUS | READ_DISC_INFORMATION => {
            ScsiOutcome::check(SENSE_ILLEGAL_REQUEST, ASC_INVALID_COMMAND, 0)
        }

        _ => ScsiOutcome::check(SENSE_ILLEGAL_REQUEST, ASC_INVALID_COMMAND, 0),
    };
    Ok(outcome)
}

fn read_blocks(dev: &StorageDevice, lba: u32, count: u32, max_data: usize) -> Result<ScsiOutcome> {
    let end = u64::from(lba) + u64::from(count);
    if end > dev.total_sectors() {
        return Ok(ScsiOutcome::check(
            SENSE_ILLEGAL_REQUEST,
            ASC_LBA_OUT_OF_RANGE,
            0,
        ));
    }
    // Truncate to what fits the caller's data buffer.
    let count = count.min((max_data / SECTOR_SIZE_OPTICAL as usize) as u32);
    if count == 0 {
        return Ok(ScsiOutcome::good(Vec::new()));
    }
    match dev.read_sectors(u64::from(lba), count) {
        Ok(data) => Ok(ScsiOutcome::good(data)),
        Err(StorageError::Io(_)) => Ok(ScsiOutcome::check(
            SENSE_MEDIUM_ERROR,
            ASC_UNRECOVERED_READ_ERROR,
            0,
        )),
        Err(err) => Err(err),
    }
}

fn inquiry_data() -> [u8; 36] {
    let mut data = [0u8; 36];
    data[0] = 0x05; // peripheral device type: CD-ROM
    data[1] = 0x80; // removable media
    data[2] = 0x02; // SCSI-2
    data[3] = 0x02; // response data format
    data[4] = 31; // additional length
    write_scsi_ascii(&mut data[8..16], b"PCBRIDGE");
    write_scsi_ascii(&mut data[16..32], b"Virtual CDROM");
    write_scsi_ascii(&mut data[32..36], b"1.0");
    data
}

/// Single-session data disc: one track starting at LBA 0 plus the lead-out
/// at the last sector. All multi-byte fields are big-endian.
fn read_toc_data(dev: &StorageDevice) -> [u8; 20] {
    let lead_out = dev.total_sectors() as u32;
    let mut toc = [0u8; 20];
    toc[0..2].copy_from_slice(&18u16.to_be_bytes()); // length excluding this field
    toc[2] = 1; // first track
    toc[3] = 1; // last track

    // Track 1 descriptor: ADR=1, control=4 (data), start LBA 0.
    toc[5] = 0x14;
    toc[6] = 1;

    // Lead-out descriptor (track 0xAA).
    toc[13] = 0x14;
    toc[14] = 0xAA;
    toc[16..20].copy_from_slice(&lead_out.to_be_bytes());
    toc
}

fn mode_sense_data(page_code: u8, is_10: bool) -> Option<Vec<u8>> {
    if page_code != 0x2A && page_code != 0x3F {
        return None;
    }
    let page = capabilities_page();
    let mut out;
    if is_10 {
        out = vec![0u8; 8 + page.len()];
        let mode_len = (out.len() - 2) as u16;
        out[0..2].copy_from_slice(&mode_len.to_be_bytes());
        out[2] = 0x05; // medium type: CD-ROM data
        out[3] = 0x80; // write protected
        out[8..].copy_from_slice(&page);
    } else {
        out = vec![0u8; 4 + page.len()];
        out[0] = (out.len() - 1) as u8;
        out[1] = 0x05;
        out[2] = 0x80;
        out[4..].copy_from_slice(&page);
    }
    Some(out)
}

/// Mode page 0x2A: CD capabilities and mechanical status.
fn capabilities_page() -> [u8; 20] {
    let mut page = [0u8; 20];
    page[0] = 0x2A;
    page[1] = 18; // page length
    page[2] = 0x3B; // reads CD-R/CD-RW, method 2
    page[4] = 0x7F; // audio play, composite out
    page[5] = 0x03; // lock, eject
    page[6] = 0x29; // tray loader
    page[8..10].copy_from_slice(&0x1770u16.to_be_bytes()); // max speed ~40x
    page[10..12].copy_from_slice(&1u16.to_be_bytes()); // volume levels
    page[12..14].copy_from_slice(&128u16.to_be_bytes()); // buffer KB
    page[14..16].copy_from_slice(&0x1770u16.to_be_bytes()); // current speed
    page
}

fn write_scsi_ascii(dst: &mut [u8], src: &[u8]) {
    dst.fill(b' ');
    let len = src.len().min(dst.len());
    dst[..len].copy_from_slice(&src[..len]);
}
