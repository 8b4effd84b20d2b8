use std::os::unix::fs::FileExt;

use pcbridge_protocol::consts::bios_status;
use pcbridge_protocol::nt::{
    cmd, drive_num, rsp, NtDiskRequest, NtDiskResponse, NtScsiRequest, NtTransfer,
};
use pcbridge_protocol::payload::{DriveParams, CDB_LEN};
use pcbridge_session::nt_disk::handle_request;
use pcbridge_session::SessionError;
use pcbridge_storage::DriveSet;
use tempfile::NamedTempFile;

fn nt_request(command: u8, drive: u8, trailer: &[u8]) -> Vec<u8> {
    let mut req = NtDiskRequest {
        drive_type: 0,
        command,
        size_hi: 0,
        size_lo: 0,
        drive_num: drive,
    }
    .encode();
    req.extend_from_slice(trailer);
    req
}

fn test_drives() -> (DriveSet, NamedTempFile) {
    let image = NamedTempFile::new().unwrap();
    image.as_file().set_len(1024 * 1024).unwrap();
    image.as_file().write_all_at(&[0x55, 0xAA], 510).unwrap();
    let mut drives = DriveSet::new();
    drives.mount_disk(0, image.path(), false).unwrap();
    (drives, image)
}

#[test]
fn nt_read_round_trips_to_a_canonical_read() {
    let (drives, image) = test_drives();
    let pattern = [0x6Bu8; 512];
    image.as_file().write_all_at(&pattern, 50 * 512).unwrap();

    let trailer = NtTransfer { lba: 50, count: 1 }.encode();
    let request = nt_request(cmd::READ, drive_num::DISK_C, &trailer);
    let response = handle_request(&drives, &request).unwrap();

    let (header, data) = NtDiskResponse::decode(&response).unwrap();
    assert_eq!(header.response_type, rsp::DISK_READ);
    assert_eq!(header.command, cmd::READ);
    assert_eq!(header.error_code, 0);
    assert_eq!(header.count, 1);
    assert_eq!(header.size_words, 256);
    assert_eq!(data, pattern);
}

#[test]
fn nt_read_of_lba_zero_reaches_the_first_sector() {
    let (drives, image) = test_drives();
    let pattern = [0x11u8; 512];
    image.as_file().write_all_at(&pattern, 0).unwrap();

    let trailer = NtTransfer { lba: 0, count: 1 }.encode();
    let request = nt_request(cmd::READ, drive_num::DISK_C, &trailer);
    let response = handle_request(&drives, &request).unwrap();

    let (header, data) = NtDiskResponse::decode(&response).unwrap();
    assert_eq!(header.error_code, 0);
    assert_eq!(data, pattern);
}

#[test]
fn nt_write_then_read_back() {
    let (drives, _image) = test_drives();
    let payload = vec![0xEEu8; 512];

    let mut trailer = NtTransfer { lba: 9, count: 1 }.encode();
    trailer.extend_from_slice(&payload);
    let request = nt_request(cmd::WRITE, drive_num::DISK_C, &trailer);
    let response = handle_request(&drives, &request).unwrap();
    let (header, data) = NtDiskResponse::decode(&response).unwrap();
    assert_eq!(header.response_type, rsp::DISK_READ);
    assert_eq!(header.count, 1);
    assert!(data.is_empty());

    let trailer = NtTransfer { lba: 9, count: 1 }.encode();
    let request = nt_request(cmd::READ, drive_num::DISK_C, &trailer);
    let response = handle_request(&drives, &request).unwrap();
    let (_, data) = NtDiskResponse::decode(&response).unwrap();
    assert_eq!(data, payload);
}

#[test]
fn nt_get_params_carries_the_drive_geometry() {
    let (drives, _image) = test_drives();
    let geo = drives.device_for(0x80).unwrap().geometry();

    let request = nt_request(cmd::GET_PARAMS, drive_num::DISK_C, &[]);
    let response = handle_request(&drives, &request).unwrap();
    let (header, data) = NtDiskResponse::decode(&response).unwrap();
    assert_eq!(header.response_type, rsp::GET_PARAMS);
    let params = DriveParams::decode(data).unwrap();
    assert_eq!(params.cylinders, geo.cylinders);
    assert_eq!(params.heads, geo.heads);
    assert_eq!(params.sectors, geo.sectors);
}

#[test]
fn nt_request_for_unmounted_drive_is_an_nt_error() {
    let (drives, _image) = test_drives();
    let trailer = NtTransfer { lba: 1, count: 1 }.encode();
    let request = nt_request(cmd::READ, drive_num::DISK_D, &trailer);
    let response = handle_request(&drives, &request).unwrap();
    let (header, _) = NtDiskResponse::decode(&response).unwrap();
    assert_eq!(header.response_type, rsp::ERROR);
    assert_eq!(u32::from(header.error_code), bios_status::NO_MEDIA);
}

#[test]
fn nt_unknown_drive_number_is_rejected() {
    let (drives, _image) = test_drives();
    let request = nt_request(cmd::READ, 7, &NtTransfer { lba: 1, count: 1 }.encode());
    assert!(matches!(
        handle_request(&drives, &request),
        Err(SessionError::Unsupported)
    ));
}

#[test]
fn nt_unsupported_command_is_rejected() {
    let (drives, _image) = test_drives();
    let request = nt_request(cmd::MEDIA_INFO, drive_num::DISK_C, &[]);
    assert!(matches!(
        handle_request(&drives, &request),
        Err(SessionError::Unsupported)
    ));
}

#[test]
fn nt_scsi_inquiry_reaches_the_cdrom_emulation() {
    let (mut drives, _image) = test_drives();
    let iso = NamedTempFile::new().unwrap();
    iso.as_file().set_len(20 * 2048).unwrap();
    iso.as_file().write_all_at(b"CD001", 16 * 2048 + 1).unwrap();
    drives.mount_optical(iso.path()).unwrap();

    let mut cdb = [0u8; CDB_LEN];
    cdb[0] = 0x12; // INQUIRY
    cdb[4] = 36;
    let sub = NtScsiRequest {
        cdb_len: 6,
        xfer_in_len: 36,
        xfer_out_len: 0,
        cdb,
    };
    let request = nt_request(cmd::SCSI, drive_num::CDROM, &sub.encode());
    let response = handle_request(&drives, &request).unwrap();
    let (header, data) = NtDiskResponse::decode(&response).unwrap();
    assert_eq!(header.response_type, rsp::SCSI);
    assert_eq!(header.error_code, 0);
    assert_eq!(data.len(), 36);
    assert_eq!(data[0], 0x05, "peripheral type must be CD-ROM");
}

#[test]
fn nt_scsi_failure_maps_to_the_undefined_error_code() {
    let (drives, _image) = test_drives();
    // TEST UNIT READY with no media mounted.
    let sub = NtScsiRequest {
        cdb_len: 6,
        xfer_in_len: 0,
        xfer_out_len: 0,
        cdb: [0u8; CDB_LEN],
    };
    let request = nt_request(cmd::SCSI, drive_num::CDROM, &sub.encode());
    let response = handle_request(&drives, &request).unwrap();
    let (header, _) = NtDiskResponse::decode(&response).unwrap();
    assert_eq!(header.response_type, rsp::ERROR);
    assert_eq!(u32::from(header.error_code), bios_status::UNDEFINED);
}
