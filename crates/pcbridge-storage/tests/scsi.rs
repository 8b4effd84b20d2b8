use std::os::unix::fs::FileExt;

use pcbridge_protocol::payload::{scsi_status, CDB_LEN};
use pcbridge_storage::scsi::handle_command;
use pcbridge_storage::{MediaKind, StorageDevice};
use tempfile::NamedTempFile;

const MAX_DATA: usize = 64 * 1024;

fn make_iso(sectors: u64) -> NamedTempFile {
    let file = NamedTempFile::new().unwrap();
    file.as_file().set_len(sectors * 2048).unwrap();
    file.as_file().write_all_at(b"CD001", 16 * 2048 + 1).unwrap();
    file
}

fn open_iso(file: &NamedTempFile) -> StorageDevice {
    StorageDevice::open(file.path(), MediaKind::Optical, true).unwrap()
}

fn cdb(bytes: &[u8]) -> [u8; CDB_LEN] {
    let mut out = [0u8; CDB_LEN];
    out[..bytes.len()].copy_from_slice(bytes);
    out
}

#[test]
fn test_unit_ready_without_media_is_not_ready() {
    let outcome = handle_command(None, &cdb(&[0x00]), MAX_DATA).unwrap();
    assert_eq!(outcome.status, scsi_status::CHECK_CONDITION);
    let sense = outcome.sense.unwrap();
    assert_eq!(sense.key, 0x02, "sense key must be NOT READY");
    assert_eq!(sense.asc, 0x3A, "ASC must be MEDIUM NOT PRESENT");
}

#[test]
fn read_capacity_without_media_is_not_ready() {
    let outcome = handle_command(None, &cdb(&[0x25]), MAX_DATA).unwrap();
    assert_eq!(outcome.status, scsi_status::CHECK_CONDITION);
    let sense = outcome.sense.unwrap();
    assert_eq!((sense.key, sense.asc), (0x02, 0x3A));
}

#[test]
fn test_unit_ready_with_media_is_good() {
    let iso = make_iso(20);
    let dev = open_iso(&iso);
    let outcome = handle_command(Some(&dev), &cdb(&[0x00]), MAX_DATA).unwrap();
    assert_eq!(outcome.status, scsi_status::GOOD);
    assert!(outcome.sense.is_none());
}

#[test]
fn read_capacity_reports_last_lba_big_endian() {
    let iso = make_iso(20);
    let dev = open_iso(&iso);
    let outcome = handle_command(Some(&dev), &cdb(&[0x25]), MAX_DATA).unwrap();
    assert_eq!(outcome.status, scsi_status::GOOD);
    assert_eq!(outcome.data.len(), 8);
    assert_eq!(u32::from_be_bytes(outcome.data[..4].try_into().unwrap()), 19);
    assert_eq!(
        u32::from_be_bytes(outcome.data[4..].try_into().unwrap()),
        2048
    );
}

#[test]
fn inquiry_identifies_a_cdrom_and_honors_allocation_length() {
    let full = handle_command(None, &cdb(&[0x12, 0, 0, 0, 36]), MAX_DATA).unwrap();
    assert_eq!(full.status, scsi_status::GOOD);
    assert_eq!(full.data.len(), 36);
    assert_eq!(full.data[0], 0x05);
    assert_eq!(full.data[1], 0x80);
    assert_eq!(&full.data[8..16], b"PCBRIDGE");

    let short = handle_command(None, &cdb(&[0x12, 0, 0, 0, 20]), MAX_DATA).unwrap();
    assert_eq!(short.data.len(), 20);
    assert_eq!(short.data[..20], full.data[..20]);
}

#[test]
fn read_toc_places_lead_out_at_media_end() {
    let iso = make_iso(333);
    let dev = open_iso(&iso);
    let outcome = handle_command(Some(&dev), &cdb(&[0x43, 0, 0, 0, 0, 0, 0, 0xFF, 0xFF]), MAX_DATA)
        .unwrap();
    assert_eq!(outcome.status, scsi_status::GOOD);
    assert_eq!(outcome.data.len(), 20);
    // Header: length 18, track 1..1.
    assert_eq!(&outcome.data[..4], &[0, 18, 1, 1]);
    // Track 1 descriptor: data track, start 0.
    assert_eq!(outcome.data[5], 0x14);
    assert_eq!(outcome.data[6], 1);
    // Lead-out at the last sector, big-endian.
    assert_eq!(outcome.data[14], 0xAA);
    assert_eq!(
        u32::from_be_bytes(outcome.data[16..20].try_into().unwrap()),
        333
    );
}

#[test]
fn read_toc_honors_two_byte_allocation_length() {
    let iso = make_iso(20);
    let dev = open_iso(&iso);
    let outcome =
        handle_command(Some(&dev), &cdb(&[0x43, 0, 0, 0, 0, 0, 0, 0, 4]), MAX_DATA).unwrap();
    assert_eq!(outcome.data.len(), 4);
}

#[test]
fn read_toc_rejects_unknown_format() {
    let iso = make_iso(20);
    let dev = open_iso(&iso);
    let outcome =
        handle_command(Some(&dev), &cdb(&[0x43, 0, 0x05, 0, 0, 0, 0, 0xFF, 0xFF]), MAX_DATA)
            .unwrap();
    assert_eq!(outcome.status, scsi_status::CHECK_CONDITION);
    assert_eq!(outcome.sense.unwrap().asc, 0x24);
}

#[test]
fn mode_sense_returns_capabilities_page() {
    // MODE SENSE(6), page 0x2A.
    let outcome = handle_command(None, &cdb(&[0x1A, 0, 0x2A, 0, 0xFF]), MAX_DATA).unwrap();
    assert_eq!(outcome.status, scsi_status::GOOD);
    assert_eq!(outcome.data[2], 0x80, "write-protect bit");
    assert_eq!(outcome.data[4], 0x2A, "page code after 4-byte header");

    // MODE SENSE(10) has an 8-byte header.
    let outcome =
        handle_command(None, &cdb(&[0x5A, 0, 0x2A, 0, 0, 0, 0, 0xFF, 0xFF]), MAX_DATA).unwrap();
    assert_eq!(outcome.data[3], 0x80);
    assert_eq!(outcome.data[8], 0x2A);

    // "All pages" also returns the capabilities page.
    let outcome = handle_command(None, &cdb(&[0x1A, 0, 0x3F, 0, 0xFF]), MAX_DATA).unwrap();
    assert_eq!(outcome.data[4], 0x2A);
}

#[test]
fn mode_sense_unknown_page_is_illegal_request() {
    let outcome = handle_command(None, &cdb(&[0x1A, 0, 0x1C, 0, 0xFF]), MAX_DATA).unwrap();
    assert_eq!(outcome.status, scsi_status::CHECK_CONDITION);
    let sense = outcome.sense.unwrap();
    assert_eq!((sense.key, sense.asc), (0x05, 0x20));
}

#[test]
fn read_10_returns_sector_data() {
    let iso = make_iso(20);
    let pattern = [0x7Eu8; 2048];
    iso.as_file().write_all_at(&pattern, 3 * 2048).unwrap();
    let dev = open_iso(&iso);

    let outcome = handle_command(
        Some(&dev),
        &cdb(&[0x28, 0, 0, 0, 0, 3, 0, 0, 1]),
        MAX_DATA,
    )
    .unwrap();
    assert_eq!(outcome.status, scsi_status::GOOD);
    assert_eq!(outcome.data, pattern);
}

#[test]
fn read_12_uses_the_wide_count_field() {
    let iso = make_iso(20);
    let dev = open_iso(&iso);
    let outcome = handle_command(
        Some(&dev),
        &cdb(&[0xA8, 0, 0, 0, 0, 0x05, 0, 0, 0, 2]),
        MAX_DATA,
    )
    .unwrap();
    assert_eq!(outcome.status, scsi_status::GOOD);
    assert_eq!(outcome.data.len(), 2 * 2048);
}

#[test]
fn read_past_media_end_is_lba_out_of_range() {
    let iso = make_iso(20);
    let dev = open_iso(&iso);
    let outcome = handle_command(
        Some(&dev),
        &cdb(&[0x28, 0, 0, 0, 0, 19, 0, 0, 2]),
        MAX_DATA,
    )
    .unwrap();
    assert_eq!(outcome.status, scsi_status::CHECK_CONDITION);
    let sense = outcome.sense.unwrap();
    assert_eq!((sense.key, sense.asc), (0x05, 0x21));
}

#[test]
fn reads_truncate_to_the_data_budget() {
    let iso = make_iso(20);
    let dev = open_iso(&iso);
    let outcome = handle_command(
        Some(&dev),
        &cdb(&[0x28, 0, 0, 0, 0, 0, 0, 0, 8]),
        3 * 2048,
    )
    .unwrap();
    assert_eq!(outcome.status, scsi_status::GOOD);
    assert_eq!(outcome.data.len(), 3 * 2048);
}

#[test]
fn request_sense_reports_no_sense() {
    let outcome = handle_command(None, &cdb(&[0x03, 0, 0, 0, 18]), MAX_DATA).unwrap();
    assert_eq!(outcome.status, scsi_status::GOOD);
    assert_eq!(outcome.data.len(), 18);
    assert_eq!(outcome.data[0], 0x70);
    assert_eq!(outcome.data[2], 0x00);
}

#[test]
fn unsupported_opcode_is_invalid_command() {
    let iso = make_iso(20);
    let dev = open_iso(&iso);
    for opcode in [0xBEu8, 0x46, 0x4A, 0x51, 0xFF] {
        let outcome = handle_command(Some(&dev), &cdb(&[opcode]), MAX_DATA).unwrap();
        assert_eq!(outcome.status, scsi_status::CHECK_CONDITION);
        let sense = outcome.sense.unwrap();
        assert_eq!((sense.key, sense.asc), (0x05, 0x20), "opcode {opcode:#x}");
    }
}
