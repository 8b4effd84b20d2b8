//! Backing-image handling: validation on mount, geometry, sector I/O, and
//! the per-session drive-slot table.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

use tracing::{debug, warn};

use pcbridge_protocol::consts::drive;
use pcbridge_protocol::MSG_MAGIC;

use crate::error::{Result, StorageError};
use crate::geometry::{
    disk_geometry, floppy_geometry, Geometry, FLOPPY_SIZES, SECTOR_SIZE_DISK, SECTOR_SIZE_OPTICAL,
};

/// Native disk images carry the protocol magic at this offset.
pub const DISK_IMAGE_MAGIC: u32 = MSG_MAGIC;
const DISK_IMAGE_MAGIC_OFFSET: u64 = 12;

const ISO9660_MAGIC: &[u8; 5] = b"CD001";
/// Sector 16, offset 1: the ISO-9660 primary volume descriptor identifier.
const ISO9660_MAGIC_OFFSET: u64 = 16 * 2048 + 1;

const MBR_SIGNATURE_OFFSET: u64 = 510;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    FixedDisk,
    Floppy,
    Optical,
}

impl MediaKind {
    pub fn sector_size(self) -> u32 {
        match self {
            MediaKind::FixedDisk | MediaKind::Floppy => SECTOR_SIZE_DISK,
            MediaKind::Optical => SECTOR_SIZE_OPTICAL,
        }
    }

    /// Optical media is always write protected.
    pub fn forces_read_only(self) -> bool {
        matches!(self, MediaKind::Optical)
    }
}

/// One mounted image file.
#[derive(Debug)]
pub struct StorageDevice {
    file: File,
    size: u64,
    sector_size: u32,
    geometry: Geometry,
    total_sectors: u64,
    read_only: bool,
    kind: MediaKind,
}

impl StorageDevice {
    /// Open and validate a backing image. Validation failure aborts the
    /// mount without touching any existing state.
    pub fn open(path: &Path, kind: MediaKind, read_only: bool) -> Result<Self> {
        let read_only = read_only || kind.forces_read_only();
        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(path)?;
        let size = file.metadata()?.len();

        match kind {
            MediaKind::Optical => validate_iso9660(&file, size)?,
            MediaKind::Floppy => validate_floppy(size)?,
            MediaKind::FixedDisk => validate_disk(&file, size, path)?,
        }

        let sector_size = kind.sector_size();
        let total_sectors = size / u64::from(sector_size);
        let geometry = match kind {
            MediaKind::Floppy => floppy_geometry(size),
            _ => disk_geometry(total_sectors, sector_size),
        };

        debug!(
            path = %path.display(),
            ?kind,
            size,
            cylinders = geometry.cylinders,
            heads = geometry.heads,
            sectors = geometry.sectors,
            "mounted image"
        );

        Ok(Self {
            file,
            size,
            sector_size,
            geometry,
            total_sectors,
            read_only,
            kind,
        })
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn sector_size(&self) -> u32 {
        self.sector_size
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn total_sectors(&self) -> u64 {
        self.total_sectors
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    fn check_range(&self, lba: u64, count: u32) -> Result<()> {
        let end = lba.checked_add(u64::from(count));
        match end {
            Some(end) if end <= self.total_sectors => Ok(()),
            _ => Err(StorageError::OutOfRange {
                lba,
                count,
                total: self.total_sectors,
            }),
        }
    }

    /// Read `count` whole sectors starting at `lba`. The range is checked
    /// before the backing file is touched.
    pub fn read_sectors(&self, lba: u64, count: u32) -> Result<Vec<u8>> {
        self.check_range(lba, count)?;
        let len = count as usize * self.sector_size as usize;
        let mut buf = vec![0u8; len];
        self.file
            .read_exact_at(&mut buf, lba * u64::from(self.sector_size))?;
        Ok(buf)
    }

    /// Write `count` whole sectors starting at `lba` from the front of
    /// `data`.
    pub fn write_sectors(&self, lba: u64, count: u32, data: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(StorageError::ReadOnly);
        }
        self.check_range(lba, count)?;
        let len = count as usize * self.sector_size as usize;
        if data.len() < len {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "write buffer shorter than the sector count",
            )));
        }
        self.file
            .write_all_at(&data[..len], lba * u64::from(self.sector_size))?;
        Ok(())
    }

    /// Range check only; image files have no surface to actually verify.
    pub fn verify_sectors(&self, lba: u64, count: u32) -> Result<()> {
        self.check_range(lba, count)
    }
}

fn validate_iso9660(file: &File, size: u64) -> Result<()> {
    // The signature lives in sector 16; anything shorter cannot be an ISO.
    if size < 17 * u64::from(SECTOR_SIZE_OPTICAL) {
        return Err(StorageError::InvalidImageFormat(
            "image too small for ISO-9660",
        ));
    }
    let mut sig = [0u8; ISO9660_MAGIC.len()];
    file.read_exact_at(&mut sig, ISO9660_MAGIC_OFFSET)?;
    if &sig != ISO9660_MAGIC {
        return Err(StorageError::InvalidImageFormat(
            "missing ISO-9660 CD001 signature",
        ));
    }
    Ok(())
}

fn validate_floppy(size: u64) -> Result<()> {
    if FLOPPY_SIZES.contains(&size) {
        Ok(())
    } else {
        Err(StorageError::InvalidImageFormat(
            "size does not match any floppy format",
        ))
    }
}

fn validate_disk(file: &File, size: u64, path: &Path) -> Result<()> {
    if size < u64::from(SECTOR_SIZE_DISK) {
        return Err(StorageError::InvalidImageFormat(
            "disk image smaller than one sector",
        ));
    }

    let mut head = [0u8; 16];
    file.read_exact_at(&mut head, 0)?;
    let magic = u32::from_le_bytes([
        head[DISK_IMAGE_MAGIC_OFFSET as usize],
        head[DISK_IMAGE_MAGIC_OFFSET as usize + 1],
        head[DISK_IMAGE_MAGIC_OFFSET as usize + 2],
        head[DISK_IMAGE_MAGIC_OFFSET as usize + 3],
    ]);
    if magic == DISK_IMAGE_MAGIC {
        return Ok(());
    }

    if size >= MBR_SIGNATURE_OFFSET + 2 {
        let mut sig = [0u8; 2];
        file.read_exact_at(&mut sig, MBR_SIGNATURE_OFFSET)?;
        if sig == [0x55, 0xAA] {
            return Ok(());
        }
    }

    // Some perfectly usable raw images carry neither marker.
    warn!(
        path = %path.display(),
        "disk image has no native or MBR signature, mounting anyway"
    );
    Ok(())
}

/// The session's drive slots: two fixed disks, two floppies, one CD-ROM.
#[derive(Debug, Default)]
pub struct DriveSet {
    disks: [Option<StorageDevice>; 2],
    floppies: [Option<StorageDevice>; 2],
    optical: Option<StorageDevice>,
}

impl DriveSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mount_disk(&mut self, slot: u32, path: &Path, read_only: bool) -> Result<u32> {
        let idx = usize::try_from(slot)
            .ok()
            .filter(|&s| s < 2)
            .ok_or(StorageError::InvalidSlot(slot))?;
        let device = StorageDevice::open(path, MediaKind::FixedDisk, read_only)?;
        self.disks[idx] = Some(device);
        Ok(drive::DISK_0 + slot)
    }

    /// Unmounting an empty slot is not an error.
    pub fn unmount_disk(&mut self, slot: u32) -> Result<u32> {
        let idx = usize::try_from(slot)
            .ok()
            .filter(|&s| s < 2)
            .ok_or(StorageError::InvalidSlot(slot))?;
        self.disks[idx] = None;
        Ok(drive::DISK_0 + slot)
    }

    pub fn mount_floppy(&mut self, slot: u32, path: &Path) -> Result<u32> {
        let idx = usize::try_from(slot)
            .ok()
            .filter(|&s| s < 2)
            .ok_or(StorageError::InvalidSlot(slot))?;
        let device = StorageDevice::open(path, MediaKind::Floppy, false)?;
        self.floppies[idx] = Some(device);
        Ok(slot)
    }

    pub fn eject_floppy(&mut self, slot: u32) -> Result<u32> {
        let idx = usize::try_from(slot)
            .ok()
            .filter(|&s| s < 2)
            .ok_or(StorageError::InvalidSlot(slot))?;
        self.floppies[idx] = None;
        Ok(slot)
    }

    pub fn mount_optical(&mut self, path: &Path) -> Result<u32> {
        let device = StorageDevice::open(path, MediaKind::Optical, true)?;
        self.optical = Some(device);
        Ok(drive::CDROM)
    }

    pub fn eject_optical(&mut self) -> u32 {
        self.optical = None;
        drive::CDROM
    }

    pub fn optical(&self) -> Option<&StorageDevice> {
        self.optical.as_ref()
    }

    /// Resolve a guest drive number to its mounted device, if any.
    pub fn device_for(&self, drive_num: u32) -> Option<&StorageDevice> {
        match drive_num {
            drive::FLOPPY_A | drive::FLOPPY_B => {
                self.floppies[drive_num as usize].as_ref()
            }
            drive::DISK_0 | drive::DISK_1 => {
                self.disks[(drive_num - drive::DISK_0) as usize].as_ref()
            }
            drive::CDROM => self.optical.as_ref(),
            _ => None,
        }
    }

    /// Drop every mounted device. Used on session teardown.
    pub fn clear(&mut self) {
        self.disks = [None, None];
        self.floppies = [None, None];
        self.optical = None;
    }
}
