//! CHS geometry arithmetic.
//!
//! The guest BIOS addresses disks by cylinder/head/sector; everything on
//! the host side is a linear block address. Fixed-disk geometry is derived
//! from capacity with the classic heads-escalation table; floppies use a
//! lookup keyed by exact image size.

/// Bytes per sector for fixed disks and floppies.
pub const SECTOR_SIZE_DISK: u32 = 512;
/// Bytes per sector for optical media.
pub const SECTOR_SIZE_OPTICAL: u32 = 2048;

/// BIOS CHS cylinder limit.
pub const CHS_CYLINDER_LIMIT: u32 = 1024;

/// Image sizes accepted as floppy media, smallest to largest
/// (160 KB 5.25" SS/DD through 2.88 MB 3.5" ED).
pub const FLOPPY_SIZES: [u64; 8] = [
    163_840, 184_320, 327_680, 368_640, 737_280, 1_228_800, 1_474_560, 2_949_120,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub cylinders: u32,
    pub heads: u32,
    /// Sectors per track.
    pub sectors: u32,
}

impl Geometry {
    /// Total sectors addressable through CHS with this geometry.
    pub fn chs_capacity(&self) -> u64 {
        u64::from(self.cylinders) * u64::from(self.heads) * u64::from(self.sectors)
    }

    /// Convert a 1-based-sector CHS address to an LBA. A sector of 0 is a
    /// guest bug; the wrapped result lands far outside the device and is
    /// rejected by the bounds check downstream.
    pub fn chs_to_lba(&self, cylinder: u32, head: u32, sector: u32) -> u64 {
        ((u64::from(cylinder) * u64::from(self.heads) + u64::from(head))
            * u64::from(self.sectors))
        .wrapping_add(u64::from(sector).wrapping_sub(1))
    }

    /// Inverse of [`Self::chs_to_lba`] for addresses within
    /// [`Self::chs_capacity`].
    pub fn lba_to_chs(&self, lba: u64) -> (u32, u32, u32) {
        let spt = u64::from(self.sectors);
        let heads = u64::from(self.heads);
        let sector = (lba % spt) + 1;
        let track = lba / spt;
        let head = track % heads;
        let cylinder = track / heads;
        (cylinder as u32, head as u32, sector as u32)
    }
}

/// Geometry for a floppy image, keyed by exact byte size. Sizes without a
/// dedicated entry fall back to 1.44 MB geometry.
pub fn floppy_geometry(size: u64) -> Geometry {
    match size {
        // 1.44 MB - 3.5" HD
        1_474_560 => Geometry {
            cylinders: 80,
            heads: 2,
            sectors: 18,
        },
        // 1.2 MB - 5.25" HD
        1_228_800 => Geometry {
            cylinders: 80,
            heads: 2,
            sectors: 15,
        },
        // 720 KB - 3.5" DD
        737_280 => Geometry {
            cylinders: 80,
            heads: 2,
            sectors: 9,
        },
        // 360 KB - 5.25" DD
        368_640 => Geometry {
            cylinders: 40,
            heads: 2,
            sectors: 9,
        },
        // 160 KB - 5.25" SS
        163_840 => Geometry {
            cylinders: 40,
            heads: 1,
            sectors: 8,
        },
        _ => Geometry {
            cylinders: 80,
            heads: 2,
            sectors: 18,
        },
    }
}

/// Geometry for a fixed disk or optical image: 63 sectors per track, heads
/// escalated by capacity bracket, cylinders derived and clamped to the CHS
/// limit.
pub fn disk_geometry(total_sectors: u64, sector_size: u32) -> Geometry {
    let size_mb = total_sectors * u64::from(sector_size) / (1024 * 1024);
    let sectors = 63u32;
    let heads = if size_mb <= 504 {
        16
    } else if size_mb <= 1008 {
        32
    } else if size_mb <= 2016 {
        64
    } else if size_mb <= 4032 {
        128
    } else {
        255
    };
    let cylinders =
        u32::try_from(total_sectors / (u64::from(heads) * u64::from(sectors)))
            .unwrap_or(CHS_CYLINDER_LIMIT)
            .min(CHS_CYLINDER_LIMIT);
    Geometry {
        cylinders,
        heads,
        sectors,
    }
}
