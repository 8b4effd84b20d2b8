//! Virtual drive emulation backed by image files.
//!
//! The guest BIOS and its disk drivers see fixed disks, floppies, and a
//! CD-ROM; on the host side each is an ordinary image file. This crate
//! validates image formats on mount, computes the CHS geometry the BIOS
//! expects, performs bounds-checked sector I/O, and answers the two request
//! families the storage dispatcher carries:
//!
//! - [`bios`]: INT-13h-style read/write/verify/get-parameters requests
//! - [`scsi`]: SCSI CDB pass-through for the CD-ROM (INQUIRY, READ
//!   CAPACITY, READ TOC, MODE SENSE, READ(10)/(12), ...)
//!
//! Emulation-level failures are reported to the guest in its own
//! vocabulary — BIOS status bytes or SCSI sense data inside an otherwise
//! successful response. Only backing-file I/O failures surface as `Err`,
//! because they mean the host itself cannot service the request.

pub mod bios;
pub mod device;
pub mod error;
pub mod geometry;
pub mod scsi;

pub use device::{DriveSet, MediaKind, StorageDevice};
pub use error::{Result, StorageError};
pub use geometry::Geometry;
