use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors raised by the storage emulation layer.
///
/// Most of these never reach the guest as transport failures: the BIOS and
/// SCSI handlers translate them into status bytes or sense data. `Io` is
/// the exception — a failing backing file means the host environment cannot
/// service the request at all.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no media mounted")]
    NoMedia,

    #[error("invalid image format: {0}")]
    InvalidImageFormat(&'static str),

    #[error("sector range out of bounds: lba={lba} count={count} total={total}")]
    OutOfRange { lba: u64, count: u32, total: u64 },

    #[error("media is write protected")]
    ReadOnly,

    #[error("invalid drive slot {0}")]
    InvalidSlot(u32),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
