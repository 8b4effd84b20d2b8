//! Protocol constants shared by every layer of the bridge.

use std::time::Duration;

/// `b"PCBR"` as a little-endian `u32`. Present at the start of every frame;
/// anything else in that position is treated as corruption and resynced over.
pub const MSG_MAGIC: u32 = 0x5242_4350;

/// Maximum total frame size (header + payload).
pub const MAX_MSG_SIZE: usize = 64 * 1024;

/// Maximum payload carried by a single frame.
pub const MAX_PAYLOAD: usize = MAX_MSG_SIZE - crate::frame::HEADER_SIZE;

/// Dispatcher IDs. Each ID addresses one virtual-device endpoint on the
/// other side of the bridge.
pub mod dispatcher {
    pub const CORE: u16 = 0;
    pub const VGA: u16 = 1;
    pub const VIDEO: u16 = 2;
    pub const AUDIO: u16 = 3;
    pub const NETWORK: u16 = 4;
    pub const FSD: u16 = 5;
    pub const INPUT: u16 = 6;
    pub const CLIPBOARD: u16 = 7;
    pub const STORAGE: u16 = 8;

    /// One past the highest fixed dispatcher ID. IDs at or above this are
    /// only meaningful as channel handles.
    pub const COUNT: u16 = 9;
}

/// Response-level status codes (the `status` field of a response header).
pub mod status {
    pub const SUCCESS: u16 = 0;
    pub const ERROR: u16 = 1;
    pub const INVALID_COMMAND: u16 = 2;
    pub const INVALID_DISPATCHER: u16 = 3;
    pub const TIMEOUT: u16 = 4;
    pub const BUSY: u16 = 5;
}

/// Core dispatcher command codes.
pub mod core_cmd {
    pub const INIT: u16 = 0x0001;
    pub const SHUTDOWN: u16 = 0x0002;
    pub const PING: u16 = 0x0003;
    pub const GET_VERSION: u16 = 0x0004;
    pub const SET_FEATURES: u16 = 0x0005;
    pub const GET_FEATURES: u16 = 0x0006;

    pub const CHANNEL_CREATE: u16 = 0x0010;
    pub const CHANNEL_DELETE: u16 = 0x0011;
    pub const CHANNEL_BIND: u16 = 0x0012;
    pub const CHANNEL_UNBIND: u16 = 0x0013;
}

/// Storage dispatcher command codes (BIOS disk-service requests).
pub mod storage_cmd {
    pub const READ: u16 = 0x0001;
    pub const WRITE: u16 = 0x0002;
    pub const VERIFY: u16 = 0x0003;
    pub const FORMAT: u16 = 0x0004;
    pub const GET_PARAMS: u16 = 0x0005;
    pub const GET_TYPE: u16 = 0x0006;
    pub const RESET: u16 = 0x0007;
    pub const RECAL: u16 = 0x0008;
    pub const SEEK: u16 = 0x0009;
    pub const EJECT: u16 = 0x000A;
    pub const MOUNT: u16 = 0x000B;
    pub const UNMOUNT: u16 = 0x000C;
    pub const SCSI: u16 = 0x000D;
}

/// BIOS per-operation status bytes, carried in the payload of storage
/// responses. These are the guest driver's own error vocabulary; they are
/// never surfaced as transport errors.
pub mod bios_status {
    pub const OK: u32 = 0x00;
    pub const BAD_COMMAND: u32 = 0x01;
    pub const NOT_FOUND: u32 = 0x02;
    pub const WRITE_PROTECTED: u32 = 0x03;
    pub const SECTOR_NOT_FOUND: u32 = 0x04;
    pub const RESET_FAILED: u32 = 0x05;
    pub const MEDIA_CHANGED: u32 = 0x06;
    pub const DRIVE_PARAM_ERROR: u32 = 0x07;
    pub const NO_MEDIA: u32 = 0xAA;
    pub const UNDEFINED: u32 = 0xBB;
}

/// Guest drive numbers used in storage requests.
pub mod drive {
    pub const FLOPPY_A: u32 = 0x00;
    pub const FLOPPY_B: u32 = 0x01;
    pub const DISK_0: u32 = 0x80;
    pub const DISK_1: u32 = 0x81;
    pub const CDROM: u32 = 0xE0;
}

/// Doorbell register bits. The same bit assignments are used in both
/// directions of the bridge doorbell pair.
pub mod doorbell {
    pub const CMD_READY: u32 = 1 << 0;
    pub const RSP_READY: u32 = 1 << 1;
    pub const VGA_UPDATE: u32 = 1 << 2;
    pub const GUEST_RESET: u32 = 1 << 7;
}

/// Host protocol version sent in the init handshake (1.0).
pub const HOST_VERSION: u32 = 0x0001_0000;

/// Timeout for ordinary synchronous commands.
pub const CMD_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for the init handshake. The guest BIOS may still be bringing the
/// card up when the first init is sent.
pub const INIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum channel name length in UTF-16 code units.
pub const CHANNEL_NAME_MAX: usize = 64;

/// Channel flag bits (wire encoding; see the session crate for the typed
/// flags).
pub mod channel_flag {
    pub const EXCLUSIVE: u32 = 0x0001;
    pub const PERSISTENT: u32 = 0x0002;
}

/// Status values in a channel-create response payload.
pub mod channel_status {
    pub const OK: u32 = 0;
    pub const ERROR: u32 = 1;
    pub const UNKNOWN_NAME: u32 = 2;
    pub const ALREADY_EXISTS: u32 = 3;
    pub const NO_FREE_SLOTS: u32 = 4;
}
