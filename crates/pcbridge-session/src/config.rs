//! Session configuration: guest memory size, feature flags, and boot media.

use std::path::PathBuf;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

pub const MEMORY_MB_MIN: u32 = 1;
pub const MEMORY_MB_MAX: u32 = 256;

bitflags! {
    /// Feature toggles negotiated with the guest at init.
    ///
    /// Serde impls come from the `serde` feature of `bitflags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct SessionFlags: u32 {
        const NETWORK = 1 << 0;
        const CLIPBOARD = 1 << 1;
        const CLIPBOARD_TO_HOST = 1 << 2;
        const CLIPBOARD_TO_GUEST = 1 << 3;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Guest memory in megabytes.
    pub memory_mb: u32,
    pub flags: SessionFlags,
    /// Fixed-disk image for slot 0 (the guest's C: drive).
    pub primary_disk: Option<PathBuf>,
    /// Fixed-disk image for slot 1.
    pub secondary_disk: Option<PathBuf>,
    pub cdrom: Option<PathBuf>,
    pub floppy: [Option<PathBuf>; 2],
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            memory_mb: 64,
            flags: SessionFlags::NETWORK
                | SessionFlags::CLIPBOARD
                | SessionFlags::CLIPBOARD_TO_HOST
                | SessionFlags::CLIPBOARD_TO_GUEST,
            primary_disk: None,
            secondary_disk: None,
            cdrom: None,
            floppy: [None, None],
        }
    }
}

impl SessionConfig {
    /// Checked before any session state is mutated, so a rejected start
    /// leaves the previous state intact.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.memory_mb < MEMORY_MB_MIN || self.memory_mb > MEMORY_MB_MAX {
            return Err(SessionError::InvalidConfig(format!(
                "memory_mb {} outside {}..={}",
                self.memory_mb, MEMORY_MB_MIN, MEMORY_MB_MAX
            )));
        }
        Ok(())
    }
}
