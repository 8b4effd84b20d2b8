//! Session lifecycle: the state machine gating when the transport and the
//! emulators may be used.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use pcbridge_ipc::{DispatcherTable, Transport};
use pcbridge_protocol::consts::{core_cmd, dispatcher, storage_cmd, HOST_VERSION, INIT_TIMEOUT};
use pcbridge_protocol::payload::{CoreInit, CoreInitReply, DriveNotify, MountNotify};
use pcbridge_storage::DriveSet;

use crate::channel::ChannelRegistry;
use crate::config::SessionConfig;
use crate::dispatchers::{CoreDispatcher, StorageDispatcher};
use crate::error::SessionError;
use crate::nt_disk;

/// Media mount-notification flag bits.
pub mod mount_flag {
    pub const MEDIA_PRESENT: u32 = 1 << 0;
    pub const READ_ONLY: u32 = 1 << 1;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

/// What the guest reported in the init handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestInfo {
    pub version: u32,
    pub features: u32,
    pub shmem_size: u32,
    pub framebuffer_size: u32,
}

/// One virtual-machine instance on the host side.
///
/// Owns the drive slots, the channel registry, and the negotiated guest
/// state. All mutation happens through `&mut self`; callers hold the
/// session lock for the duration of a mutation and release it before any
/// timeout-bounded transport wait.
pub struct Session {
    state: SessionState,
    config: SessionConfig,
    transport: Option<Arc<Transport>>,
    drives: Arc<Mutex<DriveSet>>,
    channels: Arc<Mutex<ChannelRegistry>>,
    features: Arc<AtomicU32>,
    shutdown_requested: Arc<AtomicBool>,
    guest: Option<GuestInfo>,
    started_at: Option<Instant>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            state: SessionState::Stopped,
            config,
            transport: None,
            drives: Arc::new(Mutex::new(DriveSet::new())),
            channels: Arc::new(Mutex::new(ChannelRegistry::new())),
            features: Arc::new(AtomicU32::new(0)),
            shutdown_requested: Arc::new(AtomicBool::new(false)),
            guest: None,
            started_at: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn guest(&self) -> Option<GuestInfo> {
        self.guest
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Acquire)
    }

    pub fn uptime(&self) -> Duration {
        match (self.state, self.started_at) {
            (SessionState::Running, Some(at)) => at.elapsed(),
            _ => Duration::ZERO,
        }
    }

    /// Handler table for the inbound drain loop. The handlers share the
    /// session's registries, so one table stays valid across the session's
    /// life.
    pub fn router(&self) -> DispatcherTable {
        let mut table = DispatcherTable::new();
        table.register(
            dispatcher::CORE,
            Box::new(CoreDispatcher::new(
                self.channels.clone(),
                self.features.clone(),
                self.shutdown_requested.clone(),
            )),
        );
        table.register(
            dispatcher::STORAGE,
            Box::new(StorageDispatcher::new(self.drives.clone())),
        );
        table
    }

    /// Bring the session up: validate configuration, mount boot media,
    /// perform the init handshake. A failure rolls everything back to
    /// `Stopped`.
    pub fn start(&mut self, transport: Arc<Transport>) -> Result<GuestInfo, SessionError> {
        if self.state != SessionState::Stopped {
            return Err(SessionError::AlreadyRunning);
        }
        self.config.validate()?;

        self.state = SessionState::Starting;
        match self.bring_up(&transport) {
            Ok(guest) => {
                self.transport = Some(transport);
                self.guest = Some(guest);
                self.started_at = Some(Instant::now());
                self.state = SessionState::Running;
                info!(
                    memory_mb = self.config.memory_mb,
                    guest_version = guest.version,
                    "session started"
                );
                Ok(guest)
            }
            Err(err) => {
                self.drives.lock().unwrap().clear();
                self.channels.lock().unwrap().clear();
                self.state = SessionState::Stopped;
                Err(err)
            }
        }
    }

    fn bring_up(&mut self, transport: &Transport) -> Result<GuestInfo, SessionError> {
        {
            let mut drives = self.drives.lock().unwrap();
            if let Some(path) = &self.config.primary_disk {
                drives.mount_disk(0, path, false)?;
            }
            if let Some(path) = &self.config.secondary_disk {
                drives.mount_disk(1, path, false)?;
            }
            if let Some(path) = &self.config.cdrom {
                drives.mount_optical(path)?;
            }
            for (slot, path) in self.config.floppy.iter().enumerate() {
                if let Some(path) = path {
                    drives.mount_floppy(slot as u32, path)?;
                }
            }
        }

        self.shutdown_requested.store(false, Ordering::Release);
        self.handshake(transport)
    }

    /// Init handshake: versions and feature masks, with the long timeout —
    /// the guest BIOS may still be coming up.
    fn handshake(&self, transport: &Transport) -> Result<GuestInfo, SessionError> {
        let init = CoreInit {
            host_version: HOST_VERSION,
            features_supported: u32::MAX,
        };
        let reply = transport.transact(
            dispatcher::CORE,
            core_cmd::INIT,
            &init.encode(),
            INIT_TIMEOUT,
        )?;
        let reply = CoreInitReply::decode(&reply)?;
        self.features
            .store(reply.features_enabled, Ordering::Release);
        Ok(GuestInfo {
            version: reply.guest_version,
            features: reply.features_enabled,
            shmem_size: reply.shmem_size,
            framebuffer_size: reply.framebuffer_size,
        })
    }

    /// Tear the session down. The shutdown command is fire-and-forget; the
    /// guest gets no vote.
    pub fn stop(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Running {
            return Err(SessionError::NotRunning);
        }
        self.state = SessionState::Stopping;
        if let Some(transport) = &self.transport {
            if let Err(err) = transport.send_command(dispatcher::CORE, core_cmd::SHUTDOWN, &[]) {
                warn!(%err, "shutdown notification failed");
            }
            transport.reset_rings();
        }
        self.drives.lock().unwrap().clear();
        self.channels.lock().unwrap().clear();
        self.transport = None;
        self.guest = None;
        self.started_at = None;
        self.state = SessionState::Stopped;
        info!("session stopped");
        Ok(())
    }

    /// Soft reboot: re-zero the rings and redo the handshake. A failed
    /// handshake leaves the session in `Error` — the guest is in an
    /// unknown state.
    pub fn reset(&mut self) -> Result<GuestInfo, SessionError> {
        if self.state != SessionState::Running {
            return Err(SessionError::NotRunning);
        }
        let transport = self
            .transport
            .clone()
            .ok_or(SessionError::NotRunning)?;
        transport.reset_rings();
        match self.handshake(&transport) {
            Ok(guest) => {
                self.guest = Some(guest);
                self.started_at = Some(Instant::now());
                info!("session reset");
                Ok(guest)
            }
            Err(err) => {
                warn!(%err, "guest did not come back from reset");
                self.state = SessionState::Error;
                Err(err)
            }
        }
    }

    pub fn mount_disk(
        &mut self,
        slot: u32,
        path: &Path,
        read_only: bool,
    ) -> Result<(), SessionError> {
        let drive = self.drives.lock().unwrap().mount_disk(slot, path, read_only)?;
        let mut flags = mount_flag::MEDIA_PRESENT;
        if read_only {
            flags |= mount_flag::READ_ONLY;
        }
        self.notify_guest(storage_cmd::MOUNT, MountNotify { drive, flags }.encode());
        Ok(())
    }

    pub fn unmount_disk(&mut self, slot: u32) -> Result<(), SessionError> {
        let drive = self.drives.lock().unwrap().unmount_disk(slot)?;
        self.notify_guest(storage_cmd::UNMOUNT, DriveNotify { drive }.encode());
        Ok(())
    }

    pub fn mount_cdrom(&mut self, path: &Path) -> Result<(), SessionError> {
        let drive = self.drives.lock().unwrap().mount_optical(path)?;
        self.notify_guest(
            storage_cmd::MOUNT,
            MountNotify {
                drive,
                flags: mount_flag::MEDIA_PRESENT | mount_flag::READ_ONLY,
            }
            .encode(),
        );
        Ok(())
    }

    pub fn eject_cdrom(&mut self) -> Result<(), SessionError> {
        let drive = self.drives.lock().unwrap().eject_optical();
        self.notify_guest(storage_cmd::EJECT, DriveNotify { drive }.encode());
        Ok(())
    }

    pub fn mount_floppy(&mut self, slot: u32, path: &Path) -> Result<(), SessionError> {
        let drive = self.drives.lock().unwrap().mount_floppy(slot, path)?;
        self.notify_guest(
            storage_cmd::MOUNT,
            MountNotify {
                drive,
                flags: mount_flag::MEDIA_PRESENT,
            }
            .encode(),
        );
        Ok(())
    }

    pub fn eject_floppy(&mut self, slot: u32) -> Result<(), SessionError> {
        let drive = self.drives.lock().unwrap().eject_floppy(slot)?;
        self.notify_guest(storage_cmd::EJECT, DriveNotify { drive }.encode());
        Ok(())
    }

    /// Mount/unmount/eject notifications are best-effort: a full ring is
    /// the guest's loss, not a host failure.
    fn notify_guest(&self, command: u16, payload: Vec<u8>) {
        if self.state != SessionState::Running {
            return;
        }
        let Some(transport) = &self.transport else {
            return;
        };
        if let Err(err) = transport.send_command(dispatcher::STORAGE, command, &payload) {
            warn!(%err, command, "guest media notification failed");
        }
    }

    /// Traffic addressed through a named channel: resolve the handle and
    /// adapt the NT request layout onto the canonical handlers.
    pub fn handle_channel_request(
        &self,
        channel_id: u32,
        request: &[u8],
    ) -> Result<Vec<u8>, SessionError> {
        let target = self
            .channels
            .lock()
            .unwrap()
            .dispatcher_for(channel_id)
            .ok_or(SessionError::ChannelNotFound)?;
        if target != dispatcher::STORAGE {
            return Err(SessionError::Unsupported);
        }
        let drives = self.drives.lock().unwrap();
        nt_disk::handle_request(&drives, request)
    }
}
