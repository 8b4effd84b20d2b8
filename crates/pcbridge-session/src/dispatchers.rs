//! Handler objects registered with the dispatcher table.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{error, info};

use pcbridge_ipc::Dispatcher;
use pcbridge_protocol::consts::{core_cmd, status, storage_cmd, HOST_VERSION};
use pcbridge_protocol::payload::{
    ChannelCreateRequest, ChannelRef, ScsiReply, ScsiRequest, StorageReply, StorageRequest,
    SENSE_LEN,
};
use pcbridge_protocol::MAX_PAYLOAD;
use pcbridge_storage::{bios, scsi, DriveSet};

use crate::channel::ChannelRegistry;

/// The reserved core dispatcher: version/feature negotiation, ping, and the
/// channel-management command range.
pub struct CoreDispatcher {
    channels: Arc<Mutex<ChannelRegistry>>,
    features: Arc<AtomicU32>,
    shutdown_requested: Arc<AtomicBool>,
}

impl CoreDispatcher {
    pub fn new(
        channels: Arc<Mutex<ChannelRegistry>>,
        features: Arc<AtomicU32>,
        shutdown_requested: Arc<AtomicBool>,
    ) -> Self {
        Self {
            channels,
            features,
            shutdown_requested,
        }
    }
}

impl Dispatcher for CoreDispatcher {
    fn handle(&mut self, command: u16, payload: &[u8]) -> (u16, Vec<u8>) {
        match command {
            core_cmd::PING => (status::SUCCESS, payload.to_vec()),

            core_cmd::GET_VERSION => (status::SUCCESS, HOST_VERSION.to_le_bytes().to_vec()),

            core_cmd::GET_FEATURES => (
                status::SUCCESS,
                self.features.load(Ordering::Acquire).to_le_bytes().to_vec(),
            ),

            core_cmd::SET_FEATURES => match payload.try_into() {
                Ok(bytes) => {
                    let features = u32::from_le_bytes(bytes);
                    self.features.store(features, Ordering::Release);
                    (status::SUCCESS, Vec::new())
                }
                Err(_) => (status::INVALID_COMMAND, Vec::new()),
            },

            core_cmd::SHUTDOWN => {
                info!("guest requested shutdown");
                self.shutdown_requested.store(true, Ordering::Release);
                (status::SUCCESS, Vec::new())
            }

            core_cmd::CHANNEL_CREATE => match ChannelCreateRequest::decode(payload) {
                Ok(req) => {
                    let reply = self.channels.lock().unwrap().create(&req);
                    (status::SUCCESS, reply.encode())
                }
                Err(_) => (status::INVALID_COMMAND, Vec::new()),
            },

            core_cmd::CHANNEL_DELETE => match ChannelRef::decode(payload) {
                Ok(req) => {
                    let result: u32 = match self.channels.lock().unwrap().delete(req.channel_id) {
                        Ok(()) => 0,
                        Err(_) => 1,
                    };
                    (status::SUCCESS, result.to_le_bytes().to_vec())
                }
                Err(_) => (status::INVALID_COMMAND, Vec::new()),
            },

            core_cmd::CHANNEL_BIND | core_cmd::CHANNEL_UNBIND => {
                match ChannelRef::decode(payload) {
                    Ok(req) => {
                        let known = self
                            .channels
                            .lock()
                            .unwrap()
                            .dispatcher_for(req.channel_id)
                            .is_some();
                        let result: u32 = if known { 0 } else { 1 };
                        (status::SUCCESS, result.to_le_bytes().to_vec())
                    }
                    Err(_) => (status::INVALID_COMMAND, Vec::new()),
                }
            }

            _ => (status::INVALID_COMMAND, Vec::new()),
        }
    }
}

/// Storage endpoint: decodes canonical BIOS and SCSI payloads and runs them
/// against the drive set.
pub struct StorageDispatcher {
    drives: Arc<Mutex<DriveSet>>,
}

impl StorageDispatcher {
    pub fn new(drives: Arc<Mutex<DriveSet>>) -> Self {
        Self { drives }
    }

    fn handle_scsi(&mut self, payload: &[u8]) -> (u16, Vec<u8>) {
        let Ok((req, _write_data)) = ScsiRequest::decode(payload) else {
            return (status::INVALID_COMMAND, Vec::new());
        };
        let budget = (req.data_len as usize).min(MAX_PAYLOAD - ScsiReply::SIZE);
        let drives = self.drives.lock().unwrap();
        match scsi::handle_command(drives.optical(), &req.cdb, budget) {
            Ok(outcome) => {
                let (sense, sense_len) = match outcome.sense {
                    Some(sense) => (sense.to_fixed(), SENSE_LEN as u8),
                    None => ([0u8; SENSE_LEN], 0),
                };
                let reply = ScsiReply {
                    status: outcome.status,
                    sense_len,
                    data_len: outcome.data.len() as u32,
                    sense,
                };
                (status::SUCCESS, reply.encode_with_data(&outcome.data))
            }
            Err(err) => {
                // The host itself failed to service the request; this is the
                // one class that surfaces as a transport error.
                error!(%err, "SCSI backing I/O failed");
                (status::ERROR, Vec::new())
            }
        }
    }

    fn handle_bios(&mut self, payload: &[u8]) -> (u16, Vec<u8>) {
        let Ok((req, write_data)) = StorageRequest::decode(payload) else {
            return (status::INVALID_COMMAND, Vec::new());
        };
        let budget = MAX_PAYLOAD - StorageReply::SIZE;
        let drives = self.drives.lock().unwrap();
        match bios::handle_request(&drives, &req, write_data, budget) {
            Ok(outcome) => {
                let reply = StorageReply {
                    status: outcome.status,
                    count: outcome.count,
                };
                (status::SUCCESS, reply.encode_with_data(&outcome.data))
            }
            Err(err) => {
                error!(%err, drive = req.drive, "storage backing I/O failed");
                (status::ERROR, Vec::new())
            }
        }
    }
}

impl Dispatcher for StorageDispatcher {
    fn handle(&mut self, command: u16, payload: &[u8]) -> (u16, Vec<u8>) {
        if command == storage_cmd::SCSI {
            self.handle_scsi(payload)
        } else {
            self.handle_bios(payload)
        }
    }
}
