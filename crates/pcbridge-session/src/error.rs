use thiserror::Error;

use pcbridge_ipc::TransportError;
use pcbridge_protocol::DecodeError;
use pcbridge_storage::StorageError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session already running")]
    AlreadyRunning,

    #[error("session not running")]
    NotRunning,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("channel not found")]
    ChannelNotFound,

    #[error("malformed request: {0}")]
    Malformed(#[from] DecodeError),

    #[error("unsupported request")]
    Unsupported,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
