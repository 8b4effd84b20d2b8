//! Per-card session: lifecycle, configuration, and the glue between the
//! message transport and the device emulators.
//!
//! A [`Session`](session::Session) owns the drive slots, the channel
//! registry, and the negotiated guest state. Its lifecycle gates everything
//! else: the transport and emulators are wired on `Stopped → Running` and
//! torn down on the way back. The [`channel`] module implements the named
//! indirection the NT guest driver family uses instead of raw dispatcher
//! IDs, and [`nt_disk`] adapts that family's fixed-offset disk request
//! layout onto the canonical storage handlers.

pub mod channel;
pub mod config;
pub mod dispatchers;
pub mod error;
pub mod nt_disk;
pub mod session;

pub use channel::{ChannelFlags, ChannelRegistry};
pub use config::{SessionConfig, SessionFlags};
pub use error::SessionError;
pub use session::{GuestInfo, Session, SessionState};
