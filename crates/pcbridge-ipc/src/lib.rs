//! Shared-memory message transport between the host and the guest card.
//!
//! Three layers, bottom up:
//!
//! - [`ring`]: a lock-protected, wrap-around byte ring with separate
//!   producer/consumer cursors. Rings live in the shared BAR region; for
//!   rings whose authoritative cursor is a bridge register, a
//!   [`ring::CursorMirror`] keeps the two domains in sync without a shared
//!   lock.
//! - [`transport`]: frames commands and responses on top of one ring per
//!   direction, assigns sequence numbers, correlates responses to waiters,
//!   and resynchronizes after stream corruption by skipping bytes until a
//!   valid frame magic reappears.
//! - [`dispatch`]: routes complete inbound frames to per-subsystem handler
//!   objects and drives the doorbell-triggered drain loop.

pub mod dispatch;
pub mod ring;
pub mod transport;

pub use dispatch::{Dispatcher, DispatcherTable, FrameRouter, ServiceLoop};
pub use ring::{CursorMirror, Direction, RingBuffer, RingError};
pub use transport::{Doorbell, InboundFrame, Response, Transport, TransportError};
