//! Wire protocol for the host/guest shared-memory message channel.
//!
//! The host and the x86 guest card exchange framed binary messages over a
//! pair of ring buffers in the shared BAR region. This crate defines the
//! stable on-wire shape of that traffic:
//!
//! - the 16-byte request/response frame headers ([`frame`])
//! - protocol constants: magic, dispatcher IDs, command codes, status
//!   codes, doorbell bits, timeouts ([`consts`])
//! - typed payload structs with explicit little-endian codecs ([`payload`])
//! - the alternate fixed-offset byte layouts used by the NT guest driver
//!   family ([`nt`])
//!
//! Everything here is deliberately dependency-free and endian-stable
//! (little-endian) so both sides of the bridge can implement it
//! independently. Ring framing and delivery live in `pcbridge-ipc`; this
//! crate only defines the bytes.

pub mod consts;
pub mod frame;
pub mod nt;
pub mod payload;

pub use consts::{MAX_MSG_SIZE, MAX_PAYLOAD, MSG_MAGIC};
pub use frame::{DecodeError, RequestHeader, ResponseHeader, HEADER_SIZE};
