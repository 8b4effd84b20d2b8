//! Named channels: the string-addressed indirection the NT guest driver
//! family uses instead of raw dispatcher IDs.
//!
//! Channel names arrive as fixed-width UTF-16LE and are matched
//! case-insensitively against a table of well-known names, each bound to
//! one dispatcher. Handles come from a bounded slot arena; exhaustion is an
//! explicit status to the guest, never a session failure.

use bitflags::bitflags;
use tracing::{debug, info, warn};

use pcbridge_protocol::consts::{channel_flag, channel_status, dispatcher, CHANNEL_NAME_MAX};
use pcbridge_protocol::payload::{ChannelCreateReply, ChannelCreateRequest};

use crate::error::SessionError;

/// Active channels per session.
pub const MAX_CHANNELS: usize = 16;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ChannelFlags: u32 {
        const EXCLUSIVE = channel_flag::EXCLUSIVE;
        const PERSISTENT = channel_flag::PERSISTENT;
    }
}

/// Names the guest may bind, and the dispatcher each resolves to.
const KNOWN_CHANNELS: [(&str, u16); 6] = [
    ("NewInt13Dispatcher", dispatcher::STORAGE),
    ("VGADispatcher", dispatcher::VGA),
    ("VideoDispatcher", dispatcher::VIDEO),
    ("NetworkDispatcher", dispatcher::NETWORK),
    ("FSDDispatcher", dispatcher::FSD),
    ("ClipboardDispatcher", dispatcher::CLIPBOARD),
];

/// Decode a fixed-width UTF-16LE channel name to ASCII. Code points above
/// 127 become `'?'`; the name ends at the first NUL or the field width.
pub fn decode_name(units: &[u16]) -> String {
    let mut name = String::new();
    for &unit in units.iter().take(CHANNEL_NAME_MAX) {
        if unit == 0 {
            break;
        }
        name.push(if unit > 127 { '?' } else { unit as u8 as char });
    }
    name
}

fn dispatcher_for_name(name: &str) -> Option<u16> {
    KNOWN_CHANNELS
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(name))
        .map(|&(_, id)| id)
}

#[derive(Debug, Clone)]
struct Channel {
    id: u32,
    dispatcher: u16,
    flags: ChannelFlags,
    name: String,
}

/// Bounded arena of active channels with free-list slot reuse and
/// monotonically increasing handles (starting at 1, never 0).
#[derive(Debug)]
pub struct ChannelRegistry {
    slots: Vec<Option<Channel>>,
    free: Vec<usize>,
    next_id: u32,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::with_capacity(MAX_CHANNELS)
    }

    /// Registry with a non-default slot count. Exhaustion behaviour is the
    /// same at any capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            free: (0..capacity).rev().collect(),
            next_id: 1,
        }
    }

    fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        if self.next_id == 0 {
            self.next_id = 1;
        }
        id
    }

    /// Handle a guest channel-create request. Every outcome is a reply
    /// status; nothing here fails the session.
    pub fn create(&mut self, req: &ChannelCreateRequest) -> ChannelCreateReply {
        let name = decode_name(&req.name_utf16);
        let Some(dispatcher) = dispatcher_for_name(&name) else {
            warn!(%name, "guest asked for an unknown channel");
            return ChannelCreateReply {
                status: channel_status::UNKNOWN_NAME,
                channel_id: 0,
            };
        };

        if let Some(existing) = self.slots.iter().flatten().find(|c| c.name == name) {
            if existing.flags.contains(ChannelFlags::EXCLUSIVE) {
                debug!(%name, id = existing.id, "exclusive channel already bound");
                return ChannelCreateReply {
                    status: channel_status::ALREADY_EXISTS,
                    channel_id: 0,
                };
            }
            return ChannelCreateReply {
                status: channel_status::OK,
                channel_id: existing.id,
            };
        }

        let Some(slot) = self.free.pop() else {
            warn!(%name, "channel table exhausted");
            return ChannelCreateReply {
                status: channel_status::NO_FREE_SLOTS,
                channel_id: 0,
            };
        };

        let id = self.alloc_id();
        let flags = ChannelFlags::from_bits_truncate(req.flags);
        info!(%name, id, dispatcher, "channel created");
        self.slots[slot] = Some(Channel {
            id,
            dispatcher,
            flags,
            name,
        });
        ChannelCreateReply {
            status: channel_status::OK,
            channel_id: id,
        }
    }

    pub fn delete(&mut self, id: u32) -> Result<(), SessionError> {
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if let Some(channel) = slot.as_ref() {
                if channel.id == id {
                    info!(id, name = %channel.name, "channel deleted");
                    *slot = None;
                    self.free.push(idx);
                    return Ok(());
                }
            }
        }
        Err(SessionError::ChannelNotFound)
    }

    /// Resolve subsequent traffic on a channel to its dispatcher.
    pub fn dispatcher_for(&self, id: u32) -> Option<u16> {
        self.slots
            .iter()
            .flatten()
            .find(|c| c.id == id)
            .map(|c| c.dispatcher)
    }

    pub fn active(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Drop every channel. Used on session teardown.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.free = (0..self.slots.len()).rev().collect();
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
