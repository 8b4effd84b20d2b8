//! Framed message transport over one ring buffer per direction.
//!
//! Outbound frames (host commands, host responses to guest requests) are
//! written as a single all-or-nothing ring append and announced with a
//! doorbell write. Inbound consumption validates the frame magic at the
//! current position; on a mismatch the stream has lost framing (a dropped
//! or malformed guest write) and the consumer skips exactly one byte and
//! retries until a true frame boundary realigns. Framing errors therefore
//! never surface to callers — only a timeout does.
//!
//! Synchronous exchanges correlate responses by sequence number. When the
//! doorbell-driven drain loop is attached it is the only inbound consumer:
//! it completes registered waiters by sequence and forwards everything else
//! to the dispatcher, so concurrently outstanding exchanges each see
//! exactly their own response regardless of arrival order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use pcbridge_protocol::consts::{doorbell, status};
use pcbridge_protocol::frame::{RequestHeader, ResponseHeader};
use pcbridge_protocol::{DecodeError, HEADER_SIZE, MAX_PAYLOAD};

use crate::ring::{RingBuffer, RingError};

/// Upper bound on one wait slice while polling for a response. The condvar
/// nudge from the doorbell path normally wakes us much sooner.
const POLL_INTERVAL: Duration = Duration::from_micros(500);

/// Doorbell register on the bridge; a write raises an interrupt on the
/// remote side.
pub trait Doorbell: Send + Sync {
    fn ring(&self, bits: u32);
}

/// Doorbell sink for rings with no interrupt line attached (tests,
/// loopback).
pub struct NoopDoorbell;

impl Doorbell for NoopDoorbell {
    fn ring(&self, _bits: u32) {}
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("outbound ring full: need {need} bytes, {space} free")]
    RingFull { need: usize, space: usize },

    #[error("payload length {0} exceeds protocol maximum")]
    PayloadTooLarge(usize),

    #[error("timed out waiting for a response")]
    Timeout,

    #[error("no response available yet")]
    WouldBlock,

    #[error("command failed with status {status:#06x}")]
    Command { status: u16 },

    #[error(transparent)]
    Ring(#[from] RingError),
}

/// Result of a completed receive: header fields plus the declared payload
/// length (which may exceed what fit in the caller's buffer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub sequence: u32,
    pub payload_len: usize,
}

/// One complete frame consumed from the inbound ring.
///
/// Requests and responses share the 16-byte header shape; bytes 4..8 read
/// as `dispatcher, command` for a request and `status, reserved` for a
/// response. Which interpretation applies is decided by sequence
/// correlation against the outstanding-exchange table.
#[derive(Debug)]
pub struct InboundFrame {
    pub sequence: u32,
    pub payload: Vec<u8>,
    word0: u16,
    word1: u16,
}

impl InboundFrame {
    pub fn dispatcher(&self) -> u16 {
        self.word0
    }

    pub fn command(&self) -> u16 {
        self.word1
    }

    pub fn status(&self) -> u16 {
        self.word0
    }
}

#[derive(Default)]
struct Waiter {
    slot: Mutex<Option<(u16, Vec<u8>)>>,
    ready: Condvar,
}

impl Waiter {
    fn complete(&self, status: u16, payload: Vec<u8>) {
        *self.slot.lock().unwrap() = Some((status, payload));
        self.ready.notify_all();
    }

    fn wait(&self, timeout: Duration) -> Result<(u16, Vec<u8>), TransportError> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock().unwrap();
        loop {
            if let Some(resp) = slot.take() {
                return Ok(resp);
            }
            if timeout.is_zero() {
                return Err(TransportError::WouldBlock);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(TransportError::Timeout);
            }
            let (guard, _) = self.ready.wait_timeout(slot, deadline - now).unwrap();
            slot = guard;
        }
    }
}

pub struct Transport {
    outbound: Arc<RingBuffer>,
    inbound: Arc<RingBuffer>,
    doorbell: Arc<dyn Doorbell>,
    sequence: AtomicU32,
    pending: Mutex<HashMap<u32, Arc<Waiter>>>,
    inbound_tick: Mutex<u64>,
    inbound_ready: Condvar,
    worker_attached: AtomicBool,
}

impl Transport {
    pub fn new(
        outbound: Arc<RingBuffer>,
        inbound: Arc<RingBuffer>,
        doorbell: Arc<dyn Doorbell>,
    ) -> Self {
        Self {
            outbound,
            inbound,
            doorbell,
            sequence: AtomicU32::new(0),
            pending: Mutex::new(HashMap::new()),
            inbound_tick: Mutex::new(0),
            inbound_ready: Condvar::new(),
            worker_attached: AtomicBool::new(false),
        }
    }

    pub fn outbound_ring(&self) -> &Arc<RingBuffer> {
        &self.outbound
    }

    pub fn inbound_ring(&self) -> &Arc<RingBuffer> {
        &self.inbound
    }

    /// Zero both rings. Only valid while the guest side is quiesced.
    pub fn reset_rings(&self) {
        self.outbound.reset();
        self.inbound.reset();
    }

    fn next_sequence(&self) -> u32 {
        loop {
            let seq = self.sequence.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            // 0 means "match any" on the receive side; never hand it out.
            if seq != 0 {
                return seq;
            }
        }
    }

    /// Write a command frame and signal the guest. Returns the sequence
    /// number assigned to the exchange.
    pub fn send_command(
        &self,
        dispatcher: u16,
        command: u16,
        payload: &[u8],
    ) -> Result<u32, TransportError> {
        let sequence = self.next_sequence();
        self.send_request_frame(sequence, dispatcher, command, payload)?;
        Ok(sequence)
    }

    fn send_request_frame(
        &self,
        sequence: u32,
        dispatcher: u16,
        command: u16,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let header = RequestHeader {
            dispatcher,
            command,
            sequence,
            payload_len: payload.len() as u32,
        }
        .encode();
        self.send_frame(&header, payload, doorbell::CMD_READY)
    }

    /// Write a response frame echoing `sequence` and signal the guest.
    pub fn send_response(
        &self,
        sequence: u32,
        status: u16,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let header = ResponseHeader {
            status,
            sequence,
            payload_len: payload.len() as u32,
        }
        .encode();
        self.send_frame(&header, payload, doorbell::RSP_READY)
    }

    fn send_frame(
        &self,
        header: &[u8; HEADER_SIZE],
        payload: &[u8],
        bell: u32,
    ) -> Result<(), TransportError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(TransportError::PayloadTooLarge(payload.len()));
        }
        self.outbound.sync_remote();
        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
        frame.extend_from_slice(header);
        frame.extend_from_slice(payload);
        self.outbound.write(&frame).map_err(|e| match e {
            RingError::InsufficientSpace { need, space } => {
                TransportError::RingFull { need, space }
            }
            other => TransportError::Ring(other),
        })?;
        self.outbound.publish_local();
        self.doorbell.ring(bell);
        Ok(())
    }

    /// Interrupt-context entry point: acknowledge a guest doorbell and wake
    /// whichever context does the actual ring work. Performs no ring I/O
    /// itself.
    pub fn handle_doorbell(&self, _bits: u32) {
        self.notify_inbound();
    }

    /// Wake anything waiting for inbound progress.
    pub fn notify_inbound(&self) {
        let mut tick = self.inbound_tick.lock().unwrap();
        *tick = tick.wrapping_add(1);
        self.inbound_ready.notify_all();
    }

    pub(crate) fn wait_inbound(&self, timeout: Duration) {
        let tick = self.inbound_tick.lock().unwrap();
        let _ = self.inbound_ready.wait_timeout(tick, timeout).unwrap();
    }

    /// Blocking receive of the response to `expected_seq` (0 matches any
    /// frame). Payload bytes beyond `buf.len()` are discarded; the declared
    /// length is reported either way.
    ///
    /// Frames carrying a different sequence are dropped once fully
    /// buffered: consumption is serialized, so a response consumed here on
    /// behalf of another exchange is lost. Attach a [`crate::ServiceLoop`]
    /// when exchanges may overlap.
    pub fn receive_response(
        &self,
        expected_seq: u32,
        timeout: Duration,
        buf: &mut [u8],
    ) -> Result<Response, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(response) = self.try_receive_response(expected_seq, buf)? {
                return Ok(response);
            }
            if timeout.is_zero() {
                return Err(TransportError::WouldBlock);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(TransportError::Timeout);
            }
            self.wait_inbound((deadline - now).min(POLL_INTERVAL));
        }
    }

    fn try_receive_response(
        &self,
        expected_seq: u32,
        buf: &mut [u8],
    ) -> Result<Option<Response>, TransportError> {
        self.inbound.sync_remote();
        loop {
            let mut header = [0u8; HEADER_SIZE];
            if self.inbound.peek(&mut header) < HEADER_SIZE {
                return Ok(None);
            }
            let Some((word0, _, sequence, payload_len)) = self.parse_or_resync(&header)? else {
                continue;
            };
            let total = HEADER_SIZE + payload_len;
            if expected_seq != 0 && sequence != expected_seq {
                // Belongs to a different exchange; drop the whole frame once
                // it is fully buffered.
                if self.inbound.used() >= total {
                    debug!(sequence, expected_seq, "dropping frame for another exchange");
                    self.inbound.skip(total)?;
                    continue;
                }
                return Ok(None);
            }
            if self.inbound.used() < total {
                return Ok(None);
            }
            self.inbound.skip(HEADER_SIZE)?;
            let copy = buf.len().min(payload_len);
            if copy > 0 {
                let got = self.inbound.read(&mut buf[..copy]);
                debug_assert_eq!(got, copy);
            }
            if payload_len > copy {
                self.inbound.skip(payload_len - copy)?;
            }
            self.inbound.publish_local();
            return Ok(Some(Response {
                status: word0,
                sequence,
                payload_len,
            }));
        }
    }

    /// Consume the next complete inbound frame, if one is fully buffered.
    /// Applies the same magic-check/resync logic as the response path.
    pub fn poll_frame(&self) -> Result<Option<InboundFrame>, TransportError> {
        self.inbound.sync_remote();
        loop {
            let mut header = [0u8; HEADER_SIZE];
            if self.inbound.peek(&mut header) < HEADER_SIZE {
                return Ok(None);
            }
            let Some((word0, word1, sequence, payload_len)) = self.parse_or_resync(&header)?
            else {
                continue;
            };
            if self.inbound.used() < HEADER_SIZE + payload_len {
                return Ok(None);
            }
            self.inbound.skip(HEADER_SIZE)?;
            let mut payload = vec![0u8; payload_len];
            let got = self.inbound.read(&mut payload);
            debug_assert_eq!(got, payload_len);
            self.inbound.publish_local();
            return Ok(Some(InboundFrame {
                sequence,
                payload,
                word0,
                word1,
            }));
        }
    }

    /// Validate the header at the current consumer position. On a bad magic
    /// or an impossible length the stream has lost framing: skip one byte
    /// so magic detection retries from the next offset, and return `None`.
    fn parse_or_resync(
        &self,
        header: &[u8; HEADER_SIZE],
    ) -> Result<Option<(u16, u16, u32, usize)>, TransportError> {
        match RequestHeader::decode(header) {
            Ok(h) => Ok(Some((
                h.dispatcher,
                h.command,
                h.sequence,
                h.payload_len as usize,
            ))),
            Err(DecodeError::BadMagic { found }) => {
                warn!(found, "bad frame magic; resynchronizing");
                self.inbound.skip(1)?;
                Ok(None)
            }
            Err(err) => {
                warn!(%err, "unusable frame header; resynchronizing");
                self.inbound.skip(1)?;
                Ok(None)
            }
        }
    }

    /// Synchronous command: send, wait for the matching response, and map a
    /// non-success status to an error.
    pub fn transact(
        &self,
        dispatcher: u16,
        command: u16,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        if self.worker_attached.load(Ordering::Acquire) {
            let sequence = self.next_sequence();
            let waiter = Arc::new(Waiter::default());
            self.pending.lock().unwrap().insert(sequence, waiter.clone());
            let result = match self.send_request_frame(sequence, dispatcher, command, payload) {
                Ok(()) => waiter.wait(timeout),
                Err(e) => Err(e),
            };
            self.pending.lock().unwrap().remove(&sequence);
            let (status, reply) = result?;
            if status != status::SUCCESS {
                return Err(TransportError::Command { status });
            }
            Ok(reply)
        } else {
            let sequence = self.send_command(dispatcher, command, payload)?;
            let mut buf = vec![0u8; MAX_PAYLOAD];
            let response = self.receive_response(sequence, timeout, &mut buf)?;
            if response.status != status::SUCCESS {
                return Err(TransportError::Command {
                    status: response.status,
                });
            }
            buf.truncate(response.payload_len);
            Ok(buf)
        }
    }

    /// Hand a frame to the waiter registered for its sequence, if any.
    /// Returns the frame back when no exchange claimed it (a guest
    /// request, or a response whose waiter already gave up).
    pub(crate) fn complete_pending(&self, frame: InboundFrame) -> Option<InboundFrame> {
        let waiter = self.pending.lock().unwrap().remove(&frame.sequence);
        match waiter {
            Some(w) => {
                let InboundFrame { word0, payload, .. } = frame;
                w.complete(word0, payload);
                None
            }
            None => Some(frame),
        }
    }

    pub(crate) fn attach_worker(&self) {
        self.worker_attached.store(true, Ordering::Release);
    }

    pub(crate) fn detach_worker(&self) {
        self.worker_attached.store(false, Ordering::Release);
    }
}
