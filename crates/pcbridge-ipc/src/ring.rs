//! Byte-addressed circular buffer over a shared memory region.
//!
//! One ring per transfer direction. The producer advances `head` after
//! writing, the consumer advances `tail` after reading; one slot is always
//! kept empty so `head == tail` unambiguously means empty. Both cursors are
//! published with release stores because the remote domain observes them
//! without taking the ring lock — the lock only serializes host-side
//! callers (interrupt-context acknowledgement vs. worker-context I/O).
//!
//! For rings whose authoritative cursors live in bridge scratchpad
//! registers rather than host memory, a [`CursorMirror`] carries the
//! locally-owned cursor out to the register and pulls the remote-owned one
//! back in at explicit sync points. This is a best-effort, eventually
//! consistent handshake between two address spaces, not a linearizable
//! queue.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use thiserror::Error;

/// Smallest supported ring capacity in bytes.
pub const MIN_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RingError {
    #[error("ring capacity must be a power of two >= 64 (got {0})")]
    InvalidCapacity(usize),

    #[error("insufficient space: need {need} bytes, {space} free")]
    InsufficientSpace { need: usize, space: usize },

    #[error("cannot skip {n} bytes, only {used} buffered")]
    SkipPastEnd { n: usize, used: usize },
}

/// Access to the hardware registers mirroring a ring's cursors.
///
/// Each ring owns exactly one of its two cursors; the other belongs to the
/// remote domain. `read_remote` fetches the remote-owned cursor register,
/// `write_local` publishes the locally-owned one.
pub trait CursorMirror: Send + Sync {
    fn read_remote(&self) -> u32;
    fn write_local(&self, value: u32);
}

/// Which side of this ring the local domain plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Local side produces (owns `head`), remote side consumes.
    Outbound,
    /// Remote side produces, local side consumes (owns `tail`).
    Inbound,
}

pub struct RingBuffer {
    cap: u32,
    /// Producer cursor.
    head: AtomicU32,
    /// Consumer cursor.
    tail: AtomicU32,
    lock: Mutex<()>,
    direction: Direction,
    mirror: Option<Box<dyn CursorMirror>>,
    data: *mut u8,
    _storage: Option<Box<[u8]>>,
}

// The raw data pointer targets either owned storage or an externally mapped
// shared region; all access to it happens under `lock` with cursor bounds
// derived from the atomics.
unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}

fn check_capacity(capacity: usize) -> Result<u32, RingError> {
    if capacity < MIN_CAPACITY || !capacity.is_power_of_two() || capacity > u32::MAX as usize {
        return Err(RingError::InvalidCapacity(capacity));
    }
    Ok(capacity as u32)
}

impl RingBuffer {
    /// Ring over freshly allocated storage (loopback and tests).
    pub fn new(capacity: usize, direction: Direction) -> Result<Self, RingError> {
        let cap = check_capacity(capacity)?;
        let mut storage = vec![0u8; capacity].into_boxed_slice();
        let data = storage.as_mut_ptr();
        Ok(Self {
            cap,
            head: AtomicU32::new(0),
            tail: AtomicU32::new(0),
            lock: Mutex::new(()),
            direction,
            mirror: None,
            data,
            _storage: Some(storage),
        })
    }

    /// Ring over an externally mapped region (the shared BAR).
    ///
    /// # Safety
    ///
    /// `data` must point to at least `capacity` bytes that stay mapped and
    /// writable for the lifetime of the ring, and no other host-side code
    /// may touch that region while the ring exists.
    pub unsafe fn from_raw(
        data: *mut u8,
        capacity: usize,
        direction: Direction,
        mirror: Option<Box<dyn CursorMirror>>,
    ) -> Result<Self, RingError> {
        let cap = check_capacity(capacity)?;
        Ok(Self {
            cap,
            head: AtomicU32::new(0),
            tail: AtomicU32::new(0),
            lock: Mutex::new(()),
            direction,
            mirror,
            data,
            _storage: None,
        })
    }

    pub fn capacity(&self) -> usize {
        self.cap as usize
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Bytes that can be written without overrunning the consumer.
    pub fn space(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        if head >= tail {
            (self.cap - (head - tail) - 1) as usize
        } else {
            (tail - head - 1) as usize
        }
    }

    /// Bytes buffered and available to read.
    pub fn used(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        if head >= tail {
            (head - tail) as usize
        } else {
            (self.cap - (tail - head)) as usize
        }
    }

    /// Zero both cursors. Used on session reset after the guest side has
    /// been quiesced.
    pub fn reset(&self) {
        let _guard = self.lock.lock().unwrap();
        self.head.store(0, Ordering::Release);
        self.tail.store(0, Ordering::Release);
    }

    /// All-or-nothing append of `data` at the producer cursor, wrapping
    /// across the end of the region as two copies when necessary.
    pub fn write(&self, data: &[u8]) -> Result<(), RingError> {
        if data.is_empty() {
            return Ok(());
        }
        let _guard = self.lock.lock().unwrap();
        let space = self.space();
        if data.len() > space {
            return Err(RingError::InsufficientSpace {
                need: data.len(),
                space,
            });
        }
        let head = self.head.load(Ordering::Acquire);
        let head_idx = head as usize;
        let first = data.len().min(self.cap as usize - head_idx);
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.data.add(head_idx), first);
            if first < data.len() {
                std::ptr::copy_nonoverlapping(
                    data.as_ptr().add(first),
                    self.data,
                    data.len() - first,
                );
            }
        }
        self.head
            .store((head + data.len() as u32) % self.cap, Ordering::Release);
        Ok(())
    }

    /// Copy up to `buf.len()` buffered bytes into `buf` and consume them.
    /// Returns the number copied; 0 when the ring is empty.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        self.copy_out(buf, true)
    }

    /// Like [`Self::read`] but leaves the consumer cursor untouched. Used
    /// to inspect a header before deciding whether a full frame is present.
    pub fn peek(&self, buf: &mut [u8]) -> usize {
        self.copy_out(buf, false)
    }

    fn copy_out(&self, buf: &mut [u8], consume: bool) -> usize {
        if buf.is_empty() {
            return 0;
        }
        let _guard = self.lock.lock().unwrap();
        let used = self.used();
        let len = buf.len().min(used);
        if len == 0 {
            return 0;
        }
        let tail = self.tail.load(Ordering::Acquire);
        let tail_idx = tail as usize;
        let first = len.min(self.cap as usize - tail_idx);
        unsafe {
            std::ptr::copy_nonoverlapping(self.data.add(tail_idx), buf.as_mut_ptr(), first);
            if first < len {
                std::ptr::copy_nonoverlapping(self.data, buf.as_mut_ptr().add(first), len - first);
            }
        }
        if consume {
            self.tail
                .store((tail + len as u32) % self.cap, Ordering::Release);
        }
        len
    }

    /// Consume `n` bytes without copying them out.
    pub fn skip(&self, n: usize) -> Result<(), RingError> {
        if n == 0 {
            return Ok(());
        }
        let _guard = self.lock.lock().unwrap();
        let used = self.used();
        if n > used {
            return Err(RingError::SkipPastEnd { n, used });
        }
        let tail = self.tail.load(Ordering::Acquire);
        self.tail
            .store((tail + n as u32) % self.cap, Ordering::Release);
        Ok(())
    }

    /// Refresh the remote-owned cursor from its hardware register. Call
    /// before reading (inbound) or before computing space (outbound). No-op
    /// without a mirror.
    pub fn sync_remote(&self) {
        let Some(mirror) = &self.mirror else {
            return;
        };
        // Register contents are untrusted; keep the cursor in range.
        let value = mirror.read_remote() & (self.cap - 1);
        match self.direction {
            Direction::Outbound => self.tail.store(value, Ordering::Release),
            Direction::Inbound => self.head.store(value, Ordering::Release),
        }
    }

    /// Publish the locally-owned cursor to its hardware register. Call
    /// after writing (outbound) or after consuming (inbound). No-op without
    /// a mirror.
    pub fn publish_local(&self) {
        let Some(mirror) = &self.mirror else {
            return;
        };
        let value = match self.direction {
            Direction::Outbound => self.head.load(Ordering::Acquire),
            Direction::Inbound => self.tail.load(Ordering::Acquire),
        };
        mirror.write_local(value);
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.cap)
            .field("direction", &self.direction)
            .field("used", &self.used())
            .field("mirrored", &self.mirror.is_some())
            .finish()
    }
}
