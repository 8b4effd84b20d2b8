//! Routing of inbound guest frames to subsystem handlers.
//!
//! Each virtual-device endpoint registers a [`Dispatcher`] under its fixed
//! ID. The [`ServiceLoop`] drains the inbound ring in a blockable context
//! (request handling may perform file I/O) and answers every routed frame
//! with a response frame. Unknown IDs and commands are reported back to the
//! guest as status codes; they never tear the session down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use pcbridge_protocol::consts::{dispatcher, status};

use crate::transport::{Transport, TransportError};

/// A virtual-device endpoint. `handle` returns the response status plus the
/// response payload; protocol-level failures are expressed through the
/// status code, not through panics or transport errors.
pub trait Dispatcher: Send {
    fn handle(&mut self, command: u16, payload: &[u8]) -> (u16, Vec<u8>);
}

/// Routing seam above the fixed table. The session layer implements this to
/// resolve channel-handle addressing before falling back to the table.
pub trait FrameRouter: Send {
    fn route(&mut self, dispatcher: u16, command: u16, payload: &[u8]) -> (u16, Vec<u8>);
}

/// Fixed-capacity registry of handlers keyed by dispatcher ID.
pub struct DispatcherTable {
    handlers: Vec<Option<Box<dyn Dispatcher>>>,
}

impl DispatcherTable {
    pub fn new() -> Self {
        Self {
            handlers: (0..dispatcher::COUNT).map(|_| None).collect(),
        }
    }

    pub fn register(&mut self, id: u16, handler: Box<dyn Dispatcher>) {
        assert!(
            id < dispatcher::COUNT,
            "dispatcher id {id} outside the fixed table"
        );
        self.handlers[id as usize] = Some(handler);
    }

    pub fn dispatch(&mut self, id: u16, command: u16, payload: &[u8]) -> (u16, Vec<u8>) {
        match self.handlers.get_mut(id as usize) {
            Some(Some(handler)) => handler.handle(command, payload),
            _ => {
                debug!(id, command, "frame for unknown dispatcher");
                (status::INVALID_DISPATCHER, Vec::new())
            }
        }
    }
}

impl Default for DispatcherTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameRouter for DispatcherTable {
    fn route(&mut self, dispatcher: u16, command: u16, payload: &[u8]) -> (u16, Vec<u8>) {
        self.dispatch(dispatcher, command, payload)
    }
}

/// Doorbell-driven drain worker: the single inbound consumer while
/// attached. Response frames complete their registered exchange; request
/// frames are routed and answered.
pub struct ServiceLoop {
    transport: Arc<Transport>,
    router: Box<dyn FrameRouter>,
}

impl ServiceLoop {
    pub fn new(transport: Arc<Transport>, router: Box<dyn FrameRouter>) -> Self {
        transport.attach_worker();
        Self { transport, router }
    }

    /// Process every complete frame currently buffered. Returns the number
    /// handled; stops as soon as the ring no longer holds a complete frame.
    pub fn drain(&mut self) -> Result<usize, TransportError> {
        let mut handled = 0;
        while let Some(frame) = self.transport.poll_frame()? {
            handled += 1;
            let Some(frame) = self.transport.complete_pending(frame) else {
                continue;
            };
            trace!(
                dispatcher = frame.dispatcher(),
                command = frame.command(),
                sequence = frame.sequence,
                "guest request"
            );
            let (status, reply) =
                self.router
                    .route(frame.dispatcher(), frame.command(), &frame.payload);
            self.transport.send_response(frame.sequence, status, &reply)?;
        }
        Ok(handled)
    }

    /// Drain until `stop` is set, sleeping on the doorbell signal between
    /// rounds.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<(), TransportError> {
        const IDLE_WAIT: Duration = Duration::from_millis(2);
        while !stop.load(Ordering::Acquire) {
            if self.drain()? == 0 {
                self.transport.wait_inbound(IDLE_WAIT);
            }
        }
        Ok(())
    }
}

impl Drop for ServiceLoop {
    fn drop(&mut self) {
        self.transport.detach_worker();
    }
}
