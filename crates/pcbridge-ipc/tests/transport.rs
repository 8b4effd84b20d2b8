use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use pcbridge_ipc::ring::{Direction, RingBuffer};
use pcbridge_ipc::transport::{NoopDoorbell, Transport, TransportError};
use pcbridge_ipc::{Dispatcher, DispatcherTable, ServiceLoop};
use pcbridge_protocol::consts::{dispatcher, status};
use pcbridge_protocol::frame::{RequestHeader, ResponseHeader};
use pcbridge_protocol::HEADER_SIZE;

/// The guest's view of the two rings: reads what the host transmits on the
/// outbound ring and injects traffic into the host's inbound ring.
struct GuestEnd {
    cmd: Arc<RingBuffer>,
    rsp: Arc<RingBuffer>,
    host: Arc<Transport>,
}

fn loopback(capacity: usize) -> (Arc<Transport>, GuestEnd) {
    let outbound = Arc::new(RingBuffer::new(capacity, Direction::Outbound).unwrap());
    let inbound = Arc::new(RingBuffer::new(capacity, Direction::Inbound).unwrap());
    let host = Arc::new(Transport::new(
        outbound.clone(),
        inbound.clone(),
        Arc::new(NoopDoorbell),
    ));
    let guest = GuestEnd {
        cmd: outbound,
        rsp: inbound,
        host: host.clone(),
    };
    (host, guest)
}

impl GuestEnd {
    fn next_request(&self) -> Option<(RequestHeader, Vec<u8>)> {
        let mut hdr = [0u8; HEADER_SIZE];
        if self.cmd.peek(&mut hdr) < HEADER_SIZE {
            return None;
        }
        let header = RequestHeader::decode(&hdr).unwrap();
        let total = HEADER_SIZE + header.payload_len as usize;
        if self.cmd.used() < total {
            return None;
        }
        self.cmd.skip(HEADER_SIZE).unwrap();
        let mut payload = vec![0u8; header.payload_len as usize];
        assert_eq!(self.cmd.read(&mut payload), payload.len());
        Some((header, payload))
    }

    fn wait_request(&self) -> (RequestHeader, Vec<u8>) {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if let Some(req) = self.next_request() {
                return req;
            }
            assert!(Instant::now() < deadline, "no request from host");
            std::thread::sleep(Duration::from_micros(50));
        }
    }

    fn next_response(&self) -> Option<(ResponseHeader, Vec<u8>)> {
        let mut hdr = [0u8; HEADER_SIZE];
        if self.cmd.peek(&mut hdr) < HEADER_SIZE {
            return None;
        }
        let header = ResponseHeader::decode(&hdr).unwrap();
        let total = HEADER_SIZE + header.payload_len as usize;
        if self.cmd.used() < total {
            return None;
        }
        self.cmd.skip(HEADER_SIZE).unwrap();
        let mut payload = vec![0u8; header.payload_len as usize];
        assert_eq!(self.cmd.read(&mut payload), payload.len());
        Some((header, payload))
    }

    fn wait_response(&self) -> (ResponseHeader, Vec<u8>) {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if let Some(rsp) = self.next_response() {
                return rsp;
            }
            assert!(Instant::now() < deadline, "no response from host");
            std::thread::sleep(Duration::from_micros(50));
        }
    }

    fn respond(&self, sequence: u32, status: u16, payload: &[u8]) {
        let mut frame = ResponseHeader {
            status,
            sequence,
            payload_len: payload.len() as u32,
        }
        .encode()
        .to_vec();
        frame.extend_from_slice(payload);
        self.rsp.write(&frame).unwrap();
        self.host.notify_inbound();
    }

    fn send_request(&self, sequence: u32, dispatcher: u16, command: u16, payload: &[u8]) {
        let mut frame = RequestHeader {
            dispatcher,
            command,
            sequence,
            payload_len: payload.len() as u32,
        }
        .encode()
        .to_vec();
        frame.extend_from_slice(payload);
        self.rsp.write(&frame).unwrap();
        self.host.notify_inbound();
    }

    fn inject_raw(&self, bytes: &[u8]) {
        self.rsp.write(bytes).unwrap();
        self.host.notify_inbound();
    }
}

#[test]
fn sequences_start_at_one_and_increment() {
    let (host, guest) = loopback(16384);
    assert_eq!(host.send_command(dispatcher::CORE, 3, b"").unwrap(), 1);
    assert_eq!(host.send_command(dispatcher::CORE, 3, b"").unwrap(), 2);
    let (first, _) = guest.wait_request();
    let (second, _) = guest.wait_request();
    assert_eq!(first.sequence, 1);
    assert_eq!(second.sequence, 2);
}

#[test]
fn receive_resynchronizes_after_corrupt_header() {
    let (host, guest) = loopback(16384);

    // A corrupted stretch of stream, then a well-formed response.
    guest.inject_raw(&[0u8; 7]);
    guest.respond(42, status::SUCCESS, b"after the noise");

    let mut buf = [0u8; 64];
    let response = host
        .receive_response(0, Duration::from_secs(1), &mut buf)
        .unwrap();
    assert_eq!(response.sequence, 42);
    assert_eq!(response.payload_len, 15);
    assert_eq!(&buf[..15], b"after the noise");
}

#[test]
fn zero_timeout_returns_would_block() {
    let (host, _guest) = loopback(16384);
    let mut buf = [0u8; 16];
    assert!(matches!(
        host.receive_response(1, Duration::ZERO, &mut buf),
        Err(TransportError::WouldBlock)
    ));
}

#[test]
fn missing_response_times_out() {
    let (host, _guest) = loopback(16384);
    let mut buf = [0u8; 16];
    let started = Instant::now();
    assert!(matches!(
        host.receive_response(1, Duration::from_millis(25), &mut buf),
        Err(TransportError::Timeout)
    ));
    assert!(started.elapsed() >= Duration::from_millis(25));
}

#[test]
fn frames_for_other_sequences_are_skipped() {
    let (host, guest) = loopback(16384);
    guest.respond(99, status::SUCCESS, b"not yours");
    guest.respond(5, status::SUCCESS, b"yours");

    let mut buf = [0u8; 64];
    let response = host
        .receive_response(5, Duration::from_secs(1), &mut buf)
        .unwrap();
    assert_eq!(response.sequence, 5);
    assert_eq!(&buf[..response.payload_len], b"yours");
}

#[test]
fn oversized_payload_is_discarded_past_caller_buffer() {
    let (host, guest) = loopback(16384);
    let payload: Vec<u8> = (0u8..32).collect();
    guest.respond(7, status::SUCCESS, &payload);

    let mut buf = [0u8; 8];
    let response = host
        .receive_response(7, Duration::from_secs(1), &mut buf)
        .unwrap();
    assert_eq!(response.payload_len, 32);
    assert_eq!(&buf, &payload[..8]);
    // The excess must have been consumed, not left to desync the stream.
    assert_eq!(host.inbound_ring().used(), 0);
}

#[test]
fn transact_round_trip_without_worker() {
    let (host, guest) = loopback(16384);

    let server = std::thread::spawn(move || {
        let (header, payload) = guest.wait_request();
        assert_eq!(header.dispatcher, dispatcher::CORE);
        assert_eq!(header.command, 3);
        guest.respond(header.sequence, status::SUCCESS, &payload);
    });

    let reply = host
        .transact(dispatcher::CORE, 3, b"ping me", Duration::from_secs(2))
        .unwrap();
    assert_eq!(reply, b"ping me");
    server.join().unwrap();
}

#[test]
fn transact_maps_failure_status_to_error() {
    let (host, guest) = loopback(16384);

    let server = std::thread::spawn(move || {
        let (header, _) = guest.wait_request();
        guest.respond(header.sequence, status::BUSY, b"");
    });

    let err = host
        .transact(dispatcher::STORAGE, 1, b"", Duration::from_secs(2))
        .unwrap_err();
    assert!(matches!(
        err,
        TransportError::Command {
            status: status::BUSY
        }
    ));
    server.join().unwrap();
}

#[test]
fn ring_full_is_reported_on_send() {
    let (host, _guest) = loopback(4096);
    host.send_command(dispatcher::STORAGE, 1, &[0u8; 3000]).unwrap();
    let err = host
        .send_command(dispatcher::STORAGE, 1, &[0u8; 3000])
        .unwrap_err();
    assert!(matches!(err, TransportError::RingFull { .. }));
}

struct EchoDispatcher;

impl Dispatcher for EchoDispatcher {
    fn handle(&mut self, command: u16, payload: &[u8]) -> (u16, Vec<u8>) {
        match command {
            1 => (status::SUCCESS, payload.to_vec()),
            _ => (status::INVALID_COMMAND, Vec::new()),
        }
    }
}

#[test]
fn service_loop_routes_requests_and_answers() {
    let (host, guest) = loopback(16384);
    let mut table = DispatcherTable::new();
    table.register(dispatcher::INPUT, Box::new(EchoDispatcher));
    let mut service = ServiceLoop::new(host.clone(), Box::new(table));

    guest.send_request(1001, dispatcher::INPUT, 1, b"key event");
    guest.send_request(1002, dispatcher::INPUT, 9, b"");
    guest.send_request(1003, 42, 1, b"");
    assert_eq!(service.drain().unwrap(), 3);

    let (echo, payload) = guest.wait_response();
    assert_eq!(echo.sequence, 1001);
    assert_eq!(echo.status, status::SUCCESS);
    assert_eq!(payload, b"key event");

    let (bad_cmd, _) = guest.wait_response();
    assert_eq!(bad_cmd.sequence, 1002);
    assert_eq!(bad_cmd.status, status::INVALID_COMMAND);

    let (bad_disp, _) = guest.wait_response();
    assert_eq!(bad_disp.sequence, 1003);
    assert_eq!(bad_disp.status, status::INVALID_DISPATCHER);
}

#[test]
fn concurrent_transacts_each_get_their_own_response() {
    let (host, guest) = loopback(16384);
    let mut service = ServiceLoop::new(host.clone(), Box::new(DispatcherTable::new()));

    let stop = Arc::new(AtomicBool::new(false));
    let stop_worker = stop.clone();
    let worker = std::thread::spawn(move || {
        service.run(&stop_worker).unwrap();
    });

    // The guest collects both outstanding requests, then answers them in
    // reverse arrival order.
    let responder = std::thread::spawn(move || {
        let first = guest.wait_request();
        let second = guest.wait_request();
        for (header, payload) in [second, first] {
            let mut reply = b"re:".to_vec();
            reply.extend_from_slice(&payload);
            guest.respond(header.sequence, status::SUCCESS, &reply);
        }
    });

    let host_a = host.clone();
    let a = std::thread::spawn(move || {
        host_a
            .transact(dispatcher::CORE, 3, b"alpha", Duration::from_secs(2))
            .unwrap()
    });
    let host_b = host.clone();
    let b = std::thread::spawn(move || {
        host_b
            .transact(dispatcher::CORE, 3, b"bravo", Duration::from_secs(2))
            .unwrap()
    });

    assert_eq!(a.join().unwrap(), b"re:alpha");
    assert_eq!(b.join().unwrap(), b"re:bravo");

    responder.join().unwrap();
    stop.store(true, Ordering::Release);
    host.notify_inbound();
    worker.join().unwrap();
}
