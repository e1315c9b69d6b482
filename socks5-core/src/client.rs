//! The per-connection state machine.
//!
//! A [`Client`] advances as far as a single readiness event allows before returning control
//! to the event loop — the "advance-as-far-as-possible" discipline: after every transition
//! the dispatch loop in [`Client::advance`] re-enters `match` against the new phase instead
//! of waiting for another notification, stopping only once further progress needs more I/O.

use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Instant;

use slog::Logger;

use crate::buffer::{DrainOutcome, RecvBuffer, SendBuffer};
use crate::error::ClientError;
use crate::handler::{HandlerAction, RequestHandler};
use crate::protocol::{self, choose_method, encode_method_choice, GreetingMessage, ParseOutcome, RequestMessage, NO_ACCEPTABLE_METHODS};

/// Mirrors the state table: every value but `RequestAccepted` can still make progress
/// inside the core; `RequestAccepted` hands off to the configured [`RequestHandler`].
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum Phase {
    WantGreeting,
    WantSendMethodChoice,
    SendingMethodChoice,
    WantRequest,
    RequestAccepted,
}

/// Which half of the handshake a Client is presently driving. Derivable from `phase`, but
/// stored for dispatch clarity the way the state table names it explicitly.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum Direction {
    Receiving,
    Sending,
}

/// Tagged union of whichever inbound message this Client most recently parsed.
enum ParsedMessage {
    None,
    Greeting(GreetingMessage),
    Request(RequestMessage),
}

/// Outcome of driving a Client one step: either it is still alive (possibly parked), or it
/// has reached a terminal condition and the caller must tear it down.
pub enum StepOutcome {
    Parked,
    Closed,
}

/// A single connection record and everything needed to advance its handshake.
///
/// `stream` and `peer_address` are `None` while the record sits on a [`crate::registry::ClientPool`]
/// free list between connections, mirroring the field being genuinely absent rather than
/// pointed at a dead socket.
pub struct Client {
    stream: Option<TcpStream>,
    peer_address: Option<SocketAddr>,
    pub phase: Phase,
    pub direction: Direction,
    pub writable_subscribed: bool,
    accepted_at: Instant,
    recv_buf: RecvBuffer,
    send_buf: SendBuffer,
    current_request: ParsedMessage,
    max_methods: u8,
    log: Logger,
}

impl Client {
    /// A freshly allocated or recycled record, not yet attached to any socket.
    pub fn vacant(max_methods: u8, log: Logger) -> Self {
        Client {
            stream: None,
            peer_address: None,
            phase: Phase::WantGreeting,
            // WantGreeting always waits on the peer first; see `set_phase` for the mapping
            // every later transition goes through.
            direction: Direction::Receiving,
            writable_subscribed: false,
            accepted_at: Instant::now(),
            recv_buf: RecvBuffer::new(),
            send_buf: SendBuffer::new(),
            current_request: ParsedMessage::None,
            max_methods,
            log,
        }
    }

    /// Attaches a freshly accepted socket to this record, resetting all per-connection
    /// state to its initial values. Called once by the acceptor, never mid-handshake.
    pub fn activate(&mut self, stream: TcpStream, peer_address: SocketAddr) {
        self.stream = Some(stream);
        self.peer_address = Some(peer_address);
        self.phase = Phase::WantGreeting;
        self.direction = Direction::Receiving;
        self.writable_subscribed = false;
        self.accepted_at = Instant::now();
        self.recv_buf = RecvBuffer::new();
        self.send_buf = SendBuffer::new();
        self.current_request = ParsedMessage::None;
    }

    pub fn peer_address(&self) -> SocketAddr {
        self.peer_address.expect("peer_address read on a vacant Client")
    }

    pub fn raw_fd(&self) -> RawFd {
        self.stream.as_ref().expect("raw_fd read on a vacant Client").as_raw_fd()
    }

    /// Shuts both halves of the socket and detaches it, leaving the record vacant again so
    /// it can be recycled through a [`crate::registry::ClientPool`].
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.peer_address = None;
    }

    pub fn age(&self) -> std::time::Duration {
        self.accepted_at.elapsed()
    }

    pub fn is_mid_handshake(&self) -> bool {
        !matches!(self.phase, Phase::RequestAccepted)
    }

    /// Moves to `phase`, keeping `direction` in lockstep: every phase is either waiting on
    /// more bytes from the peer or waiting to finish writing some to it, and `direction`
    /// names which.
    fn set_phase(&mut self, phase: Phase) {
        self.direction = match phase {
            Phase::WantGreeting | Phase::WantRequest => Direction::Receiving,
            Phase::WantSendMethodChoice | Phase::SendingMethodChoice | Phase::RequestAccepted => Direction::Sending,
        };
        self.phase = phase;
    }

    /// Drives the state machine as far as it can go from whichever phase it is currently
    /// in, regardless of whether a readable or writable notification triggered the call —
    /// every phase knows on its own whether it wants to recv, send, or run its immediate
    /// action next. Re-enters the dispatch after every transition rather than returning to
    /// the caller, stopping only once further progress needs a readiness notification that
    /// hasn't arrived yet.
    pub fn advance(&mut self, handler: &mut dyn RequestHandler) -> Result<StepOutcome, ClientError> {
        loop {
            match self.phase {
                Phase::WantGreeting => {
                    if !self.fill_recv_buf()? {
                        return Ok(StepOutcome::Closed);
                    }
                    match protocol::parse_greeting(self.recv_buf.as_slice(), self.max_methods)? {
                        ParseOutcome::Incomplete => {
                            if self.recv_buf.is_full() {
                                return Err(ClientError::BufferExhausted);
                            }
                            return Ok(StepOutcome::Parked);
                        }
                        ParseOutcome::Complete(greeting, consumed) => {
                            self.recv_buf.consume(consumed);
                            self.current_request = ParsedMessage::Greeting(greeting);
                            self.set_phase(Phase::WantSendMethodChoice);
                        }
                    }
                }
                Phase::WantSendMethodChoice => {
                    let methods = match &self.current_request {
                        ParsedMessage::Greeting(g) => g.methods.clone(),
                        _ => unreachable!("WantSendMethodChoice without a parsed greeting"),
                    };
                    match choose_method(&methods) {
                        Some(method) => {
                            let reply = encode_method_choice(method);
                            self.send_buf.enqueue(&reply).map_err(|_| ClientError::BufferExhausted)?;
                            let next = if self.drain_send_buf()? { Phase::WantRequest } else { Phase::SendingMethodChoice };
                            self.set_phase(next);
                        }
                        None => {
                            let reply = encode_method_choice(NO_ACCEPTABLE_METHODS);
                            self.send_buf.enqueue(&reply).map_err(|_| ClientError::BufferExhausted)?;
                            self.drain_send_buf()?;
                            return Err(ClientError::NoAcceptableMethod);
                        }
                    }
                }
                Phase::SendingMethodChoice => {
                    if self.drain_send_buf()? {
                        self.set_phase(Phase::WantRequest);
                    } else {
                        return Ok(StepOutcome::Parked);
                    }
                }
                Phase::WantRequest => {
                    if !self.fill_recv_buf()? {
                        return Ok(StepOutcome::Closed);
                    }
                    match protocol::parse_request(self.recv_buf.as_slice())? {
                        ParseOutcome::Incomplete => {
                            if self.recv_buf.is_full() {
                                return Err(ClientError::BufferExhausted);
                            }
                            return Ok(StepOutcome::Parked);
                        }
                        ParseOutcome::Complete(request, consumed) => {
                            self.recv_buf.consume(consumed);
                            let peer = self.peer_address();
                            slog::info!(self.log, "request accepted"; "peer" => %peer);
                            match handler.handle(&request, peer) {
                                HandlerAction::ReplyAndClose(reply) => {
                                    self.current_request = ParsedMessage::Request(request);
                                    self.send_buf.enqueue(&reply).map_err(|_| ClientError::BufferExhausted)?;
                                    self.set_phase(Phase::RequestAccepted);
                                }
                                HandlerAction::CloseSilently => return Ok(StepOutcome::Closed),
                            }
                        }
                    }
                }
                Phase::RequestAccepted => {
                    if self.drain_send_buf()? {
                        return Ok(StepOutcome::Closed);
                    }
                    return Ok(StepOutcome::Parked);
                }
            }
        }
    }

    /// Reads as much as is available into `recv_buf`. Returns `Ok(false)` on peer EOF, which
    /// is fatal mid-handshake per the component design.
    fn fill_recv_buf(&mut self) -> Result<bool, ClientError> {
        match self.recv_buf.ingress(self.stream.as_mut().expect("I/O attempted on a vacant Client"))? {
            DrainOutcome::Eof => Err(ClientError::PeerClosedDuringHandshake),
            DrainOutcome::WouldBlock | DrainOutcome::Progress(_) => Ok(true),
        }
    }

    /// Drains `send_buf`. Returns `Ok(true)` once fully sent (and unsubscribes writable
    /// readiness if it had been subscribed), `Ok(false)` if bytes remain (subscribing
    /// writable readiness if not already).
    fn drain_send_buf(&mut self) -> Result<bool, ClientError> {
        let outcome = self.send_buf.egress(self.stream.as_mut().expect("I/O attempted on a vacant Client"))?;
        match outcome {
            DrainOutcome::Progress(_) if self.send_buf.is_empty() => {
                self.writable_subscribed = false;
                Ok(true)
            }
            _ => {
                self.writable_subscribed = true;
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::RefusingHandler;
    use std::net::{TcpListener, TcpStream};

    fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        client.set_nonblocking(true).unwrap();
        (client, server)
    }

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    #[test]
    fn happy_greeting_advances_to_want_request_and_replies() {
        let (mut wire, server_side) = loopback_pair();
        let peer = server_side.peer_addr().unwrap();
        let mut client = Client::vacant(8, test_logger());
        client.activate(server_side, peer);
        let mut handler = RefusingHandler;

        use std::io::Write;
        wire.write_all(&[0x05, 0x01, 0x00]).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        matches!(client.advance(&mut handler).unwrap(), StepOutcome::Parked);
        assert_eq!(client.phase, Phase::WantRequest);

        use std::io::Read;
        let mut reply = [0u8; 2];
        std::thread::sleep(std::time::Duration::from_millis(20));
        wire.read_exact(&mut reply).unwrap();
        assert_eq!(reply, [0x05, 0x00]);
    }

    #[test]
    fn split_greeting_over_two_reads_parks_then_completes() {
        let (mut wire, server_side) = loopback_pair();
        let peer = server_side.peer_addr().unwrap();
        let mut client = Client::vacant(8, test_logger());
        client.activate(server_side, peer);
        let mut handler = RefusingHandler;

        use std::io::Write;
        wire.write_all(&[0x05, 0x02]).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let outcome = client.advance(&mut handler).unwrap();
        assert!(matches!(outcome, StepOutcome::Parked));
        assert_eq!(client.phase, Phase::WantGreeting);

        wire.write_all(&[0x00, 0x02]).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        client.advance(&mut handler).unwrap();
        assert_eq!(client.phase, Phase::WantRequest);
    }

    #[test]
    fn unsupported_version_is_fatal() {
        let (mut wire, server_side) = loopback_pair();
        let peer = server_side.peer_addr().unwrap();
        let mut client = Client::vacant(8, test_logger());
        client.activate(server_side, peer);
        let mut handler = RefusingHandler;

        use std::io::Write;
        wire.write_all(&[0x04, 0x01, 0x00]).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let result = client.advance(&mut handler);
        assert!(result.is_err());
    }

    #[test]
    fn no_acceptable_methods_emits_ff_then_fails() {
        let (mut wire, server_side) = loopback_pair();
        let peer = server_side.peer_addr().unwrap();
        let mut client = Client::vacant(8, test_logger());
        client.activate(server_side, peer);
        let mut handler = RefusingHandler;

        use std::io::Write;
        wire.write_all(&[0x05, 0x01, 0x02]).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let result = client.advance(&mut handler);
        assert!(matches!(result, Err(ClientError::NoAcceptableMethod)));

        use std::io::Read;
        let mut reply = [0u8; 2];
        std::thread::sleep(std::time::Duration::from_millis(20));
        wire.read_exact(&mut reply).unwrap();
        assert_eq!(reply, [0x05, 0xFF]);
    }

    #[test]
    fn peer_eof_mid_handshake_is_fatal() {
        let (wire, server_side) = loopback_pair();
        let peer = server_side.peer_addr().unwrap();
        let mut client = Client::vacant(8, test_logger());
        client.activate(server_side, peer);
        let mut handler = RefusingHandler;
        drop(wire);
        std::thread::sleep(std::time::Duration::from_millis(20));
        let result = client.advance(&mut handler);
        assert!(matches!(result, Err(ClientError::PeerClosedDuringHandshake)));
    }
}
