//! The request-handling extension point.
//!
//! The distilled protocol stops at `REQUEST_ACCEPTED` with no defined continuation: the
//! upstream dial and relay loop are explicitly out of scope for this core. What happens to
//! an accepted CONNECT request is therefore a pluggable hook rather than a hardcoded dead
//! end, so an embedder can graft on its own upstream-dialing strategy without forking the
//! state machine.

use std::net::SocketAddr;

use crate::protocol::RequestMessage;

/// RFC 1928 §6 reply codes. Only the subset this core can itself produce are named; a
/// `RequestHandler` that performs the upstream dial is free to use the others once it
/// knows the outcome.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
#[repr(u8)]
pub enum ReplyCode {
    Succeeded = 0x00,
    GeneralServerFailure = 0x01,
    CommandNotSupported = 0x07,
    AddressTypeNotSupported = 0x08,
}

/// What the core should do after `RequestHandler::handle` returns.
pub enum HandlerAction {
    /// Queue `reply` (a full RFC 1928 reply, `VER|REP|RSV|ATYP|BND.ADDR|BND.PORT`) onto the
    /// client's send buffer, then tear the connection down once it drains.
    ReplyAndClose(Vec<u8>),
    /// Tear the connection down immediately with no further bytes written.
    CloseSilently,
}

/// Invoked exactly once per connection, the moment a request finishes parsing.
///
/// The core does not dial upstream sockets or relay bytes; it hands the parsed request and
/// the peer's address to this hook and acts on whatever [`HandlerAction`] comes back.
pub trait RequestHandler {
    fn handle(&mut self, request: &RequestMessage, peer: SocketAddr) -> HandlerAction;
}

/// Builds the minimal `VER|REP|RSV|ATYP|BND.ADDR|BND.PORT` reply this core can produce on
/// its own: an IPv4 `0.0.0.0:0` bound address, since no upstream socket was ever opened.
pub fn encode_reply(code: ReplyCode) -> Vec<u8> {
    vec![0x05, code as u8, 0x00, 0x01, 0, 0, 0, 0, 0, 0]
}

/// The default hook: this core never performs the upstream dial, so every CONNECT request
/// it accepts is answered with a `GeneralServerFailure` reply and closed. Embedders that
/// want proxying behavior must supply their own `RequestHandler`.
pub struct RefusingHandler;

impl RequestHandler for RefusingHandler {
    fn handle(&mut self, _request: &RequestMessage, _peer: SocketAddr) -> HandlerAction {
        HandlerAction::ReplyAndClose(encode_reply(ReplyCode::GeneralServerFailure))
    }
}
