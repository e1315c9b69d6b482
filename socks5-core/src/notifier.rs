//! The abstract readiness-subscription contract the core consumes.
//!
//! The core never polls anything itself; an embedder owns the actual reactor (epoll,
//! kqueue, or `mio` wrapping either) and feeds it [`Notification`] batches. Registration
//! requests flow the other way through [`ReadinessNotifier`].

use std::os::unix::io::RawFd;

use bitflags::bitflags;

bitflags! {
    /// Interest / readiness bits. A [`Notification`] with neither bit set is an error.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EventMask: u8 {
        const READABLE = 0b01;
        const WRITABLE = 0b10;
    }
}

/// One readiness event for one fd, as delivered to `Server::process_io_events`.
#[derive(Debug, Clone, Copy)]
pub struct Notification {
    pub fd: RawFd,
    pub events: EventMask,
}

/// The subscribe/unsubscribe surface a concrete reactor adapter must provide.
///
/// Every method is synchronous and must not re-enter the core: it is called from inside
/// `Server::process_io_events` or the acceptor, both of which already hold exclusive access
/// to the registry.
pub trait ReadinessNotifier {
    /// Registers `fd` for edge-triggered readable notifications. Called once, at accept.
    fn register_read(&mut self, fd: RawFd) -> std::io::Result<()>;

    /// Adds writable interest to `fd`'s existing subscription (interest-mask toggling, not
    /// a second registration — see the crate's notes on the alias-fd Open Question).
    fn register_write(&mut self, fd: RawFd) -> std::io::Result<()>;

    /// Drops writable interest, leaving the readable subscription in place.
    fn unregister_write(&mut self, fd: RawFd) -> std::io::Result<()>;

    /// Drops every subscription for `fd`. Called once during teardown.
    fn unregister_all(&mut self, fd: RawFd) -> std::io::Result<()>;
}
