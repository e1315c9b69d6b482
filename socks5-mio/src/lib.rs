//! A concrete, `mio`-backed [`ReadinessNotifier`] and the run loop that drives a
//! [`Server`] with it.
//!
//! The core never polls anything itself; this crate is where an actual reactor lives.
//! Registration uses edge-triggered interest, and writable subscription is implemented as
//! a `reregister` that adds `Ready::writable()` to the existing interest set rather than a
//! second registration for the same fd — the interest-toggling strategy the core's design
//! notes call for.

use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use mio::unix::EventedFd;
use mio::{Events, Poll, PollOpt, Ready, Token};
use slog::Logger;

use socks5_core::notifier::{EventMask, Notification, ReadinessNotifier};
use socks5_core::server::Server;

/// Wraps a single `mio::Poll`. One `MioNotifier` backs one `Server`.
pub struct MioNotifier {
    poll: Poll,
}

impl MioNotifier {
    pub fn new() -> io::Result<Self> {
        Ok(MioNotifier { poll: Poll::new()? })
    }

    fn poll_once(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<usize> {
        self.poll.poll(events, timeout)
    }
}

impl ReadinessNotifier for MioNotifier {
    fn register_read(&mut self, fd: RawFd) -> io::Result<()> {
        self.poll.register(&EventedFd(&fd), Token(fd as usize), Ready::readable(), PollOpt::edge())
    }

    fn register_write(&mut self, fd: RawFd) -> io::Result<()> {
        self.poll.reregister(&EventedFd(&fd), Token(fd as usize), Ready::readable() | Ready::writable(), PollOpt::edge())
    }

    fn unregister_write(&mut self, fd: RawFd) -> io::Result<()> {
        self.poll.reregister(&EventedFd(&fd), Token(fd as usize), Ready::readable(), PollOpt::edge())
    }

    fn unregister_all(&mut self, fd: RawFd) -> io::Result<()> {
        self.poll.deregister(&EventedFd(&fd))
    }
}

/// The periodic housekeeping tick: on `interval`, every connection still
/// mid-handshake older than `handshake_timeout` is torn down.
#[derive(Debug, Clone, Copy)]
pub struct Housekeeping {
    pub interval: Duration,
    pub handshake_timeout: Duration,
}

/// One poll-and-dispatch cycle shared by [`run_forever`] and [`run_until`]: wait for
/// readiness, translate `mio`'s events into [`Notification`]s, hand the batch to the
/// server, then run housekeeping if its interval has elapsed.
fn drive_one_cycle(
    server: &mut Server<MioNotifier>,
    events: &mut Events,
    poll_timeout: Duration,
    housekeeping: Housekeeping,
    last_housekeeping: &mut Instant,
    log: &Logger,
) -> io::Result<()> {
    server.notifier_mut().poll_once(events, Some(poll_timeout))?;

    let notifications: Vec<Notification> = events
        .iter()
        .map(|event| {
            let mut mask = EventMask::empty();
            if event.readiness().is_readable() {
                mask |= EventMask::READABLE;
            }
            if event.readiness().is_writable() {
                mask |= EventMask::WRITABLE;
            }
            Notification { fd: event.token().0 as RawFd, events: mask }
        })
        .collect();

    if !notifications.is_empty() {
        if let Err(batch) = server.process_io_events(&notifications) {
            slog::warn!(log, "batch of readiness notifications reported failures"; "error" => %batch);
        }
    }

    if last_housekeeping.elapsed() >= housekeeping.interval {
        server.reap_expired_handshakes(housekeeping.handshake_timeout);
        *last_housekeeping = Instant::now();
    }
    Ok(())
}

/// Runs `server`'s readiness loop until `shutdown` is observed set, checked between poll
/// cycles so a signal handler can request an orderly stop. On return, every live
/// connection has already been torn down.
pub fn run_forever(
    server: &mut Server<MioNotifier>,
    shutdown: &AtomicBool,
    poll_timeout: Duration,
    housekeeping: Housekeeping,
    log: &Logger,
) -> io::Result<()> {
    let listener_fd = server.listener_fd();
    server.notifier_mut().register_read(listener_fd)?;

    let mut events = Events::with_capacity(1024);
    let mut last_housekeeping = Instant::now();

    while !shutdown.load(Ordering::SeqCst) {
        drive_one_cycle(server, &mut events, poll_timeout, housekeeping, &mut last_housekeeping, log)?;
    }

    slog::info!(log, "shutdown flag observed, tearing down live connections"; "live" => server.registry_len());
    server.teardown_all();
    Ok(())
}

/// Like [`run_forever`], but returns after `max_cycles` poll iterations instead of waiting
/// on the shutdown flag. Used by tests and by embedders that want to drive the loop from
/// their own outer control flow.
pub fn run_until(
    server: &mut Server<MioNotifier>,
    max_cycles: usize,
    poll_timeout: Duration,
    housekeeping: Housekeeping,
    log: &Logger,
) -> io::Result<()> {
    let listener_fd = server.listener_fd();
    server.notifier_mut().register_read(listener_fd)?;

    let mut events = Events::with_capacity(1024);
    let mut last_housekeeping = Instant::now();

    for _ in 0..max_cycles {
        drive_one_cycle(server, &mut events, poll_timeout, housekeeping, &mut last_housekeeping, log)?;
    }
    Ok(())
}
