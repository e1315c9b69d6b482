//! The server core: listener lifecycle, the accept-drain loop, and readiness-event routing.

use std::net::{SocketAddr, TcpStream};
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};

use slog::Logger;
use socket2::{Domain, Socket, Type};

use crate::client::StepOutcome;
use crate::error::{BatchError, ServerError};
use crate::handler::RequestHandler;
use crate::notifier::{EventMask, Notification, ReadinessNotifier};
use crate::registry::{ClientPool, Registry};

/// External configuration the server is constructed with. `acquire`/`release` and the
/// readiness-subscription calls are represented by the [`ClientPool`] and
/// [`ReadinessNotifier`] trait objects a `Server` is built with, rather than bare function
/// pointers, since Rust's trait objects are the idiomatic shape for this seam.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listener_address: SocketAddr,
    pub backlog: i32,
    pub max_methods: u8,
}

/// Owns the listener, the client registry, and the collaborators an embedder supplies:
/// a client-resource pool, a request handler, and a concrete readiness notifier.
pub struct Server<N: ReadinessNotifier> {
    listener: Socket,
    registry: Registry,
    pool: Box<dyn ClientPool>,
    handler: Box<dyn RequestHandler>,
    notifier: N,
    config: ServerConfig,
    log: Logger,
}

impl<N: ReadinessNotifier> Server<N> {
    /// Binds a non-blocking, `SO_REUSEADDR` listener to `config.listener_address`. Does not
    /// issue `listen` — call [`Server::begin_listening`] once the embedder is ready to
    /// subscribe the listener to readiness and accept connections.
    pub fn construct(
        config: ServerConfig,
        pool: Box<dyn ClientPool>,
        handler: Box<dyn RequestHandler>,
        notifier: N,
        log: Logger,
    ) -> Result<Self, ServerError> {
        let domain = if config.listener_address.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
        let socket = Socket::new(domain, Type::STREAM, None).map_err(ServerError::Bind)?;
        socket.set_reuse_address(true).map_err(ServerError::Bind)?;
        socket.set_nonblocking(true).map_err(ServerError::Bind)?;
        socket.bind(&config.listener_address.into()).map_err(ServerError::Bind)?;
        Ok(Server { listener: socket, registry: Registry::new(), pool, handler, notifier, config, log })
    }

    pub fn listener_fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }

    /// The address the listener actually bound to; useful when `config.listener_address`
    /// asked for an ephemeral port (`:0`).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr().map(|a| a.as_socket().expect("listener bound to an AF_INET(6) address"))
    }

    /// Exposes the concrete notifier so an embedder's run loop (e.g. `socks5-mio`'s
    /// `run_forever`) can drive its own `poll`/`wait` call; the core never polls itself.
    pub fn notifier_mut(&mut self) -> &mut N {
        &mut self.notifier
    }

    pub fn begin_listening(&mut self) -> Result<(), ServerError> {
        self.listener.listen(self.config.backlog).map_err(ServerError::Listen)
    }

    /// Routes a batch of readiness notifications by fd, attempting every one even after an
    /// earlier failure and surfacing every per-fd failure together.
    pub fn process_io_events(&mut self, notifications: &[Notification]) -> Result<(), BatchError> {
        let mut batch = BatchError::default();
        for notification in notifications {
            if let Err(err) = self.dispatch_one(notification) {
                batch.failures.push((notification.fd, err));
            }
        }
        if batch.is_empty() {
            Ok(())
        } else {
            Err(batch)
        }
    }

    fn dispatch_one(&mut self, notification: &Notification) -> Result<(), ServerError> {
        if notification.events.is_empty() {
            return Err(ServerError::EmptyNotification(notification.fd));
        }

        if notification.fd == self.listener_fd() {
            if notification.events.contains(EventMask::READABLE) {
                self.accept_drain_loop()?;
            }
            return Ok(());
        }

        if !self.registry.contains(notification.fd) {
            return Err(ServerError::UnknownFd(notification.fd));
        }

        self.step(notification.fd)
    }

    /// Drains every pending connection off the listener, per the edge-triggered discipline:
    /// a single readable notification can represent an arbitrary backlog of connections.
    fn accept_drain_loop(&mut self) -> Result<(), ServerError> {
        let mut accepted_any = false;
        loop {
            match self.listener.accept() {
                Ok((socket, addr)) => {
                    accepted_any = true;
                    if let Err(err) = self.accept_one(socket, addr.as_socket().expect("accepted socket carries a SocketAddr")) {
                        slog::info!(self.log, "dropping newly accepted connection"; "error" => %err);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    if accepted_any {
                        return Ok(());
                    }
                    return Err(ServerError::Accept(e));
                }
            }
        }
    }

    fn accept_one(&mut self, socket: Socket, peer_address: SocketAddr) -> Result<(), ServerError> {
        socket.set_nonblocking(true).map_err(ServerError::Accept)?;
        let fd = socket.as_raw_fd();
        // SAFETY: `fd` was just produced by `Socket::accept` above and is transferred, not
        // duplicated — `socket` is consumed by `into_raw_fd` inside this conversion.
        let stream: TcpStream = unsafe { TcpStream::from_raw_fd(socket.into_raw_fd()) };

        let mut client = self.pool.acquire();
        client.activate(stream, peer_address);

        if let Err(err) = self.registry.register(fd, client) {
            if let Some(mut client) = self.registry.deregister(fd) {
                client.close();
                self.pool.release(client);
            }
            return Err(err);
        }

        if let Err(e) = self.notifier.register_read(fd) {
            self.teardown(fd);
            return Err(ServerError::Notifier(e));
        }

        slog::debug!(self.log, "accepted connection"; "fd" => fd, "peer" => %peer_address);
        Ok(())
    }

    /// Drives one client as far as `Client::advance` can take it, then reconciles its
    /// writable-readiness subscription or tears it down, whichever the outcome calls for.
    fn step(&mut self, fd: RawFd) -> Result<(), ServerError> {
        let outcome = {
            let client = self.registry.get_mut(fd).expect("checked by caller");
            client.advance(self.handler.as_mut())
        };
        match outcome {
            Ok(StepOutcome::Parked) => {
                self.sync_writable_subscription(fd)?;
                Ok(())
            }
            Ok(StepOutcome::Closed) => {
                self.teardown(fd);
                Ok(())
            }
            Err(err) => {
                slog::info!(self.log, "tearing down connection after protocol error"; "fd" => fd, "error" => %err);
                self.teardown(fd);
                Ok(())
            }
        }
    }

    /// Toggles the notifier's writable interest to match `Client::writable_subscribed`,
    /// implementing the interest-mask strategy from the crate's alias-fd design note.
    fn sync_writable_subscription(&mut self, fd: RawFd) -> Result<(), ServerError> {
        let wants_writable = self.registry.get_mut(fd).expect("checked by caller").writable_subscribed;
        let result = if wants_writable { self.notifier.register_write(fd) } else { self.notifier.unregister_write(fd) };
        result.map_err(ServerError::Notifier)
    }

    /// Removes `fd` from the registry, drops every readiness subscription for it, and
    /// returns the record to the pool. Idempotent: a second call for an already-gone fd is
    /// a silent no-op, matching the registry's own idempotent `deregister`.
    fn teardown(&mut self, fd: RawFd) {
        if let Some(mut client) = self.registry.deregister(fd) {
            let _ = self.notifier.unregister_all(fd);
            client.close();
            self.pool.release(client);
        }
    }

    /// Tears down every live connection. Used by the embedder's shutdown sequence
    /// and by housekeeping for connections that individually time out.
    pub fn teardown_all(&mut self) {
        let fds: Vec<RawFd> = self.registry.fds().collect();
        for fd in fds {
            self.teardown(fd);
        }
    }

    /// Tears down every client still mid-handshake whose age exceeds `max_age`.
    pub fn reap_expired_handshakes(&mut self, max_age: std::time::Duration) {
        let expired: Vec<RawFd> = self
            .registry
            .iter_mut()
            .filter(|(_, client)| client.is_mid_handshake() && client.age() > max_age)
            .map(|(fd, _)| *fd)
            .collect();
        for fd in expired {
            slog::debug!(self.log, "handshake timed out"; "fd" => fd);
            self.teardown(fd);
        }
    }

    pub fn registry_len(&self) -> usize {
        self.registry.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::RefusingHandler;
    use crate::registry::FreeListPool;
    use std::io::{Read, Write};
    use std::net::TcpStream as StdTcpStream;
    use std::time::Duration;

    /// Records every subscribe/unsubscribe call instead of driving a real reactor; enough
    /// to exercise `Server`'s bookkeeping without pulling in a `mio` dependency here.
    #[derive(Default)]
    struct RecordingNotifier {
        registered_read: Vec<RawFd>,
        writable_subscribed: Vec<RawFd>,
    }

    impl ReadinessNotifier for RecordingNotifier {
        fn register_read(&mut self, fd: RawFd) -> std::io::Result<()> {
            self.registered_read.push(fd);
            Ok(())
        }
        fn register_write(&mut self, fd: RawFd) -> std::io::Result<()> {
            if !self.writable_subscribed.contains(&fd) {
                self.writable_subscribed.push(fd);
            }
            Ok(())
        }
        fn unregister_write(&mut self, fd: RawFd) -> std::io::Result<()> {
            self.writable_subscribed.retain(|&x| x != fd);
            Ok(())
        }
        fn unregister_all(&mut self, fd: RawFd) -> std::io::Result<()> {
            self.registered_read.retain(|&x| x != fd);
            self.writable_subscribed.retain(|&x| x != fd);
            Ok(())
        }
    }

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    fn build_server() -> Server<RecordingNotifier> {
        let config = ServerConfig { listener_address: "127.0.0.1:0".parse().unwrap(), backlog: 16, max_methods: 8 };
        let pool = Box::new(FreeListPool::new(config.max_methods, test_logger()));
        let handler = Box::new(RefusingHandler);
        let mut server =
            Server::construct(config, pool, handler, RecordingNotifier::default(), test_logger()).unwrap();
        server.begin_listening().unwrap();
        server
    }

    fn listener_addr(server: &Server<RecordingNotifier>) -> SocketAddr {
        server.listener.local_addr().unwrap().as_socket().unwrap()
    }

    #[test]
    fn accept_drain_loop_registers_client_and_subscribes_read() {
        let mut server = build_server();
        let addr = listener_addr(&server);
        let _wire = StdTcpStream::connect(addr).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        server
            .process_io_events(&[Notification { fd: server.listener_fd(), events: EventMask::READABLE }])
            .unwrap();

        assert_eq!(server.registry_len(), 1);
        assert_eq!(server.notifier.registered_read.len(), 1);
    }

    #[test]
    fn full_handshake_drives_to_request_accepted_and_closes() {
        let mut server = build_server();
        let addr = listener_addr(&server);
        let mut wire = StdTcpStream::connect(addr).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        server
            .process_io_events(&[Notification { fd: server.listener_fd(), events: EventMask::READABLE }])
            .unwrap();
        let client_fd = *server.registry.fds().collect::<Vec<_>>().first().unwrap();

        wire.write_all(&[0x05, 0x01, 0x00]).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        server.process_io_events(&[Notification { fd: client_fd, events: EventMask::READABLE }]).unwrap();

        let mut method_reply = [0u8; 2];
        wire.read_exact(&mut method_reply).unwrap();
        assert_eq!(method_reply, [0x05, 0x00]);

        wire.write_all(&[0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1, 0, 80]).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        server.process_io_events(&[Notification { fd: client_fd, events: EventMask::READABLE }]).unwrap();

        let mut reply = [0u8; 10];
        wire.read_exact(&mut reply).unwrap();
        assert_eq!(reply[1], 0x01);

        assert_eq!(server.registry_len(), 0);
    }

    #[test]
    fn unknown_fd_notification_is_reported_without_aborting_the_batch() {
        let mut server = build_server();
        let result = server.process_io_events(&[Notification { fd: 999_999, events: EventMask::READABLE }]);
        assert!(result.is_err());
        let batch = result.unwrap_err();
        assert_eq!(batch.failures.len(), 1);
    }

    #[test]
    fn empty_event_mask_is_an_error() {
        let mut server = build_server();
        let result = server.process_io_events(&[Notification { fd: server.listener_fd(), events: EventMask::empty() }]);
        assert!(result.is_err());
    }
}
