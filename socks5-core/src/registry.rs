//! The client table and the resource-acquisition hook it sits behind.

use std::collections::HashMap;
use std::os::unix::io::RawFd;

use slog::Logger;

use crate::client::Client;
use crate::error::ServerError;

/// Acquires and releases [`Client`] records on behalf of the server. The embedder is free
/// to allocate fresh records or recycle them from a free list; the core only requires that
/// `acquire` never fails and that `release` is called exactly once per `acquire`. A released
/// record must come back vacant (no attached socket) — the acceptor calls `activate` on it.
pub trait ClientPool {
    fn acquire(&mut self) -> Client;
    fn release(&mut self, client: Client);
}

/// The free-list pool used when an embedder supplies none of its own: recycled records are
/// pushed onto `free` on release and popped from it on acquire, falling back to a fresh
/// allocation once the list runs dry.
pub struct FreeListPool {
    free: Vec<Client>,
    max_methods: u8,
    log: Logger,
}

impl FreeListPool {
    pub fn new(max_methods: u8, log: Logger) -> Self {
        FreeListPool { free: Vec::new(), max_methods, log }
    }
}

impl ClientPool for FreeListPool {
    fn acquire(&mut self) -> Client {
        self.free.pop().unwrap_or_else(|| Client::vacant(self.max_methods, self.log.clone()))
    }

    fn release(&mut self, mut client: Client) {
        client.close();
        self.free.push(client);
    }
}

/// A hash map from socket handle to owned [`Client`], keyed the way the component design
/// specifies: at most one entry per fd, present iff the client is alive and subscribed.
#[derive(Default)]
pub struct Registry {
    clients: HashMap<RawFd, Client>,
}

impl Registry {
    pub fn new() -> Self {
        Registry { clients: HashMap::new() }
    }

    pub fn register(&mut self, fd: RawFd, client: Client) -> Result<(), ServerError> {
        if self.clients.contains_key(&fd) {
            return Err(ServerError::RegistryCollision(fd));
        }
        self.clients.insert(fd, client);
        Ok(())
    }

    /// Idempotent: removing an fd that is not present is not an error, since teardown can
    /// be triggered from more than one path (protocol error, housekeeping timeout, shutdown).
    pub fn deregister(&mut self, fd: RawFd) -> Option<Client> {
        self.clients.remove(&fd)
    }

    pub fn get_mut(&mut self, fd: RawFd) -> Option<&mut Client> {
        self.clients.get_mut(&fd)
    }

    pub fn contains(&self, fd: RawFd) -> bool {
        self.clients.contains_key(&fd)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn fds(&self) -> impl Iterator<Item = RawFd> + '_ {
        self.clients.keys().copied()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&RawFd, &mut Client)> {
        self.clients.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};
    use std::os::unix::io::AsRawFd;

    fn dummy_client() -> (Client, RawFd) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = TcpStream::connect(addr).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        let fd = accepted.as_raw_fd();
        let mut client = Client::vacant(8, slog::Logger::root(slog::Discard, slog::o!()));
        client.activate(accepted, stream.peer_addr().unwrap());
        (client, fd)
    }

    #[test]
    fn register_then_contains() {
        let mut registry = Registry::new();
        let (client, fd) = dummy_client();
        registry.register(fd, client).unwrap();
        assert!(registry.contains(fd));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn register_rejects_duplicate_fd() {
        let mut registry = Registry::new();
        let (client, fd) = dummy_client();
        registry.register(fd, client).unwrap();
        let (client2, _) = dummy_client();
        assert!(matches!(registry.register(fd, client2), Err(ServerError::RegistryCollision(_))));
    }

    #[test]
    fn free_list_pool_recycles_released_records() {
        let mut pool = FreeListPool::new(8, slog::Logger::root(slog::Discard, slog::o!()));
        let (client, _fd) = dummy_client();
        pool.release(client);
        assert_eq!(pool.free.len(), 1);
        let recycled = pool.acquire();
        assert_eq!(recycled.phase, crate::client::Phase::WantGreeting);
        assert!(pool.free.is_empty());
    }

    #[test]
    fn deregister_is_idempotent() {
        let mut registry = Registry::new();
        let (client, fd) = dummy_client();
        registry.register(fd, client).unwrap();
        assert!(registry.deregister(fd).is_some());
        assert!(registry.deregister(fd).is_none());
        assert!(registry.is_empty());
    }
}
