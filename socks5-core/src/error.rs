use std::fmt;
use std::io;
use std::os::unix::io::RawFd;

/// Violations of the wire format. Always fatal to the connection that produced them.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum ProtocolError {
    UnsupportedVersion(u8),
    NoMethodsOffered,
    TooManyMethods { offered: usize, max: usize },
    UnsupportedCommand(u8),
    UnsupportedAddressType(u8),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::UnsupportedVersion(v) => write!(f, "unsupported protocol version {v:#04x}"),
            ProtocolError::NoMethodsOffered => write!(f, "greeting carried zero authentication methods"),
            ProtocolError::TooManyMethods { offered, max } => {
                write!(f, "greeting offered {offered} methods, more than the {max} accepted")
            }
            ProtocolError::UnsupportedCommand(c) => write!(f, "unsupported request command {c:#04x}"),
            ProtocolError::UnsupportedAddressType(a) => write!(f, "unsupported address type {a:#04x}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Per-connection fatal errors. Every variant leads to teardown of exactly one Client.
#[derive(Debug)]
pub enum ClientError {
    Protocol(ProtocolError),
    /// The greeting carried no method the server can honor.
    NoAcceptableMethod,
    /// The peer closed its half of the connection before the handshake completed.
    PeerClosedDuringHandshake,
    /// The handshake exceeded the bounded recv or send buffer.
    BufferExhausted,
    Io(io::Error),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Protocol(e) => write!(f, "protocol error: {e}"),
            ClientError::NoAcceptableMethod => write!(f, "no acceptable authentication method offered"),
            ClientError::PeerClosedDuringHandshake => write!(f, "peer closed connection mid-handshake"),
            ClientError::BufferExhausted => write!(f, "handshake exceeded the bounded buffer"),
            ClientError::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<io::Error> for ClientError {
    fn from(err: io::Error) -> Self {
        ClientError::Io(err)
    }
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        ClientError::Protocol(err)
    }
}

/// Server-fatal or per-connection-fatal errors raised while accepting connections or
/// dispatching readiness notifications, as opposed to errors that arise mid-handshake
/// inside an already-registered Client (see [`ClientError`]).
#[derive(Debug)]
pub enum ServerError {
    Bind(io::Error),
    Listen(io::Error),
    Accept(io::Error),
    RegistryCollision(RawFd),
    UnknownFd(RawFd),
    /// A notification carried neither `READABLE` nor `WRITABLE`.
    EmptyNotification(RawFd),
    Notifier(io::Error),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Bind(e) => write!(f, "failed to bind listener: {e}"),
            ServerError::Listen(e) => write!(f, "failed to listen: {e}"),
            ServerError::Accept(e) => write!(f, "failed to accept connection: {e}"),
            ServerError::RegistryCollision(fd) => write!(f, "fd {fd} is already registered"),
            ServerError::UnknownFd(fd) => write!(f, "notification for unknown fd {fd}"),
            ServerError::EmptyNotification(fd) => write!(f, "notification for fd {fd} carried no interest bits"),
            ServerError::Notifier(e) => write!(f, "readiness notifier failed: {e}"),
        }
    }
}

impl std::error::Error for ServerError {}

/// Aggregated failures from a single [`crate::Server::process_io_events`] batch. Every
/// notification in the batch is attempted even once earlier ones have failed; this type
/// carries every per-fd failure encountered along the way.
#[derive(Debug, Default)]
pub struct BatchError {
    pub failures: Vec<(RawFd, ServerError)>,
}

impl BatchError {
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of the batch's notifications failed: ", self.failures.len())?;
        for (i, (fd, err)) in self.failures.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "fd {fd}: {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for BatchError {}
