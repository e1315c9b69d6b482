//! Single-threaded, readiness-driven SOCKS5 handshake core.
//!
//! This crate owns the protocol codec, the per-connection state machine, and the
//! connection registry described by the embedding server. It never performs I/O
//! readiness polling itself: an embedder drives it by delivering [`notifier::Notification`]
//! values, typically sourced from an `mio`-backed adapter such as `socks5-mio`.

pub mod buffer;
pub mod client;
pub mod error;
pub mod handler;
pub mod notifier;
pub mod protocol;
pub mod registry;
pub mod server;

pub use client::{Client, Phase};
pub use error::{BatchError, ClientError, ProtocolError, ServerError};
pub use handler::{HandlerAction, ReplyCode, RequestHandler};
pub use notifier::{EventMask, Notification, ReadinessNotifier};
pub use registry::ClientPool;
pub use server::{Server, ServerConfig};
