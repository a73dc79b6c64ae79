//! TLS sessions layered over [`SocketStream`](crate::net::SocketStream).
//!
//! Configuration is plain rustls: build an `Arc<ClientConfig>` or
//! `Arc<ServerConfig>` and hand it to the stream's `start_tls_*` /
//! `accept_tls` operations. There is no ambient trust store; a client
//! config always states its roots explicitly.

mod error;
mod session;

pub use error::TlsError;
pub use session::TlsSession;
