//! TLS error type.

use thiserror::Error;

/// Errors from session construction and the TLS record layer.
///
/// Want-read/want-write conditions never surface here; the stream resolves
/// them internally as readiness waits.
#[derive(Debug, Clone, Error)]
pub enum TlsError {
    /// The server name is neither a DNS name nor an IP address.
    #[error("invalid server name: {0}")]
    InvalidDnsName(String),

    /// The handshake was rejected, e.g. certificate verification failed.
    #[error("tls handshake failed: {0}")]
    HandshakeFailed(#[source] rustls::Error),

    /// The operation needs a client session but a server session is
    /// installed.
    #[error("operation requires a client session")]
    NotClient,

    /// Any other record-layer error.
    #[error(transparent)]
    Rustls(#[from] rustls::Error),
}
