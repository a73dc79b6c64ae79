//! Error types surfaced by the socket stream.
//!
//! All stream operations record their failure in the stream's sticky
//! `last_error` slot (cleared at the start of the next operation) in addition
//! to returning it, so boolean-returning operations such as `connect` stay
//! inspectable after the fact. Errors are cheaply cloneable for that reason:
//! OS errors are held behind an `Arc`.

use crate::tls::TlsError;
use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Error produced by [`SocketStream`](crate::net::SocketStream) operations.
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    /// Name resolution failed.
    #[error("address resolution failed: {0}")]
    Resolve(#[source] Arc<io::Error>),

    /// The operation deadline elapsed before the socket became ready.
    #[error("operation timed out")]
    Timeout,

    /// The stream was interrupted from another thread.
    #[error("operation interrupted")]
    Interrupted,

    /// The TCP handshake completed with a non-zero `SO_ERROR`.
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] Arc<io::Error>),

    /// A socket syscall failed.
    #[error("socket i/o error: {0}")]
    Io(#[source] Arc<io::Error>),

    /// A TLS operation failed (want-read/want-write are not errors and are
    /// handled internally as readiness waits).
    #[error("tls error: {0}")]
    Tls(#[from] TlsError),

    /// The peer closed the connection where more data was required, for
    /// example mid TLS handshake.
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// Caller misuse of the stream API.
    #[error("logic error: {0}")]
    Logic(&'static str),
}

/// Discriminant of a [`StreamError`], handy for assertions and matching
/// without destructuring the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamErrorKind {
    /// See [`StreamError::Resolve`].
    Resolve,
    /// See [`StreamError::Timeout`].
    Timeout,
    /// See [`StreamError::Interrupted`].
    Interrupted,
    /// See [`StreamError::ConnectFailed`].
    ConnectFailed,
    /// See [`StreamError::Io`].
    Io,
    /// See [`StreamError::Tls`].
    Tls,
    /// See [`StreamError::UnexpectedEof`].
    UnexpectedEof,
    /// See [`StreamError::Logic`].
    Logic,
}

impl StreamError {
    /// Wrap an OS error from the resolver.
    pub fn resolve(err: io::Error) -> Self {
        Self::Resolve(Arc::new(err))
    }

    /// Wrap a connect-phase OS error.
    pub fn connect_failed(err: io::Error) -> Self {
        Self::ConnectFailed(Arc::new(err))
    }

    /// The discriminant of this error.
    #[must_use]
    pub fn kind(&self) -> StreamErrorKind {
        match self {
            Self::Resolve(_) => StreamErrorKind::Resolve,
            Self::Timeout => StreamErrorKind::Timeout,
            Self::Interrupted => StreamErrorKind::Interrupted,
            Self::ConnectFailed(_) => StreamErrorKind::ConnectFailed,
            Self::Io(_) => StreamErrorKind::Io,
            Self::Tls(_) => StreamErrorKind::Tls,
            Self::UnexpectedEof => StreamErrorKind::UnexpectedEof,
            Self::Logic(_) => StreamErrorKind::Logic,
        }
    }
}

impl From<io::Error> for StreamError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<StreamError> for io::Error {
    fn from(err: StreamError) -> Self {
        let kind = match err.kind() {
            StreamErrorKind::Timeout => io::ErrorKind::TimedOut,
            StreamErrorKind::Interrupted => io::ErrorKind::Interrupted,
            StreamErrorKind::UnexpectedEof => io::ErrorKind::UnexpectedEof,
            StreamErrorKind::ConnectFailed => io::ErrorKind::ConnectionRefused,
            StreamErrorKind::Logic => io::ErrorKind::InvalidInput,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}
