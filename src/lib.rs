//! Interruptible synchronous networking and task execution.
//!
//! Three pieces, usable together or alone:
//!
//! - [`SocketStream`]: a buffered TCP stream where every blocking call is
//!   bounded by a timeout and can be aborted from another thread through an
//!   [`Interrupter`]. TLS can be entered and left mid-connection with the
//!   same stream object.
//! - [`WorkerPool`]: a FIFO thread pool that resizes at runtime and can
//!   park tasks on a [`CompletionSource`] until it fires.
//! - [`Scheduler`]: a single thread that runs tasks at absolute deadlines.
//!
//! Every submitted task resolves through a [`TaskHandle`] to exactly one of
//! completed, panicked, or abandoned.
//!
//! ```no_run
//! use std::io::{Read, Write};
//! use tauline::SocketStream;
//!
//! # fn main() -> Result<(), tauline::StreamError> {
//! let mut stream = SocketStream::new()?;
//! stream.set_timeout(std::time::Duration::from_secs(5));
//! if stream.connect_port("example.com", 80) {
//!     stream.write_all(b"GET / HTTP/1.0\r\nHost: example.com\r\n\r\n")?;
//!     stream.flush()?;
//!     let mut response = Vec::new();
//!     stream.read_to_end(&mut response)?;
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod net;
pub mod pool;
pub mod scheduler;
pub mod task;
pub mod tls;

pub use error::{StreamError, StreamErrorKind};
pub use net::{Interrupter, SocketStream, State, DEFAULT_TIMEOUT};
pub use pool::{CompletionSource, PoolOptions, ResizeHandle, WorkerPool};
pub use scheduler::Scheduler;
pub use task::{Job, TaskHandle, TaskOutcome};
pub use tls::{TlsError, TlsSession};
