//! Sockets: resolution, the interruptible buffered stream, and its
//! lifecycle state machine.

mod buffer;
pub mod resolve;
mod state;
pub mod stream;

pub(crate) use state::Wants;

pub use state::State;
pub use stream::{Interrupter, SocketStream, DEFAULT_TIMEOUT};
