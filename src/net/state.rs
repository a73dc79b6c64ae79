//! Lifecycle state machine for [`SocketStream`](crate::net::SocketStream).
//!
//! The state lives in an atomic so that `interrupt` can run from any thread
//! without taking the stream lock. Transitions are CAS-based: an interrupter
//! that wins the race to `Interrupting` owns the teardown, and the owning
//! thread observes `Interrupting`/`Interrupted` at its next checkpoint.

use std::sync::atomic::{AtomicU8, Ordering};

/// Stream lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    /// No socket. The initial and post-`close` state.
    Closed = 0,
    /// A connect attempt is in flight on a nonblocking socket.
    Connecting = 1,
    /// Connected and usable.
    Opened = 2,
    /// `shutdown` was called; reads may still drain buffered data.
    Shutdowned = 3,
    /// An interrupter holds the stream mid-teardown.
    Interrupting = 4,
    /// Interrupt teardown finished; the stream needs `close` to recover.
    Interrupted = 5,
}

impl State {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Closed,
            1 => Self::Connecting,
            2 => Self::Opened,
            3 => Self::Shutdowned,
            4 => Self::Interrupting,
            _ => Self::Interrupted,
        }
    }
}

/// Atomic cell holding a [`State`].
#[derive(Debug)]
pub(crate) struct AtomicState(AtomicU8);

impl AtomicState {
    pub(crate) fn new(state: State) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> State {
        State::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: State) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Unconditionally install `state`, returning the previous state.
    pub(crate) fn exchange(&self, state: State) -> State {
        State::from_u8(self.0.swap(state as u8, Ordering::AcqRel))
    }

    /// CAS `current` -> `new`. On failure returns the observed state.
    pub(crate) fn compare_exchange(&self, current: State, new: State) -> Result<State, State> {
        self.0
            .compare_exchange(
                current as u8,
                new as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(State::from_u8)
            .map_err(State::from_u8)
    }
}

/// Readiness direction for a blocking wait on the poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wants {
    Readable,
    Writable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cas_succeeds_from_expected_state() {
        let state = AtomicState::new(State::Closed);
        assert_eq!(
            state.compare_exchange(State::Closed, State::Connecting),
            Ok(State::Closed)
        );
        assert_eq!(state.load(), State::Connecting);
    }

    #[test]
    fn cas_failure_reports_observed_state() {
        let state = AtomicState::new(State::Opened);
        assert_eq!(
            state.compare_exchange(State::Closed, State::Connecting),
            Err(State::Opened)
        );
        assert_eq!(state.load(), State::Opened);
    }

    #[test]
    fn exchange_returns_prior() {
        let state = AtomicState::new(State::Opened);
        assert_eq!(state.exchange(State::Interrupting), State::Opened);
        assert_eq!(state.load(), State::Interrupting);
    }
}
