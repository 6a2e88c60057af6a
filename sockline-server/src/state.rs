//! Connection lifecycle state
//!
//! `Open -> Closing -> Closed`, or `Open -> Closed` on the kill path. No state
//! is ever re-entered. Both connection loops and every handle read and move
//! the state concurrently, so transitions are single atomic operations.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    /// Handshake done, data flows both ways
    Open = 0,
    /// A close frame has been sent or received; only close traffic remains
    Closing = 1,
    /// The stream is torn down
    Closed = 2,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Open,
            1 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "Open"),
            Self::Closing => write!(f, "Closing"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// Atomically updated [`ConnectionState`]
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(ConnectionState::Open as u8))
    }

    pub(crate) fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// `Open -> Closing`. Returns false if the connection had already left `Open`.
    pub(crate) fn begin_closing(&self) -> bool {
        self.0
            .compare_exchange(
                ConnectionState::Open as u8,
                ConnectionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Move to `Closed`, returning the previous state unless it was already `Closed`.
    pub(crate) fn mark_closed(&self) -> Option<ConnectionState> {
        let prev = self.0.swap(ConnectionState::Closed as u8, Ordering::AcqRel);
        match ConnectionState::from_u8(prev) {
            ConnectionState::Closed => None,
            state => Some(state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), ConnectionState::Open);

        assert!(cell.begin_closing());
        assert!(!cell.begin_closing());
        assert_eq!(cell.get(), ConnectionState::Closing);

        assert_eq!(cell.mark_closed(), Some(ConnectionState::Closing));
        assert_eq!(cell.mark_closed(), None);
        assert!(!cell.begin_closing());
        assert_eq!(cell.get(), ConnectionState::Closed);
    }

    #[test]
    fn test_kill_from_open() {
        let cell = StateCell::new();
        assert_eq!(cell.mark_closed(), Some(ConnectionState::Open));
        assert_eq!(cell.get(), ConnectionState::Closed);
    }

    #[test]
    fn test_single_winner_under_contention() {
        use std::sync::Arc;

        let cell = Arc::new(StateCell::new());
        let winners: usize = (0..8)
            .map(|_| {
                let cell = cell.clone();
                std::thread::spawn(move || cell.begin_closing())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|t| t.join().unwrap() as usize)
            .sum();
        assert_eq!(winners, 1);
    }
}
