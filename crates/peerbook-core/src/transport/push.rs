//! Push socket contract.

use url::Url;

use super::sink::EventSink;
use crate::error::Result;

/// WebSocket-style ready state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ReadyState {
    pub fn as_u8(self) -> u8 {
        match self {
            ReadyState::Connecting => 0,
            ReadyState::Open => 1,
            ReadyState::Closing => 2,
            ReadyState::Closed => 3,
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }
}

/// Events reported by a push socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    Open,
    /// A text frame.
    Message(String),
    Error(String),
    Close,
}

/// An open (or opening) push socket.
pub trait PushSocket: Send + Sync {
    fn ready_state(&self) -> ReadyState;

    /// Transmit a text frame.
    fn send(&self, text: String) -> Result<()>;

    /// Drop the event handler; no further events are reported.
    fn detach(&self);

    fn close(&self);
}

/// Opens push sockets.
pub trait PushConnector: Send + Sync {
    /// Start opening a socket to `url`, reporting events to `handler`.
    fn open(&self, url: &Url, handler: EventSink<PushEvent>) -> Result<Box<dyn PushSocket>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_state_u8_mapping() {
        for state in [
            ReadyState::Connecting,
            ReadyState::Open,
            ReadyState::Closing,
            ReadyState::Closed,
        ] {
            assert_eq!(ReadyState::from_u8(state.as_u8()), state);
        }
        assert_eq!(ReadyState::from_u8(42), ReadyState::Closed);
    }
}
