//! Error types for peerbook-core.

use thiserror::Error;

/// Main error type for PeerBook client operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from underlying system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The registry has not yet assigned an identifier to this device.
    #[error("unregistered")]
    Unregistered,

    /// Session or push socket failure.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// The registry rejected a one-time code.
    #[error("verification rejected")]
    VerificationRejected,

    /// The operator aborted a prompt.
    #[error("cancelled")]
    Cancelled,

    /// Malformed reply from an admin command or push payload.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Subscription or identity provider failure.
    #[error("provider error: {message}")]
    Provider { message: String },

    /// The connection was closed while the operation was pending.
    #[error("connection closed")]
    ConnectionClosed,
}

impl Error {
    /// Shorthand for a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Error::Transport {
            message: message.into(),
        }
    }

    /// Shorthand for a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol {
            message: message.into(),
        }
    }

    /// Shorthand for a provider error.
    pub fn provider(message: impl Into<String>) -> Self {
        Error::Provider {
            message: message.into(),
        }
    }

    /// Returns true if this error is transient and a later attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Transport { .. } | Error::ConnectionClosed | Error::Io(_)
        )
    }

    /// Returns true if retrying without operator action won't help.
    ///
    /// An unregistered device has to be paired first; a protocol error means
    /// the registry and this client disagree on a payload format.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Unregistered | Error::Protocol { .. })
    }

    /// Returns true if the enclosing flow should end without a failure report.
    pub fn is_silent(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Convenience result type for PeerBook operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_transport() {
        let err = Error::transport("ice failed");
        assert_eq!(err.to_string(), "transport error: ice failed");
    }

    #[test]
    fn error_display_unregistered() {
        assert_eq!(Error::Unregistered.to_string(), "unregistered");
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn transient_errors() {
        assert!(Error::transport("lost").is_transient());
        assert!(Error::ConnectionClosed.is_transient());

        assert!(!Error::Unregistered.is_transient());
        assert!(!Error::Cancelled.is_transient());
        assert!(!Error::protocol("bad").is_transient());
    }

    #[test]
    fn fatal_errors() {
        assert!(Error::Unregistered.is_fatal());
        assert!(Error::protocol("bad json").is_fatal());

        assert!(!Error::transport("lost").is_fatal());
        assert!(!Error::VerificationRejected.is_fatal());
    }

    #[test]
    fn only_cancellation_is_silent() {
        assert!(Error::Cancelled.is_silent());
        assert!(!Error::Unregistered.is_silent());
        assert!(!Error::ConnectionClosed.is_silent());
    }
}
