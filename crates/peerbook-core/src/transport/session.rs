//! Session transport contract.
//!
//! A session is the registry-side transport that multiplexes logical
//! channels. Opening a channel yields a [`ChannelReader`]; the channel is
//! closed when every [`ChannelWriter`] for it has been dropped or closed.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use url::Url;

use super::sink::EventSink;
use crate::error::{Error, Result};
use crate::protocol::ChannelRequest;

/// State changes reported by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The transport is established.
    Connected,
    /// The transport failed; carries the failure detail.
    Failed(String),
}

/// Everything needed to create a session.
///
/// Built once per connection attempt; the credential never changes after the
/// session is created.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub url: Url,
    bearer: Option<String>,
}

impl std::fmt::Debug for SessionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRequest")
            .field("url", &self.url.as_str())
            .field("bearer", &self.bearer.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl SessionRequest {
    pub fn new(url: Url, bearer: Option<String>) -> Self {
        Self {
            url,
            bearer: bearer.filter(|t| !t.is_empty()),
        }
    }

    /// Bearer token, if any.
    pub fn bearer(&self) -> Option<&str> {
        self.bearer.as_deref()
    }

    /// Value of the `Authorization` header, if a token was given.
    pub fn authorization(&self) -> Option<String> {
        self.bearer.as_ref().map(|t| format!("Bearer {t}"))
    }
}

/// Receiving half of a logical channel.
#[derive(Debug)]
pub struct ChannelReader {
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl ChannelReader {
    /// Next chunk, or `None` once the channel closed.
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }
}

/// Sending half of a logical channel, held by the transport.
#[derive(Debug, Clone)]
pub struct ChannelWriter {
    tx: mpsc::UnboundedSender<Bytes>,
}

impl ChannelWriter {
    /// Deliver a chunk to the reader.
    pub fn write(&self, chunk: impl Into<Bytes>) -> Result<()> {
        self.tx
            .send(chunk.into())
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Close this writer. The channel closes once all writers are gone.
    pub fn close(self) {}
}

/// Create a connected writer/reader pair for one logical channel.
pub fn channel_pair() -> (ChannelWriter, ChannelReader) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelWriter { tx }, ChannelReader { rx })
}

/// A session with the registry.
#[async_trait]
pub trait Session: Send + Sync {
    /// Install or clear the state-change handler.
    fn set_state_handler(&self, handler: Option<EventSink<SessionEvent>>);

    /// Start establishing the transport. Completion is reported as a
    /// [`SessionEvent`].
    fn connect(&self);

    /// Open one logical channel.
    async fn open_channel(&self, request: ChannelRequest) -> Result<ChannelReader>;

    /// Close the transport.
    fn close(&self);
}

/// Creates sessions.
pub trait SessionFactory: Send + Sync {
    fn create(&self, request: SessionRequest) -> Result<Arc<dyn Session>>;
}
