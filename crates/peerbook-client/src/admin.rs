//! Admin command protocol over the session transport.
//!
//! Each command opens its own logical channel tagged with the command tokens,
//! reads until the registry closes the channel and returns everything it
//! wrote as text. Concurrent commands use independent channels; multiplexing
//! is the session's job.

use std::sync::Arc;

use bytes::BytesMut;
use tracing::debug;

use peerbook_core::error::Result;
use peerbook_core::protocol::ChannelRequest;
use peerbook_core::transport::Session;

/// Runs admin commands on a borrowed session.
#[derive(Clone)]
pub struct AdminChannel {
    session: Arc<dyn Session>,
}

impl AdminChannel {
    pub fn new(session: Arc<dyn Session>) -> Self {
        Self { session }
    }

    /// Run `command` with `args` and return the full reply.
    ///
    /// A rejected channel open is the command's failure. Invalid UTF-8 in the
    /// reply is replaced rather than rejected.
    pub async fn execute(&self, command: &str, args: &[&str]) -> Result<String> {
        let request = ChannelRequest::admin(command, args);
        let mut channel = self.session.open_channel(request).await?;

        let mut reply = BytesMut::new();
        while let Some(chunk) = channel.next_chunk().await {
            reply.extend_from_slice(&chunk);
        }

        let text = String::from_utf8_lossy(&reply).into_owned();
        debug!(command, ?args, reply_len = text.len(), "Admin command closed");
        Ok(text)
    }
}
