//! Client configuration.

use std::time::Duration;

use url::Url;

use crate::constants::{
    DEFAULT_ENTITLEMENT, DEFAULT_HOST, DEFAULT_PEER_KIND, FINGERPRINT_PARAM, FLUSH_DELAY,
    OUTBOUND_QUEUE_CAPACITY, PUSH_PATH, REGISTRATION_WATCHDOG, SESSION_PATH,
};
use crate::error::{Error, Result};

/// PeerBook client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Registry host, optionally with a port.
    pub host: String,
    /// Use plain `http`/`ws` instead of `https`/`wss`.
    pub insecure: bool,
    /// Stable per-device fingerprint.
    pub fingerprint: String,
    /// Delay coalescing the outbound flush after the push socket opens.
    pub flush_delay: Duration,
    /// Maximum messages queued while the push channel is down.
    pub outbound_capacity: usize,
    /// How long registration waits for enrollment before warning.
    pub watchdog_timeout: Duration,
    /// Entitlement that gates the connection.
    pub entitlement: String,
    /// Peer kind relevant to this client.
    pub peer_kind: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            insecure: false,
            fingerprint: String::new(),
            flush_delay: FLUSH_DELAY,
            outbound_capacity: OUTBOUND_QUEUE_CAPACITY,
            watchdog_timeout: REGISTRATION_WATCHDOG,
            entitlement: DEFAULT_ENTITLEMENT.to_string(),
            peer_kind: DEFAULT_PEER_KIND.to_string(),
        }
    }
}

impl ClientConfig {
    /// Create a configuration for a host and fingerprint with default tuning.
    pub fn new(host: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            fingerprint: fingerprint.into(),
            ..Default::default()
        }
    }

    /// URL of the session transport endpoint.
    pub fn session_url(&self) -> Result<Url> {
        let scheme = if self.insecure { "http" } else { "https" };
        parse_url(&format!("{}://{}{}", scheme, self.host, SESSION_PATH))
    }

    /// URL of the push channel, carrying the device fingerprint.
    pub fn push_url(&self) -> Result<Url> {
        let scheme = if self.insecure { "ws" } else { "wss" };
        let mut url = parse_url(&format!("{}://{}{}", scheme, self.host, PUSH_PATH))?;
        url.query_pairs_mut()
            .append_pair(FINGERPRINT_PARAM, &self.fingerprint);
        Ok(url)
    }
}

fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| Error::protocol(format!("invalid registry url {raw}: {e}")))
}
