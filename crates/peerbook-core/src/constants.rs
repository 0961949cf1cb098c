//! Protocol and configuration constants for the PeerBook client.

use std::time::Duration;

// =============================================================================
// Registry Constants
// =============================================================================

/// Default registry host.
pub const DEFAULT_HOST: &str = "api.peerbook.io";

/// Path of the session transport endpoint.
pub const SESSION_PATH: &str = "/we";

/// Path of the push channel endpoint.
pub const PUSH_PATH: &str = "/ws";

/// Query parameter carrying the device fingerprint on the push URL.
pub const FINGERPRINT_PARAM: &str = "fp";

/// Identifier the registry returns for a device it has not paired yet.
pub const UNREGISTERED_ID: &str = "TBD";

/// Push payloads with a `code` at or above this value are registry errors.
pub const ERROR_CODE_THRESHOLD: u64 = 400;

/// Entitlement that gates the connection.
pub const DEFAULT_ENTITLEMENT: &str = "peerbook";

/// Peer kind this client cares about.
pub const DEFAULT_PEER_KIND: &str = "webexec";

// =============================================================================
// Admin Channel Constants
// =============================================================================

/// Priority used for every admin channel.
pub const ADMIN_CHANNEL_PRIORITY: u8 = 0;

/// Virtual terminal columns requested for admin channels.
pub const ADMIN_CHANNEL_COLS: u16 = 80;

/// Virtual terminal rows requested for admin channels.
pub const ADMIN_CHANNEL_ROWS: u16 = 24;

/// Admin command returning this device's registry identifier.
pub const CMD_PING: &str = "ping";

/// Admin command enrolling this device.
pub const CMD_REGISTER: &str = "register";

/// Admin command checking a one-time code for a fingerprint.
pub const CMD_VERIFY: &str = "verify";

// =============================================================================
// Timing Constants
// =============================================================================

/// Delay coalescing the outbound flush after the push socket opens.
pub const FLUSH_DELAY: Duration = Duration::from_millis(10);

/// How long registration waits for the operator to finish enrollment.
pub const REGISTRATION_WATCHDOG: Duration = Duration::from_secs(3);

// =============================================================================
// Queue Constants
// =============================================================================

/// Maximum messages held while the push channel is down.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;
