//! peerbook-core: Shared library for the PeerBook registry client.
//!
//! This crate provides:
//! - Error type and logging setup
//! - Client configuration and constants
//! - Registry identifier and peer records
//! - Admin and push protocol payloads
//! - Contracts for the external collaborators (session transport, push
//!   socket, subscription and identity providers, operator)

pub mod config;
pub mod constants;
pub mod error;
pub mod identity;
pub mod logging;
pub mod operator;
pub mod peers;
pub mod protocol;
pub mod provider;
pub mod transport;

pub use config::ClientConfig;
pub use error::{Error, Result};
pub use identity::RegistryId;
pub use logging::{LogFormat, init_logging};
pub use operator::Operator;
pub use peers::{MergeSummary, Peer, PeerTable};
pub use provider::{EntitlementSnapshot, IdentityProvider, SubscriptionProvider};
