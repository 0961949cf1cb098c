//! peerbook-client: Connection manager for the PeerBook registry.
//!
//! Provides:
//! - Connection state machine over the session transport and push channel
//! - Admin command protocol
//! - Outbound queue for the push channel
//! - WebSocket push connector
//! - Fingerprint verification and registration flows
//! - Entitlement-driven connection gating
//! - Readline operator and CLI argument parsing

pub mod admin;
pub mod cli;
pub mod connection;
pub mod gate;
pub mod operator;
pub mod push;
pub mod queue;
pub mod register;
pub mod verify;
pub mod watchdog;

pub use admin::AdminChannel;
pub use cli::{ClientArgs, CliLogFormat};
pub use connection::{ConnectionState, PeerbookConnection, PushStatus, Transports, UpdateHandler};
pub use gate::{GateAction, SubscriptionGate};
pub use operator::TerminalOperator;
pub use push::WsConnector;
pub use queue::OutboundQueue;
pub use register::{FailedStep, RegistrationFlow, RegistrationOutcome};
pub use verify::{Verification, VerificationLoop};
pub use watchdog::Watchdog;
