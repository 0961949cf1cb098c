//! Payloads exchanged with the registry.
//!
//! - `admin`: admin channel requests and the replies of `register`/`verify`
//! - `push`: inbound push channel messages

pub mod admin;
pub mod push;

pub use admin::{ChannelRequest, RegistrationReply, check_verify_reply};
pub use push::PushMessage;
