//! Transport contracts consumed by the client.
//!
//! The client never talks to the network directly; it drives two transports
//! through these traits:
//! - `Session`: multiplexed logical channels for admin commands
//! - `PushSocket`: the persistent push channel
//!
//! Both report asynchronous events through an [`EventSink`] handed to them by
//! the client. Detaching a transport drops its sink; events tagged with a
//! stale epoch are discarded by the receiver either way.

mod push;
mod session;
mod sink;

pub use push::{PushConnector, PushEvent, PushSocket, ReadyState};
pub use session::{
    ChannelReader, ChannelWriter, Session, SessionEvent, SessionFactory, SessionRequest,
    channel_pair,
};
pub use sink::{EventSink, Tagged};
