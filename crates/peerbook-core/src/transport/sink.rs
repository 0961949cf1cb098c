//! Epoch-tagged event delivery from transports to the client.

use tokio::sync::mpsc;

/// An event together with the epoch of the handle that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tagged<E> {
    pub epoch: u64,
    pub event: E,
}

/// Sending half given to a transport so it can report events.
#[derive(Debug)]
pub struct EventSink<E> {
    epoch: u64,
    tx: mpsc::UnboundedSender<Tagged<E>>,
}

impl<E> Clone for EventSink<E> {
    fn clone(&self) -> Self {
        Self {
            epoch: self.epoch,
            tx: self.tx.clone(),
        }
    }
}

impl<E> EventSink<E> {
    pub fn new(epoch: u64, tx: mpsc::UnboundedSender<Tagged<E>>) -> Self {
        Self { epoch, tx }
    }

    /// Epoch of the handle this sink belongs to.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Report an event. Returns false if the receiver is gone.
    pub fn emit(&self, event: E) -> bool {
        self.tx
            .send(Tagged {
                epoch: self.epoch,
                event,
            })
            .is_ok()
    }
}
