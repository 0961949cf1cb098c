//! Outbound queue for push channel messages.
//!
//! Messages sent while the push socket is down wait here and are flushed in
//! FIFO order when it opens. Delivery is best-effort: the queue is bounded and
//! evicts its oldest entry when full, and a flush empties it regardless of how
//! individual sends fare.

use std::collections::VecDeque;

use serde_json::Value;

/// Bounded FIFO of not-yet-delivered push messages.
#[derive(Debug)]
pub struct OutboundQueue {
    items: VecDeque<Value>,
    capacity: usize,
    dropped: u64,
}

impl OutboundQueue {
    /// Create a queue holding at most `capacity` messages (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity.min(64)),
            capacity,
            dropped: 0,
        }
    }

    /// Append a message, evicting and returning the oldest one if full.
    pub fn push(&mut self, message: Value) -> Option<Value> {
        let evicted = if self.items.len() >= self.capacity {
            self.dropped += 1;
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(message);
        evicted
    }

    /// Take every queued message in order, leaving the queue empty.
    pub fn drain(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.items).into()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Messages evicted since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
