//! Fake push socket and connector.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use url::Url;

use peerbook_core::error::{Error, Result};
use peerbook_core::transport::{EventSink, PushConnector, PushEvent, PushSocket, ReadyState};

use crate::lock;

/// First message sent by auto-ready sockets.
pub const READY_ACK: &str = r#"{"code":200,"text":"ready"}"#;

/// A push socket the test drives by hand.
pub struct FakePushSocket {
    url: Url,
    state: AtomicU8,
    handler: Mutex<Option<EventSink<PushEvent>>>,
    sent: Mutex<Vec<String>>,
    close_calls: AtomicUsize,
}

impl FakePushSocket {
    fn new(url: Url, handler: EventSink<PushEvent>) -> Arc<Self> {
        Arc::new(Self {
            url,
            state: AtomicU8::new(ReadyState::Connecting.as_u8()),
            handler: Mutex::new(Some(handler)),
            sent: Mutex::new(Vec::new()),
            close_calls: AtomicUsize::new(0),
        })
    }

    fn set_state(&self, state: ReadyState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    fn emit(&self, event: PushEvent) -> bool {
        match lock(&self.handler).as_ref() {
            Some(handler) => handler.emit(event),
            None => false,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Reach the open state and report it.
    pub fn open(&self) -> bool {
        self.set_state(ReadyState::Open);
        self.emit(PushEvent::Open)
    }

    /// Deliver an inbound text frame.
    pub fn deliver(&self, text: &str) -> bool {
        self.emit(PushEvent::Message(text.to_string()))
    }

    /// Fail the socket.
    pub fn fail(&self, detail: &str) -> bool {
        self.set_state(ReadyState::Closed);
        self.emit(PushEvent::Error(detail.to_string()))
    }

    /// Close from the remote side.
    pub fn remote_close(&self) -> bool {
        self.set_state(ReadyState::Closed);
        self.emit(PushEvent::Close)
    }

    /// Frames transmitted through this socket.
    pub fn sent(&self) -> Vec<String> {
        lock(&self.sent).clone()
    }

    pub fn has_handler(&self) -> bool {
        lock(&self.handler).is_some()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

struct SharedSocket(Arc<FakePushSocket>);

impl PushSocket for SharedSocket {
    fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.0.state.load(Ordering::SeqCst))
    }

    fn send(&self, text: String) -> Result<()> {
        if self.ready_state() != ReadyState::Open {
            return Err(Error::transport("socket is not open"));
        }
        lock(&self.0.sent).push(text);
        Ok(())
    }

    fn detach(&self) {
        *lock(&self.0.handler) = None;
    }

    fn close(&self) {
        self.0.close_calls.fetch_add(1, Ordering::SeqCst);
        self.0.set_state(ReadyState::Closed);
        // Like a browser socket, a still-attached handler hears about it.
        self.0.emit(PushEvent::Close);
    }
}

/// Opens [`FakePushSocket`]s and keeps them for inspection.
pub struct FakePushConnector {
    auto_ready: bool,
    fail_open: AtomicBool,
    sockets: Mutex<Vec<Arc<FakePushSocket>>>,
}

impl FakePushConnector {
    /// Sockets stay in `Connecting` until the test opens them.
    pub fn manual() -> Arc<Self> {
        Self::build(false)
    }

    /// Sockets open immediately and send [`READY_ACK`].
    pub fn auto_ready() -> Arc<Self> {
        Self::build(true)
    }

    fn build(auto_ready: bool) -> Arc<Self> {
        Arc::new(Self {
            auto_ready,
            fail_open: AtomicBool::new(false),
            sockets: Mutex::new(Vec::new()),
        })
    }

    /// Make subsequent `open` calls fail.
    pub fn fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Number of sockets opened.
    pub fn opened(&self) -> usize {
        lock(&self.sockets).len()
    }

    pub fn socket(&self, index: usize) -> Option<Arc<FakePushSocket>> {
        lock(&self.sockets).get(index).cloned()
    }

    pub fn last(&self) -> Option<Arc<FakePushSocket>> {
        lock(&self.sockets).last().cloned()
    }
}

impl PushConnector for FakePushConnector {
    fn open(&self, url: &Url, handler: EventSink<PushEvent>) -> Result<Box<dyn PushSocket>> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(Error::transport("push connector refused"));
        }
        let socket = FakePushSocket::new(url.clone(), handler);
        lock(&self.sockets).push(Arc::clone(&socket));
        if self.auto_ready {
            socket.open();
            socket.deliver(READY_ACK);
        }
        Ok(Box::new(SharedSocket(socket)))
    }
}
