//! Fake session transport.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use peerbook_core::error::{Error, Result};
use peerbook_core::protocol::ChannelRequest;
use peerbook_core::transport::{
    ChannelReader, EventSink, Session, SessionEvent, SessionFactory, SessionRequest,
    channel_pair,
};

use crate::lock;

/// Produces the chunks written back on an admin channel.
pub type Responder = Arc<dyn Fn(&ChannelRequest) -> Result<Vec<Bytes>> + Send + Sync>;

/// Per-command canned replies.
///
/// Replies for a command are consumed in order; the last one repeats.
#[derive(Clone, Default)]
pub struct AdminScript {
    replies: Arc<Mutex<HashMap<String, VecDeque<String>>>>,
}

impl AdminScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer `command` with `reply`.
    pub fn reply(self, command: &str, reply: &str) -> Self {
        self.replies(command, &[reply])
    }

    /// Answer `command` with each of `replies` in turn, repeating the last.
    pub fn replies(self, command: &str, replies: &[&str]) -> Self {
        lock(&self.replies).insert(
            command.to_string(),
            replies.iter().map(|r| r.to_string()).collect(),
        );
        self
    }

    /// A responder serving this script.
    pub fn responder(&self) -> Responder {
        let replies = Arc::clone(&self.replies);
        Arc::new(move |req: &ChannelRequest| -> Result<Vec<Bytes>> {
            let mut replies = lock(&replies);
            let queue = replies
                .get_mut(req.name())
                .ok_or_else(|| Error::transport(format!("no script for {}", req.name())))?;
            let reply = if queue.len() > 1 {
                queue.pop_front().unwrap_or_default()
            } else {
                queue.front().cloned().unwrap_or_default()
            };
            Ok(vec![Bytes::from(reply)])
        })
    }
}

/// In-memory session.
pub struct FakeSession {
    request: Option<SessionRequest>,
    handler: Mutex<Option<EventSink<SessionEvent>>>,
    responder: Responder,
    requests: Mutex<Vec<ChannelRequest>>,
    connect_calls: AtomicUsize,
    closed: AtomicBool,
    auto_connect: bool,
}

impl FakeSession {
    /// A standalone session answering channels with `responder`.
    pub fn with_responder<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&ChannelRequest) -> Result<Vec<Bytes>> + Send + Sync + 'static,
    {
        Self::build(None, Arc::new(responder), false)
    }

    fn build(request: Option<SessionRequest>, responder: Responder, auto_connect: bool) -> Arc<Self> {
        Arc::new(Self {
            request,
            handler: Mutex::new(None),
            responder,
            requests: Mutex::new(Vec::new()),
            connect_calls: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            auto_connect,
        })
    }

    /// Report a state change through the installed handler.
    ///
    /// Returns false when no handler is installed.
    pub fn emit(&self, event: SessionEvent) -> bool {
        match lock(&self.handler).as_ref() {
            Some(handler) => handler.emit(event),
            None => false,
        }
    }

    pub fn has_handler(&self) -> bool {
        lock(&self.handler).is_some()
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Every channel request seen so far.
    pub fn requests(&self) -> Vec<ChannelRequest> {
        lock(&self.requests).clone()
    }

    /// Number of channels opened for `command`.
    pub fn requests_named(&self, command: &str) -> usize {
        lock(&self.requests)
            .iter()
            .filter(|r| r.name() == command)
            .count()
    }

    /// The request this session was created from.
    pub fn session_request(&self) -> Option<SessionRequest> {
        self.request.clone()
    }
}

#[async_trait]
impl Session for FakeSession {
    fn set_state_handler(&self, handler: Option<EventSink<SessionEvent>>) {
        *lock(&self.handler) = handler;
    }

    fn connect(&self) {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.auto_connect {
            self.emit(SessionEvent::Connected);
        }
    }

    async fn open_channel(&self, request: ChannelRequest) -> Result<ChannelReader> {
        lock(&self.requests).push(request.clone());
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        let chunks = (self.responder)(&request)?;
        let (writer, reader) = channel_pair();
        for chunk in chunks {
            writer.write(chunk)?;
        }
        writer.close();
        Ok(reader)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Creates [`FakeSession`]s and keeps them for inspection.
pub struct FakeSessionFactory {
    responder: Responder,
    auto_connect: bool,
    fail_create: AtomicBool,
    sessions: Mutex<Vec<Arc<FakeSession>>>,
}

impl FakeSessionFactory {
    /// Sessions that wait for the test to emit their state.
    pub fn manual(script: &AdminScript) -> Arc<Self> {
        Self::build(script.responder(), false)
    }

    /// Sessions that report `Connected` as soon as `connect` is called.
    pub fn auto_connect(script: &AdminScript) -> Arc<Self> {
        Self::build(script.responder(), true)
    }

    fn build(responder: Responder, auto_connect: bool) -> Arc<Self> {
        Arc::new(Self {
            responder,
            auto_connect,
            fail_create: AtomicBool::new(false),
            sessions: Mutex::new(Vec::new()),
        })
    }

    /// Make subsequent `create` calls fail.
    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Number of sessions created.
    pub fn created(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn session(&self, index: usize) -> Option<Arc<FakeSession>> {
        lock(&self.sessions).get(index).cloned()
    }

    pub fn last(&self) -> Option<Arc<FakeSession>> {
        lock(&self.sessions).last().cloned()
    }
}

impl SessionFactory for FakeSessionFactory {
    fn create(&self, request: SessionRequest) -> Result<Arc<dyn Session>> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Error::transport("session factory refused"));
        }
        let session = FakeSession::build(Some(request), Arc::clone(&self.responder), self.auto_connect);
        lock(&self.sessions).push(Arc::clone(&session));
        let session: Arc<dyn Session> = session;
        Ok(session)
    }
}
