//! Connection state machine for the PeerBook registry.
//!
//! `PeerbookConnection` owns the session handle and the push socket handle.
//! Every mutation of either goes through [`Machine::apply`], which runs under
//! a mutex that is never held across an await. Callers submit inputs from
//! their own tasks; transport events reach the machine through an event pump
//! task. Events carry the epoch of the handle that produced them and are
//! discarded once that handle has been replaced or closed.
//!
//! Lifecycle:
//! 1. `connect` creates a session and starts it
//! 2. On `Connected` the registry identifier is fetched with `ping`
//! 3. A confirmed identifier logs in to the subscription provider and opens
//!    the push socket
//! 4. The first push message acknowledges the push connection; `connect`
//!    resolves and queued outbound messages are flushed

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use peerbook_core::ClientConfig;
use peerbook_core::constants::CMD_PING;
use peerbook_core::error::{Error, Result};
use peerbook_core::identity::RegistryId;
use peerbook_core::protocol::PushMessage;
use peerbook_core::provider::SubscriptionProvider;
use peerbook_core::transport::{
    EventSink, PushConnector, PushEvent, PushSocket, ReadyState, Session, SessionEvent,
    SessionFactory, SessionRequest, Tagged,
};

use crate::admin::AdminChannel;
use crate::queue::OutboundQueue;

/// Receives every push message that is not a registry error.
pub type UpdateHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// External collaborators the connection drives.
#[derive(Clone)]
pub struct Transports {
    pub sessions: Arc<dyn SessionFactory>,
    pub push: Arc<dyn PushConnector>,
    pub subscription: Arc<dyn SubscriptionProvider>,
}

/// Observable connection state, derived from the handles the machine holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session, no push socket.
    Idle,
    /// Session transport establishing.
    SessionConnecting,
    /// Session established, identifier not confirmed.
    SessionOpen,
    /// Identifier confirmed; push socket connecting or not yet acknowledged.
    Identified,
    /// Push connection acknowledged; updates flow.
    Active,
    /// The current attempt failed.
    Failed(String),
}

/// Push channel status indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PushStatus {
    #[default]
    Idle,
    Connecting,
    Open,
    Closed,
    Error,
}

type Waiter = oneshot::Sender<Result<()>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionPhase {
    Connecting,
    Open,
}

struct SessionSlot {
    epoch: u64,
    handle: Arc<dyn Session>,
    phase: SessionPhase,
}

struct PushSlot {
    epoch: u64,
    socket: Box<dyn PushSocket>,
    opened: bool,
    acked: bool,
}

/// Results of background work, fed back into the machine.
#[derive(Debug)]
enum Internal {
    Identified { epoch: u64, result: Result<RegistryId> },
    FlushDue { epoch: u64 },
}

enum Input {
    Connect { bearer: Option<String>, reply: Waiter },
    ConnectPush { reply: Waiter },
    Close,
    Send(Value),
    SetHandler(Option<UpdateHandler>),
    SetRegistryId(RegistryId),
    Session(Tagged<SessionEvent>),
    Push(Tagged<PushEvent>),
    Internal(Internal),
}

/// Work that has to happen outside the machine lock.
enum Effect {
    Identify {
        epoch: u64,
        session: Arc<dyn Session>,
        cached: RegistryId,
    },
    ScheduleFlush {
        epoch: u64,
    },
    Deliver {
        handler: UpdateHandler,
        message: Value,
    },
}

struct Machine {
    sessions: Arc<dyn SessionFactory>,
    connector: Arc<dyn PushConnector>,
    session_url: Url,
    push_url: Url,
    session_tx: mpsc::UnboundedSender<Tagged<SessionEvent>>,
    push_tx: mpsc::UnboundedSender<Tagged<PushEvent>>,

    next_epoch: u64,
    session: Option<SessionSlot>,
    push: Option<PushSlot>,
    uid: RegistryId,
    failure: Option<String>,
    status: PushStatus,

    queue: OutboundQueue,
    flush_epoch: Option<u64>,
    handler: Option<UpdateHandler>,

    connect_waiters: Vec<Waiter>,
    push_waiters: Vec<Waiter>,
}

fn settle(waiters: &mut Vec<Waiter>, outcome: impl Fn() -> Result<()>) {
    for waiter in waiters.drain(..) {
        let _ = waiter.send(outcome());
    }
}

impl Machine {
    fn next_epoch(&mut self) -> u64 {
        self.next_epoch += 1;
        self.next_epoch
    }

    fn state(&self) -> ConnectionState {
        if let Some(reason) = &self.failure {
            return ConnectionState::Failed(reason.clone());
        }
        match (&self.session, &self.push) {
            (_, Some(push)) if push.acked => ConnectionState::Active,
            (_, Some(_)) => ConnectionState::Identified,
            (Some(session), None) => match session.phase {
                SessionPhase::Connecting => ConnectionState::SessionConnecting,
                SessionPhase::Open if self.uid.is_confirmed() => ConnectionState::Identified,
                SessionPhase::Open => ConnectionState::SessionOpen,
            },
            (None, None) => ConnectionState::Idle,
        }
    }

    fn is_open(&self) -> bool {
        self.push
            .as_ref()
            .is_some_and(|p| p.socket.ready_state() == ReadyState::Open)
    }

    fn apply(&mut self, input: Input) -> Vec<Effect> {
        let mut effects = Vec::new();
        match input {
            Input::Connect { bearer, reply } => self.connect(bearer, reply),
            Input::ConnectPush { reply } => self.open_push(Some(reply)),
            Input::Close => self.close(),
            Input::Send(message) => self.send(message, &mut effects),
            Input::SetHandler(handler) => self.handler = handler,
            Input::SetRegistryId(id) => {
                if self.uid.update(id) && self.uid.is_confirmed() {
                    self.failure = None;
                }
            }
            Input::Session(tagged) => self.on_session_event(tagged, &mut effects),
            Input::Push(tagged) => self.on_push_event(tagged, &mut effects),
            Input::Internal(Internal::Identified { epoch, result }) => {
                self.on_identified(epoch, result)
            }
            Input::Internal(Internal::FlushDue { epoch }) => self.flush(epoch),
        }
        effects
    }

    fn connect(&mut self, bearer: Option<String>, reply: Waiter) {
        if self.session.is_some() {
            let outcome = if self.uid.is_unregistered() {
                Err(Error::Unregistered)
            } else {
                Ok(())
            };
            let _ = reply.send(outcome);
            return;
        }

        let request = SessionRequest::new(self.session_url.clone(), bearer);
        let handle = match self.sessions.create(request) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(error = %e, "Failed to create registry session");
                let _ = reply.send(Err(e));
                return;
            }
        };

        let epoch = self.next_epoch();
        info!(epoch, url = %self.session_url, "Connecting registry session");
        self.failure = None;
        handle.set_state_handler(Some(EventSink::new(epoch, self.session_tx.clone())));
        handle.connect();
        self.session = Some(SessionSlot {
            epoch,
            handle,
            phase: SessionPhase::Connecting,
        });
        self.connect_waiters.push(reply);
    }

    fn teardown_session(&mut self) {
        if let Some(slot) = self.session.take() {
            slot.handle.set_state_handler(None);
            slot.handle.close();
        }
    }

    fn teardown_push(&mut self) {
        if let Some(slot) = self.push.take() {
            slot.socket.detach();
            slot.socket.close();
            if self.flush_epoch == Some(slot.epoch) {
                self.flush_epoch = None;
            }
        }
    }

    fn close(&mut self) {
        let had_push = self.push.is_some();
        if self.session.is_none() && !had_push {
            debug!("Close on idle connection");
        }
        self.teardown_push();
        self.teardown_session();
        self.uid.reset();
        self.failure = None;
        self.flush_epoch = None;
        if had_push {
            self.status = PushStatus::Closed;
        }
        settle(&mut self.connect_waiters, || Err(Error::ConnectionClosed));
        settle(&mut self.push_waiters, || Err(Error::ConnectionClosed));
    }

    fn send(&mut self, message: Value, effects: &mut Vec<Effect>) {
        // A pending flush owns the socket until the queue is empty.
        let ready = self.flush_epoch.is_none() && self.is_open();
        if ready && self.queue.is_empty() {
            if let Some(slot) = self.push.as_ref() {
                match serde_json::to_string(&message) {
                    Ok(text) => match slot.socket.send(text) {
                        Ok(()) => return,
                        Err(e) => {
                            warn!(error = %e, "Push send failed, queueing");
                            self.enqueue(message);
                            return;
                        }
                    },
                    Err(e) => {
                        warn!(error = %e, "Dropping unserializable push message");
                        return;
                    }
                }
            }
        }
        self.enqueue(message);

        // Older messages are still waiting; once the open event has been
        // handled nothing else will flush them.
        if ready {
            if let Some(epoch) = self.push.as_ref().filter(|p| p.opened).map(|p| p.epoch) {
                self.flush_epoch = Some(epoch);
                effects.push(Effect::ScheduleFlush { epoch });
            }
        }
    }

    fn enqueue(&mut self, message: Value) {
        debug!(queued = self.queue.len() + 1, "Queueing push message");
        if self.queue.push(message).is_some() {
            warn!(
                dropped = self.queue.dropped(),
                "Outbound queue full, dropped oldest message"
            );
        }
    }

    fn open_push(&mut self, waiter: Option<Waiter>) {
        self.push_waiters.extend(waiter);
        if self.is_open() {
            settle(&mut self.push_waiters, || Ok(()));
            return;
        }
        if self.push.is_some() {
            debug!("Replacing unusable push socket");
            self.teardown_push();
        }

        let epoch = self.next_epoch();
        let sink = EventSink::new(epoch, self.push_tx.clone());
        match self.connector.open(&self.push_url, sink) {
            Ok(socket) => {
                debug!(epoch, url = %self.push_url, "Opening push socket");
                self.push = Some(PushSlot {
                    epoch,
                    socket,
                    opened: false,
                    acked: false,
                });
                self.status = PushStatus::Connecting;
            }
            Err(e) => {
                warn!(error = %e, "Failed to open push socket");
                self.status = PushStatus::Error;
                let detail = e.to_string();
                settle(&mut self.push_waiters, || Err(Error::transport(detail.clone())));
            }
        }
    }

    fn on_session_event(&mut self, tagged: Tagged<SessionEvent>, effects: &mut Vec<Effect>) {
        let Some(slot) = self.session.as_mut().filter(|s| s.epoch == tagged.epoch) else {
            debug!(epoch = tagged.epoch, "Ignoring event from stale session");
            return;
        };

        match tagged.event {
            SessionEvent::Connected => {
                if slot.phase == SessionPhase::Open {
                    return;
                }
                info!(epoch = slot.epoch, "Registry session connected");
                slot.phase = SessionPhase::Open;
                effects.push(Effect::Identify {
                    epoch: slot.epoch,
                    session: Arc::clone(&slot.handle),
                    cached: self.uid.clone(),
                });
            }
            SessionEvent::Failed(detail) => {
                warn!(epoch = slot.epoch, %detail, "Registry session failed");
                self.teardown_session();
                let unregistered = self.uid.is_unregistered();
                settle(&mut self.connect_waiters, || {
                    if unregistered {
                        Err(Error::Unregistered)
                    } else {
                        Err(Error::transport(detail.clone()))
                    }
                });
                self.failure = Some(detail);
            }
        }
    }

    fn on_identified(&mut self, epoch: u64, result: Result<RegistryId>) {
        if !self
            .session
            .as_ref()
            .is_some_and(|s| s.epoch == epoch && s.phase == SessionPhase::Open)
        {
            debug!(epoch, "Ignoring identifier for stale session");
            return;
        }

        match result {
            Err(e) => {
                warn!(error = %e, "Failed to get registry identifier");
                self.teardown_session();
                self.failure = Some(e.to_string());
                let mut waiters = std::mem::take(&mut self.connect_waiters).into_iter();
                if let Some(first) = waiters.next() {
                    let _ = first.send(Err(e));
                }
                let detail = self.failure.clone().unwrap_or_default();
                for waiter in waiters {
                    let _ = waiter.send(Err(Error::transport(detail.clone())));
                }
            }
            Ok(id) => {
                self.uid.update(id);
                if self.uid.is_unregistered() {
                    info!("Device is not registered with PeerBook");
                    self.failure = Some(Error::Unregistered.to_string());
                    settle(&mut self.connect_waiters, || Err(Error::Unregistered));
                    return;
                }
                info!(uid = %self.uid, "Registry identifier confirmed");
                let waiters = std::mem::take(&mut self.connect_waiters);
                self.push_waiters.extend(waiters);
                self.open_push(None);
            }
        }
    }

    fn on_push_event(&mut self, tagged: Tagged<PushEvent>, effects: &mut Vec<Effect>) {
        let Some(slot) = self.push.as_mut().filter(|p| p.epoch == tagged.epoch) else {
            debug!(epoch = tagged.epoch, "Ignoring event from stale push socket");
            return;
        };
        let epoch = slot.epoch;

        match tagged.event {
            PushEvent::Open => {
                debug!(epoch, "Push socket open");
                slot.opened = true;
                if !self.queue.is_empty() && self.flush_epoch.is_none() {
                    self.flush_epoch = Some(epoch);
                    effects.push(Effect::ScheduleFlush { epoch });
                }
            }
            PushEvent::Message(text) => {
                if !slot.acked {
                    slot.acked = true;
                    info!(epoch, "Push connection acknowledged");
                    self.status = PushStatus::Open;
                    settle(&mut self.push_waiters, || Ok(()));
                }
                let message = match PushMessage::parse(&text) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(error = %e, "Dropping push message");
                        return;
                    }
                };
                if let Some(code) = message.error_code() {
                    warn!(code, "Registry reported an error");
                    self.status = PushStatus::Error;
                    return;
                }
                match &self.handler {
                    Some(handler) => effects.push(Effect::Deliver {
                        handler: Arc::clone(handler),
                        message: message.into_value(),
                    }),
                    None => debug!(message = %message.value(), "No update handler, dropping push message"),
                }
            }
            PushEvent::Error(detail) => {
                warn!(epoch, %detail, "Push socket error");
                if let Some(slot) = self.push.take() {
                    slot.socket.detach();
                }
                if self.flush_epoch == Some(epoch) {
                    self.flush_epoch = None;
                }
                self.status = PushStatus::Error;
                settle(&mut self.push_waiters, || Err(Error::transport(detail.clone())));
            }
            PushEvent::Close => {
                info!(epoch, "Push socket closed");
                if let Some(slot) = self.push.take() {
                    slot.socket.detach();
                }
                if self.flush_epoch == Some(epoch) {
                    self.flush_epoch = None;
                }
                if self.status != PushStatus::Error {
                    self.status = PushStatus::Closed;
                }
                settle(&mut self.push_waiters, || Err(Error::ConnectionClosed));
            }
        }
    }

    fn flush(&mut self, epoch: u64) {
        if self.flush_epoch != Some(epoch) {
            return;
        }
        self.flush_epoch = None;
        let Some(slot) = self.push.as_ref().filter(|p| p.epoch == epoch) else {
            debug!(queued = self.queue.len(), "Push socket gone before flush");
            return;
        };

        let pending = self.queue.drain();
        debug!(count = pending.len(), "Flushing outbound queue");
        for message in pending {
            let sent = serde_json::to_string(&message)
                .map_err(|e| Error::protocol(e.to_string()))
                .and_then(|text| slot.socket.send(text));
            if let Err(e) = sent {
                warn!(error = %e, "Dropped queued push message");
            }
        }
    }
}

struct Inner {
    machine: Mutex<Machine>,
    state_tx: watch::Sender<ConnectionState>,
    status_tx: watch::Sender<PushStatus>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    subscription: Arc<dyn SubscriptionProvider>,
    flush_delay: Duration,
}

impl Inner {
    fn machine(&self) -> MutexGuard<'_, Machine> {
        self.machine.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn dispatch(&self, input: Input) {
        let effects = {
            let mut machine = self.machine();
            let effects = machine.apply(input);
            let state = machine.state();
            self.state_tx.send_if_modified(|current| {
                let changed = *current != state;
                *current = state;
                changed
            });
            let status = machine.status;
            self.status_tx.send_if_modified(|current| {
                let changed = *current != status;
                *current = status;
                changed
            });
            effects
        };
        for effect in effects {
            self.run(effect);
        }
    }

    fn run(&self, effect: Effect) {
        match effect {
            Effect::Identify {
                epoch,
                session,
                cached,
            } => {
                let internal_tx = self.internal_tx.clone();
                let subscription = Arc::clone(&self.subscription);
                tokio::spawn(async move {
                    let result = identify(session, cached, subscription).await;
                    let _ = internal_tx.send(Internal::Identified { epoch, result });
                });
            }
            Effect::ScheduleFlush { epoch } => {
                let internal_tx = self.internal_tx.clone();
                let delay = self.flush_delay;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = internal_tx.send(Internal::FlushDue { epoch });
                });
            }
            Effect::Deliver { handler, message } => handler(message),
        }
    }
}

/// Fetch the registry identifier and log in to the subscription provider.
async fn identify(
    session: Arc<dyn Session>,
    cached: RegistryId,
    subscription: Arc<dyn SubscriptionProvider>,
) -> Result<RegistryId> {
    let id = if cached.is_confirmed() {
        cached
    } else {
        let reply = AdminChannel::new(session).execute(CMD_PING, &[]).await?;
        RegistryId::from_ping_reply(&reply)?
    };

    if let Some(uid) = id.as_confirmed() {
        if let Err(e) = subscription.log_in(uid).await {
            warn!(error = %e, uid, "Subscription login failed");
        }
    }
    Ok(id)
}

async fn pump(
    inner: Arc<Inner>,
    mut session_rx: mpsc::UnboundedReceiver<Tagged<SessionEvent>>,
    mut push_rx: mpsc::UnboundedReceiver<Tagged<PushEvent>>,
    mut internal_rx: mpsc::UnboundedReceiver<Internal>,
) {
    loop {
        let input = tokio::select! {
            Some(event) = session_rx.recv() => Input::Session(event),
            Some(event) = push_rx.recv() => Input::Push(event),
            Some(event) = internal_rx.recv() => Input::Internal(event),
            else => break,
        };
        inner.dispatch(input);
    }
    debug!("Connection event pump stopped");
}

/// Connection to the PeerBook registry.
///
/// Must be created inside a tokio runtime. Dropping it stops event
/// processing; call [`PeerbookConnection::close`] first to release the
/// transports.
pub struct PeerbookConnection {
    inner: Arc<Inner>,
    pump: JoinHandle<()>,
}

impl PeerbookConnection {
    pub fn new(config: &ClientConfig, transports: Transports) -> Result<Self> {
        let session_url = config.session_url()?;
        let push_url = config.push_url()?;
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let machine = Machine {
            sessions: transports.sessions,
            connector: transports.push,
            session_url,
            push_url,
            session_tx,
            push_tx,
            next_epoch: 0,
            session: None,
            push: None,
            uid: RegistryId::Unset,
            failure: None,
            status: PushStatus::Idle,
            queue: OutboundQueue::new(config.outbound_capacity),
            flush_epoch: None,
            handler: None,
            connect_waiters: Vec::new(),
            push_waiters: Vec::new(),
        };

        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let (status_tx, _) = watch::channel(PushStatus::Idle);
        let inner = Arc::new(Inner {
            machine: Mutex::new(machine),
            state_tx,
            status_tx,
            internal_tx,
            subscription: transports.subscription,
            flush_delay: config.flush_delay,
        });
        let pump = tokio::spawn(pump(Arc::clone(&inner), session_rx, push_rx, internal_rx));

        Ok(Self { inner, pump })
    }

    /// Connect to the registry, optionally with a bearer token.
    ///
    /// Resolves once the push connection is acknowledged. With a session
    /// already present this resolves immediately, or fails with
    /// [`Error::Unregistered`] if the device is not registered.
    pub async fn connect(&self, token: Option<&str>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.inner.dispatch(Input::Connect {
            bearer: token.map(str::to_string),
            reply,
        });
        rx.await.unwrap_or(Err(Error::ConnectionClosed))
    }

    /// Open the push channel if it is not already open.
    pub async fn connect_push(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.inner.dispatch(Input::ConnectPush { reply });
        rx.await.unwrap_or(Err(Error::ConnectionClosed))
    }

    /// Detach from and close both transports. Safe to call repeatedly.
    pub fn close(&self) {
        self.inner.dispatch(Input::Close);
    }

    /// True iff the push socket exists and is open.
    pub fn is_open(&self) -> bool {
        self.inner.machine().is_open()
    }

    /// Send a message on the push channel, queueing it while the channel is
    /// down.
    pub fn send(&self, message: Value) {
        self.inner.dispatch(Input::Send(message));
    }

    pub fn set_update_handler<F>(&self, handler: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.inner
            .dispatch(Input::SetHandler(Some(Arc::new(handler))));
    }

    pub fn clear_update_handler(&self) {
        self.inner.dispatch(Input::SetHandler(None));
    }

    /// Current session handle, connecting first if there is none.
    ///
    /// An unregistered device still gets its session; any other connect
    /// failure is reported as a transport failure.
    pub async fn ensure_session(&self) -> Result<Arc<dyn Session>> {
        if let Some(session) = self.session() {
            return Ok(session);
        }
        match self.connect(None).await {
            Ok(()) | Err(Error::Unregistered) => {}
            Err(e) => {
                warn!(error = %e, "Failed to connect to PeerBook");
                return Err(Error::transport("failed to connect"));
            }
        }
        self.session()
            .ok_or_else(|| Error::transport("failed to connect"))
    }

    /// Run an admin command, connecting first if needed.
    pub async fn admin_command(&self, command: &str, args: &[&str]) -> Result<String> {
        let session = self.ensure_session().await?;
        AdminChannel::new(session).execute(command, args).await
    }

    fn session(&self) -> Option<Arc<dyn Session>> {
        self.inner
            .machine()
            .session
            .as_ref()
            .map(|s| Arc::clone(&s.handle))
    }

    pub fn has_session(&self) -> bool {
        self.inner.machine().session.is_some()
    }

    pub fn registry_id(&self) -> RegistryId {
        self.inner.machine().uid.clone()
    }

    /// Record an identifier learned outside the connection flow.
    pub fn set_registry_id(&self, id: RegistryId) {
        self.inner.dispatch(Input::SetRegistryId(id));
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state_tx.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn push_status(&self) -> PushStatus {
        *self.inner.status_tx.borrow()
    }

    pub fn watch_push_status(&self) -> watch::Receiver<PushStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Messages waiting for the push channel.
    pub fn queued(&self) -> usize {
        self.inner.machine().queue.len()
    }

    pub fn subscription(&self) -> Arc<dyn SubscriptionProvider> {
        Arc::clone(&self.inner.subscription)
    }
}

impl Drop for PeerbookConnection {
    fn drop(&mut self) {
        self.pump.abort();
    }
}
