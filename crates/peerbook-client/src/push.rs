//! WebSocket push socket.
//!
//! Each socket runs one task that owns the WebSocket stream. Outbound frames
//! reach the task over a channel; inbound frames and state changes are
//! reported to the attached [`EventSink`] until it is detached.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use url::Url;

use peerbook_core::error::{Error, Result};
use peerbook_core::transport::{EventSink, PushConnector, PushEvent, PushSocket, ReadyState};

type Handler = Arc<Mutex<Option<EventSink<PushEvent>>>>;

fn handler_slot(handler: &Handler) -> MutexGuard<'_, Option<EventSink<PushEvent>>> {
    handler.lock().unwrap_or_else(|e| e.into_inner())
}

fn report(handler: &Handler, event: PushEvent) {
    if let Some(sink) = handler_slot(handler).as_ref() {
        sink.emit(event);
    }
}

/// Opens push sockets over `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

impl PushConnector for WsConnector {
    fn open(&self, url: &Url, handler: EventSink<PushEvent>) -> Result<Box<dyn PushSocket>> {
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(Error::protocol(format!(
                    "unsupported push scheme: {other}"
                )));
            }
        }

        let state = Arc::new(AtomicU8::new(ReadyState::Connecting.as_u8()));
        let handler: Handler = Arc::new(Mutex::new(Some(handler)));
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_socket(
            url.to_string(),
            Arc::clone(&state),
            Arc::clone(&handler),
            out_rx,
        ));

        Ok(Box::new(WsSocket {
            state,
            handler,
            out_tx,
            task,
        }))
    }
}

async fn run_socket(
    url: String,
    state: Arc<AtomicU8>,
    handler: Handler,
    mut out_rx: mpsc::UnboundedReceiver<Message>,
) {
    let set_state = |s: ReadyState| state.store(s.as_u8(), Ordering::SeqCst);

    let stream = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            warn!(%url, error = %e, "Push socket connect failed");
            set_state(ReadyState::Closed);
            report(&handler, PushEvent::Error(e.to_string()));
            return;
        }
    };

    // close() may have run while the handshake was in flight.
    if state
        .compare_exchange(
            ReadyState::Connecting.as_u8(),
            ReadyState::Open.as_u8(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        )
        .is_ok()
    {
        debug!(%url, "Push socket open");
        report(&handler, PushEvent::Open);
    }

    let (mut sink, mut stream) = stream.split();
    loop {
        tokio::select! {
            outbound = out_rx.recv() => {
                let Some(msg) = outbound else { break };
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = sink.send(msg).await {
                    set_state(ReadyState::Closed);
                    report(&handler, PushEvent::Error(e.to_string()));
                    return;
                }
                if closing {
                    break;
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        report(&handler, PushEvent::Message(text.to_string()));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "Push socket closed by registry");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        set_state(ReadyState::Closed);
                        report(&handler, PushEvent::Error(e.to_string()));
                        return;
                    }
                    None => break,
                }
            }
        }
    }

    set_state(ReadyState::Closed);
    report(&handler, PushEvent::Close);
}

struct WsSocket {
    state: Arc<AtomicU8>,
    handler: Handler,
    out_tx: mpsc::UnboundedSender<Message>,
    task: JoinHandle<()>,
}

impl PushSocket for WsSocket {
    fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn send(&self, text: String) -> Result<()> {
        if self.ready_state() != ReadyState::Open {
            return Err(Error::transport("push socket is not open"));
        }
        self.out_tx
            .send(Message::Text(text.into()))
            .map_err(|_| Error::ConnectionClosed)
    }

    fn detach(&self) {
        *handler_slot(&self.handler) = None;
    }

    fn close(&self) {
        match self.ready_state() {
            ReadyState::Closing | ReadyState::Closed => {}
            ReadyState::Connecting => {
                self.state
                    .store(ReadyState::Closed.as_u8(), Ordering::SeqCst);
                self.task.abort();
                report(&self.handler, PushEvent::Close);
            }
            ReadyState::Open => {
                self.state
                    .store(ReadyState::Closing.as_u8(), Ordering::SeqCst);
                let _ = self.out_tx.send(Message::Close(None));
            }
        }
    }
}

impl Drop for WsSocket {
    fn drop(&mut self) {
        // A socket being closed finishes its close handshake on its own.
        if self.ready_state() != ReadyState::Closing {
            self.task.abort();
        }
    }
}
