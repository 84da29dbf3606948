//! Session controller for the live connection
//!
//! Owns the WebSocket handle and the connection state machine, sends the
//! setup handshake on connect, and routes inbound messages to the host
//! callback and the playback queue. Producers send through a cloneable
//! [`SessionHandle`]; a single writer task serializes all outbound frames.

use crate::config::LiveConfig;
use crate::error::{LiveError, Result};
use crate::events::{EventKind, HostEvent, MessageCallback};
use crate::playback::PlaybackQueue;
use crate::protocol;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = futures_util::stream::SplitSink<WsStream, Message>;
type WsSource = futures_util::stream::SplitStream<WsStream>;
/// The write half, shared between the writer task and close-during-send
/// guarded teardown.
type SharedSink = Arc<tokio::sync::Mutex<Option<WsSink>>>;

/// Connection state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// State shared between the controller, its tasks, and producer handles.
struct SessionShared {
    state: Mutex<ConnectionState>,
    muted: AtomicBool,
    /// Set during shutdown so late inbound messages stop reaching the host.
    suppress_events: AtomicBool,
}

impl SessionShared {
    fn new(muted: bool) -> Self {
        Self {
            state: Mutex::new(ConnectionState::Disconnected),
            muted: AtomicBool::new(muted),
            suppress_events: AtomicBool::new(false),
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Swap in a new state, returning the previous one. Callback emission is
    /// tied to observing the Connected -> gone edge, so only one task reports
    /// a given teardown.
    fn transition(&self, next: ConnectionState) -> ConnectionState {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *state, next)
    }

    fn suppressed(&self) -> bool {
        self.suppress_events.load(Ordering::Relaxed)
    }
}

/// Cloneable producer-side handle: safe to call from any thread or task.
#[derive(Clone)]
pub struct SessionHandle {
    outbound_tx: UnboundedSender<String>,
    shared: Arc<SessionShared>,
}

impl SessionHandle {
    /// Queue one framed protocol message for sending.
    ///
    /// A no-op while the session is not connected: the frame is dropped with
    /// a log line, never buffered for later.
    pub fn send(&self, frame: String) {
        if self.shared.state() != ConnectionState::Connected {
            debug!("session not connected, dropping {} byte frame", frame.len());
            return;
        }
        if self.outbound_tx.send(frame).is_err() {
            debug!("session writer gone, dropping frame");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state() == ConnectionState::Connected
    }
}

/// Owns the connection and its reader/writer tasks.
pub struct SessionController {
    config: LiveConfig,
    shared: Arc<SessionShared>,
    callback: MessageCallback,
    playback: Arc<PlaybackQueue>,
    sink: SharedSink,
    outbound_tx: UnboundedSender<String>,
    outbound_rx: Option<UnboundedReceiver<String>>,
    reader_task: Option<JoinHandle<()>>,
    writer_task: Option<JoinHandle<()>>,
}

impl SessionController {
    pub fn new(config: LiveConfig, callback: MessageCallback, playback: Arc<PlaybackQueue>) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(SessionShared::new(config.muted));
        Self {
            config,
            shared,
            callback,
            playback,
            sink: Arc::new(tokio::sync::Mutex::new(None)),
            outbound_tx,
            outbound_rx: Some(outbound_rx),
            reader_task: None,
            writer_task: None,
        }
    }

    /// Producer-side handle for the pipelines.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            outbound_tx: self.outbound_tx.clone(),
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state() == ConnectionState::Connected
    }

    /// Mute state applies to the next setup handshake.
    pub fn set_muted(&self, muted: bool) {
        self.shared.muted.store(muted, Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.shared.muted.load(Ordering::Relaxed)
    }

    /// Stop delivering host callbacks; used ahead of final teardown.
    pub fn suppress_events(&self) {
        self.shared.suppress_events.store(true, Ordering::Relaxed);
    }

    /// Open the connection and perform the setup handshake.
    ///
    /// Idempotent while connecting or connected. Transport failures move the
    /// session to `Error`, notify the host, and are also returned.
    pub async fn connect(&mut self) -> Result<()> {
        match self.shared.state() {
            ConnectionState::Connecting | ConnectionState::Connected => return Ok(()),
            _ => {}
        }
        self.shared.transition(ConnectionState::Connecting);
        self.shared.suppress_events.store(false, Ordering::Relaxed);
        info!("connecting live session");

        let (ws, _resp) = match connect_async(&self.config.url).await {
            Ok(pair) => pair,
            Err(e) => {
                error!("websocket connect failed: {e}");
                self.shared.transition(ConnectionState::Error);
                (self.callback)(HostEvent::new(
                    format!("websocket error: {e}"),
                    EventKind::Error,
                ));
                return Err(e.into());
            }
        };

        let (sink, stream) = ws.split();
        *self.sink.lock().await = Some(sink);
        self.shared.transition(ConnectionState::Connected);
        info!("live session connected");
        (self.callback)(HostEvent::new("websocket connected", EventKind::Connection));

        // Handshake: advertise the model and response modalities before any
        // media flows.
        let setup = protocol::encode_setup(&self.config.model, self.is_muted());
        if let Err(e) = self.send_frame(setup).await {
            error!("setup handshake failed: {e}");
            self.shared.transition(ConnectionState::Error);
            (self.callback)(HostEvent::new(
                format!("websocket error: {e}"),
                EventKind::Error,
            ));
            return Err(e);
        }

        self.reader_task = Some(tokio::spawn(run_reader(
            stream,
            Arc::clone(&self.shared),
            self.callback.clone(),
            Arc::clone(&self.playback),
        )));

        if self.writer_task.is_none() {
            if let Some(rx) = self.outbound_rx.take() {
                self.writer_task = Some(tokio::spawn(run_writer(
                    rx,
                    Arc::clone(&self.sink),
                    Arc::clone(&self.shared),
                )));
            }
        }

        Ok(())
    }

    /// Close the connection. Pending producer data is dropped, not replayed.
    pub async fn disconnect(&mut self) {
        let old = self.shared.transition(ConnectionState::Disconnected);

        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let Some(mut sink) = self.sink.lock().await.take() {
            if let Err(e) = sink.close().await {
                debug!("websocket close: {e}");
            }
        }

        if old == ConnectionState::Connected {
            info!("live session disconnected");
            if !self.shared.suppressed() {
                (self.callback)(HostEvent::new("websocket disconnected", EventKind::Connection));
            }
        }
    }

    /// Cancel the long-lived tasks. Terminal; the controller no longer
    /// accepts frames afterwards.
    pub fn shutdown(&mut self) {
        if let Some(task) = self.writer_task.take() {
            task.abort();
        }
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
    }

    async fn send_frame(&self, frame: String) -> Result<()> {
        let mut guard = self.sink.lock().await;
        match guard.as_mut() {
            Some(ws) => {
                ws.send(Message::text(frame)).await?;
                Ok(())
            }
            None => Err(LiveError::ConnectionClosed),
        }
    }
}

/// Single consumer of all producers' frames.
async fn run_writer(
    mut rx: UnboundedReceiver<String>,
    sink: SharedSink,
    shared: Arc<SessionShared>,
) {
    debug!("session writer task started");
    while let Some(frame) = rx.recv().await {
        if shared.state() != ConnectionState::Connected {
            debug!("session not connected, dropping {} byte frame", frame.len());
            continue;
        }
        let mut guard = sink.lock().await;
        match guard.as_mut() {
            Some(ws) => {
                if let Err(e) = ws.send(Message::text(frame)).await {
                    error!("websocket send failed: {e}");
                    // the reader observes the same failure and notifies the
                    // host; here we only stop accepting frames
                    shared.transition(ConnectionState::Error);
                }
            }
            None => debug!("no active connection, dropping frame"),
        }
    }
    debug!("session writer task exiting");
}

async fn run_reader(
    mut stream: WsSource,
    shared: Arc<SessionShared>,
    callback: MessageCallback,
    playback: Arc<PlaybackQueue>,
) {
    debug!("session reader task started");
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => dispatch(&text, &shared, &callback, &playback),
            Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                Ok(text) => dispatch(text, &shared, &callback, &playback),
                Err(_) => warn!("ignoring non-UTF-8 binary message ({} bytes)", bytes.len()),
            },
            Ok(Message::Close(frame)) => {
                let reason = frame
                    .map(|f| f.reason.to_string())
                    .unwrap_or_else(|| "closed by peer".to_string());
                info!("websocket closed: {reason}");
                if shared.transition(ConnectionState::Disconnected) == ConnectionState::Connected
                    && !shared.suppressed()
                {
                    (callback)(HostEvent::new(
                        format!("websocket disconnected: {reason}"),
                        EventKind::Connection,
                    ));
                }
                return;
            }
            Ok(_) => {}
            Err(e) => {
                error!("websocket error: {e}");
                if shared.transition(ConnectionState::Error) == ConnectionState::Connected
                    && !shared.suppressed()
                {
                    (callback)(HostEvent::new(
                        format!("websocket error: {e}"),
                        EventKind::Error,
                    ));
                }
                return;
            }
        }
    }
    debug!("websocket stream ended");
    if shared.transition(ConnectionState::Disconnected) == ConnectionState::Connected
        && !shared.suppressed()
    {
        (callback)(HostEvent::new("websocket disconnected", EventKind::Connection));
    }
}

/// Single entry point for inbound messages: decode, then route transcript
/// and text to the host and inline audio to the playback queue.
fn dispatch(
    raw: &str,
    shared: &SessionShared,
    callback: &MessageCallback,
    playback: &Arc<PlaybackQueue>,
) {
    if shared.suppressed() {
        return;
    }
    let content = match protocol::decode(raw) {
        Ok(content) => content,
        Err(e) => {
            warn!("dropping malformed server message: {e}");
            return;
        }
    };

    if let Some(transcript) = content.transcript {
        (callback)(HostEvent::new(transcript, EventKind::Transcript));
    }
    for text in content.texts {
        (callback)(HostEvent::new(text, EventKind::Text));
    }
    for b64 in content.audio_b64 {
        match STANDARD.decode(b64.as_bytes()) {
            Ok(pcm) => playback.enqueue(pcm),
            Err(e) => warn!("dropping inline audio with invalid base64: {e}"),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_handle() -> (SessionHandle, UnboundedReceiver<String>) {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(SessionShared::new(false));
    shared.transition(ConnectionState::Connected);
    (
        SessionHandle {
            outbound_tx,
            shared,
        },
        outbound_rx,
    )
}
