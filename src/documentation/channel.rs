use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{error, info, warn};

use super::messages::{build_socket_url, DocumentationRequest, OutboundMessage};
use super::state::{DocumentationEvent, DocumentationNote, DocumentationState, PendingRequest, TranscriptEntry};
use crate::audio::encode_pcm16;
use crate::config::DocumentationConfig;
use crate::error::{SessionError, SessionResult};

const OUTBOUND_QUEUE: usize = 256;
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection status of the documentation socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ChannelStatus {
    /// First connection attempt in progress
    Connecting,
    Open,
    /// Connection lost; outbound traffic is held in the backlog
    Reconnecting { attempt: u32 },
    Closed,
}

/// What happened to an outbound frame or request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Queued,
    Dropped,
}

#[derive(Debug, Clone)]
pub struct ChannelSettings {
    /// Base socket URL, without query
    pub url: String,
    pub reconnect_attempts: u32,
    pub reconnect_base: Duration,
    pub backlog_capacity: usize,
}

impl ChannelSettings {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_attempts: 5,
            reconnect_base: Duration::from_millis(500),
            backlog_capacity: 64,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.reconnect_base.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

impl From<&DocumentationConfig> for ChannelSettings {
    fn from(cfg: &DocumentationConfig) -> Self {
        Self {
            url: cfg.url.clone(),
            reconnect_attempts: cfg.reconnect_attempts,
            reconnect_base: Duration::from_millis(cfg.reconnect_base_ms),
            backlog_capacity: cfg.backlog_capacity,
        }
    }
}

/// Bounded holding area used while reconnecting; oldest entries go first
struct Backlog {
    queue: VecDeque<Message>,
    capacity: usize,
}

impl Backlog {
    fn push_back(&mut self, msg: Message) -> bool {
        if self.capacity == 0 {
            return false;
        }
        if self.queue.len() >= self.capacity {
            self.queue.pop_front();
        }
        self.queue.push_back(msg);
        true
    }

    /// Put unsent messages ahead of anything queued later
    fn requeue_front(&mut self, msgs: Vec<Message>) {
        for msg in msgs.into_iter().rev() {
            if self.queue.len() >= self.capacity {
                break;
            }
            self.queue.push_front(msg);
        }
    }
}

/// Connection status together with the reconnect backlog
///
/// Status changes and delivery decisions both happen under the backlog
/// lock, so nothing can be queued after the backlog was flushed for a new
/// connection.
struct Outbox {
    backlog: StdMutex<Backlog>,
    status_tx: watch::Sender<ChannelStatus>,
}

impl Outbox {
    fn new(capacity: usize) -> (Self, watch::Receiver<ChannelStatus>) {
        let (status_tx, status_rx) = watch::channel(ChannelStatus::Connecting);
        let outbox = Self {
            backlog: StdMutex::new(Backlog {
                queue: VecDeque::new(),
                capacity,
            }),
            status_tx,
        };
        (outbox, status_rx)
    }

    fn lock(&self) -> MutexGuard<'_, Backlog> {
        self.backlog.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn deliver(&self, msg: Message, outbound_tx: &mpsc::Sender<Message>) -> Delivery {
        let mut backlog = self.lock();
        let status = *self.status_tx.borrow();
        match status {
            ChannelStatus::Open => match outbound_tx.try_send(msg) {
                Ok(()) => Delivery::Sent,
                Err(_) => Delivery::Dropped,
            },
            ChannelStatus::Reconnecting { .. } => {
                if backlog.push_back(msg) {
                    Delivery::Queued
                } else {
                    Delivery::Dropped
                }
            }
            ChannelStatus::Connecting | ChannelStatus::Closed => Delivery::Dropped,
        }
    }

    /// Mark the socket open and take everything held for it
    fn open(&self) -> Vec<Message> {
        let mut backlog = self.lock();
        self.status_tx.send_replace(ChannelStatus::Open);
        backlog.queue.drain(..).collect()
    }

    /// Mark the socket lost, moving anything still bound for it into the
    /// backlog ahead of later traffic
    fn reconnecting(&self, attempt: u32, outbound_rx: &mut mpsc::Receiver<Message>) {
        let mut backlog = self.lock();
        let mut unsent = Vec::new();
        while let Ok(msg) = outbound_rx.try_recv() {
            unsent.push(msg);
        }
        backlog.requeue_front(unsent);
        self.status_tx
            .send_replace(ChannelStatus::Reconnecting { attempt });
    }

    fn close(&self) {
        let mut backlog = self.lock();
        self.status_tx.send_replace(ChannelStatus::Closed);
        backlog.queue.clear();
    }
}

/// WebSocket bridge to the backend AI medical session
///
/// Audio frames go out as binary PCM16, documentation requests as JSON.
/// Inbound JSON is folded into a [`DocumentationState`] and re-broadcast as
/// [`DocumentationEvent`]s.
pub struct DocumentationChannel {
    status_rx: watch::Receiver<ChannelStatus>,
    outbound_tx: mpsc::Sender<Message>,
    outbox: Arc<Outbox>,
    state: Arc<Mutex<DocumentationState>>,
    events: broadcast::Sender<DocumentationEvent>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
}

impl DocumentationChannel {
    /// Start connecting; returns immediately in [`ChannelStatus::Connecting`]
    pub fn connect(
        settings: ChannelSettings,
        token: &str,
        review_id: Option<String>,
        appointment_id: Option<String>,
    ) -> SessionResult<Self> {
        // Validate the url up front so a bad config fails fast
        build_socket_url(&settings.url, token, review_id.as_deref(), appointment_id.as_deref())?;

        info!("Opening documentation channel to {}", settings.url);

        let (outbox, status_rx) = Outbox::new(settings.backlog_capacity);
        let outbox = Arc::new(outbox);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (events, _) = broadcast::channel(256);
        let state = Arc::new(Mutex::new(DocumentationState::default()));

        let task = ConnectionTask {
            settings,
            token: token.to_string(),
            review_id,
            appointment_id,
            state: Arc::clone(&state),
            events: events.clone(),
            outbox: Arc::clone(&outbox),
            outbound_rx,
            shutdown_rx,
        };
        let handle = tokio::spawn(task.run());

        Ok(Self {
            status_rx,
            outbound_tx,
            outbox,
            state,
            events,
            shutdown_tx,
            task: Mutex::new(Some(handle)),
            frames_sent: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        })
    }

    pub fn status(&self) -> ChannelStatus {
        *self.status_rx.borrow()
    }

    pub fn status_watch(&self) -> watch::Receiver<ChannelStatus> {
        self.status_rx.clone()
    }

    pub fn is_open(&self) -> bool {
        self.status() == ChannelStatus::Open
    }

    /// Wait until the socket is open; false if it closed for good first
    pub async fn wait_open(&self) -> bool {
        let mut rx = self.status_rx.clone();
        let status = rx
            .wait_for(|s| matches!(s, ChannelStatus::Open | ChannelStatus::Closed))
            .await
            .map(|s| *s)
            .unwrap_or(ChannelStatus::Closed);
        status == ChannelStatus::Open
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DocumentationEvent> {
        self.events.subscribe()
    }

    /// Encode and send one audio block; never blocks
    ///
    /// Frames are dropped while the first connection is pending or after
    /// close, and held in the backlog while reconnecting.
    pub fn stream_audio(&self, samples: &[f32]) -> Delivery {
        let delivery = match self.status() {
            ChannelStatus::Connecting | ChannelStatus::Closed => Delivery::Dropped,
            _ => self.deliver(Message::Binary(encode_pcm16(samples))),
        };

        match delivery {
            Delivery::Dropped => self.frames_dropped.fetch_add(1, Ordering::Relaxed),
            _ => self.frames_sent.fetch_add(1, Ordering::Relaxed),
        };
        delivery
    }

    /// Send a `documentation.request`; returns its correlation id
    pub async fn request_documentation(
        &self,
        request_type: &str,
        details: &str,
        appointment_id: &str,
    ) -> SessionResult<String> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let message = OutboundMessage::DocumentationRequest {
            content: DocumentationRequest {
                request_type: request_type.to_string(),
                details: details.to_string(),
                appointment_id: appointment_id.to_string(),
                request_id: request_id.clone(),
            },
        };
        let text = serde_json::to_string(&message)
            .map_err(|e| SessionError::Socket(format!("failed to encode request: {}", e)))?;

        // Hold the state lock so the answer cannot be applied before the
        // request is registered
        let mut state = self.state.lock().await;
        if self.deliver(Message::Text(text)) == Delivery::Dropped {
            return Err(SessionError::Socket(format!(
                "documentation channel not connected ({:?})",
                self.status()
            )));
        }

        state.begin_request(PendingRequest {
            request_id: request_id.clone(),
            request_type: request_type.to_string(),
            sent_at: Utc::now(),
        });

        info!("Requested {} documentation ({})", request_type, request_id);
        Ok(request_id)
    }

    fn deliver(&self, msg: Message) -> Delivery {
        self.outbox.deliver(msg, &self.outbound_tx)
    }

    /// Send `documentation.stop`, close the socket and stop reconnecting
    pub async fn close(&self) {
        let Some(task) = self.task.lock().await.take() else {
            return;
        };

        if self.is_open() {
            if let Ok(text) = serde_json::to_string(&OutboundMessage::DocumentationStop) {
                let _ = self.outbound_tx.try_send(Message::Text(text));
            }
        }
        let _ = self.shutdown_tx.send(true);

        let abort = task.abort_handle();
        match tokio::time::timeout(CLOSE_TIMEOUT, task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.is_cancelled() => {}
            Ok(Err(e)) => error!("Documentation channel task panicked: {}", e),
            Err(_) => {
                warn!("Documentation channel did not close in time, aborting");
                abort.abort();
            }
        }

        info!(
            "Documentation channel closed ({} frames sent, {} dropped)",
            self.frames_sent.load(Ordering::Relaxed),
            self.frames_dropped.load(Ordering::Relaxed)
        );
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    pub async fn review_id(&self) -> Option<String> {
        self.state.lock().await.review_id.as_ref().map(|id| id.to_string())
    }

    pub async fn transcript(&self) -> Vec<TranscriptEntry> {
        self.state.lock().await.transcript.clone()
    }

    pub async fn notes(&self) -> Vec<DocumentationNote> {
        self.state.lock().await.notes.clone()
    }

    pub async fn snapshot(&self) -> DocumentationState {
        self.state.lock().await.clone()
    }
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum Exit {
    Shutdown,
    Disconnected(String),
}

struct ConnectionTask {
    settings: ChannelSettings,
    token: String,
    review_id: Option<String>,
    appointment_id: Option<String>,
    state: Arc<Mutex<DocumentationState>>,
    events: broadcast::Sender<DocumentationEvent>,
    outbox: Arc<Outbox>,
    outbound_rx: mpsc::Receiver<Message>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ConnectionTask {
    async fn run(mut self) {
        let mut attempt = 0u32;

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            let url = match self.current_url().await {
                Ok(url) => url,
                Err(e) => {
                    error!("{}", e);
                    break;
                }
            };

            let connected = tokio::select! {
                res = tokio_tungstenite::connect_async(url.as_str()) => res,
                _ = self.shutdown_rx.changed() => break,
            };

            match connected {
                Ok((socket, _)) => {
                    attempt = 0;
                    let held = self.outbox.open();
                    info!("Documentation channel open");

                    match self.pump(socket, held).await {
                        Exit::Shutdown => break,
                        Exit::Disconnected(reason) => {
                            warn!("Documentation channel lost: {}", reason);
                        }
                    }
                }
                Err(e) => warn!("Documentation channel connect failed: {}", e),
            }

            attempt += 1;
            if attempt > self.settings.reconnect_attempts {
                error!(
                    "Documentation channel giving up after {} reconnect attempts",
                    self.settings.reconnect_attempts
                );
                break;
            }

            self.outbox.reconnecting(attempt, &mut self.outbound_rx);
            let delay = self.settings.backoff(attempt);
            info!(
                "Reconnecting documentation channel in {}ms (attempt {})",
                delay.as_millis(),
                attempt
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown_rx.changed() => break,
            }
        }

        self.outbox.close();
    }

    /// Reconnects resume the review the backend already assigned
    async fn current_url(&self) -> SessionResult<String> {
        let assigned = self
            .state
            .lock()
            .await
            .review_id
            .as_ref()
            .map(|id| id.to_string());
        let review_id = assigned.or_else(|| self.review_id.clone());

        build_socket_url(
            &self.settings.url,
            &self.token,
            review_id.as_deref(),
            self.appointment_id.as_deref(),
        )
    }

    async fn pump(&mut self, socket: Socket, held: Vec<Message>) -> Exit {
        let (mut sink, mut stream) = socket.split();

        if !held.is_empty() {
            info!("Flushing {} held documentation messages", held.len());
        }
        for msg in held {
            if let Err(e) = sink.send(msg).await {
                return Exit::Disconnected(e.to_string());
            }
        }

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    while let Ok(msg) = self.outbound_rx.try_recv() {
                        if sink.send(msg).await.is_err() {
                            break;
                        }
                    }
                    let _ = sink.send(Message::Close(None)).await;
                    return Exit::Shutdown;
                }

                outbound = self.outbound_rx.recv() => match outbound {
                    Some(msg) => {
                        if let Err(e) = sink.send(msg).await {
                            return Exit::Disconnected(e.to_string());
                        }
                    }
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        return Exit::Shutdown;
                    }
                },

                inbound = stream.next() => match inbound {
                    Some(Ok(Message::Text(text))) => self.handle_text(&text).await,
                    Some(Ok(Message::Close(frame))) => {
                        return Exit::Disconnected(format!("closed by server: {:?}", frame));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Exit::Disconnected(e.to_string()),
                    None => return Exit::Disconnected("stream ended".to_string()),
                },
            }
        }
    }

    async fn handle_text(&self, text: &str) {
        let event = self.state.lock().await.handle_text(text);
        if let Some(event) = event {
            // No subscribers is fine
            let _ = self.events.send(event);
        }
    }
}
