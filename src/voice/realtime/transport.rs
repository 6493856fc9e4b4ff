//! WebSocket session transport to the remote streaming voice model.
//!
//! Same split-socket shape as `cli::run_device_agent`'s device link:
//! `tokio_tungstenite::connect_async` then `futures_util::StreamExt::split`
//! into a send half and a receive half, each driven by its own task.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use super::bus::MessageBus;
use super::event::{ClientEvent, ServerEvent};

type WsConnection = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = futures_util::stream::SplitSink<WsConnection, WsMessage>;
type WsSource = futures_util::stream::SplitStream<WsConnection>;

const BASE_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(16);
const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 100;
const INITIAL_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("authentication rejected by remote session endpoint")]
    Auth,
    #[error("websocket handshake failed: {0}")]
    Handshake(String),
    #[error("session closed: {0}")]
    Closed(String),
    #[error("failed to send event: {0}")]
    Send(String),
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}

/// Fatal failure of the very first connection attempt. Per spec.md
/// §4.1/§7, an auth or handshake failure on initial open must surface
/// to the caller of `start` rather than disappear into the reconnect
/// loop's backoff — only connections lost *after* a successful first
/// open are self-healing.
#[derive(Debug, Error)]
#[error("failed to establish initial session: {0}")]
pub struct TransportInitError(#[source] pub TransportError);

/// Doubling backoff with a cap, matching
/// `gateway::heartbeat::CronHeartbeat::backoff_duration`'s shape,
/// scaled from minutes to the transport's sub-minute reconnect window.
fn backoff_duration(attempt: u32) -> Duration {
    let secs = BASE_BACKOFF.as_secs().saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_secs(secs.min(MAX_BACKOFF.as_secs()))
}

/// Bus topic server events are republished to, for subscribers that
/// prefer the bus over the typed handler registry.
pub const TOPIC_SERVER_EVENT: &str = "transport.server_event";

/// Handler topic matching every server event type, for subscribers
/// that want to see the whole stream rather than one event type.
pub const EVENT_TYPE_ANY: &str = "*";

/// Async callback invoked with a decoded server event.
pub type EventHandler = Arc<dyn Fn(ServerEvent) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

/// Outbound queue with drop-oldest-on-overflow semantics: a plain
/// bounded channel can only ever apply backpressure or drop the
/// newest item, neither of which matches the transport's contract.
struct OutboundQueue {
    events: VecDeque<ClientEvent>,
    capacity: usize,
}

impl OutboundQueue {
    fn new(capacity: usize) -> Self {
        Self { events: VecDeque::with_capacity(capacity), capacity }
    }

    fn push_back(&mut self, event: ClientEvent) {
        if self.events.len() >= self.capacity {
            self.events.pop_front();
            warn!("transport: outbound queue full (capacity {}), dropped oldest queued event", self.capacity);
        }
        self.events.push_back(event);
    }

    /// Requeue an event at the head, for a send that failed mid-write:
    /// it is retried before anything queued after it.
    fn push_front(&mut self, event: ClientEvent) {
        self.events.push_front(event);
    }

    fn pop_front(&mut self) -> Option<ClientEvent> {
        self.events.pop_front()
    }
}

/// Persistent bidirectional session to the remote voice model.
///
/// The composition root calls `connect_initial` once, synchronously,
/// to surface a fatal auth/handshake failure on the very first open;
/// once that succeeds, `run` is spawned as its own task and owns
/// reconnection (with backoff) for the rest of the process lifetime.
/// One task reads frames off the socket and one writes outbound
/// events, both driven from the same `tokio::select!` in `run_session`;
/// everything shares a shutdown broadcast so `stop` tears it down in
/// one shot.
pub struct SessionTransport {
    url: String,
    auth_token: Option<String>,
    outbound: Arc<Mutex<OutboundQueue>>,
    outbound_notify: Arc<Notify>,
    handlers: Arc<Mutex<HashMap<String, Vec<(u64, EventHandler)>>>>,
    next_subscription_id: Arc<AtomicU64>,
    shutdown_tx: broadcast::Sender<()>,
    connected: Arc<AtomicBool>,
    bus: MessageBus,
    /// Socket established by `connect_initial`, handed off to `run`'s
    /// first iteration so the just-opened connection isn't immediately
    /// dropped and reopened.
    initial_socket: Arc<Mutex<Option<(WsSink, WsSource)>>>,
}

impl SessionTransport {
    pub fn new(url: impl Into<String>, auth_token: Option<String>, bus: MessageBus) -> Self {
        Self::with_capacity(url, auth_token, bus, DEFAULT_OUTBOUND_QUEUE_CAPACITY)
    }

    pub fn with_capacity(url: impl Into<String>, auth_token: Option<String>, bus: MessageBus, capacity: usize) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            url: url.into(),
            auth_token,
            outbound: Arc::new(Mutex::new(OutboundQueue::new(capacity))),
            outbound_notify: Arc::new(Notify::new()),
            handlers: Arc::new(Mutex::new(HashMap::new())),
            next_subscription_id: Arc::new(AtomicU64::new(0)),
            shutdown_tx,
            connected: Arc::new(AtomicBool::new(false)),
            bus,
            initial_socket: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Queue an outbound event. Never blocks on network I/O and never
    /// blocks on backpressure: once the queue is at capacity, the
    /// oldest queued event is dropped to make room.
    pub async fn send(&self, event: ClientEvent) -> Result<(), TransportError> {
        let mut queue = self.outbound.lock().await;
        queue.push_back(event);
        drop(queue);
        self.outbound_notify.notify_one();
        Ok(())
    }

    /// Register `handler` to run for every inbound event whose wire
    /// `type` matches `event_type` (see [`ServerEvent::type_name`]), or
    /// every event if `event_type` is [`EVENT_TYPE_ANY`]. Handlers run
    /// on a spawned task, never inline on the socket's receive loop.
    pub async fn subscribe(&self, event_type: impl Into<String>, handler: EventHandler) -> SubscriptionId {
        let id = self.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        let mut handlers = self.handlers.lock().await;
        handlers.entry(event_type.into()).or_default().push((id, handler));
        SubscriptionId(id)
    }

    /// Remove a previously registered handler for `event_type`.
    pub async fn unsubscribe(&self, event_type: &str, id: SubscriptionId) {
        let mut handlers = self.handlers.lock().await;
        if let Some(registered) = handlers.get_mut(event_type) {
            registered.retain(|(existing, _)| *existing != id.0);
        }
    }

    /// Signal every running task to stop. Idempotent.
    pub fn stop(&self, reason: &str) {
        info!("session transport stopping: {}", reason);
        let _ = self.shutdown_tx.send(());
        self.connected.store(false, Ordering::Relaxed);
    }

    /// Perform only the initial handshake/auth step, bounded by a 30s
    /// timeout (spec.md §5). On success the established socket is
    /// stashed for `run`'s first iteration. On failure — auth
    /// rejected, handshake error, or timeout — returns
    /// [`TransportInitError`], which spec.md §4.1/§7 require to be
    /// fatal and surfaced to the caller of `start`, not absorbed into
    /// the reconnect loop.
    pub async fn connect_initial(&self) -> Result<(), TransportInitError> {
        match tokio::time::timeout(INITIAL_CONNECT_TIMEOUT, self.connect()).await {
            Ok(Ok((ws_tx, ws_rx))) => {
                *self.initial_socket.lock().await = Some((ws_tx, ws_rx));
                Ok(())
            }
            Ok(Err(e)) => Err(TransportInitError(e)),
            Err(_) => Err(TransportInitError(TransportError::Handshake(
                format!("initial connect did not complete within {:?}", INITIAL_CONNECT_TIMEOUT),
            ))),
        }
    }

    /// Run the reconnect loop until `stop` is called. Intended to be
    /// spawned as its own task by the composition root, after a
    /// successful `connect_initial`.
    pub async fn run(&self) {
        let mut attempt: u32 = 0;
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            let attempt_fut = async {
                if let Some((ws_tx, ws_rx)) = self.initial_socket.lock().await.take() {
                    self.run_session(ws_tx, ws_rx).await
                } else {
                    self.connect_and_run().await
                }
            };
            tokio::select! {
                result = attempt_fut => {
                    match result {
                        Ok(()) => {
                            info!("session transport closed cleanly");
                            attempt = 0;
                        }
                        Err(e) => {
                            warn!("session transport dropped: {}", e);
                            attempt = attempt.saturating_add(1);
                        }
                    }
                    self.connected.store(false, Ordering::Relaxed);
                    let wait = backoff_duration(attempt);
                    debug!("reconnecting in {:?}", wait);
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = shutdown_rx.recv() => return,
                    }
                }
                _ = shutdown_rx.recv() => return,
            }
        }
    }

    async fn connect(&self) -> Result<(WsSink, WsSource), TransportError> {
        let mut request = self
            .url
            .clone()
            .into_client_request()
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        if let Some(token) = &self.auth_token {
            let value = format!("Bearer {token}")
                .parse()
                .map_err(|_| TransportError::Auth)?;
            request.headers_mut().insert("Authorization", value);
        }

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        self.connected.store(true, Ordering::Relaxed);
        info!("session transport connected to {}", self.url);

        Ok(ws_stream.split())
    }

    async fn connect_and_run(&self) -> Result<(), TransportError> {
        let (ws_tx, ws_rx) = self.connect().await?;
        self.run_session(ws_tx, ws_rx).await
    }

    async fn run_session(&self, mut ws_tx: WsSink, mut ws_rx: WsSource) -> Result<(), TransportError> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let run_result = loop {
            tokio::select! {
                event = Self::next_outbound(&self.outbound, &self.outbound_notify) => {
                    let json = match serde_json::to_string(&event) {
                        Ok(j) => j,
                        Err(e) => {
                            error!("failed to encode client event: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = ws_tx.send(WsMessage::Text(json.into())).await {
                        let mut queue = self.outbound.lock().await;
                        queue.push_front(event);
                        drop(queue);
                        break Err(TransportError::Send(e.to_string()));
                    }
                }
                maybe_msg = ws_rx.next() => {
                    match maybe_msg {
                        Some(Ok(WsMessage::Text(text))) => {
                            self.dispatch_server_event(&text).await;
                        }
                        Some(Ok(WsMessage::Close(frame))) => {
                            let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                            break Err(TransportError::Closed(reason));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break Err(TransportError::Closed(e.to_string())),
                        None => break Err(TransportError::Closed("stream ended".to_string())),
                    }
                }
                _ = shutdown_rx.recv() => break Ok(()),
            }
        };

        run_result
    }

    /// Wait for and remove the next queued outbound event, parking on
    /// `notify` while the queue is empty rather than polling it.
    async fn next_outbound(outbound: &Mutex<OutboundQueue>, notify: &Notify) -> ClientEvent {
        loop {
            {
                let mut queue = outbound.lock().await;
                if let Some(event) = queue.pop_front() {
                    return event;
                }
            }
            notify.notified().await;
        }
    }

    async fn dispatch_server_event(&self, text: &str) {
        let event: ServerEvent = match serde_json::from_str(text) {
            Ok(ev) => ev,
            Err(e) => {
                warn!("malformed server frame dropped: {}", e);
                return;
            }
        };
        if matches!(event, ServerEvent::Unknown) {
            debug!("unrecognized server event type, dropped");
        }

        let payload = serde_json::to_value(&event).unwrap_or(serde_json::Value::Null);
        self.bus.publish(TOPIC_SERVER_EVENT, payload).await;

        let type_name = event.type_name();
        let to_run: Vec<EventHandler> = {
            let handlers = self.handlers.lock().await;
            let mut matched = Vec::new();
            if let Some(registered) = handlers.get(type_name) {
                matched.extend(registered.iter().map(|(_, handler)| handler.clone()));
            }
            if let Some(registered) = handlers.get(EVENT_TYPE_ANY) {
                matched.extend(registered.iter().map(|(_, handler)| handler.clone()));
            }
            matched
        };
        for handler in to_run {
            let event = event.clone();
            tokio::spawn(async move { handler(event).await });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_duration(0), Duration::from_secs(1));
        assert_eq!(backoff_duration(1), Duration::from_secs(2));
        assert_eq!(backoff_duration(2), Duration::from_secs(4));
        assert_eq!(backoff_duration(3), Duration::from_secs(8));
        assert_eq!(backoff_duration(4), Duration::from_secs(16));
        assert_eq!(backoff_duration(5), Duration::from_secs(16));
        assert_eq!(backoff_duration(10), Duration::from_secs(16));
    }

    #[tokio::test]
    async fn send_without_running_loop_queues_and_does_not_panic() {
        let bus = MessageBus::new();
        let transport = SessionTransport::new("ws://127.0.0.1:1/voice", None, bus);
        transport
            .send(ClientEvent::InputAudioBufferCommit)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn outbound_queue_drops_oldest_past_capacity() {
        let bus = MessageBus::new();
        let transport = SessionTransport::with_capacity("ws://127.0.0.1:1/voice", None, bus, 2);
        transport.send(ClientEvent::InputAudioBufferCommit).await.unwrap();
        transport.send(ClientEvent::InputAudioBufferClear).await.unwrap();
        transport.send(ClientEvent::ResponseCancel).await.unwrap();
        let queue = transport.outbound.lock().await;
        assert_eq!(queue.events.len(), 2);
        assert!(matches!(queue.events[0], ClientEvent::InputAudioBufferClear));
        assert!(matches!(queue.events[1], ClientEvent::ResponseCancel));
    }

    #[tokio::test]
    async fn connect_initial_surfaces_handshake_failure_to_caller() {
        let bus = MessageBus::new();
        // Nothing listens on this loopback port: the handshake fails
        // fast with a connection-refused error rather than timing out.
        let transport = SessionTransport::new("ws://127.0.0.1:1/voice", None, bus);
        let result = transport.connect_initial().await;
        assert!(result.is_err(), "a failed initial handshake must surface as Err, not be swallowed");
        assert!(!transport.is_connected());
    }

    #[test]
    fn stop_is_idempotent() {
        let bus = MessageBus::new();
        let transport = SessionTransport::new("ws://127.0.0.1:1/voice", None, bus);
        transport.stop("test");
        transport.stop("test again");
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn subscribe_routes_matching_event_type_to_handler() {
        let bus = MessageBus::new();
        let transport = SessionTransport::new("ws://127.0.0.1:1/voice", None, bus);
        let hits = Arc::new(AtomicU32::new(0));
        let counted = hits.clone();
        transport
            .subscribe(
                "response.audio.delta",
                Arc::new(move |_event: ServerEvent| {
                    let counted = counted.clone();
                    Box::pin(async move {
                        counted.fetch_add(1, Ordering::Relaxed);
                    })
                }),
            )
            .await;

        transport
            .dispatch_server_event(r#"{"type":"response.audio.delta","response_id":"r1","delta":"AA=="}"#)
            .await;
        transport
            .dispatch_server_event(r#"{"type":"response.text.delta","response_id":"r1","delta":"hi"}"#)
            .await;

        // Handlers run on a spawned task; give the scheduler a turn.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn unsubscribe_stops_future_dispatch() {
        let bus = MessageBus::new();
        let transport = SessionTransport::new("ws://127.0.0.1:1/voice", None, bus);
        let hits = Arc::new(AtomicU32::new(0));
        let counted = hits.clone();
        let id = transport
            .subscribe(
                "error",
                Arc::new(move |_event: ServerEvent| {
                    let counted = counted.clone();
                    Box::pin(async move {
                        counted.fetch_add(1, Ordering::Relaxed);
                    })
                }),
            )
            .await;
        transport.unsubscribe("error", id).await;
        transport.dispatch_server_event(r#"{"type":"error","message":"boom"}"#).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(hits.load(Ordering::Relaxed), 0);
    }
}
