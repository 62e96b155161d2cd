//! Janus session management
//!
//! Owns the WebSocket transport and the session lifecycle: create,
//! keepalive, gateway-driven timeout reconnect, and teardown. Two
//! registries correlate asynchronous traffic - pending attach requests by
//! transaction id, attached plugins by handle id. Matching is id-based,
//! never ordering-based: interleaved responses and unsolicited events are
//! expected.

use crate::config::SignallerConfig;
use crate::error::SignalError;
use crate::events::{ClientEvent, EventSender};
use crate::peer::PeerEngine;
use crate::plugin::video_room::VideoRoomPlugin;
use crate::plugin::{Plugin, VIDEOROOM_PLUGIN_NAME};
use crate::protocol::{self, Envelope};
use crate::transport::{Transport, TransportEvent};
use log::{debug, warn};
use rand::Rng;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transport, no session
    Disconnected,
    /// WebSocket handshake in progress
    Connecting,
    /// `create` sent, waiting for the session id
    AwaitingSession,
    /// Session exists, keepalive armed
    Active,
}

const TRANSACTION_CHARSET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Generate one random alphanumeric transaction id
pub fn generate_transaction_id(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| TRANSACTION_CHARSET[rng.gen_range(0..TRANSACTION_CHARSET.len())] as char)
        .collect()
}

/// Janus session manager
pub struct Signaller {
    inner: Arc<SignallerInner>,
}

pub(crate) struct SignallerInner {
    config: SignallerConfig,
    engine: Arc<dyn PeerEngine>,
    events: EventSender,
    state: RwLock<SessionState>,
    url: RwLock<String>,
    session_id: RwLock<Option<u64>>,
    /// Transaction id of the session create, reused for keepalives
    session_transaction: RwLock<String>,
    transport: RwLock<Option<Transport>>,
    /// Reconnect requests, drained by a dedicated task so the dispatch
    /// loop never awaits a new connection itself
    reconnect: mpsc::UnboundedSender<String>,
    /// Handle id -> owning plugin
    plugins: RwLock<HashMap<u64, Arc<dyn Plugin>>>,
    /// Pending attach transaction id -> requesting plugin
    pending: RwLock<HashMap<String, Arc<dyn Plugin>>>,
    /// Typed accessor for the one attachable plugin kind
    video_room: RwLock<Option<Arc<VideoRoomPlugin>>>,
    keepalive: Mutex<Option<JoinHandle<()>>>,
    /// Bumped on every connect and teardown so dispatch loops of stale
    /// connections can tell they have been superseded
    generation: AtomicU64,
}

impl Signaller {
    /// Create a disconnected session manager. Must be called within a
    /// tokio runtime.
    pub fn new(config: SignallerConfig, engine: Arc<dyn PeerEngine>, events: EventSender) -> Self {
        let (reconnect_tx, reconnect_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(SignallerInner {
            config,
            engine,
            events,
            state: RwLock::new(SessionState::Disconnected),
            url: RwLock::new(String::new()),
            session_id: RwLock::new(None),
            session_transaction: RwLock::new(String::new()),
            transport: RwLock::new(None),
            reconnect: reconnect_tx,
            plugins: RwLock::new(HashMap::new()),
            pending: RwLock::new(HashMap::new()),
            video_room: RwLock::new(None),
            keepalive: Mutex::new(None),
            generation: AtomicU64::new(0),
        });
        SignallerInner::spawn_reconnect_task(Arc::downgrade(&inner), reconnect_rx);
        Self { inner }
    }

    /// Connect to the gateway and create a session
    pub async fn connect(&self, url: &str) -> Result<(), SignalError> {
        SignallerInner::connect(&self.inner, url.to_string()).await
    }

    /// Attach a plugin by name. Failures surface as error events.
    pub async fn attach(&self, plugin_name: &str) {
        SignallerInner::attach(&self.inner, plugin_name).await;
    }

    /// The attached video-room plugin, if any
    pub async fn video_room(&self) -> Option<Arc<VideoRoomPlugin>> {
        self.inner.video_room.read().await.clone()
    }

    /// Tear down the session. Safe to call in any state, idempotent.
    pub async fn destroy(&self) {
        self.inner.destroy().await;
    }

    pub async fn state(&self) -> SessionState {
        *self.inner.state.read().await
    }

    pub async fn session_id(&self) -> Option<u64> {
        *self.inner.session_id.read().await
    }

    /// Link handed to plugins so they can talk back to this session
    pub fn link(&self) -> SignallerLink {
        SignallerLink {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Session wired to a bare channel instead of a socket
    #[cfg(test)]
    pub(crate) async fn test_active(
        config: SignallerConfig,
        engine: Arc<dyn PeerEngine>,
        events: EventSender,
    ) -> (Self, crate::transport::websocket::TestOutbox) {
        let signaller = Signaller::new(config, engine, events);
        let (transport, out_rx) = Transport::test_pair();
        *signaller.inner.transport.write().await = Some(transport);
        *signaller.inner.session_id.write().await = Some(4242);
        *signaller.inner.session_transaction.write().await = "sessTxn00001".to_string();
        *signaller.inner.state.write().await = SessionState::Active;
        (signaller, out_rx)
    }

    #[cfg(test)]
    pub(crate) async fn test_handle_message(&self, value: Value) {
        self.inner.handle_message(value).await;
    }
}

impl SignallerInner {
    async fn connect(self: &Arc<Self>, url: String) -> Result<(), SignalError> {
        {
            let state = self.state.read().await;
            if *state != SessionState::Disconnected {
                return Err(SignalError::InvalidState(format!(
                    "connect() while {:?}",
                    *state
                )));
            }
        }
        *self.state.write().await = SessionState::Connecting;
        *self.url.write().await = url.clone();

        let (transport, events) = match Transport::connect(&url).await {
            Ok(pair) => pair,
            Err(e) => {
                *self.state.write().await = SessionState::Disconnected;
                return Err(e);
            }
        };
        *self.transport.write().await = Some(transport);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let inner = self.clone();
        tokio::spawn(async move { inner.run(events, generation).await });
        Ok(())
    }

    /// Dispatch loop over one transport's event stream. Ends when the
    /// transport goes away or a newer connection supersedes this one (a
    /// stale close must not tear down the session that replaced it).
    async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<TransportEvent>, generation: u64) {
        while let Some(event) = events.recv().await {
            if self.generation.load(Ordering::SeqCst) != generation {
                break;
            }
            match event {
                TransportEvent::Open => self.handle_open().await,
                TransportEvent::Message(value) => self.handle_message(value).await,
                TransportEvent::Closed { code, reason } => {
                    self.events.emit(ClientEvent::Closed { code, reason });
                    self.destroy().await;
                    break;
                }
                TransportEvent::Failure(message) => {
                    self.events.error(format!("WebSocket failed: {}", message));
                    self.destroy().await;
                    break;
                }
            }
        }
    }

    async fn handle_open(&self) {
        let transaction = generate_transaction_id(self.config.transaction_id_length);
        *self.session_transaction.write().await = transaction.clone();
        *self.state.write().await = SessionState::AwaitingSession;
        self.send(&protocol::create(&transaction)).await;
    }

    /// Queue one message. Everything but keepalives is logged.
    pub(crate) async fn send(&self, message: &Value) {
        if message["janus"] != "keepalive" {
            debug!("WebSocket OUT: {}", message);
        }
        if let Some(transport) = self.transport.read().await.as_ref() {
            transport.send(message.clone());
        }
    }

    async fn handle_message(self: &Arc<Self>, value: Value) {
        let envelope = match Envelope::parse(&value) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Discarding unparseable message: {}", e);
                return;
            }
        };
        if envelope.janus == "ack" {
            return;
        }
        debug!("WebSocket IN: {}", value);

        match envelope.janus.as_str() {
            "success" => self.handle_success(envelope).await,
            "event" => self.handle_event(envelope).await,
            // Media-layer notifications, not signalling-relevant here
            "media" | "hangup" | "webrtcup" => {}
            "timeout" => self.handle_timeout().await,
            "detached" => self.handle_detached(envelope).await,
            other => warn!("Unhandled message: {} {}", other, value),
        }
    }

    /// A success either completes session creation or a pending attach.
    /// The session create is correlated by "no session yet"; attaches are
    /// correlated by transaction id.
    async fn handle_success(self: &Arc<Self>, envelope: Envelope) {
        let Some(id) = envelope.data.and_then(|d| d.id) else {
            return;
        };

        if self.session_id.read().await.is_none() {
            *self.session_id.write().await = Some(id);
            *self.state.write().await = SessionState::Active;
            self.start_keepalive().await;
            debug!("Session created: {}", id);
            self.events.emit(ClientEvent::Connected);
            return;
        }

        let Some(transaction) = envelope.transaction else {
            return;
        };
        let plugin = self.pending.write().await.remove(&transaction);
        if let Some(plugin) = plugin {
            self.plugins.write().await.insert(id, plugin.clone());
            plugin.attach_success(id).await;
        }
    }

    async fn handle_event(&self, envelope: Envelope) {
        let Some(plugindata) = envelope.plugindata else {
            return;
        };
        let Some(sender) = envelope.sender else {
            return;
        };
        let plugin = self.plugins.read().await.get(&sender).cloned();
        match plugin {
            Some(plugin) => {
                plugin
                    .handle_message(plugindata.data, sender, envelope.jsep)
                    .await
            }
            None => warn!("Event for unknown handle {}", sender),
        }
    }

    async fn handle_detached(&self, envelope: Envelope) {
        if let Some(sender) = envelope.sender {
            if self.plugins.write().await.remove(&sender).is_some() {
                debug!("Handle {} detached by gateway", sender);
            }
        }
    }

    /// Gateway expired the session: tear everything down and hand the URL
    /// to the reconnect task. Plugins and transactions do not survive;
    /// callers re-attach and re-join from scratch.
    async fn handle_timeout(&self) {
        warn!("Session timed out by gateway, reconnecting");
        let url = self.url.read().await.clone();
        self.destroy().await;
        let _ = self.reconnect.send(url);
    }

    /// Reconnects are serviced outside the dispatch loop: the loop only
    /// queues the URL, this task performs the connect. Holds a weak
    /// reference and ends once the signaller is dropped.
    fn spawn_reconnect_task(
        inner: Weak<SignallerInner>,
        mut requests: mpsc::UnboundedReceiver<String>,
    ) {
        tokio::spawn(async move {
            while let Some(url) = requests.recv().await {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                if let Err(e) = SignallerInner::connect(&inner, url).await {
                    inner.events.error(format!("Reconnect failed: {}", e));
                }
            }
        });
    }

    async fn attach(self: &Arc<Self>, plugin_name: &str) {
        let Some(session_id) = *self.session_id.read().await else {
            self.events.error("No active session to attach to.");
            return;
        };

        match plugin_name {
            VIDEOROOM_PLUGIN_NAME => {
                if self.find_plugin_by_name(plugin_name).await.is_some() {
                    self.events
                        .error(format!("'{}' already attached.", plugin_name));
                    return;
                }

                let transaction = self.fresh_transaction_id().await;
                let link = SignallerLink {
                    inner: Arc::downgrade(self),
                };
                let plugin = Arc::new(VideoRoomPlugin::new(
                    link,
                    self.engine.clone(),
                    self.events.clone(),
                    transaction.clone(),
                ));
                self.pending
                    .write()
                    .await
                    .insert(transaction.clone(), plugin.clone());
                *self.video_room.write().await = Some(plugin);
                self.send(&protocol::attach(
                    session_id,
                    &transaction,
                    protocol::VIDEOROOM_PLUGIN_PACKAGE,
                ))
                .await;
            }
            other => {
                self.events
                    .error(format!("Plugin '{}' is not implemented", other));
            }
        }
    }

    async fn find_plugin_by_name(&self, plugin_name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins
            .read()
            .await
            .values()
            .find(|plugin| plugin.name() == plugin_name)
            .cloned()
    }

    /// Generate a transaction id no pending request is using. A duplicate
    /// id would mis-correlate a response, so generation retries until the
    /// id is free.
    async fn fresh_transaction_id(&self) -> String {
        let pending = self.pending.read().await;
        let session_transaction = self.session_transaction.read().await;
        loop {
            let id = generate_transaction_id(self.config.transaction_id_length);
            if !pending.contains_key(&id) && id != *session_transaction {
                return id;
            }
        }
    }

    async fn start_keepalive(self: &Arc<Self>) {
        let inner = self.clone();
        let period = Duration::from_secs(self.config.keepalive_interval_secs);
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let Some(session_id) = *inner.session_id.read().await else {
                    break;
                };
                let transaction = inner.session_transaction.read().await.clone();
                inner.send(&protocol::keepalive(session_id, &transaction)).await;
            }
        });
        let mut keepalive = self.keepalive.lock().await;
        if let Some(previous) = keepalive.replace(handle) {
            previous.abort();
        }
    }

    pub(crate) async fn destroy(&self) {
        // Each plugin instance is registered once per handle it owns;
        // detach hooks must run once per instance.
        let mut unique: Vec<Arc<dyn Plugin>> = Vec::new();
        for (_, plugin) in self.plugins.write().await.drain() {
            if !unique.iter().any(|known| Arc::ptr_eq(known, &plugin)) {
                unique.push(plugin);
            }
        }
        for plugin in unique {
            plugin.destroy().await;
        }

        self.pending.write().await.clear();
        *self.video_room.write().await = None;
        if let Some(handle) = self.keepalive.lock().await.take() {
            handle.abort();
        }
        if let Some(transport) = self.transport.write().await.take() {
            transport.close();
        }
        *self.session_id.write().await = None;
        self.session_transaction.write().await.clear();
        self.url.write().await.clear();
        *self.state.write().await = SessionState::Disconnected;
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

/// Weak reference through which plugins talk back to their session.
/// Operations silently no-op once the session is gone.
#[derive(Clone)]
pub struct SignallerLink {
    inner: Weak<SignallerInner>,
}

impl SignallerLink {
    /// Queue a message on the session transport
    pub async fn send(&self, message: &Value) {
        if let Some(inner) = self.inner.upgrade() {
            inner.send(message).await;
        }
    }

    pub async fn session_id(&self) -> Option<u64> {
        match self.inner.upgrade() {
            Some(inner) => *inner.session_id.read().await,
            None => None,
        }
    }

    /// Transaction id of the session create, reused by handle-scoped
    /// notifications such as trickle
    pub async fn session_transaction(&self) -> String {
        match self.inner.upgrade() {
            Some(inner) => inner.session_transaction.read().await.clone(),
            None => String::new(),
        }
    }

    /// Register a pending attach under `transaction` so the response
    /// routes back to `plugin`
    pub async fn register_pending(&self, transaction: &str, plugin: Arc<dyn Plugin>) {
        if let Some(inner) = self.inner.upgrade() {
            inner
                .pending
                .write()
                .await
                .insert(transaction.to_string(), plugin);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Jsep;
    use async_trait::async_trait;
    use futures::{SinkExt, StreamExt};
    use serde_json::json;
    use std::collections::HashSet;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::protocol::Message;

    struct NullEngine;

    #[async_trait]
    impl PeerEngine for NullEngine {
        async fn create_peer(&self, _name: &str) -> Result<(), SignalError> {
            Ok(())
        }
        async fn has_peer(&self, _name: &str) -> bool {
            false
        }
        async fn create_offer(&self, _name: &str) -> Result<Jsep, SignalError> {
            Ok(Jsep::offer("v=0\r\n"))
        }
        async fn answer(&self, _name: &str, _remote: Jsep) -> Result<Jsep, SignalError> {
            Ok(Jsep::answer("v=0\r\n"))
        }
        async fn set_remote_description(&self, _name: &str, _jsep: Jsep) -> Result<(), SignalError> {
            Ok(())
        }
    }

    #[test]
    fn transaction_ids_are_alphanumeric() {
        let id = generate_transaction_id(12);
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn transaction_ids_do_not_repeat_in_practice() {
        let ids: HashSet<String> = (0..256).map(|_| generate_transaction_id(12)).collect();
        assert_eq!(ids.len(), 256);
    }

    #[tokio::test]
    async fn session_create_completes_on_success() {
        let (events, mut event_rx) = EventSender::channel();
        let signaller = Signaller::new(SignallerConfig::default(), Arc::new(NullEngine), events);
        let (transport, mut out_rx) = Transport::test_pair();
        *signaller.inner.transport.write().await = Some(transport);

        signaller.inner.handle_open().await;
        let create = out_rx.recv().await.unwrap();
        assert_eq!(create["janus"], "create");
        let transaction = create["transaction"].as_str().unwrap().to_string();
        assert_eq!(signaller.state().await, SessionState::AwaitingSession);

        signaller
            .test_handle_message(json!({
                "janus": "success",
                "transaction": transaction,
                "data": { "id": 999 }
            }))
            .await;

        assert_eq!(signaller.session_id().await, Some(999));
        assert_eq!(signaller.state().await, SessionState::Active);
        assert!(matches!(event_rx.recv().await, Some(ClientEvent::Connected)));

        signaller.destroy().await;
        assert_eq!(signaller.state().await, SessionState::Disconnected);
    }

    #[tokio::test]
    async fn attach_pipelines_publisher_then_subscriber() {
        let (events, mut event_rx) = EventSender::channel();
        let (signaller, mut out_rx) =
            Signaller::test_active(SignallerConfig::default(), Arc::new(NullEngine), events).await;

        signaller.attach("video_room").await;
        let first = out_rx.try_recv().expect("expected attach");
        assert_eq!(first["janus"], "attach");
        assert_eq!(first["plugin"], "janus.plugin.videoroom");
        let transaction = first["transaction"].as_str().unwrap().to_string();

        // Publisher attach response assigns the first handle and pipelines
        // the subscriber attach under a derived transaction id
        signaller
            .test_handle_message(json!({
                "janus": "success",
                "transaction": transaction,
                "data": { "id": 11 }
            }))
            .await;
        let second = out_rx.try_recv().expect("expected subscriber attach");
        assert_eq!(second["janus"], "attach");
        assert_eq!(
            second["transaction"].as_str().unwrap(),
            format!("{}.sub", transaction)
        );

        signaller
            .test_handle_message(json!({
                "janus": "success",
                "transaction": format!("{}.sub", transaction),
                "data": { "id": 12 }
            }))
            .await;

        let plugin = signaller.video_room().await.unwrap();
        assert_eq!(plugin.publisher_handle_id().await, 11);
        assert_eq!(plugin.subscriber_handle_id().await, 12);
        match event_rx.recv().await {
            Some(ClientEvent::Attached { plugin }) => assert_eq!(plugin, "video_room"),
            other => panic!("Expected attached event, got {:?}", other),
        }
        assert_eq!(signaller.inner.plugins.read().await.len(), 2);
        assert!(signaller.inner.pending.read().await.is_empty());
    }

    #[tokio::test]
    async fn attach_twice_reports_error() {
        let (events, mut event_rx) = EventSender::channel();
        let (signaller, mut out_rx) =
            Signaller::test_active(SignallerConfig::default(), Arc::new(NullEngine), events).await;

        signaller.attach("video_room").await;
        let first = out_rx.try_recv().expect("expected attach");
        let transaction = first["transaction"].as_str().unwrap().to_string();
        signaller
            .test_handle_message(json!({
                "janus": "success",
                "transaction": transaction,
                "data": { "id": 11 }
            }))
            .await;

        signaller.attach("video_room").await;
        match event_rx.recv().await {
            Some(ClientEvent::Error { message }) => {
                assert!(message.contains("already attached"))
            }
            other => panic!("Expected error event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn unknown_plugin_reports_error() {
        let (events, mut event_rx) = EventSender::channel();
        let (signaller, _out_rx) =
            Signaller::test_active(SignallerConfig::default(), Arc::new(NullEngine), events).await;

        signaller.attach("echo_test").await;
        match event_rx.recv().await {
            Some(ClientEvent::Error { message }) => assert!(message.contains("not implemented")),
            other => panic!("Expected error event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn detached_notification_removes_handle() {
        let (events, _event_rx) = EventSender::channel();
        let (signaller, mut out_rx) =
            Signaller::test_active(SignallerConfig::default(), Arc::new(NullEngine), events).await;

        signaller.attach("video_room").await;
        let transaction = out_rx.try_recv().expect("expected attach")["transaction"]
            .as_str()
            .unwrap()
            .to_string();
        signaller
            .test_handle_message(json!({
                "janus": "success",
                "transaction": transaction,
                "data": { "id": 11 }
            }))
            .await;
        assert_eq!(signaller.inner.plugins.read().await.len(), 1);

        signaller
            .test_handle_message(json!({ "janus": "detached", "sender": 11 }))
            .await;
        assert!(signaller.inner.plugins.read().await.is_empty());
    }

    #[tokio::test]
    async fn destroy_twice_sends_no_duplicate_detach() {
        let (events, _event_rx) = EventSender::channel();
        let (signaller, mut out_rx) =
            Signaller::test_active(SignallerConfig::default(), Arc::new(NullEngine), events).await;

        signaller.attach("video_room").await;
        let transaction = out_rx.try_recv().expect("expected attach")["transaction"]
            .as_str()
            .unwrap()
            .to_string();
        signaller
            .test_handle_message(json!({
                "janus": "success",
                "transaction": transaction,
                "data": { "id": 11 }
            }))
            .await;
        let _sub_attach = out_rx.try_recv();
        signaller
            .test_handle_message(json!({
                "janus": "success",
                "transaction": format!("{}.sub", transaction),
                "data": { "id": 12 }
            }))
            .await;

        signaller.destroy().await;
        signaller.destroy().await;

        let mut detaches = Vec::new();
        while let Some(msg) = out_rx.try_recv() {
            if msg["janus"] == "detach" {
                detaches.push(msg["handle_id"].as_u64().unwrap());
            }
        }
        detaches.sort_unstable();
        assert_eq!(detaches, vec![11, 12]);
    }

    /// Minimal in-process gateway: answers session creates, then expires
    /// the first session to drive the reconnect path.
    async fn spawn_expiring_gateway() -> (String, mpsc::UnboundedReceiver<(u32, Value)>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/janus", listener.local_addr().unwrap());
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            for connection in 1u32..=2 {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let Ok(ws_stream) = tokio_tungstenite::accept_hdr_async(
                    stream,
                    |_request: &tokio_tungstenite::tungstenite::handshake::server::Request,
                     mut response: tokio_tungstenite::tungstenite::handshake::server::Response| {
                        response.headers_mut().insert(
                            "Sec-WebSocket-Protocol",
                            tokio_tungstenite::tungstenite::http::HeaderValue::from_static(
                                "janus-protocol",
                            ),
                        );
                        Ok(response)
                    },
                )
                .await
                else {
                    return;
                };
                let (mut write, mut read) = ws_stream.split();

                while let Some(Ok(Message::Text(text))) = read.next().await {
                    let msg: Value = match serde_json::from_str(&text) {
                        Ok(msg) => msg,
                        Err(_) => continue,
                    };
                    let _ = seen_tx.send((connection, msg.clone()));
                    if msg["janus"] == "create" {
                        let reply = json!({
                            "janus": "success",
                            "transaction": msg["transaction"],
                            "data": { "id": 70 + connection }
                        });
                        if write.send(Message::Text(reply.to_string())).await.is_err() {
                            break;
                        }
                        if connection == 1 {
                            let timeout = json!({ "janus": "timeout", "session_id": 71 });
                            let _ = write.send(Message::Text(timeout.to_string())).await;
                        }
                        break;
                    }
                }

                if connection == 2 {
                    // Hold the second connection open until the client is done
                    while read.next().await.is_some() {}
                }
            }
        });

        (url, seen_rx)
    }

    #[tokio::test]
    async fn gateway_timeout_triggers_transparent_reconnect() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (url, mut seen) = spawn_expiring_gateway().await;
        let (events, _event_rx) = EventSender::channel();
        let signaller = Signaller::new(SignallerConfig::default(), Arc::new(NullEngine), events);

        signaller.connect(&url).await.unwrap();

        let deadline = Duration::from_secs(5);
        let (conn, first) = time::timeout(deadline, seen.recv()).await.unwrap().unwrap();
        assert_eq!(conn, 1);
        assert_eq!(first["janus"], "create");

        // The timeout push forces a teardown and a fresh create on a new
        // connection to the same URL
        let (conn, second) = time::timeout(deadline, seen.recv()).await.unwrap().unwrap();
        assert_eq!(conn, 2);
        assert_eq!(second["janus"], "create");

        // New session id proves the old one was discarded
        let started = Instant::now();
        loop {
            if signaller.session_id().await == Some(72) {
                break;
            }
            assert!(started.elapsed() < deadline, "second session never completed");
            time::sleep(Duration::from_millis(10)).await;
        }

        signaller.destroy().await;
    }
}
