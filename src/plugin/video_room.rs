//! Video-room plugin orchestration
//!
//! One instance drives two gateway handles. The publisher handle joins
//! the room and offers local media; the subscriber handle receives every
//! remote feed over a single negotiated connection. Handles are attached
//! pipelined (publisher first, its response triggers the subscriber
//! attach), and publish/subscribe negotiation proceeds concurrently once
//! the room is joined. Feed bookkeeping converges to whatever stream set
//! the gateway last pushed.

use crate::events::{ClientEvent, EventSender};
use crate::peer::{MediaKind, PeerEngine, PUBLISHER_PEER, SUBSCRIBER_PEER};
use crate::plugin::feeds::{FeedRegistry, FeedSnapshot};
use crate::plugin::{Plugin, VIDEOROOM_PLUGIN_NAME};
use crate::protocol::{self, IceCandidate, Jsep};
use crate::signaller::SignallerLink;
use async_trait::async_trait;
use log::{debug, warn};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Room orchestration states, publisher side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    /// Waiting for the publisher handle
    AttachingPublisher,
    /// Publisher handle exists, waiting for the subscriber handle
    AttachingSubscriber,
    /// `join` sent on the publisher handle
    PublisherJoining,
    /// Published and idle
    PublishedIdle,
    /// A subscriber offer/answer exchange is in flight
    Renegotiating,
}

/// Subscriber-side states, tracked independently of the publisher flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    Unjoined,
    Joined,
    Subscribed,
}

#[derive(Debug)]
struct RoomCore {
    state: RoomState,
    subscriber_state: SubscriberState,
    room_id: u64,
    /// Server-assigned id correlating subscriber joins to our publisher
    private_id: u64,
    publisher_id: u64,
    subscriber_id: u64,
}

/// Orchestrator for one room join attempt
pub struct VideoRoomPlugin {
    link: SignallerLink,
    engine: Arc<dyn PeerEngine>,
    events: EventSender,
    /// Base transaction id; the subscriber attach derives its own from it
    transaction: String,
    core: Mutex<RoomCore>,
    feeds: Mutex<FeedRegistry>,
}

impl VideoRoomPlugin {
    pub fn new(
        link: SignallerLink,
        engine: Arc<dyn PeerEngine>,
        events: EventSender,
        transaction: String,
    ) -> Self {
        Self {
            link,
            engine,
            events,
            transaction,
            core: Mutex::new(RoomCore {
                state: RoomState::AttachingPublisher,
                subscriber_state: SubscriberState::Unjoined,
                room_id: 0,
                private_id: 0,
                publisher_id: 0,
                subscriber_id: 0,
            }),
            feeds: Mutex::new(FeedRegistry::new()),
        }
    }

    /// Join the room as a publisher. The subscriber side follows from the
    /// gateway's `joined` response.
    pub async fn join(&self, room: u64, username: &str) {
        let publisher_id = {
            let mut core = self.core.lock().await;
            if core.publisher_id == 0 {
                0
            } else {
                core.room_id = room;
                core.state = RoomState::PublisherJoining;
                core.publisher_id
            }
        };
        if publisher_id == 0 {
            self.events.error("video_room publisher handle is not attached.");
            return;
        }

        let body = json!({
            "request": "join",
            "room": room,
            "ptype": "publisher",
            "display": username,
        });
        self.send_plugin_message(publisher_id, body, None).await;
    }

    /// Trickle one local ICE candidate, or `None` for end-of-candidates
    pub async fn send_candidate(&self, candidate: Option<IceCandidate>) {
        let Some(session_id) = self.link.session_id().await else {
            return;
        };
        let publisher_id = self.core.lock().await.publisher_id;
        if publisher_id == 0 {
            return;
        }
        let transaction = self.link.session_transaction().await;
        self.link
            .send(&protocol::trickle(
                session_id,
                &transaction,
                publisher_id,
                candidate.as_ref(),
            ))
            .await;
    }

    pub async fn room_state(&self) -> RoomState {
        self.core.lock().await.state
    }

    pub async fn subscriber_state(&self) -> SubscriberState {
        self.core.lock().await.subscriber_state
    }

    pub async fn publisher_handle_id(&self) -> u64 {
        self.core.lock().await.publisher_id
    }

    pub async fn subscriber_handle_id(&self) -> u64 {
        self.core.lock().await.subscriber_id
    }

    /// Feed list for the presentation layer
    pub async fn feeds_snapshot(&self) -> Vec<FeedSnapshot> {
        self.feeds.lock().await.snapshot()
    }

    /// Resolve which feed owns the given transceiver position
    pub async fn feed_for_transceiver(&self, index: usize) -> Option<u64> {
        self.feeds.lock().await.feed_for_transceiver(index)
    }

    /// Route an inbound remote track to its feed by negotiated transceiver
    /// position. Returns false when no feed claims that position.
    pub async fn attach_remote_track(
        &self,
        transceiver_index: usize,
        kind: MediaKind,
        track_id: &str,
    ) -> bool {
        let mut feeds = self.feeds.lock().await;
        match feeds.feed_for_transceiver(transceiver_index) {
            Some(feed_id) => feeds.attach_track(feed_id, kind, track_id.to_string()),
            None => false,
        }
    }

    /// Record a feed's render resolution, reported by the renderer
    pub async fn set_feed_resolution(&self, feed_id: u64, width: u32, height: u32) {
        let updated = self.feeds.lock().await.set_resolution(feed_id, width, height);
        if updated {
            self.events.emit(ClientEvent::ViewRefresh { feed_id });
            let feeds = self.feeds.lock().await.snapshot();
            self.events.emit(ClientEvent::FeedsSynced { feeds });
        }
    }

    async fn send_plugin_message(&self, handle_id: u64, body: Value, jsep: Option<&Jsep>) {
        let Some(session_id) = self.link.session_id().await else {
            return;
        };
        self.link
            .send(&protocol::plugin_message(
                session_id,
                &self.transaction,
                handle_id,
                body,
                jsep,
            ))
            .await;
    }

    /// Second attach of the pipeline, issued once the publisher handle
    /// exists (later steps reference it)
    async fn request_subscriber_handle(self: &Arc<Self>) {
        let transaction = format!("{}.sub", self.transaction);
        self.link
            .register_pending(&transaction, self.clone() as Arc<dyn Plugin>)
            .await;

        let Some(session_id) = self.link.session_id().await else {
            return;
        };
        self.link
            .send(&protocol::attach(
                session_id,
                &transaction,
                protocol::VIDEOROOM_PLUGIN_PACKAGE,
            ))
            .await;
    }

    async fn on_publisher_message(self: &Arc<Self>, data: Value, jsep: Option<Jsep>) {
        match data.get("videoroom").and_then(Value::as_str) {
            Some("joined") => self.handle_publisher_joined(data).await,
            Some("event") => {
                if data.get("configured").and_then(Value::as_str) == Some("ok") {
                    if let Some(jsep) = jsep {
                        // Gateway's answer to our publish offer
                        if let Err(e) =
                            self.engine.set_remote_description(PUBLISHER_PEER, jsep).await
                        {
                            self.events.error(e.to_string());
                            return;
                        }
                        self.core.lock().await.state = RoomState::PublishedIdle;
                    }
                } else if let Some(publishers) = data.get("publishers") {
                    self.handle_publishers_changed(publishers.clone()).await;
                } else if data.get("leaving").is_none() && data.get("unpublished").is_none() {
                    // Gateway event vocabulary is not fully enumerated;
                    // unknown events are logged, never fatal
                    warn!("Unhandled video_room event: {}", data);
                }
            }
            other => warn!("Unhandled publisher message in video_room: {:?} {}", other, data),
        }
    }

    /// The publisher joined: capture `private_id`, then offer local media
    /// and join the subscriber to any already-present publishers. The
    /// configure round-trip and the subscriber join proceed concurrently.
    async fn handle_publisher_joined(self: &Arc<Self>, data: Value) {
        {
            let mut core = self.core.lock().await;
            core.private_id = data.get("private_id").and_then(Value::as_u64).unwrap_or(0);
        }
        self.events.emit(ClientEvent::Joined {
            plugin: VIDEOROOM_PLUGIN_NAME.to_string(),
        });

        let publishers = data
            .get("publishers")
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()));

        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.engine.create_peer(PUBLISHER_PEER).await {
                this.events.error(e.to_string());
                return;
            }
            let offer = match this.engine.create_offer(PUBLISHER_PEER).await {
                Ok(offer) => offer,
                Err(e) => {
                    this.events.error(e.to_string());
                    return;
                }
            };

            let body = json!({ "request": "configure", "audio": true, "video": true });
            let publisher_id = this.core.lock().await.publisher_id;
            this.send_plugin_message(publisher_id, body, Some(&offer)).await;

            let streams = prepare_streams(&publishers);
            if !streams.is_empty() {
                this.join_subscriber(streams).await;
            }
        });
    }

    /// The remote publisher list changed. A live subscriber connection is
    /// renegotiated with an update; otherwise this is the initial join.
    async fn handle_publishers_changed(self: &Arc<Self>, publishers: Value) {
        let streams = prepare_streams(&publishers);
        if self.engine.has_peer(SUBSCRIBER_PEER).await {
            let subscriber_id = self.core.lock().await.subscriber_id;
            let body = json!({ "request": "update", "subscribe": streams });
            self.send_plugin_message(subscriber_id, body, None).await;
        } else {
            self.join_subscriber(streams).await;
        }
    }

    async fn join_subscriber(&self, streams: Vec<Value>) {
        let (room_id, private_id, subscriber_id) = {
            let core = self.core.lock().await;
            (core.room_id, core.private_id, core.subscriber_id)
        };
        if subscriber_id == 0 {
            self.events.error("video_room subscriber handle is not attached.");
            return;
        }

        let body = json!({
            "request": "join",
            "room": room_id,
            "ptype": "subscriber",
            "use_msid": false,
            "private_id": private_id,
            "streams": streams,
        });
        self.send_plugin_message(subscriber_id, body, None).await;
    }

    async fn on_subscriber_message(self: &Arc<Self>, data: Value, jsep: Option<Jsep>) {
        match data.get("videoroom").and_then(Value::as_str) {
            Some("attached") => {
                self.core.lock().await.subscriber_state = SubscriberState::Joined;
                self.events.emit(ClientEvent::Subscribed {
                    plugin: VIDEOROOM_PLUGIN_NAME.to_string(),
                });
                if let Some(jsep) = jsep {
                    self.update_subscriber(data, jsep).await;
                }
            }
            Some("updated") => {
                if let Some(jsep) = jsep {
                    self.update_subscriber(data, jsep).await;
                }
            }
            Some("event") => {
                if data.get("started").and_then(Value::as_str) == Some("ok") {
                    // Negotiation complete; the presentation layer can
                    // resync its views from feed bookkeeping
                    let feeds = {
                        let mut core = self.core.lock().await;
                        core.subscriber_state = SubscriberState::Subscribed;
                        core.state = RoomState::PublishedIdle;
                        drop(core);
                        self.feeds.lock().await.snapshot()
                    };
                    debug!("Subscriber started, {} feeds live", feeds.len());
                    self.events.emit(ClientEvent::FeedsSynced { feeds });
                } else {
                    warn!("Unhandled subscriber event in video_room: {}", data);
                }
            }
            other => warn!(
                "Unhandled subscriber message in video_room: {:?} {}",
                other, data
            ),
        }
    }

    /// The gateway offered (or re-offered) the subscriber connection:
    /// converge feed bookkeeping to the active streams, answer, and start.
    async fn update_subscriber(self: &Arc<Self>, data: Value, jsep: Jsep) {
        let streams: Vec<Value> = data
            .get("streams")
            .and_then(Value::as_array)
            .map(|streams| {
                streams
                    .iter()
                    .filter(|s| s.get("active").and_then(Value::as_bool).unwrap_or(false))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        let room = data.get("room").cloned().unwrap_or(Value::Null);
        self.core.lock().await.state = RoomState::Renegotiating;

        // Bookkeeping converges before any SDP work starts, so a slow
        // answer for an older push can never overwrite a newer one
        self.feeds.lock().await.sync(&streams);

        let this = self.clone();
        tokio::spawn(async move {
            if !this.engine.has_peer(SUBSCRIBER_PEER).await {
                if let Err(e) = this.engine.create_peer(SUBSCRIBER_PEER).await {
                    this.events.error(e.to_string());
                    return;
                }
            }

            let answer = match this.engine.answer(SUBSCRIBER_PEER, jsep).await {
                Ok(answer) => answer,
                Err(e) => {
                    // Aborts only this renegotiation; the session and the
                    // publisher handle stay usable
                    this.events.error(e.to_string());
                    return;
                }
            };

            let subscriber_id = this.core.lock().await.subscriber_id;
            let body = json!({ "request": "start", "room": room });
            this.send_plugin_message(subscriber_id, body, Some(&answer)).await;
        });
    }
}

#[async_trait]
impl Plugin for VideoRoomPlugin {
    fn name(&self) -> &str {
        VIDEOROOM_PLUGIN_NAME
    }

    async fn attach_success(self: Arc<Self>, handle_id: u64) {
        enum Step {
            RequestSubscriber,
            Ready,
            Spurious,
        }

        let step = {
            let mut core = self.core.lock().await;
            if core.publisher_id == 0 {
                core.publisher_id = handle_id;
                core.state = RoomState::AttachingSubscriber;
                Step::RequestSubscriber
            } else if core.subscriber_id == 0 {
                core.subscriber_id = handle_id;
                Step::Ready
            } else {
                Step::Spurious
            }
        };

        match step {
            Step::RequestSubscriber => self.request_subscriber_handle().await,
            Step::Ready => self.events.emit(ClientEvent::Attached {
                plugin: VIDEOROOM_PLUGIN_NAME.to_string(),
            }),
            Step::Spurious => warn!("Spurious attach success for handle {}", handle_id),
        }
    }

    async fn handle_message(self: Arc<Self>, data: Value, sender: u64, jsep: Option<Jsep>) {
        if let Some(error) = data.get("error") {
            let message = error
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            self.events.error(message);
            return;
        }

        let publisher_id = self.core.lock().await.publisher_id;
        if sender == publisher_id {
            self.on_publisher_message(data, jsep).await;
        } else {
            self.on_subscriber_message(data, jsep).await;
        }
    }

    async fn destroy(&self) {
        let Some(session_id) = self.link.session_id().await else {
            return;
        };
        let mut core = self.core.lock().await;
        for handle_id in [core.publisher_id, core.subscriber_id] {
            if handle_id != 0 {
                self.link
                    .send(&protocol::detach(session_id, handle_id, &self.transaction))
                    .await;
            }
        }
        core.publisher_id = 0;
        core.subscriber_id = 0;
    }
}

/// Flatten a gateway publisher list into the `{feed, mid}` pairs a
/// subscriber join or update expects
pub(crate) fn prepare_streams(publishers: &Value) -> Vec<Value> {
    let mut streams = Vec::new();
    let Some(publishers) = publishers.as_array() else {
        return streams;
    };

    for publisher in publishers {
        let Some(feed_id) = publisher.get("id").and_then(Value::as_u64) else {
            continue;
        };
        let Some(publisher_streams) = publisher.get("streams").and_then(Value::as_array) else {
            continue;
        };
        for stream in publisher_streams {
            if let Some(mid) = stream.get("mid").and_then(Value::as_str) {
                streams.push(json!({ "feed": feed_id, "mid": mid }));
            }
        }
    }

    streams
}
