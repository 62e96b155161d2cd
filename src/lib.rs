//! videoroom-core - Janus video-room signalling client
//!
//! Signalling state machine for joining a Janus video room as a publisher
//! while subscribing to every remote feed over one multiplexed connection.
//! Media itself is delegated to a [`peer::PeerEngine`] implementation; this
//! crate owns the WebSocket transport, the session and handle lifecycle,
//! and feed bookkeeping.

pub mod config;
pub mod error;
pub mod events;
pub mod peer;
pub mod plugin;
pub mod protocol;
pub mod signaller;
pub mod transport;

// Re-exports
pub use config::{Config, SignallerConfig};
pub use error::SignalError;
pub use events::ClientEvent;
pub use peer::{MediaKind, PeerEngine};
pub use plugin::video_room::VideoRoomPlugin;
pub use protocol::{IceCandidate, Jsep};
pub use signaller::{SessionState, Signaller};
