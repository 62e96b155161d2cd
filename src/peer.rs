//! Peer-connection collaborator interface
//!
//! The signalling core never touches media. SDP and track work is delegated
//! to an external peer-connection engine behind [`PeerEngine`]; the core
//! only carries the resulting descriptions and ICE candidates over the
//! wire. Engines are expected to trickle their candidates through
//! [`crate::plugin::video_room::VideoRoomPlugin::send_candidate`].

use crate::error::SignalError;
use crate::protocol::Jsep;
use async_trait::async_trait;

/// Local peer connection carrying our published media
pub const PUBLISHER_PEER: &str = "publisher";

/// Local peer connection receiving every remote feed
pub const SUBSCRIBER_PEER: &str = "subscriber";

/// Media kind of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }

    /// Parse the kind string WebRTC engines report for a track
    pub fn from_track_kind(kind: &str) -> Option<Self> {
        match kind {
            "audio" => Some(MediaKind::Audio),
            "video" => Some(MediaKind::Video),
            _ => None,
        }
    }
}

/// SDP/ICE engine consumed by the video-room orchestrator.
///
/// All operations are asynchronous; the orchestrator keeps processing
/// gateway traffic while an SDP step is pending, so implementations must
/// not assume exclusive access to room state across an await point.
#[async_trait]
pub trait PeerEngine: Send + Sync {
    /// Create a peer connection under the given name
    async fn create_peer(&self, name: &str) -> Result<(), SignalError>;

    /// Whether a peer connection with this name exists
    async fn has_peer(&self, name: &str) -> bool;

    /// Attach local tracks, create an offer and set it as the local
    /// description. Returns the local offer.
    async fn create_offer(&self, name: &str) -> Result<Jsep, SignalError>;

    /// Set the remote description, create an answer and set it locally.
    /// Returns the local answer.
    async fn answer(&self, name: &str, remote: Jsep) -> Result<Jsep, SignalError>;

    /// Apply a remote description to an existing peer
    async fn set_remote_description(&self, name: &str, jsep: Jsep) -> Result<(), SignalError>;
}

#[cfg(test)]
mod tests {
    use super::MediaKind;

    #[test]
    fn track_kind_parsing() {
        assert_eq!(MediaKind::from_track_kind("audio"), Some(MediaKind::Audio));
        assert_eq!(MediaKind::from_track_kind("video"), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_track_kind("data"), None);
        assert_eq!(MediaKind::Video.as_str(), "video");
    }
}
