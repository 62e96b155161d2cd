//! Plugin handle layer
//!
//! A plugin instance owns one or more gateway handles. The session manager
//! routes attach responses and unsolicited events to plugins through this
//! capability trait. The set of plugin kinds is closed - only the video
//! room exists today - and new kinds extend the set instead of branching
//! inside the session manager.

pub mod feeds;
pub mod video_room;

use crate::protocol::Jsep;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Public name of the video-room plugin
pub const VIDEOROOM_PLUGIN_NAME: &str = "video_room";

/// Capability interface implemented by every attachable plugin
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Public plugin name
    fn name(&self) -> &str;

    /// An attach request completed; the gateway assigned `handle_id`
    async fn attach_success(self: Arc<Self>, handle_id: u64);

    /// A plugin event arrived on one of this plugin's handles
    async fn handle_message(self: Arc<Self>, data: Value, sender: u64, jsep: Option<Jsep>);

    /// The owning session is going away; release gateway handles
    async fn destroy(&self);
}
