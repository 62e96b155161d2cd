//! Janus wire protocol envelopes
//!
//! One WebSocket text frame carries one JSON object. Outgoing envelopes
//! always include `janus` (the verb) and `transaction`; session-scoped
//! requests add `session_id` and handle-scoped ones add `handle_id`.
//! Incoming envelopes are parsed permissively: the gateway's event
//! vocabulary is not fully enumerated, so unknown fields are ignored.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Janus plugin package attached for video rooms
pub const VIDEOROOM_PLUGIN_PACKAGE: &str = "janus.plugin.videoroom";

/// SDP description as carried in the `jsep` field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jsep {
    /// "offer" or "answer"
    #[serde(rename = "type")]
    pub kind: String,
    pub sdp: String,
}

impl Jsep {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Jsep {
            kind: "offer".to_string(),
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Jsep {
            kind: "answer".to_string(),
            sdp: sdp.into(),
        }
    }
}

/// Trickled ICE candidate, Janus field casing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u32>,
}

/// Incoming gateway envelope
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub janus: String,
    #[serde(default)]
    pub transaction: Option<String>,
    #[serde(default)]
    pub session_id: Option<u64>,
    /// Handle id the message originates from
    #[serde(default)]
    pub sender: Option<u64>,
    #[serde(default)]
    pub data: Option<EnvelopeData>,
    #[serde(default)]
    pub plugindata: Option<PluginData>,
    #[serde(default)]
    pub jsep: Option<Jsep>,
    #[serde(default)]
    pub error: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnvelopeData {
    #[serde(default)]
    pub id: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PluginData {
    #[serde(default)]
    pub plugin: Option<String>,
    pub data: Value,
}

impl Envelope {
    /// Parse one incoming JSON object
    pub fn parse(value: &Value) -> Result<Self, crate::error::SignalError> {
        Ok(serde_json::from_value(value.clone())?)
    }
}

/// `{janus:"create"}` - open a new gateway session
pub fn create(transaction: &str) -> Value {
    json!({
        "janus": "create",
        "transaction": transaction,
    })
}

/// `{janus:"attach"}` - request a plugin handle within the session
pub fn attach(session_id: u64, transaction: &str, plugin_package: &str) -> Value {
    json!({
        "janus": "attach",
        "plugin": plugin_package,
        "session_id": session_id,
        "transaction": transaction,
    })
}

/// `{janus:"keepalive"}` - session liveness
pub fn keepalive(session_id: u64, transaction: &str) -> Value {
    json!({
        "janus": "keepalive",
        "session_id": session_id,
        "transaction": transaction,
    })
}

/// `{janus:"detach"}` - release a plugin handle
pub fn detach(session_id: u64, handle_id: u64, transaction: &str) -> Value {
    json!({
        "janus": "detach",
        "handle_id": handle_id,
        "session_id": session_id,
        "transaction": transaction,
    })
}

/// `{janus:"message"}` - plugin request body with optional jsep
pub fn plugin_message(
    session_id: u64,
    transaction: &str,
    handle_id: u64,
    body: Value,
    jsep: Option<&Jsep>,
) -> Value {
    let mut message = json!({
        "janus": "message",
        "session_id": session_id,
        "transaction": transaction,
        "handle_id": handle_id,
        "body": body,
    });
    if let Some(jsep) = jsep {
        message["jsep"] = json!(jsep);
    }
    message
}

/// `{janus:"trickle"}` - one ICE candidate, or null for end-of-candidates
pub fn trickle(
    session_id: u64,
    transaction: &str,
    handle_id: u64,
    candidate: Option<&IceCandidate>,
) -> Value {
    json!({
        "janus": "trickle",
        "session_id": session_id,
        "transaction": transaction,
        "handle_id": handle_id,
        "candidate": candidate.map(|c| json!(c)).unwrap_or(Value::Null),
    })
}
