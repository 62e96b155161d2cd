//! Janus session signalling
//!
//! Session lifecycle, keepalive, and correlation of gateway traffic to
//! plugin handles.

mod session;

pub use session::{generate_transaction_id, SessionState, Signaller, SignallerLink};
