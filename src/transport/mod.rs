//! Transport layer for gateway signalling
//!
//! One WebSocket connection, one JSON object per text frame.

pub mod websocket;

pub use websocket::{Transport, TransportEvent};
