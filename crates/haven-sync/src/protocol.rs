//! # Push Socket Protocol
//!
//! Frames exchanged on the cloud push socket.
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Push Socket Frames                                 │
//! │                                                                         │
//! │  SUBSCRIBE (sent on every connect, one per topic)                      │
//! │  ─────────                                                             │
//! │  DEVICE ───► { "type": "subscribe", "topic": "config.updated" }        │
//! │                                                                         │
//! │  DELIVERY                                                              │
//! │  ────────                                                              │
//! │  CLOUD  ───► { "topic": "config.updated",                              │
//! │                "payload": { "version": 7, "changes": [ ... ] } }       │
//! │                                                                         │
//! │  KEEPALIVE                                                             │
//! │  ─────────                                                             │
//! │  WebSocket ping/pong control frames (no JSON)                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Payloads stay opaque here. Whoever subscribed to the topic validates them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Device → Cloud
// =============================================================================

/// Control frames sent by the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Start receiving deliveries for a topic.
    Subscribe { topic: String },

    /// Stop receiving deliveries for a topic.
    Unsubscribe { topic: String },
}

impl ClientFrame {
    pub fn subscribe(topic: impl Into<String>) -> Self {
        ClientFrame::Subscribe {
            topic: topic.into(),
        }
    }

    /// Serializes to a JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// Cloud → Device
// =============================================================================

/// A message delivered on a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEnvelope {
    pub topic: String,

    #[serde(default)]
    pub payload: Value,
}

impl PushEnvelope {
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        PushEnvelope {
            topic: topic.into(),
            payload,
        }
    }

    /// Deserializes from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serializes to a JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subscribe_frame_shape() {
        let json = ClientFrame::subscribe("config.updated").to_json().unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value, json!({"type": "subscribe", "topic": "config.updated"}));
    }

    #[test]
    fn test_envelope_parsing() {
        let envelope = PushEnvelope::from_json(
            r#"{"topic":"config.updated","payload":{"version":7,"changes":[]}}"#,
        )
        .unwrap();
        assert_eq!(envelope.topic, "config.updated");
        assert_eq!(envelope.payload["version"], 7);
    }

    #[test]
    fn test_envelope_without_topic_is_rejected() {
        assert!(PushEnvelope::from_json(r#"{"payload":{}}"#).is_err());
    }
}
