//! Message envelope shared by the host and peer sides of the mesh.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    Auth,
    AuthReply,
    Ping,
    Pong,
    Error,
    LibraryRequest,
    LibraryResponse,
    MediaFilesRequest,
    MediaFilesResponse,
    StreamPlayRequest,
    StreamPlayResponse,
    WatchPartyCreated,
    WatchPartyJoin,
    WatchPartyLeave,
    WatchPartyState,
    WatchPartyPlaybackStatus,
    WatchPartySeek,
    WatchPartyStopped,
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    pub fn new(kind: MessageType, payload: serde_json::Value) -> Self {
        Self {
            kind,
            payload,
            request_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn error(message: &str, request_id: Option<String>) -> Self {
        Self::new(
            MessageType::Error,
            serde_json::json!({ "message": message }),
        )
        .with_request_id(request_id)
    }

    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_roundtrip() {
        let env = Envelope::new(
            MessageType::WatchPartySeek,
            serde_json::json!({ "position": 42.5 }),
        )
        .with_request_id(Some("req-1".to_string()));
        let text = env.to_text();
        let parsed = Envelope::parse(&text).unwrap();
        assert_eq!(parsed.kind, MessageType::WatchPartySeek);
        assert_eq!(parsed.payload["position"], 42.5);
        assert_eq!(parsed.request_id.as_deref(), Some("req-1"));
    }

    #[test]
    fn test_type_wire_names() {
        let env = Envelope::new(MessageType::StreamPlayRequest, serde_json::Value::Null);
        let json: serde_json::Value = serde_json::from_str(&env.to_text()).unwrap();
        assert_eq!(json["type"], "stream-play-request");
    }

    #[test]
    fn test_malformed_message() {
        assert!(Envelope::parse("not json").is_none());
        assert!(Envelope::parse("{\"type\":\"unknown-kind\"}").is_none());
    }
}
