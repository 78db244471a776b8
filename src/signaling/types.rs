use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Utf8Bytes};
use uuid::Uuid;

/// Signaling server errors
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("client id already registered: {0}")]
    DuplicateClient(ClientId),

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
}

/// Client ID: a UUID v4 string assigned when the connection opens.
///
/// Ids named by clients (the `recipient` field) may be arbitrary strings, so
/// the token is kept as text rather than a parsed `Uuid`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(Arc<str>);

impl ClientId {
    pub fn generate() -> Self {
        Self(Arc::from(Uuid::new_v4().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl Serialize for ClientId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ClientId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(ClientId::from(s.as_str()))
    }
}

/// Roster entry, serialized as `{"id": ...}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub id: ClientId,
}

/// Wrapper for outbound WebSocket messages using tungstenite's Utf8Bytes.
#[derive(Debug, Clone)]
pub struct OutboundMessage(Utf8Bytes);

impl OutboundMessage {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Get the inner Utf8Bytes for tungstenite Message::Text
    pub fn into_inner(self) -> Utf8Bytes {
        self.0
    }
}

impl From<String> for OutboundMessage {
    fn from(s: String) -> Self {
        Self(Utf8Bytes::from(s))
    }
}

/// Live handle used to push frames to one client's writer task.
pub type ClientConnection = mpsc::UnboundedSender<OutboundMessage>;

/// Per-recipient outcome of one fan-out.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FanOut {
    pub delivered: usize,
    pub failed: Vec<ClientId>,
}

impl FanOut {
    pub(crate) fn record(&mut self, id: &ClientId, delivered: bool) {
        if delivered {
            self.delivered += 1;
        } else {
            self.failed.push(id.clone());
        }
    }

    pub fn attempted(&self) -> usize {
        self.delivered + self.failed.len()
    }
}
