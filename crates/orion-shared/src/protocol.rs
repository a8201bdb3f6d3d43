use serde::{Deserialize, Serialize};

use crate::types::{FlowData, MediaStatus};

/// Envelope written to every live connection: `{"type": ..., "data": ...}`.
///
/// Every payload is a full current snapshot, never a delta, so peers need
/// no sequence numbers and tolerate reordering between broadcasts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PushMessage {
    /// Sent once, right after a connection is registered
    Initial(FlowData),

    /// Sent after any item mutation
    Update(FlowData),

    /// Sent to Mobile peers after a media status update (and at bootstrap)
    YoutubeInfo(MediaStatus),
}

impl PushMessage {
    /// Serialize to the JSON text frame written on the wire
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a text frame (used by tests and diagnostic clients)
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PushMessage::Initial(_) => "initial",
            PushMessage::Update(_) => "update",
            PushMessage::YoutubeInfo(_) => "youtube_info",
        }
    }
}
