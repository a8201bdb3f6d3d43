use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::FILE_REF_SEPARATOR;
use crate::error::OrionError;

/// Which side of the relay a peer sits on.
///
/// The wire names are the ones the desktop extension and the mobile page
/// already understand, so they are kept as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "PC")]
    Desktop,
    #[serde(rename = "phone")]
    Mobile,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Desktop => "PC",
            Role::Mobile => "phone",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Text,
    File,
}

/// One durable record in the relay log. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// `item_<unix nanos>`, strictly increasing in creation order.
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "from")]
    pub origin: Role,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    pub content: String,
}

impl Item {
    /// Stamp a new item with the current time.
    pub fn new(
        id: impl Into<String>,
        origin: Role,
        kind: ItemKind,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp: Utc::now(),
            origin,
            kind,
            content: content.into(),
        }
    }

    /// Decode the display/stored name pair of a file item.
    pub fn file_ref(&self) -> Option<FileRef> {
        match self.kind {
            ItemKind::File => self.content.parse().ok(),
            ItemKind::Text => None,
        }
    }
}

/// The full ordered item log. Insertion order is causal order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowData {
    #[serde(default)]
    pub items: Vec<Item>,
}

impl FlowData {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Content of a file item: the name shown to peers and the unique name the
/// bytes are stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub display_name: String,
    pub stored_name: String,
}

impl FileRef {
    pub fn new(display_name: impl Into<String>, stored_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            stored_name: stored_name.into(),
        }
    }

    /// Encode as item content (`display|stored`).
    pub fn to_content(&self) -> String {
        format!("{}{}{}", self.display_name, FILE_REF_SEPARATOR, self.stored_name)
    }
}

impl FromStr for FileRef {
    type Err = OrionError;

    // Display names may themselves contain the separator; the stored name
    // never does, so split on the last one.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (display, stored) = s
            .rsplit_once(FILE_REF_SEPARATOR)
            .ok_or_else(|| OrionError::MalformedFileRef(s.to_string()))?;
        if stored.is_empty() {
            return Err(OrionError::MalformedFileRef(s.to_string()));
        }
        Ok(Self::new(display, stored))
    }
}

/// The "now playing" status pushed from the desktop browser.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaStatus {
    #[serde(default)]
    pub video_id: String,
    #[serde(default)]
    pub title: String,
    /// Playback position in seconds.
    #[serde(default)]
    pub current_time: u64,
    /// Total length in seconds.
    #[serde(default)]
    pub duration: u64,
    #[serde(default)]
    pub timestamp_link: String,
    #[serde(default)]
    pub is_playing: bool,
    #[serde(default)]
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_wire_names() {
        let item = Item {
            id: "item_1".into(),
            timestamp: Utc::now(),
            origin: Role::Mobile,
            kind: ItemKind::File,
            content: "a.txt|item_1_a.txt".into(),
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["from"], "phone");
        assert_eq!(json["type"], "file");
        assert!(json.get("origin").is_none());
    }

    #[test]
    fn test_file_ref_splits_on_last_separator() {
        let parsed: FileRef = "odd|name.txt|item_9_odd_name.txt".parse().unwrap();
        assert_eq!(parsed.display_name, "odd|name.txt");
        assert_eq!(parsed.stored_name, "item_9_odd_name.txt");
        assert_eq!(parsed.to_content(), "odd|name.txt|item_9_odd_name.txt");
    }

    #[test]
    fn test_file_ref_rejects_missing_stored_name() {
        assert!("plain".parse::<FileRef>().is_err());
        assert!("name|".parse::<FileRef>().is_err());
    }

    #[test]
    fn test_flow_data_missing_items_is_empty() {
        let flow: FlowData = serde_json::from_str("{}").unwrap();
        assert!(flow.is_empty());
    }

    #[test]
    fn test_media_status_camel_case() {
        let status: MediaStatus = serde_json::from_str(
            r#"{"videoId":"abc","title":"t","currentTime":12,"duration":300,"isPlaying":true,"url":"u"}"#,
        )
        .unwrap();
        assert_eq!(status.video_id, "abc");
        assert_eq!(status.current_time, 12);
        assert!(status.is_playing);
        assert!(status.timestamp_link.is_empty());
    }
}
