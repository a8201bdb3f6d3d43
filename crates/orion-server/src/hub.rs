//! Session handling on top of the core components.
//!
//! [`RelayHub`] ties the item log, the media state and the connection
//! registry together: it bootstraps joining connections with a full snapshot
//! and turns mutations into fire-and-forget broadcasts.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use orion_shared::{MediaStatus, PushMessage, Role};
use orion_store::ItemStore;

use crate::error::SessionError;
use crate::media::MediaState;
use crate::registry::{BroadcastReport, Connection, ConnectionRegistry, Registration};

#[derive(Clone)]
pub struct RelayHub {
    items: Arc<ItemStore>,
    registry: Arc<ConnectionRegistry>,
    media: Arc<MediaState>,
}

impl RelayHub {
    pub fn new(items: Arc<ItemStore>, registry: Arc<ConnectionRegistry>, media: Arc<MediaState>) -> Self {
        Self {
            items,
            registry,
            media,
        }
    }

    pub fn items(&self) -> &ItemStore {
        &self.items
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn media(&self) -> &MediaState {
        &self.media
    }

    /// Register `conn` under `role` and send its bootstrap frames.
    ///
    /// The connection's writer is held from before registration until the
    /// bootstrap is written, so any broadcast that already sees the new
    /// connection queues behind the `initial` snapshot. The snapshot is read
    /// after registration, so no mutation can fall between the two.
    ///
    /// Mobile connections also get the current media status when one is
    /// live and playing.
    pub async fn attach(&self, role: Role, conn: Arc<Connection>) -> Result<Registration, SessionError> {
        let mut writer = conn.writer().await;
        let registration = self.registry.register_guarded(role, Arc::clone(&conn));

        let snapshot = self.items.load_all().await?;
        let items = snapshot.len();
        writer.send_message(&PushMessage::Initial(snapshot)).await?;

        if role == Role::Mobile {
            if let Some(status) = self.media.current_if_playing() {
                writer.send_message(&PushMessage::YoutubeInfo(status)).await?;
            }
        }

        debug!(conn = %conn.id(), %role, items, "Bootstrap sent");
        Ok(registration)
    }

    /// Send the current log to every connection. Load failures are logged,
    /// never propagated.
    pub async fn broadcast_items(&self) -> BroadcastReport {
        match self.items.load_all().await {
            Ok(data) => {
                self.registry
                    .broadcast_to_all(&PushMessage::Update(data))
                    .await
            }
            Err(e) => {
                warn!(error = %e, "Failed to load items for broadcast");
                BroadcastReport::default()
            }
        }
    }

    /// Fire-and-forget [`broadcast_items`](Self::broadcast_items).
    pub fn notify_items_changed(&self) {
        let hub = self.clone();
        tokio::spawn(async move {
            hub.broadcast_items().await;
        });
    }

    /// Replace the media status and push it to Mobile connections without
    /// waiting for delivery.
    pub fn publish_media(&self, status: MediaStatus) {
        self.media.set_state(status.clone());
        debug!(video = %status.video_id, ttl = ?self.media.ttl(), "Media status stored");

        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            registry
                .broadcast_to_role(Role::Mobile, &PushMessage::YoutubeInfo(status))
                .await;
        });
    }

    /// Drop items created before `cutoff` and broadcast if anything went.
    pub async fn sweep_retention(&self, cutoff: DateTime<Utc>) -> Result<usize, SessionError> {
        let removed = self.items.prune_older_than(cutoff).await?;
        if removed > 0 {
            info!(removed, %cutoff, "Retention sweep removed items");
            self.notify_items_changed();
        }
        Ok(removed)
    }
}
