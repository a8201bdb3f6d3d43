//! Ephemeral "now playing" state.
//!
//! At most one [`MediaStatus`] is alive at a time. Each update replaces it
//! wholesale and reschedules a single-shot expiry timer; when the timer
//! fires without an intervening update the record is cleared. Reads never
//! compare against the clock, expiry is driven by the timer alone.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use orion_shared::MediaStatus;

struct Live {
    status: MediaStatus,
    deadline: Instant,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct Slot {
    live: Option<Live>,
    /// Bumped on every update; a timer only clears the generation it was
    /// scheduled for.
    generation: u64,
}

pub struct MediaState {
    slot: Arc<Mutex<Slot>>,
    ttl: Duration,
}

impl MediaState {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot::default())),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Replace the current record and restart the expiry timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn set_state(&self, status: MediaStatus) {
        let mut slot = self.slot.lock();

        if let Some(previous) = slot.live.take() {
            previous.timer.abort();
        }
        slot.generation += 1;

        let generation = slot.generation;
        let deadline = Instant::now() + self.ttl;
        let timer = tokio::spawn(expire_at(Arc::downgrade(&self.slot), generation, deadline));

        debug!(
            video = %status.video_id,
            playing = status.is_playing,
            ttl_secs = self.ttl.as_secs(),
            "Media status replaced"
        );
        slot.live = Some(Live {
            status,
            deadline,
            timer,
        });
    }

    /// The live record, only if it is marked as playing.
    pub fn current_if_playing(&self) -> Option<MediaStatus> {
        self.slot
            .lock()
            .live
            .as_ref()
            .filter(|live| live.status.is_playing)
            .map(|live| live.status.clone())
    }

    #[cfg(test)]
    pub fn current(&self) -> Option<MediaStatus> {
        self.slot.lock().live.as_ref().map(|live| live.status.clone())
    }

    /// When the current record is scheduled to expire.
    #[cfg(test)]
    pub fn deadline(&self) -> Option<Instant> {
        self.slot.lock().live.as_ref().map(|live| live.deadline)
    }
}

impl Drop for MediaState {
    fn drop(&mut self) {
        if let Some(live) = self.slot.lock().live.take() {
            live.timer.abort();
        }
    }
}

async fn expire_at(slot: Weak<Mutex<Slot>>, generation: u64, deadline: Instant) {
    tokio::time::sleep_until(deadline).await;

    let Some(slot) = slot.upgrade() else {
        return;
    };
    let mut slot = slot.lock();
    if slot.generation == generation && slot.live.is_some() {
        slot.live = None;
        debug!(generation, "Media status expired");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(600);

    fn playing(video_id: &str) -> MediaStatus {
        MediaStatus {
            video_id: video_id.into(),
            title: "A video".into(),
            is_playing: true,
            ..Default::default()
        }
    }

    /// Let spawned expiry timers observe the advanced clock.
    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_expires_after_ttl() {
        let media = MediaState::new(TTL);
        media.set_state(playing("a"));
        assert_eq!(media.current_if_playing().unwrap().video_id, "a");

        tokio::time::advance(TTL + Duration::from_secs(1)).await;
        settle().await;

        assert!(media.current_if_playing().is_none());
        assert!(media.current().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_resets_deadline() {
        let media = MediaState::new(TTL);
        media.set_state(playing("a"));

        tokio::time::advance(Duration::from_secs(500)).await;
        settle().await;
        media.set_state(playing("b"));

        // Past the first record's deadline, inside the second's.
        tokio::time::advance(Duration::from_secs(200)).await;
        settle().await;
        assert_eq!(media.current_if_playing().unwrap().video_id, "b");

        tokio::time::advance(Duration::from_secs(401)).await;
        settle().await;
        assert!(media.current_if_playing().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_record_is_not_reported_as_playing() {
        let media = MediaState::new(TTL);
        media.set_state(MediaStatus {
            is_playing: false,
            ..playing("a")
        });

        assert!(media.current_if_playing().is_none());
        assert_eq!(media.current().unwrap().video_id, "a");
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_tracks_latest_update() {
        let media = MediaState::new(TTL);
        assert!(media.deadline().is_none());

        let start = Instant::now();
        media.set_state(playing("a"));
        assert_eq!(media.deadline(), Some(start + TTL));
    }
}
