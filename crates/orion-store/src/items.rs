//! The durable item log.
//!
//! [`ItemStore`] owns `data.json`. Appends, clears and retention sweeps all
//! take the one write exclusion for the whole load, modify and publish
//! sequence. N concurrent appends therefore leave exactly N new items on
//! disk, and new ids are minted inside that exclusion so the log stays in
//! id order.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use orion_shared::constants::DATA_FILE_NAME;
use orion_shared::{FlowData, Item, ItemKind, Role};

use crate::atomic;
use crate::error::{Result, StoreError};

pub struct ItemStore {
    path: PathBuf,
    write_lock: Mutex<()>,
    /// Last nanosecond value handed out as an id.
    last_id: AtomicI64,
}

impl ItemStore {
    /// Store backed by `<data_dir>/data.json`. Nothing is touched on disk
    /// until the first load or mutation.
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self::open_at(data_dir.as_ref().join(DATA_FILE_NAME))
    }

    /// Store backed by an explicit file path.
    pub fn open_at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            last_id: AtomicI64::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hand out a fresh `item_<nanos>` id. Only called with the write
    /// exclusion held, after the log has been loaded.
    ///
    /// Ids follow the wall clock but are bumped past the previous one (and
    /// past every id already on disk) when the clock stalls or steps back.
    fn mint_id(&self) -> String {
        let now = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX - 1);
        let prev = match self
            .last_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            }) {
            Ok(prev) | Err(prev) => prev,
        };
        format!("item_{}", now.max(prev + 1))
    }

    /// Make sure later ids sort after every id in `data`.
    fn observe(&self, data: &FlowData) {
        if let Some(max) = data.items.iter().filter_map(|item| id_nanos(&item.id)).max() {
            self.last_id.fetch_max(max, Ordering::SeqCst);
        }
    }

    /// Read the whole log.
    ///
    /// A missing file is an empty log (the data directory is created on the
    /// way). A file that exists but cannot be read or parsed is an error:
    /// treating it as empty would let the next append overwrite it.
    pub async fn load_all(&self) -> Result<FlowData> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = self.path.parent() {
                    if !parent.as_os_str().is_empty() {
                        fs::create_dir_all(parent).await?;
                    }
                }
                debug!(path = %self.path.display(), "Item log absent, starting empty");
                return Ok(FlowData::default());
            }
            Err(e) => return Err(e.into()),
        };

        let data: FlowData = serde_json::from_slice(&bytes)?;
        self.observe(&data);
        debug!(items = data.len(), "Item log loaded");
        Ok(data)
    }

    /// Append an item built elsewhere, as given.
    pub async fn append_item(&self, item: Item) -> Result<FlowData> {
        let id = item.id.clone();
        let data = self
            .mutate(move |data| {
                data.items.push(item);
                Outcome::Changed(())
            })
            .await?
            .0;
        debug!(id = %id, items = data.len(), "Item appended");
        Ok(data)
    }

    /// Create and append a new item. The id and timestamp are assigned
    /// under the write exclusion, so log order matches id order.
    pub async fn append_new(
        &self,
        origin: Role,
        kind: ItemKind,
        content: impl Into<String>,
    ) -> Result<Item> {
        let content = content.into();
        self.append_with(origin, kind, |_| async move { Ok(content) })
            .await
    }

    /// Like [`append_new`](Self::append_new), but the content is produced
    /// from the freshly minted id (file items embed it in the stored name).
    ///
    /// `make_content` runs with the write exclusion held. If it fails,
    /// nothing is written and its error is returned.
    pub async fn append_with<F, Fut, E>(
        &self,
        origin: Role,
        kind: ItemKind,
        make_content: F,
    ) -> std::result::Result<Item, E>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = std::result::Result<String, E>>,
        E: From<StoreError>,
    {
        let _guard = self.write_lock.lock().await;

        let mut data = self.load_all().await?;
        let id = self.mint_id();
        let content = make_content(id.clone()).await?;
        let item = Item::new(id, origin, kind, content);
        data.items.push(item.clone());
        atomic::write_json(&self.path, &data).await?;

        debug!(id = %item.id, items = data.len(), "Item appended");
        Ok(item)
    }

    /// Empty the log. Returns how many items were dropped.
    pub async fn clear(&self) -> Result<usize> {
        let (_, removed) = self
            .mutate(|data| {
                let removed = data.items.len();
                data.items.clear();
                Outcome::Changed(removed)
            })
            .await?;
        info!(items = removed, "Item log cleared");
        Ok(removed)
    }

    /// Drop items created before `cutoff`. Returns how many were removed.
    pub async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let (data, removed) = self
            .mutate(|data| {
                let before = data.len();
                data.items.retain(|item| item.timestamp >= cutoff);
                match before - data.len() {
                    0 => Outcome::Unchanged(0),
                    removed => Outcome::Changed(removed),
                }
            })
            .await?;
        if removed > 0 {
            info!(removed, remaining = data.len(), "Pruned expired items");
        }
        Ok(removed)
    }

    /// Load, apply `f`, publish if `f` changed anything. The exclusion is
    /// held throughout.
    async fn mutate<F, R>(&self, f: F) -> Result<(FlowData, R)>
    where
        F: FnOnce(&mut FlowData) -> Outcome<R>,
    {
        let _guard = self.write_lock.lock().await;

        let mut data = self.load_all().await?;
        let value = match f(&mut data) {
            Outcome::Changed(value) => {
                atomic::write_json(&self.path, &data).await?;
                self.observe(&data);
                value
            }
            Outcome::Unchanged(value) => value,
        };
        Ok((data, value))
    }
}

enum Outcome<R> {
    Changed(R),
    Unchanged(R),
}

fn id_nanos(id: &str) -> Option<i64> {
    id.strip_prefix("item_")?.parse().ok()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (ItemStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = ItemStore::new(dir.path().join("memory"));
        (store, dir)
    }

    #[tokio::test]
    async fn test_load_absent_creates_directory() {
        let (store, dir) = test_store();
        let data = store.load_all().await.unwrap();
        assert!(data.is_empty());
        assert!(dir.path().join("memory").is_dir());
    }

    #[tokio::test]
    async fn test_append_round_trips_fields() {
        let (store, _dir) = test_store();
        let item = store
            .append_new(Role::Mobile, ItemKind::Text, "hello from the phone")
            .await
            .unwrap();

        let data = store.load_all().await.unwrap();
        assert_eq!(data.items, vec![item.clone()]);
        assert_eq!(item.origin, Role::Mobile);
        assert_eq!(item.content, "hello from the phone");
    }

    #[tokio::test]
    async fn test_clear_empties_log() {
        let (store, _dir) = test_store();
        store.append_new(Role::Desktop, ItemKind::Text, "one").await.unwrap();
        store.append_new(Role::Desktop, ItemKind::Text, "two").await.unwrap();

        assert_eq!(store.clear().await.unwrap(), 2);
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_are_not_lost() {
        let (store, _dir) = test_store();
        let store = Arc::new(store);
        let n = 64;

        let mut handles = Vec::new();
        for i in 0..n {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let role = if i % 2 == 0 { Role::Desktop } else { Role::Mobile };
                store
                    .append_new(role, ItemKind::Text, format!("msg {i}"))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let data = store.load_all().await.unwrap();
        assert_eq!(data.len(), n);
        let ids: HashSet<_> = data.items.iter().map(|i| i.id.clone()).collect();
        assert_eq!(ids.len(), n);
        assert_in_id_order(&data);
    }

    fn assert_in_id_order(data: &FlowData) {
        let nanos: Vec<i64> = data.items.iter().map(|i| id_nanos(&i.id).unwrap()).collect();
        assert!(nanos.windows(2).all(|w| w[0] < w[1]), "log out of id order: {nanos:?}");
        assert!(data.items.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_content_keeps_log_in_id_order() {
        let (store, _dir) = test_store();
        let store = Arc::new(store);

        // The first append is slow to produce its content; the second one
        // starts later but must queue behind it rather than overtake it.
        let slow = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .append_with(Role::Desktop, ItemKind::File, |id| async move {
                        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                        Ok::<_, StoreError>(format!("slow.bin|{id}_slow.bin"))
                    })
                    .await
                    .unwrap()
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let fast = store
            .append_new(Role::Mobile, ItemKind::Text, "fast")
            .await
            .unwrap();
        let slow = slow.await.unwrap();

        let data = store.load_all().await.unwrap();
        assert_in_id_order(&data);
        assert_eq!(data.items, vec![slow, fast]);
    }

    #[tokio::test]
    async fn test_failed_content_writes_nothing() {
        let (store, _dir) = test_store();
        let result = store
            .append_with(Role::Desktop, ItemKind::File, |_| async {
                Err(StoreError::Io(std::io::Error::other("disk full")))
            })
            .await;

        assert!(result.is_err());
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ids_continue_past_persisted_log() {
        let (store, dir) = test_store();
        // An id far in the future, as left behind by a clock that later
        // stepped back.
        let future = Item::new("item_9000000000000000000", Role::Desktop, ItemKind::Text, "x");
        store.append_item(future).await.unwrap();
        drop(store);

        let reopened = ItemStore::new(dir.path().join("memory"));
        let item = reopened
            .append_new(Role::Mobile, ItemKind::Text, "after restart")
            .await
            .unwrap();

        assert_eq!(id_nanos(&item.id), Some(9_000_000_000_000_000_001));
        assert_in_id_order(&reopened.load_all().await.unwrap());
    }

    #[test]
    fn test_ids_strictly_increase() {
        let store = ItemStore::open_at("unused.json");
        let mut last = 0i64;
        for _ in 0..1000 {
            let nanos = id_nanos(&store.mint_id()).unwrap();
            assert!(nanos > last);
            last = nanos;
        }
    }

    #[tokio::test]
    async fn test_prune_keeps_recent_items() {
        let (store, _dir) = test_store();
        let mut old = Item::new("item_1", Role::Desktop, ItemKind::Text, "old");
        old.timestamp = Utc::now() - chrono::Duration::days(10);
        store.append_item(old).await.unwrap();
        let fresh = store
            .append_new(Role::Desktop, ItemKind::Text, "fresh")
            .await
            .unwrap();

        let removed = store
            .prune_older_than(Utc::now() - chrono::Duration::days(3))
            .await
            .unwrap();

        assert_eq!(removed, 1);
        assert_eq!(store.load_all().await.unwrap().items, vec![fresh]);
    }

    #[tokio::test]
    async fn test_prune_without_matches_leaves_file_untouched() {
        let (store, _dir) = test_store();
        store.append_new(Role::Desktop, ItemKind::Text, "keep").await.unwrap();
        let modified = std::fs::metadata(store.path()).unwrap().modified().unwrap();

        let removed = store
            .prune_older_than(Utc::now() - chrono::Duration::days(3))
            .await
            .unwrap();

        assert_eq!(removed, 0);
        assert_eq!(
            std::fs::metadata(store.path()).unwrap().modified().unwrap(),
            modified
        );
    }

    #[tokio::test]
    async fn test_corrupt_log_is_an_error() {
        let (store, _dir) = test_store();
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), b"{ not json").unwrap();

        assert!(matches!(store.load_all().await, Err(StoreError::Json(_))));
        let appended = store.append_new(Role::Desktop, ItemKind::Text, "x").await;
        assert!(appended.is_err());
        assert_eq!(std::fs::read(store.path()).unwrap(), b"{ not json");
    }
}
