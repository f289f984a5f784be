//! Durable local store backed by one JSON document per collection.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use fieldline_common::{
    CacheEntry, DraftForm, Error, OfflineSignature, QueueItem, Result, SnapshotKind,
};

/// Collection holding the persistent sync queue.
pub const QUEUE_COLLECTION: &str = "sync_queue";
/// Collection holding offline signatures.
pub const SIGNATURES_COLLECTION: &str = "signatures";
/// Collection holding cached responses.
pub const CACHE_COLLECTION: &str = "cache";
/// Collection holding draft forms.
pub const DRAFTS_COLLECTION: &str = "drafts";
/// Collection holding engine-level scalars.
pub const META_COLLECTION: &str = "meta";

/// Every collection the store manages, including the entity snapshots.
const ALL_COLLECTIONS: [&str; 9] = [
    QUEUE_COLLECTION,
    SIGNATURES_COLLECTION,
    CACHE_COLLECTION,
    DRAFTS_COLLECTION,
    META_COLLECTION,
    "activities",
    "recurring_activities",
    "templates",
    "documents",
];

/// Map a snapshot kind to its backing collection.
fn snapshot_collection(kind: SnapshotKind) -> &'static str {
    match kind {
        SnapshotKind::Activities => "activities",
        SnapshotKind::RecurringActivities => "recurring_activities",
        SnapshotKind::Templates => "templates",
        SnapshotKind::Documents => "documents",
    }
}

/// Engine-level scalars persisted alongside the data collections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Meta {
    last_sync_at: Option<DateTime<Utc>>,
}

/// Aggregate statistics over the key/value collections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    /// Entry counts per data collection.
    pub collections: HashMap<String, usize>,
    /// Approximate total size of the collection files in bytes.
    pub total_bytes: u64,
}

/// Durable local key/value store.
///
/// Each logical collection lives in its own JSON document under
/// `<root>/kv/` and is guarded by its own lock, so concurrent writers to
/// the same collection are serialized while writers to different
/// collections proceed independently. Contents survive process restarts.
pub struct LocalStore {
    kv_dir: PathBuf,
    locks: HashMap<&'static str, Mutex<()>>,
}

impl LocalStore {
    /// Open (or create) a store rooted at the given data directory.
    ///
    /// # Postconditions
    /// - `<root>/kv/` exists
    /// - Previously persisted collections are readable as-is
    ///
    /// # Errors
    /// - Directory creation failure
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let kv_dir = root.as_ref().join("kv");
        fs::create_dir_all(&kv_dir).await.map_err(Error::Io)?;

        let locks = ALL_COLLECTIONS
            .iter()
            .map(|name| (*name, Mutex::new(())))
            .collect();

        Ok(Self { kv_dir, locks })
    }

    fn collection_path(&self, name: &str) -> PathBuf {
        self.kv_dir.join(format!("{}.json", name))
    }

    /// Take the write lock for a collection.
    async fn guard(&self, name: &str) -> Result<MutexGuard<'_, ()>> {
        let lock = self
            .locks
            .get(name)
            .ok_or_else(|| Error::Storage(format!("Unknown collection: {}", name)))?;
        Ok(lock.lock().await)
    }

    /// Read a collection document, yielding the default when absent.
    async fn read_collection<T: DeserializeOwned + Default>(&self, name: &str) -> Result<T> {
        let path = self.collection_path(name);
        if !path.exists() {
            return Ok(T::default());
        }
        let content = fs::read_to_string(&path).await.map_err(Error::Io)?;
        serde_json::from_str(&content).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Persist a collection document.
    ///
    /// Writes to a sibling temp file and renames it into place, so a
    /// crash mid-write never leaves a truncated document behind.
    async fn write_collection<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        let path = self.collection_path(name);
        let tmp = self.kv_dir.join(format!("{}.json.tmp", name));
        fs::write(&tmp, json).await.map_err(Error::Io)?;
        fs::rename(&tmp, &path).await.map_err(Error::Io)
    }

    // --- Sync queue ---

    /// Load the whole sync queue.
    pub async fn queue_items(&self) -> Result<Vec<QueueItem>> {
        let _guard = self.guard(QUEUE_COLLECTION).await?;
        self.read_collection(QUEUE_COLLECTION).await
    }

    /// Append an item to the sync queue.
    pub async fn push_queue_item(&self, item: &QueueItem) -> Result<()> {
        let _guard = self.guard(QUEUE_COLLECTION).await?;
        let mut items: Vec<QueueItem> = self.read_collection(QUEUE_COLLECTION).await?;
        items.push(item.clone());
        self.write_collection(QUEUE_COLLECTION, &items).await
    }

    /// Apply a mutation to one queue item and persist the result.
    ///
    /// Returns `false` when the item no longer exists.
    pub async fn update_queue_item<F>(&self, id: Uuid, mutate: F) -> Result<bool>
    where
        F: FnOnce(&mut QueueItem),
    {
        let _guard = self.guard(QUEUE_COLLECTION).await?;
        let mut items: Vec<QueueItem> = self.read_collection(QUEUE_COLLECTION).await?;
        let Some(item) = items.iter_mut().find(|i| i.id == id) else {
            return Ok(false);
        };
        mutate(item);
        self.write_collection(QUEUE_COLLECTION, &items).await?;
        Ok(true)
    }

    /// Remove one queue item. Returns `false` when absent.
    pub async fn remove_queue_item(&self, id: Uuid) -> Result<bool> {
        let _guard = self.guard(QUEUE_COLLECTION).await?;
        let mut items: Vec<QueueItem> = self.read_collection(QUEUE_COLLECTION).await?;
        let before = items.len();
        items.retain(|i| i.id != id);
        if items.len() == before {
            return Ok(false);
        }
        self.write_collection(QUEUE_COLLECTION, &items).await?;
        Ok(true)
    }

    /// Retain only queue items matching the predicate.
    ///
    /// Returns how many items were removed.
    pub async fn retain_queue_items<F>(&self, mut keep: F) -> Result<usize>
    where
        F: FnMut(&QueueItem) -> bool,
    {
        let _guard = self.guard(QUEUE_COLLECTION).await?;
        let mut items: Vec<QueueItem> = self.read_collection(QUEUE_COLLECTION).await?;
        let before = items.len();
        items.retain(|i| keep(i));
        let removed = before - items.len();
        if removed > 0 {
            self.write_collection(QUEUE_COLLECTION, &items).await?;
        }
        Ok(removed)
    }

    // --- Offline signatures ---

    /// Load every stored signature.
    pub async fn signatures(&self) -> Result<Vec<OfflineSignature>> {
        let _guard = self.guard(SIGNATURES_COLLECTION).await?;
        self.read_collection(SIGNATURES_COLLECTION).await
    }

    /// Append a signature record.
    pub async fn push_signature(&self, signature: &OfflineSignature) -> Result<()> {
        let _guard = self.guard(SIGNATURES_COLLECTION).await?;
        let mut sigs: Vec<OfflineSignature> =
            self.read_collection(SIGNATURES_COLLECTION).await?;
        sigs.push(signature.clone());
        self.write_collection(SIGNATURES_COLLECTION, &sigs).await
    }

    /// Apply a mutation to one signature and persist the result.
    ///
    /// Returns `false` when the signature no longer exists.
    pub async fn update_signature<F>(&self, id: Uuid, mutate: F) -> Result<bool>
    where
        F: FnOnce(&mut OfflineSignature),
    {
        let _guard = self.guard(SIGNATURES_COLLECTION).await?;
        let mut sigs: Vec<OfflineSignature> =
            self.read_collection(SIGNATURES_COLLECTION).await?;
        let Some(sig) = sigs.iter_mut().find(|s| s.id == id) else {
            return Ok(false);
        };
        mutate(sig);
        self.write_collection(SIGNATURES_COLLECTION, &sigs).await?;
        Ok(true)
    }

    /// Apply a mutation across all signatures in one locked pass.
    ///
    /// The closure returns `true` for each signature it changed; the
    /// document is rewritten only when something changed. Returns the
    /// number of changed signatures.
    pub async fn update_signatures<F>(&self, mut mutate: F) -> Result<usize>
    where
        F: FnMut(&mut OfflineSignature) -> bool,
    {
        let _guard = self.guard(SIGNATURES_COLLECTION).await?;
        let mut sigs: Vec<OfflineSignature> =
            self.read_collection(SIGNATURES_COLLECTION).await?;
        let mut changed = 0;
        for sig in sigs.iter_mut() {
            if mutate(sig) {
                changed += 1;
            }
        }
        if changed > 0 {
            self.write_collection(SIGNATURES_COLLECTION, &sigs).await?;
        }
        Ok(changed)
    }

    // --- Response cache ---

    /// Look up a cached response by key.
    pub async fn cache_get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let _guard = self.guard(CACHE_COLLECTION).await?;
        let entries: HashMap<String, CacheEntry> =
            self.read_collection(CACHE_COLLECTION).await?;
        Ok(entries.get(key).cloned())
    }

    /// Insert or replace a cached response.
    pub async fn cache_put(&self, entry: &CacheEntry) -> Result<()> {
        let _guard = self.guard(CACHE_COLLECTION).await?;
        let mut entries: HashMap<String, CacheEntry> =
            self.read_collection(CACHE_COLLECTION).await?;
        entries.insert(entry.key.clone(), entry.clone());
        self.write_collection(CACHE_COLLECTION, &entries).await
    }

    /// Drop every cached response.
    pub async fn cache_clear(&self) -> Result<()> {
        let _guard = self.guard(CACHE_COLLECTION).await?;
        self.write_collection(CACHE_COLLECTION, &HashMap::<String, CacheEntry>::new())
            .await
    }

    // --- Draft forms ---

    /// Load the draft for an activity, if one was saved.
    pub async fn draft(&self, activity_id: &str) -> Result<Option<DraftForm>> {
        let _guard = self.guard(DRAFTS_COLLECTION).await?;
        let drafts: HashMap<String, DraftForm> =
            self.read_collection(DRAFTS_COLLECTION).await?;
        Ok(drafts.get(activity_id).cloned())
    }

    /// Save a draft, superseding any previous draft for the activity.
    pub async fn save_draft(&self, draft: &DraftForm) -> Result<()> {
        let _guard = self.guard(DRAFTS_COLLECTION).await?;
        let mut drafts: HashMap<String, DraftForm> =
            self.read_collection(DRAFTS_COLLECTION).await?;
        drafts.insert(draft.activity_id.clone(), draft.clone());
        self.write_collection(DRAFTS_COLLECTION, &drafts).await
    }

    /// Delete the draft for an activity. Returns `false` when absent.
    pub async fn remove_draft(&self, activity_id: &str) -> Result<bool> {
        let _guard = self.guard(DRAFTS_COLLECTION).await?;
        let mut drafts: HashMap<String, DraftForm> =
            self.read_collection(DRAFTS_COLLECTION).await?;
        if drafts.remove(activity_id).is_none() {
            return Ok(false);
        }
        self.write_collection(DRAFTS_COLLECTION, &drafts).await?;
        Ok(true)
    }

    // --- Entity snapshots ---

    /// Load an entity snapshot.
    pub async fn snapshot(&self, kind: SnapshotKind) -> Result<Option<Value>> {
        let name = snapshot_collection(kind);
        let _guard = self.guard(name).await?;
        let value: Value = self.read_collection(name).await?;
        Ok(if value.is_null() { None } else { Some(value) })
    }

    /// Replace an entity snapshot with fresh remote data.
    pub async fn set_snapshot(&self, kind: SnapshotKind, value: &Value) -> Result<()> {
        let name = snapshot_collection(kind);
        let _guard = self.guard(name).await?;
        self.write_collection(name, value).await
    }

    // --- Meta ---

    /// When the queue last drained successfully.
    pub async fn last_sync_at(&self) -> Result<Option<DateTime<Utc>>> {
        let _guard = self.guard(META_COLLECTION).await?;
        let meta: Meta = self.read_collection(META_COLLECTION).await?;
        Ok(meta.last_sync_at)
    }

    /// Record a completed sync pass.
    pub async fn set_last_sync_at(&self, at: DateTime<Utc>) -> Result<()> {
        let _guard = self.guard(META_COLLECTION).await?;
        let mut meta: Meta = self.read_collection(META_COLLECTION).await?;
        meta.last_sync_at = Some(at);
        self.write_collection(META_COLLECTION, &meta).await
    }

    // --- Maintenance ---

    /// Count entries per data collection and sum file sizes.
    pub async fn stats(&self) -> Result<StoreStats> {
        let mut collections = HashMap::new();

        collections.insert(
            QUEUE_COLLECTION.to_string(),
            self.queue_items().await?.len(),
        );
        collections.insert(
            SIGNATURES_COLLECTION.to_string(),
            self.signatures().await?.len(),
        );
        {
            let _guard = self.guard(CACHE_COLLECTION).await?;
            let entries: HashMap<String, CacheEntry> =
                self.read_collection(CACHE_COLLECTION).await?;
            collections.insert(CACHE_COLLECTION.to_string(), entries.len());
        }
        {
            let _guard = self.guard(DRAFTS_COLLECTION).await?;
            let drafts: HashMap<String, DraftForm> =
                self.read_collection(DRAFTS_COLLECTION).await?;
            collections.insert(DRAFTS_COLLECTION.to_string(), drafts.len());
        }
        for kind in [
            SnapshotKind::Activities,
            SnapshotKind::RecurringActivities,
            SnapshotKind::Templates,
            SnapshotKind::Documents,
        ] {
            let count = match self.snapshot(kind).await? {
                Some(Value::Array(items)) => items.len(),
                Some(_) => 1,
                None => 0,
            };
            collections.insert(snapshot_collection(kind).to_string(), count);
        }

        let mut total_bytes = 0;
        let mut entries = fs::read_dir(&self.kv_dir).await.map_err(Error::Io)?;
        while let Some(entry) = entries.next_entry().await.map_err(Error::Io)? {
            let meta = entry.metadata().await.map_err(Error::Io)?;
            if meta.is_file() {
                total_bytes += meta.len();
            }
        }

        Ok(StoreStats {
            collections,
            total_bytes,
        })
    }

    /// Delete every collection document.
    ///
    /// # Postconditions
    /// - All collections read back as empty
    pub async fn reset(&self) -> Result<()> {
        for name in ALL_COLLECTIONS {
            let _guard = self.guard(name).await?;
            let path = self.collection_path(name);
            if path.exists() {
                fs::remove_file(&path).await.map_err(Error::Io)?;
            }
        }
        Ok(())
    }
}
