//! Persistent priority queue of pending remote mutations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use fieldline_common::{Error, QueueItem, Result};
use fieldline_store::LocalStore;

use crate::retry::RetryPolicy;

/// Counts reported by [`SyncQueue::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Items still awaiting delivery.
    pub pending: usize,
    /// Items whose attempt budget is exhausted.
    pub failed: usize,
    /// Everything currently stored.
    pub total: usize,
}

/// Dispatch order: priority band first, then FIFO within a band.
fn dispatch_order(a: &QueueItem, b: &QueueItem) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then_with(|| a.created_at.cmp(&b.created_at))
}

/// Persistent priority queue over the local store.
///
/// Items survive restarts. Failed items stay queued until their attempt
/// budget is exhausted; terminally failed items are excluded from
/// automatic dispatch but remain enumerable for inspection, manual
/// re-arming, or purging.
pub struct SyncQueue {
    store: Arc<LocalStore>,
    policy: RetryPolicy,
}

impl SyncQueue {
    /// Create a queue with the default backoff policy.
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self {
            store,
            policy: RetryPolicy::default(),
        }
    }

    /// Replace the backoff policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Persist a new item. Returns its ID.
    pub async fn enqueue(&self, item: QueueItem) -> Result<Uuid> {
        let id = item.id;
        self.store.push_queue_item(&item).await?;
        debug!(%id, endpoint = %item.endpoint, priority = %item.priority, "Operation queued");
        Ok(id)
    }

    /// Items ready for dispatch, highest priority first, FIFO within a
    /// priority band. Excludes exhausted items and items still waiting
    /// out their backoff.
    pub async fn eligible(&self, now: DateTime<Utc>) -> Result<Vec<QueueItem>> {
        let mut items: Vec<QueueItem> = self
            .store
            .queue_items()
            .await?
            .into_iter()
            .filter(|item| !item.is_exhausted() && self.policy.is_eligible(item, now))
            .collect();
        items.sort_by(dispatch_order);
        Ok(items)
    }

    /// Remove a delivered item.
    pub async fn record_success(&self, id: Uuid) -> Result<()> {
        self.store.remove_queue_item(id).await?;
        Ok(())
    }

    /// Record a failed attempt, leaving the item queued unless its
    /// budget is now exhausted.
    pub async fn record_failure(&self, id: Uuid, error: &str) -> Result<()> {
        let mut exhausted = false;
        let found = self
            .store
            .update_queue_item(id, |item| {
                item.record_failure(error);
                exhausted = item.is_exhausted();
            })
            .await?;
        if found && exhausted {
            warn!(%id, error, "Queue item failed terminally");
        }
        Ok(())
    }

    /// Pending, failed, and total counts.
    pub async fn status(&self) -> Result<QueueStatus> {
        let items = self.store.queue_items().await?;
        let failed = items.iter().filter(|i| i.is_exhausted()).count();
        Ok(QueueStatus {
            pending: items.len() - failed,
            failed,
            total: items.len(),
        })
    }

    /// Everything currently stored, in stored order.
    pub async fn items(&self) -> Result<Vec<QueueItem>> {
        self.store.queue_items().await
    }

    /// Re-arm a terminally failed item for automatic dispatch.
    ///
    /// # Errors
    /// - `NotFound` when no item has the given ID
    pub async fn retry_item(&self, id: Uuid) -> Result<()> {
        let found = self
            .store
            .update_queue_item(id, |item| item.reset_attempts())
            .await?;
        if !found {
            return Err(Error::NotFound(format!("Queue item {} not found", id)));
        }
        info!(%id, "Queue item re-armed");
        Ok(())
    }

    /// Drop every terminally failed item. Returns how many were removed.
    pub async fn purge_failed(&self) -> Result<usize> {
        let removed = self
            .store
            .retain_queue_items(|item| !item.is_exhausted())
            .await?;
        if removed > 0 {
            info!(removed, "Purged terminally failed queue items");
        }
        Ok(removed)
    }

    /// Remove one item outright, whatever its state.
    pub async fn remove(&self, id: Uuid) -> Result<bool> {
        self.store.remove_queue_item(id).await
    }
}
