// ============================================================================
// Offline Queue
// ============================================================================
//
// FIFO of mutations that failed with a retryable error. Replays go through
// the optimistic coordinator, so a replayed change is published and rolled
// back exactly like a fresh one.
//
// - `process_queue` works on a copy of the queue taken when it starts;
//   items enqueued meanwhile wait for the next pass.
// - Only one pass runs at a time; a concurrent call is reported as skipped.
// - Items cleared while a pass is running are not put back.
//
// ============================================================================

use super::item::{OfflineQueueItem, ReplayStatus};
use crate::core::{CacheKey, OperationKind, ProfileChange, Result, SyncError};
use crate::optimistic::OptimisticCoordinator;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{Instrument, Level, event, info_span};
use uuid::Uuid;

/// Per-item result of a replay pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayRecord {
    pub id: Uuid,
    pub user_id: String,
    pub operation: OperationKind,
    /// Key the replayed change reports its errors under.
    pub key: CacheKey,
    pub status: ReplayStatus,
}

/// Summary of one `process_queue` pass.
#[derive(Debug, Clone, Default)]
pub struct QueueReport {
    /// Another pass was already running; nothing was replayed.
    pub skipped: bool,
    pub processed: usize,
    pub succeeded: usize,
    pub requeued: usize,
    /// One `QueueExhausted` error per dropped item.
    pub exhausted: Vec<SyncError>,
    pub records: Vec<ReplayRecord>,
}

impl QueueReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    pub fn users_synced(&self) -> Vec<&str> {
        let mut users: Vec<&str> = self
            .records
            .iter()
            .filter(|record| record.status == ReplayStatus::Synced)
            .map(|record| record.user_id.as_str())
            .collect();
        users.sort_unstable();
        users.dedup();
        users
    }
}

pub struct OfflineQueue {
    coordinator: Arc<OptimisticCoordinator>,
    items: Mutex<VecDeque<OfflineQueueItem>>,
    processing: Mutex<()>,
    max_retries: u32,
    capacity: usize,
}

impl OfflineQueue {
    pub fn new(coordinator: Arc<OptimisticCoordinator>, max_retries: u32, capacity: usize) -> Self {
        Self {
            coordinator,
            items: Mutex::new(VecDeque::new()),
            processing: Mutex::new(()),
            max_retries,
            capacity,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Appends `change` for a later replay and returns the item id.
    pub async fn enqueue(&self, user_id: &str, change: ProfileChange) -> Result<Uuid> {
        let mut items = self.items.lock().await;
        if items.len() >= self.capacity {
            event!(Level::WARN, user_id = %user_id, capacity = self.capacity, "offline queue full");
            return Err(SyncError::QueueFull(self.capacity));
        }

        let item = OfflineQueueItem::new(user_id, change, self.max_retries);
        let id = item.id;
        event!(
            Level::INFO,
            item_id = %id,
            user_id = %user_id,
            operation = %item.operation,
            queued = items.len() + 1,
            "mutation queued for replay"
        );
        items.push_back(item);
        Ok(id)
    }

    /// Replays every queued item once, oldest first.
    pub async fn process_queue(&self) -> QueueReport {
        let Ok(_pass) = self.processing.try_lock() else {
            event!(Level::DEBUG, "offline queue pass already running");
            return QueueReport::skipped();
        };

        let pending: Vec<OfflineQueueItem> = self.items.lock().await.iter().cloned().collect();
        let span = info_span!("offline.process_queue", items = pending.len());
        self.replay(pending).instrument(span).await
    }

    async fn replay(&self, pending: Vec<OfflineQueueItem>) -> QueueReport {
        let mut report = QueueReport::default();

        for item in pending {
            if !self.contains(item.id).await {
                continue;
            }
            report.processed += 1;

            let status = match self.coordinator.apply(&item.user_id, &item.change).await {
                Ok(_) => {
                    self.remove(item.id).await;
                    event!(
                        Level::INFO,
                        item_id = %item.id,
                        user_id = %item.user_id,
                        "queued mutation synced"
                    );
                    report.succeeded += 1;
                    Some(ReplayStatus::Synced)
                }
                Err(err) => self.settle_failure(item.id, &err, &mut report).await,
            };

            if let Some(status) = status {
                report.records.push(ReplayRecord {
                    id: item.id,
                    user_id: item.user_id.clone(),
                    operation: item.operation,
                    key: item.change.cache_key(&item.user_id),
                    status,
                });
            }
        }

        event!(
            Level::INFO,
            processed = report.processed,
            succeeded = report.succeeded,
            requeued = report.requeued,
            exhausted = report.exhausted.len(),
            "offline queue pass finished"
        );
        report
    }

    /// Updates the stored item after a failed replay. Returns `None` when
    /// the item was cleared while its replay was running.
    async fn settle_failure(
        &self,
        id: Uuid,
        err: &SyncError,
        report: &mut QueueReport,
    ) -> Option<ReplayStatus> {
        let mut items = self.items.lock().await;
        let position = items.iter().position(|item| item.id == id)?;

        let exhausted = {
            let item = &mut items[position];
            item.record_failure(err.to_string()) || !err.is_retryable()
        };

        if !exhausted {
            let item = &items[position];
            event!(
                Level::DEBUG,
                item_id = %id,
                retry_count = item.retry_count,
                max_retries = item.max_retries,
                error = %err,
                "queued mutation failed, kept for next pass"
            );
            report.requeued += 1;
            return Some(ReplayStatus::Requeued);
        }

        let item = items.remove(position)?;
        event!(
            Level::ERROR,
            item_id = %id,
            user_id = %item.user_id,
            attempts = item.retry_count,
            error = %err,
            "queued mutation dropped"
        );
        report.exhausted.push(SyncError::QueueExhausted {
            id,
            attempts: item.retry_count,
            last_error: err.to_string(),
        });
        Some(ReplayStatus::Exhausted)
    }

    async fn contains(&self, id: Uuid) -> bool {
        self.items.lock().await.iter().any(|item| item.id == id)
    }

    async fn remove(&self, id: Uuid) {
        self.items.lock().await.retain(|item| item.id != id);
    }

    pub async fn clear(&self) {
        let mut items = self.items.lock().await;
        let dropped = items.len();
        items.clear();
        event!(Level::INFO, dropped, "offline queue cleared");
    }

    pub async fn clear_user(&self, user_id: &str) {
        let mut items = self.items.lock().await;
        let before = items.len();
        items.retain(|item| item.user_id != user_id);
        event!(
            Level::INFO,
            user_id = %user_id,
            dropped = before - items.len(),
            "offline queue cleared for user"
        );
    }

    pub async fn items(&self) -> Vec<OfflineQueueItem> {
        self.items.lock().await.iter().cloned().collect()
    }

    pub async fn items_for(&self, user_id: &str) -> Vec<OfflineQueueItem> {
        self.items
            .lock()
            .await
            .iter()
            .filter(|item| item.user_id == user_id)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
