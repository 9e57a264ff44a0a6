use crate::core::{OperationKind, ProfileChange};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a deferred mutation after a replay attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplayStatus {
    /// Confirmed by the service and removed from the queue.
    Synced,
    /// Failed, still queued for the next pass.
    Requeued,
    /// Failed for the last time and removed from the queue.
    Exhausted,
}

/// A mutation that could not reach the service and waits for a replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineQueueItem {
    pub id: Uuid,
    pub user_id: String,
    pub operation: OperationKind,
    pub change: ProfileChange,
    pub queued_at: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
}

impl OfflineQueueItem {
    pub fn new(user_id: impl Into<String>, change: ProfileChange, max_retries: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            operation: change.operation_kind(),
            change,
            queued_at: Utc::now(),
            retry_count: 0,
            max_retries,
            last_error: None,
        }
    }

    /// Records a failed replay and reports whether the item ran out of retries.
    pub fn record_failure(&mut self, error: impl Into<String>) -> bool {
        self.retry_count = self.retry_count.saturating_add(1);
        self.last_error = Some(error.into());
        self.is_exhausted()
    }

    pub fn is_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ProfilePatch;

    #[test]
    fn test_new_item_records_operation() {
        let item = OfflineQueueItem::new("u1", ProfileChange::DeleteAvatar, 3);
        assert_eq!(item.operation, OperationKind::Delete);
        assert_eq!(item.retry_count, 0);
        assert!(item.last_error.is_none());
    }

    #[test]
    fn test_record_failure_until_exhausted() {
        let change = ProfileChange::Update(ProfilePatch::new().bio("x"));
        let mut item = OfflineQueueItem::new("u1", change, 2);

        assert!(!item.record_failure("timeout"));
        assert!(item.record_failure("timeout"));
        assert_eq!(item.retry_count, 2);
        assert_eq!(item.last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_items_serialize_camel_case() {
        let item = OfflineQueueItem::new("u1", ProfileChange::DeleteAvatar, 3);
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["change"]["type"], "deleteAvatar");
        assert_eq!(json["maxRetries"], 3);
    }
}
