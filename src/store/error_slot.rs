use crate::core::{CacheKey, SyncError};
use chrono::{DateTime, Utc};
use tokio::sync::watch;

/// The last error that was surfaced to the UI.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreError {
    pub key: CacheKey,
    pub error: SyncError,
    pub at: DateTime<Utc>,
}

/// Single observable error slot. A new error overwrites the previous one.
pub(crate) struct ErrorSlot {
    sender: watch::Sender<Option<StoreError>>,
}

impl ErrorSlot {
    pub(crate) fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self { sender }
    }

    pub(crate) fn set(&self, key: CacheKey, error: SyncError) {
        self.sender.send_replace(Some(StoreError {
            key,
            error,
            at: Utc::now(),
        }));
    }

    /// Clears the slot if it holds an error for `key`.
    pub(crate) fn clear_for(&self, key: &CacheKey) {
        self.sender.send_if_modified(|slot| {
            if slot.as_ref().is_some_and(|current| &current.key == key) {
                *slot = None;
                true
            } else {
                false
            }
        });
    }

    pub(crate) fn clear_owner(&self, owner_id: &str) {
        self.sender.send_if_modified(|slot| {
            if slot.as_ref().is_some_and(|current| current.key.owner_id == owner_id) {
                *slot = None;
                true
            } else {
                false
            }
        });
    }

    pub(crate) fn clear(&self) {
        self.sender.send_if_modified(|slot| slot.take().is_some());
    }

    pub(crate) fn current(&self) -> Option<StoreError> {
        self.sender.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Option<StoreError>> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_error_overwrites_previous() {
        let slot = ErrorSlot::new();
        slot.set(CacheKey::profile("u1"), SyncError::network("a"));
        slot.set(CacheKey::avatar("u1"), SyncError::network("b"));

        let current = slot.current().unwrap();
        assert_eq!(current.key, CacheKey::avatar("u1"));
        assert_eq!(current.error, SyncError::network("b"));
    }

    #[test]
    fn test_clear_for_only_matching_key() {
        let slot = ErrorSlot::new();
        slot.set(CacheKey::profile("u1"), SyncError::network("a"));

        slot.clear_for(&CacheKey::profile("u2"));
        assert!(slot.current().is_some());

        slot.clear_for(&CacheKey::profile("u1"));
        assert!(slot.current().is_none());
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let slot = ErrorSlot::new();
        let mut rx = slot.subscribe();

        slot.set(CacheKey::profile("u1"), SyncError::network("a"));
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_some());

        slot.clear();
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_none());
    }
}
