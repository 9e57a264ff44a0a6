// ============================================================================
// Optimistic Transaction State
// ============================================================================
//
// Each mutation moves through:
//
//   Pending ──remote ok──> Committed
//      │
//      └──remote error──> RolledBack
//
// The transaction keeps the snapshot that was current before the mutation
// and the optimistic snapshot it published, both as `Arc`s, so settling is a
// pointer comparison plus at most a field-wise merge.
//
// ============================================================================

use crate::core::{ProfileChange, ProfileField, ProfileSnapshot};
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;

/// Identifier of one optimistic mutation, unique per coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MutationId(pub u64);

impl MutationId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mut_{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Optimistic snapshot published, remote call outstanding
    Pending,

    /// Remote call succeeded; the saved snapshot was discarded
    Committed,

    /// Remote call failed; the saved snapshot was restored
    RolledBack,
}

impl TransactionState {
    pub fn is_pending(&self) -> bool {
        matches!(self, TransactionState::Pending)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_pending()
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionState::Pending => write!(f, "PENDING"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::RolledBack => write!(f, "ROLLED_BACK"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OptimisticTransaction {
    id: MutationId,
    user_id: String,
    state: TransactionState,

    /// Snapshot before the mutation (`None`: nothing was loaded yet)
    previous: Option<Arc<ProfileSnapshot>>,

    /// Snapshot published while the remote call runs
    optimistic: Arc<ProfileSnapshot>,

    change: ProfileChange,
    touched: Vec<ProfileField>,
    started_at: Instant,
}

impl OptimisticTransaction {
    pub(crate) fn new(
        id: MutationId,
        user_id: impl Into<String>,
        previous: Option<Arc<ProfileSnapshot>>,
        optimistic: Arc<ProfileSnapshot>,
        change: ProfileChange,
    ) -> Self {
        let touched = change.touched_fields();
        Self {
            id,
            user_id: user_id.into(),
            state: TransactionState::Pending,
            previous,
            optimistic,
            change,
            touched,
            started_at: Instant::now(),
        }
    }

    pub fn id(&self) -> MutationId {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn previous(&self) -> Option<&Arc<ProfileSnapshot>> {
        self.previous.as_ref()
    }

    pub fn optimistic(&self) -> &Arc<ProfileSnapshot> {
        &self.optimistic
    }

    pub fn change(&self) -> &ProfileChange {
        &self.change
    }

    pub fn touched(&self) -> &[ProfileField] {
        &self.touched
    }

    /// Version the optimistic snapshot was derived from.
    pub fn base_version(&self) -> u64 {
        self.previous.as_ref().map(|p| p.version).unwrap_or(0)
    }

    pub fn duration(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    pub(crate) fn mark_committed(&mut self) {
        debug_assert!(self.state.is_pending(), "{} already {}", self.id, self.state);
        self.state = TransactionState::Committed;
    }

    pub(crate) fn mark_rolled_back(&mut self) {
        debug_assert!(self.state.is_pending(), "{} already {}", self.id, self.state);
        self.state = TransactionState::RolledBack;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ProfilePatch;

    fn txn() -> OptimisticTransaction {
        let mut previous = ProfileSnapshot::new("u1");
        previous.version = 4;
        let change = ProfileChange::Update(ProfilePatch::new().bio("hi"));
        let optimistic = Arc::new(change.apply_optimistic(&previous));
        let previous = Some(Arc::new(previous));
        OptimisticTransaction::new(MutationId(1), "u1", previous, optimistic, change)
    }

    #[test]
    fn test_transaction_lifecycle() {
        let mut txn = txn();
        assert_eq!(txn.state(), TransactionState::Pending);
        assert!(!txn.state().is_terminal());
        assert_eq!(txn.touched(), &[ProfileField::Bio]);
        assert_eq!(txn.base_version(), 4);

        txn.mark_committed();
        assert_eq!(txn.state(), TransactionState::Committed);
        assert!(txn.state().is_terminal());
    }

    #[test]
    fn test_rollback_state() {
        let mut txn = txn();
        txn.mark_rolled_back();
        assert_eq!(txn.state(), TransactionState::RolledBack);
        assert_eq!(txn.state().to_string(), "ROLLED_BACK");
    }

    #[test]
    fn test_mutation_id_display() {
        assert_eq!(MutationId(7).to_string(), "mut_7");
    }
}
