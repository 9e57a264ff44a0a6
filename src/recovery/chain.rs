use super::strategy::{
    CacheFallbackStrategy, DefaultStateStrategy, OfflineQueueStrategy, RecoveryContext,
    RecoveryOutcome, RecoveryStrategy, RecoveryStrategyKind,
};
use crate::cache::ProfileCache;
use crate::core::SyncError;
use crate::offline::OfflineQueue;
use crate::optimistic::SnapshotStore;
use std::sync::Arc;
use tracing::{Level, event};

/// Ordered list of recovery strategies. The first one that can handle an
/// error and produces an outcome wins.
pub struct ErrorRecoveryChain {
    strategies: Vec<Box<dyn RecoveryStrategy>>,
}

impl ErrorRecoveryChain {
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    /// Builds the built-in strategies in the order given by `kinds`.
    pub fn from_kinds(
        kinds: &[RecoveryStrategyKind],
        profiles: Arc<ProfileCache>,
        snapshots: Arc<SnapshotStore>,
        queue: Arc<OfflineQueue>,
    ) -> Self {
        let mut chain = Self::new();
        for kind in kinds {
            let strategy: Box<dyn RecoveryStrategy> = match kind {
                RecoveryStrategyKind::CacheFallback => {
                    Box::new(CacheFallbackStrategy::new(Arc::clone(&profiles)))
                }
                RecoveryStrategyKind::OfflineQueue => {
                    Box::new(OfflineQueueStrategy::new(Arc::clone(&queue)))
                }
                RecoveryStrategyKind::DefaultState => Box::new(DefaultStateStrategy::new(
                    Arc::clone(&profiles),
                    Arc::clone(&snapshots),
                )),
            };
            chain.register(strategy);
        }
        chain
    }

    pub fn register(&mut self, strategy: Box<dyn RecoveryStrategy>) {
        self.strategies.push(strategy);
    }

    pub fn kinds(&self) -> Vec<RecoveryStrategyKind> {
        self.strategies.iter().map(|strategy| strategy.kind()).collect()
    }

    pub async fn recover(&self, error: &SyncError, context: &RecoveryContext) -> RecoveryOutcome {
        let key = context.key();

        if !error.is_recoverable() {
            event!(Level::DEBUG, key = %key, error = %error, "error is not recoverable");
            return RecoveryOutcome::Unrecovered;
        }

        for strategy in &self.strategies {
            let kind = strategy.kind();
            if !strategy.can_handle(error, context) {
                event!(Level::TRACE, key = %key, strategy = %kind, "strategy not applicable");
                continue;
            }

            event!(
                Level::DEBUG,
                key = %key,
                strategy = %kind,
                error = %error,
                "attempting recovery"
            );
            if let Some(outcome) = strategy.recover(error, context).await {
                event!(
                    Level::INFO,
                    key = %key,
                    strategy = %kind,
                    recovered = outcome.is_recovered(),
                    "recovery strategy applied"
                );
                return outcome;
            }
        }

        event!(Level::WARN, key = %key, error = %error, "no recovery strategy succeeded");
        RecoveryOutcome::Unrecovered
    }
}

impl Default for ErrorRecoveryChain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RetryPolicy, ValidationLimits};
    use crate::core::{CacheKey, ProfileChange, ProfilePatch};
    use crate::optimistic::{OptimisticCoordinator, SnapshotStore};
    use crate::service::InMemoryProfileService;

    struct Parts {
        profiles: Arc<ProfileCache>,
        snapshots: Arc<SnapshotStore>,
        queue: Arc<OfflineQueue>,
    }

    impl Parts {
        fn new() -> Self {
            let profiles = Arc::new(ProfileCache::new("profile", None, 8));
            let snapshots = Arc::new(SnapshotStore::new());
            let coordinator = OptimisticCoordinator::new(
                Arc::new(InMemoryProfileService::new()),
                Arc::clone(&profiles),
                Arc::clone(&snapshots),
                ValidationLimits::default(),
                RetryPolicy::default(),
            );
            let queue = Arc::new(OfflineQueue::new(Arc::new(coordinator), 3, 10));
            Self {
                profiles,
                snapshots,
                queue,
            }
        }

        fn chain(&self, kinds: &[RecoveryStrategyKind]) -> ErrorRecoveryChain {
            ErrorRecoveryChain::from_kinds(
                kinds,
                Arc::clone(&self.profiles),
                Arc::clone(&self.snapshots),
                Arc::clone(&self.queue),
            )
        }
    }

    #[tokio::test]
    async fn test_strategies_follow_configured_order() {
        let order = [RecoveryStrategyKind::DefaultState, RecoveryStrategyKind::CacheFallback];
        let chain = Parts::new().chain(&order);
        assert_eq!(chain.kinds(), order.to_vec());
    }

    #[tokio::test]
    async fn test_read_falls_through_to_default_state() {
        let chain = Parts::new().chain(&RecoveryStrategyKind::DEFAULT_ORDER);

        let outcome = chain
            .recover(&SyncError::network("down"), &RecoveryContext::read(CacheKey::profile("u1")))
            .await;
        assert_eq!(outcome, RecoveryOutcome::StateReset);
    }

    #[tokio::test]
    async fn test_mutation_is_queued() {
        let parts = Parts::new();
        let chain = parts.chain(&RecoveryStrategyKind::DEFAULT_ORDER);

        let change = ProfileChange::Update(ProfilePatch::new().bio("later"));
        let outcome = chain
            .recover(&SyncError::network("down"), &RecoveryContext::mutation("u1", change))
            .await;

        assert!(matches!(outcome, RecoveryOutcome::Queued(_)));
        assert_eq!(parts.queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_validation_errors_are_never_recovered() {
        let chain = Parts::new().chain(&RecoveryStrategyKind::DEFAULT_ORDER);

        let outcome = chain
            .recover(
                &SyncError::Validation("bad email".into()),
                &RecoveryContext::read(CacheKey::profile("u1")),
            )
            .await;
        assert_eq!(outcome, RecoveryOutcome::Unrecovered);
    }

    #[tokio::test]
    async fn test_empty_chain_is_unrecovered() {
        let chain = ErrorRecoveryChain::new();
        let outcome = chain
            .recover(&SyncError::network("down"), &RecoveryContext::read(CacheKey::profile("u1")))
            .await;
        assert_eq!(outcome, RecoveryOutcome::Unrecovered);
    }
}
