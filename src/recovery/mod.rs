// ============================================================================
// Error Recovery Module
// ============================================================================
//
// Failed reads and mutations are routed through an ordered chain of
// strategies. Each strategy is a trait object registered on the chain and
// picked by `can_handle`.
//
// ============================================================================

pub mod chain;
pub mod strategy;

pub use chain::ErrorRecoveryChain;
pub use strategy::{
    CacheFallbackStrategy, DefaultStateStrategy, OfflineQueueStrategy, RecoveryContext,
    RecoveryOutcome, RecoveryStrategy, RecoveryStrategyKind, RecoveryTarget,
};
