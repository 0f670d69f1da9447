//! Store and service error types.

use thiserror::Error;

use stockledger_core::DomainError;

/// Persistence-layer failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Optimistic concurrency check failed or a concurrent writer won a unique key.
    #[error("concurrent modification: {0}")]
    Concurrency(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A domain rule rejected the write inside the unit of work.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Driver, connection, or lock-poisoning failure.
    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn poisoned() -> Self {
        Self::Backend("lock poisoned".to_string())
    }
}

/// Failure returned to document services by [`crate::StockLedger`].
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("insufficient stock (requested: {requested}, available: {available})")]
    InsufficientStock { requested: i64, available: i64 },

    /// Contention on a variant; the caller may retry.
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// Lifecycle move not allowed from the current state.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// Stored data broke a ledger invariant.
    #[error("ledger invariant violated: {0}")]
    Invariant(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl LedgerError {
    /// Whether retrying the same call can succeed without the caller changing anything.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::ConcurrencyConflict(_))
    }
}

impl From<DomainError> for LedgerError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::NotFound(what) => LedgerError::NotFound(what),
            DomainError::InvalidQuantity(msg) => LedgerError::InvalidQuantity(msg),
            DomainError::InsufficientStock {
                requested,
                available,
            } => LedgerError::InsufficientStock {
                requested,
                available,
            },
            DomainError::Conflict(msg) => LedgerError::ConcurrencyConflict(msg),
            DomainError::Validation(msg) => LedgerError::InvalidTransition(msg),
            DomainError::InvalidId(msg) => LedgerError::NotFound(msg),
            DomainError::InvariantViolation(msg) => LedgerError::Invariant(msg),
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Concurrency(msg) => LedgerError::ConcurrencyConflict(msg),
            StoreError::NotFound(what) => LedgerError::NotFound(what),
            StoreError::Domain(err) => err.into(),
            StoreError::Backend(msg) => LedgerError::Storage(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_conflict_becomes_retryable() {
        let err: LedgerError = DomainError::conflict("stale").into();
        assert!(err.is_retryable());
    }

    #[test]
    fn store_domain_errors_keep_their_kind() {
        let err: LedgerError = StoreError::from(DomainError::insufficient_stock(5, 2)).into();
        assert!(matches!(
            err,
            LedgerError::InsufficientStock {
                requested: 5,
                available: 2
            }
        ));
        assert!(!err.is_retryable());
    }

    #[test]
    fn backend_failures_are_not_retryable() {
        let err: LedgerError = StoreError::poisoned().into();
        assert!(matches!(err, LedgerError::Storage(_)));
        assert!(!err.is_retryable());
    }
}
