//! Versioned roots and optimistic concurrency.

use crate::error::{DomainError, DomainResult};

/// Root of a consistency boundary.
///
/// The version advances by one for every committed change, so a writer can
/// detect that someone else committed between its read and its write.
pub trait AggregateRoot {
    /// Strongly-typed identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the identifier.
    fn id(&self) -> &Self::Id;

    /// Monotonically increasing version of the root's state.
    fn version(&self) -> u64;
}

/// Optimistic concurrency expectation for a root.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking (migrations, repair tooling).
    Any,
    /// Require the root to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual})"
            )))
        }
    }
}
