//! Per-variant exclusive locks with a bounded wait.
//!
//! Serialises read-modify-write cycles on one variant within this process.
//! Writers in other processes are caught by the store's version check.

use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use stockledger_core::VariantId;

use crate::error::LedgerError;

#[derive(Debug, Default)]
struct LockTable {
    held: Mutex<HashSet<VariantId>>,
    released: Condvar,
}

#[derive(Debug, Clone)]
pub struct VariantLocks {
    table: Arc<LockTable>,
    timeout: Duration,
}

impl VariantLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            table: Arc::new(LockTable::default()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Take the lock for `variant_id`, waiting at most the configured timeout.
    pub fn acquire(&self, variant_id: VariantId) -> Result<VariantGuard, LedgerError> {
        let deadline = Instant::now() + self.timeout;
        let mut held = self
            .table
            .held
            .lock()
            .map_err(|_| LedgerError::Storage("variant lock table poisoned".to_string()))?;

        while held.contains(&variant_id) {
            let now = Instant::now();
            if now >= deadline {
                return Err(LedgerError::ConcurrencyConflict(format!(
                    "timed out after {:?} waiting for variant {variant_id}",
                    self.timeout
                )));
            }
            let (guard, _) = self
                .table
                .released
                .wait_timeout(held, deadline - now)
                .map_err(|_| LedgerError::Storage("variant lock table poisoned".to_string()))?;
            held = guard;
        }

        held.insert(variant_id);
        Ok(VariantGuard {
            table: Arc::clone(&self.table),
            variant_id,
        })
    }
}

/// Releases the variant on drop.
#[derive(Debug)]
pub struct VariantGuard {
    table: Arc<LockTable>,
    variant_id: VariantId,
}

impl VariantGuard {
    pub fn variant_id(&self) -> VariantId {
        self.variant_id
    }
}

impl Drop for VariantGuard {
    fn drop(&mut self) {
        let mut held = self
            .table
            .held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        held.remove(&self.variant_id);
        self.table.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn distinct_variants_do_not_block_each_other() {
        let locks = VariantLocks::new(Duration::from_millis(10));
        let _a = locks.acquire(VariantId::new()).unwrap();
        let _b = locks.acquire(VariantId::new()).unwrap();
    }

    #[test]
    fn second_holder_times_out_as_conflict() {
        let locks = VariantLocks::new(Duration::from_millis(20));
        let id = VariantId::new();
        let _held = locks.acquire(id).unwrap();

        let err = locks.acquire(id).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn release_wakes_waiter() {
        let locks = VariantLocks::new(Duration::from_secs(5));
        let id = VariantId::new();
        let held = locks.acquire(id).unwrap();

        let waiter = {
            let locks = locks.clone();
            thread::spawn(move || locks.acquire(id).map(|g| g.variant_id()))
        };
        thread::sleep(Duration::from_millis(20));
        drop(held);

        assert_eq!(waiter.join().unwrap().unwrap(), id);
    }
}
