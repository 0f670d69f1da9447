//! The stock ledger service: the operation set document services call.
//!
//! ## Execution flow
//!
//! Every stock mutation runs the same pipeline:
//!
//! ```text
//! StockIn / StockOut / Reconcile
//!   ↓
//! 1. Acquire the variant lock (bounded wait → ConcurrencyConflict)
//!   ↓
//! 2. Load the variant's position (variant + all layers + ledger head)
//!   ↓
//! 3. Decide purely (FIFO / reconciliation engine → StockChange)
//!   ↓
//! 4. Commit the change atomically, version-checked against step 2
//!   ↓
//! 5. Release the lock
//! ```
//!
//! The lock serialises writers inside one process. The version check in
//! step 4 catches writers in other processes sharing the same database; a
//! lost race surfaces as a retryable `LedgerError::ConcurrencyConflict`.
//! Nothing is retried here: retry policy belongs to the caller.
//!
//! Lifecycle transitions (archive / unarchive / delete) take the same lock
//! so a deletion cannot interleave with a stock movement on that variant.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use stockledger_catalog::{NewProduct, NewVariant, Product, Variant, VariantTransition};
use stockledger_core::{CategoryId, DomainResult, ProductId, VariantId};
use stockledger_inventory::{
    AuditReport, LedgerReplay, Reconcile, ReconcileOutcome, StockChange, StockIn, StockLine,
    StockMovement, StockOut, StockPosition, StockValuation, reconcile, stock_in, stock_out,
};

use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::history::MovementHistory;
use crate::locks::VariantLocks;
use crate::store::{CatalogStore, StockStore, TransitionOutcome};

/// Result of a FIFO stock-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockIssue {
    /// One movement per layer drawn from, oldest layer first.
    pub movements: Vec<StockMovement>,
    /// Cost of the issued units, smallest currency unit.
    pub total_cost: i64,
    pub available_stock: i64,
}

/// Result of a stockopname adjustment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjustment {
    pub previous_stock: i64,
    pub counted_stock: i64,
    /// Empty when the count matched; one `in` movement on a surplus; one
    /// `out` movement per drained layer on a shortage.
    pub movements: Vec<StockMovement>,
}

impl Adjustment {
    pub fn delta(&self) -> i64 {
        self.counted_stock - self.previous_stock
    }
}

/// Inventory stock ledger over a catalog and stock store.
#[derive(Debug)]
pub struct StockLedger<S> {
    store: S,
    locks: VariantLocks,
    config: LedgerConfig,
}

impl<S> StockLedger<S> {
    pub fn new(store: S, config: LedgerConfig) -> Self {
        let locks = VariantLocks::new(config.lock_timeout);
        Self {
            store,
            locks,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn into_store(self) -> S {
        self.store
    }

    #[cfg(test)]
    pub(crate) fn locks(&self) -> &VariantLocks {
        &self.locks
    }
}

impl<S> StockLedger<S>
where
    S: StockStore + CatalogStore,
{
    /// Lock, load, decide, commit.
    ///
    /// `decide` returns the change to commit (`None` for a no-op) plus the
    /// value handed back to the caller.
    fn execute<T>(
        &self,
        variant_id: VariantId,
        decide: impl FnOnce(&StockPosition) -> DomainResult<(Option<StockChange>, T)>,
    ) -> Result<T, LedgerError> {
        let _guard = self.locks.acquire(variant_id)?;

        let position = self.store.load_position(variant_id)?;
        let (change, value) = decide(&position)?;

        if let Some(change) = change.filter(|c| !c.is_empty()) {
            self.store.commit(&change)?;
        }
        Ok(value)
    }

    pub fn register_product(
        &self,
        name: impl Into<String>,
        category_id: Option<CategoryId>,
        has_variants: bool,
    ) -> Result<Product, LedgerError> {
        let product = Product::create(
            ProductId::new(),
            NewProduct {
                name: name.into(),
                category_id,
                has_variants,
            },
            Utc::now(),
        )?;
        self.store.insert_product(product.clone())?;

        tracing::info!(product_id = %product.id_typed(), name = product.name(), "product registered");
        Ok(product)
    }

    pub fn register_variant(&self, input: NewVariant) -> Result<Variant, LedgerError> {
        let variant = Variant::create(VariantId::new(), input, Utc::now())?;
        self.store.insert_variant(variant.clone())?;

        tracing::info!(
            variant_id = %variant.id_typed(),
            product_id = %variant.product_id(),
            unit = variant.unit(),
            "variant registered"
        );
        Ok(variant)
    }

    /// Receive units into a new, newest layer.
    #[instrument(
        skip(self, cmd),
        fields(
            variant_id = %cmd.variant_id,
            quantity = cmd.quantity,
            reference_kind = %cmd.reference.kind
        ),
        err
    )]
    pub fn stock_in(&self, cmd: StockIn) -> Result<StockMovement, LedgerError> {
        let movement = self.execute(cmd.variant_id, |position| {
            let outcome = stock_in(position, &cmd)?;
            Ok((Some(outcome.change), outcome.movement))
        })?;

        tracing::info!(
            final_stock = movement.final_stock,
            unit_cost = movement.unit_cost,
            "stock received"
        );
        Ok(movement)
    }

    /// Issue units, FIFO. Either the full quantity leaves or nothing changes.
    #[instrument(
        skip(self, cmd),
        fields(
            variant_id = %cmd.variant_id,
            quantity = cmd.quantity,
            reference_kind = %cmd.reference.kind
        ),
        err
    )]
    pub fn stock_out(&self, cmd: StockOut) -> Result<StockIssue, LedgerError> {
        let issue = self.execute(cmd.variant_id, |position| {
            let outcome = stock_out(position, &cmd)?;
            let issue = StockIssue {
                movements: outcome.movements,
                total_cost: outcome.total_cost,
                available_stock: outcome.change.available_stock,
            };
            Ok((Some(outcome.change), issue))
        })?;

        tracing::info!(
            layers = issue.movements.len(),
            total_cost = issue.total_cost,
            final_stock = issue.available_stock,
            "stock issued"
        );
        Ok(issue)
    }

    /// Bring the recorded stock to a physical count.
    #[instrument(
        skip(self, cmd),
        fields(
            variant_id = %cmd.variant_id,
            counted = cmd.counted_quantity,
            reference_id = cmd.reference_id
        ),
        err
    )]
    pub fn reconcile(&self, cmd: Reconcile) -> Result<Adjustment, LedgerError> {
        let adjustment = self.execute(cmd.variant_id, |position| {
            let previous_stock = position.variant().available_stock();
            let outcome = reconcile(position, &cmd)?;
            let adjustment = Adjustment {
                previous_stock,
                counted_stock: cmd.counted_quantity,
                movements: outcome.movements(),
            };
            let change = match outcome {
                ReconcileOutcome::Unchanged => None,
                ReconcileOutcome::Increased { change, .. }
                | ReconcileOutcome::Decreased { change, .. } => Some(change),
            };
            Ok((change, adjustment))
        })?;

        if adjustment.movements.is_empty() {
            tracing::debug!("count matches ledger, nothing recorded");
        } else {
            tracing::info!(delta = adjustment.delta(), "stock reconciled");
        }
        Ok(adjustment)
    }

    /// Lazy history of a variant, oldest movement first.
    ///
    /// Deleted variants keep their history.
    pub fn history(&self, variant_id: VariantId) -> Result<MovementHistory<'_, S>, LedgerError> {
        if self.store.variant(variant_id)?.is_none() {
            return Err(LedgerError::NotFound(format!("variant {variant_id}")));
        }
        Ok(MovementHistory::new(
            &self.store,
            variant_id,
            self.config.history_page_size,
        ))
    }

    pub fn detail_by_variant(&self, variant_id: VariantId) -> Result<Variant, LedgerError> {
        self.store
            .variant(variant_id)?
            .filter(|v| !v.is_deleted())
            .ok_or_else(|| LedgerError::NotFound(format!("variant {variant_id}")))
    }

    /// Non-deleted variants for `ids`, in the order requested.
    pub fn detail_by_ids(&self, ids: &[VariantId]) -> Result<Vec<Variant>, LedgerError> {
        let mut variants: Vec<Variant> = self
            .store
            .variants(ids)?
            .into_iter()
            .filter(|v| !v.is_deleted())
            .collect();
        if variants.is_empty() {
            return Err(LedgerError::NotFound(format!("none of {} variants", ids.len())));
        }

        variants.sort_by_key(|v| {
            ids.iter()
                .position(|id| *id == v.id_typed())
                .unwrap_or(usize::MAX)
        });
        variants.dedup_by_key(|v| v.id_typed());
        Ok(variants)
    }

    pub fn archive_variant(&self, variant_id: VariantId) -> Result<TransitionOutcome, LedgerError> {
        self.transition(variant_id, VariantTransition::Archive)
    }

    pub fn unarchive_variant(&self, variant_id: VariantId) -> Result<TransitionOutcome, LedgerError> {
        self.transition(variant_id, VariantTransition::Unarchive)
    }

    pub fn delete_variant(&self, variant_id: VariantId) -> Result<TransitionOutcome, LedgerError> {
        self.transition(variant_id, VariantTransition::Delete)
    }

    #[instrument(skip(self), err)]
    fn transition(
        &self,
        variant_id: VariantId,
        transition: VariantTransition,
    ) -> Result<TransitionOutcome, LedgerError> {
        let _guard = self.locks.acquire(variant_id)?;
        let outcome = self.store.transition_variant(variant_id, transition)?;

        match (&outcome.warning, outcome.product_flags) {
            (Some(warning), _) => tracing::warn!(
                product_id = %warning.product_id,
                "product cascade failed after {transition}: {}",
                warning.message
            ),
            (None, Some(flags)) => tracing::info!(
                product_id = %outcome.variant.product_id(),
                product_archived = flags.is_archived,
                product_deleted = flags.is_deleted,
                "variant {transition} applied"
            ),
            (None, None) => tracing::info!("variant {transition} applied"),
        }
        Ok(outcome)
    }

    /// Reserve (`delta > 0`) or release (`delta < 0`) committed stock.
    #[instrument(skip(self), err)]
    pub fn adjust_committed(&self, variant_id: VariantId, delta: i64) -> Result<Variant, LedgerError> {
        let _guard = self.locks.acquire(variant_id)?;
        let variant = self.store.adjust_committed(variant_id, delta)?;
        tracing::debug!(committed = variant.committed_stock(), "committed stock adjusted");
        Ok(variant)
    }

    /// Non-deleted variants among `ids` whose stock is under their minimum.
    pub fn low_stock(&self, ids: &[VariantId]) -> Result<Vec<Variant>, LedgerError> {
        Ok(self
            .store
            .variants(ids)?
            .into_iter()
            .filter(|v| !v.is_deleted() && v.is_below_minimum())
            .collect())
    }

    /// FIFO value of the variant's remaining layers.
    pub fn valuation(&self, variant_id: VariantId) -> Result<StockValuation, LedgerError> {
        let position = self.store.load_position(variant_id)?;
        position.ensure_live()?;
        Ok(position.valuation())
    }

    /// Layers that still hold units, oldest (next to be consumed) first.
    pub fn layers(&self, variant_id: VariantId) -> Result<Vec<StockLine>, LedgerError> {
        let position = self.store.load_position(variant_id)?;
        position.ensure_live()?;
        Ok(position.live_layers().cloned().collect())
    }

    /// Cross-check the live counter against its layers and the replayed ledger.
    ///
    /// Runs under the variant lock so no movement lands between the reads.
    #[instrument(skip(self), err)]
    pub fn audit(&self, variant_id: VariantId) -> Result<AuditReport, LedgerError> {
        let _guard = self.locks.acquire(variant_id)?;
        let position = self.store.load_position(variant_id)?;

        let mut replay = LedgerReplay::default();
        for movement in MovementHistory::new(&self.store, variant_id, self.config.history_page_size) {
            replay.push(&movement?);
        }

        let report = AuditReport {
            variant_id,
            counter: position.variant().available_stock(),
            layer_sum: position.layer_sum(),
            replay,
        };
        if report.consistent() {
            tracing::debug!(movements = replay.movements, "ledger consistent");
        } else {
            tracing::warn!(
                counter = report.counter,
                layer_sum = report.layer_sum,
                replayed = replay.level,
                broken_at = ?replay.broken_at,
                "ledger inconsistent"
            );
        }
        Ok(report)
    }
}
