//! A variant's stock as the engines see it, and the change they hand back.

use serde::{Deserialize, Serialize};

use stockledger_catalog::Variant;
use stockledger_core::{AggregateRoot, DomainError, DomainResult, ExpectedVersion, StockLineId, VariantId};

use crate::movement::StockMovement;
use crate::stock_line::StockLine;

/// Variant plus all of its layers (FIFO order) and its ledger head.
///
/// Loaded by a store while the variant is locked; engines decide on it and
/// never mutate it directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockPosition {
    variant: Variant,
    layers: Vec<StockLine>,
    last_movement_sequence: u64,
}

impl StockPosition {
    pub fn new(variant: Variant, mut layers: Vec<StockLine>, last_movement_sequence: u64) -> DomainResult<Self> {
        let variant_id = variant.id_typed();
        for layer in &layers {
            if layer.variant_id != variant_id {
                return Err(DomainError::invariant(format!(
                    "stock line {} belongs to variant {}, not {}",
                    layer.id, layer.variant_id, variant_id
                )));
            }
            if layer.quantity < 0 {
                return Err(DomainError::invariant(format!(
                    "stock line {} has negative quantity {}",
                    layer.id, layer.quantity
                )));
            }
        }
        layers.sort_by_key(|l| l.sequence);

        Ok(Self {
            variant,
            layers,
            last_movement_sequence,
        })
    }

    pub fn variant(&self) -> &Variant {
        &self.variant
    }

    pub fn variant_id(&self) -> VariantId {
        self.variant.id_typed()
    }

    /// Every layer, oldest first (exhausted ones included).
    pub fn layers(&self) -> &[StockLine] {
        &self.layers
    }

    /// Layers that still hold units, oldest first.
    pub fn live_layers(&self) -> impl Iterator<Item = &StockLine> {
        self.layers.iter().filter(|l| !l.is_exhausted())
    }

    pub fn layer_sum(&self) -> i64 {
        self.layers.iter().map(|l| l.quantity).sum()
    }

    pub fn newest_layer(&self) -> Option<&StockLine> {
        self.layers.last()
    }

    pub fn last_movement_sequence(&self) -> u64 {
        self.last_movement_sequence
    }

    pub(crate) fn next_layer_sequence(&self) -> u64 {
        self.layers.last().map(|l| l.sequence + 1).unwrap_or(1)
    }

    pub(crate) fn expected_version(&self) -> ExpectedVersion {
        ExpectedVersion::Exact(self.variant.version())
    }

    /// Deleted variants are treated as absent by every stock operation.
    pub fn ensure_live(&self) -> DomainResult<()> {
        if self.variant.is_deleted() {
            return Err(DomainError::not_found(format!("variant {}", self.variant_id())));
        }
        Ok(())
    }

    /// The variant counter must equal the sum of its layers.
    pub fn ensure_conserved(&self) -> DomainResult<()> {
        let sum = self.layer_sum();
        if sum != self.variant.available_stock() {
            return Err(DomainError::invariant(format!(
                "variant {} counter {} does not match layer sum {}",
                self.variant_id(),
                self.variant.available_stock(),
                sum
            )));
        }
        Ok(())
    }

    pub fn valuation(&self) -> StockValuation {
        let mut quantity = 0i64;
        let mut total_cost = 0i64;
        let mut layers = 0usize;
        for layer in self.live_layers() {
            quantity += layer.quantity;
            total_cost = total_cost.saturating_add(layer.value().unwrap_or(i64::MAX));
            layers += 1;
        }
        StockValuation {
            variant_id: self.variant_id(),
            quantity,
            total_cost,
            layers,
        }
    }

    /// Apply a committed change in memory.
    ///
    /// Stores use this to keep an in-memory copy in step with what they persisted.
    pub fn apply(&mut self, change: &StockChange) -> DomainResult<()> {
        if change.variant_id != self.variant_id() {
            return Err(DomainError::invariant("stock change targets another variant"));
        }
        change.expected_version.check(self.variant.version())?;

        for update in &change.layer_updates {
            let layer = self
                .layers
                .iter_mut()
                .find(|l| l.id == update.stock_line_id)
                .ok_or_else(|| DomainError::not_found(format!("stock line {}", update.stock_line_id)))?;
            layer.quantity = update.quantity;
        }
        self.layers.extend(change.new_layers.iter().cloned());
        self.layers.sort_by_key(|l| l.sequence);

        if let Some(last) = change.movements.last() {
            self.last_movement_sequence = last.sequence;
        }
        self.variant.record_stock(change.available_stock)?;
        self.ensure_conserved()
    }
}

/// New quantity for an existing layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerUpdate {
    pub stock_line_id: StockLineId,
    pub quantity: i64,
}

/// Everything one ledger operation writes, committed as a unit.
///
/// The store must apply all of it or none of it, and only if the variant is
/// still at `expected_version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockChange {
    pub variant_id: VariantId,
    pub expected_version: ExpectedVersion,
    /// Variant counter after the change.
    pub available_stock: i64,
    pub new_layers: Vec<StockLine>,
    pub layer_updates: Vec<LayerUpdate>,
    pub movements: Vec<StockMovement>,
}

impl StockChange {
    pub fn is_empty(&self) -> bool {
        self.new_layers.is_empty() && self.layer_updates.is_empty() && self.movements.is_empty()
    }
}

/// FIFO inventory value of a variant's live layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockValuation {
    pub variant_id: VariantId,
    pub quantity: i64,
    /// Sum of `quantity * unit_cost` over live layers, smallest currency unit.
    pub total_cost: i64,
    pub layers: usize,
}
