use std::collections::HashMap;
use std::sync::RwLock;

use stockledger_catalog::{Product, Variant, VariantStatus, VariantTransition, admit_variant, cascade};
use stockledger_core::{DomainError, ProductId, VariantId};
use stockledger_inventory::{StockChange, StockLine, StockMovement, StockPosition};

use super::r#trait::{CascadeWarning, CatalogStore, StockStore, TransitionOutcome};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct State {
    products: HashMap<ProductId, Product>,
    variants: HashMap<VariantId, Variant>,
    layers: HashMap<VariantId, Vec<StockLine>>,
    movements: HashMap<VariantId, Vec<StockMovement>>,
}

impl State {
    fn position(&self, variant_id: VariantId) -> Result<StockPosition, StoreError> {
        let variant = self
            .variants
            .get(&variant_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("variant {variant_id}")))?;
        let layers = self.layers.get(&variant_id).cloned().unwrap_or_default();
        let last_sequence = self
            .movements
            .get(&variant_id)
            .and_then(|m| m.last())
            .map(|m| m.sequence)
            .unwrap_or(0);

        Ok(StockPosition::new(variant, layers, last_sequence)?)
    }
}

/// In-memory stock ledger and catalog.
///
/// Intended for tests/dev. A single lock covers all state, so every commit is
/// trivially atomic.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    state: RwLock<State>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop a product row behind the catalog's back.
    #[cfg(test)]
    pub(crate) fn forget_product(&self, product_id: ProductId) {
        if let Ok(mut state) = self.state.write() {
            state.products.remove(&product_id);
        }
    }
}

fn map_commit_error(err: DomainError) -> StoreError {
    match err {
        DomainError::Conflict(msg) => StoreError::Concurrency(msg),
        other => StoreError::Domain(other),
    }
}

impl StockStore for InMemoryLedgerStore {
    fn load_position(&self, variant_id: VariantId) -> Result<StockPosition, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::poisoned())?;
        state.position(variant_id)
    }

    fn commit(&self, change: &StockChange) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| StoreError::poisoned())?;
        let mut position = state.position(change.variant_id)?;
        if position.variant().is_deleted() {
            return Err(StoreError::NotFound(format!("variant {}", change.variant_id)));
        }
        let head = position.last_movement_sequence();

        // Movement sequences must continue the ledger without gaps.
        for (offset, movement) in change.movements.iter().enumerate() {
            let expected = head + offset as u64 + 1;
            if movement.sequence != expected || movement.variant_id != change.variant_id {
                return Err(StoreError::Concurrency(format!(
                    "movement sequence {} does not follow ledger head {head}",
                    movement.sequence
                )));
            }
        }

        position.apply(change).map_err(map_commit_error)?;

        state
            .variants
            .insert(change.variant_id, position.variant().clone());
        state
            .layers
            .insert(change.variant_id, position.layers().to_vec());
        state
            .movements
            .entry(change.variant_id)
            .or_default()
            .extend(change.movements.iter().cloned());
        Ok(())
    }

    fn movements_after(
        &self,
        variant_id: VariantId,
        after_sequence: u64,
        limit: usize,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::poisoned())?;
        let Some(movements) = state.movements.get(&variant_id) else {
            return Ok(vec![]);
        };

        // Sequences start at 1 and are dense, so the index is `sequence - 1`.
        let start = (after_sequence as usize).min(movements.len());
        Ok(movements[start..].iter().take(limit).cloned().collect())
    }

    fn variant(&self, variant_id: VariantId) -> Result<Option<Variant>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::poisoned())?;
        Ok(state.variants.get(&variant_id).cloned())
    }

    fn variants(&self, ids: &[VariantId]) -> Result<Vec<Variant>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::poisoned())?;
        Ok(ids
            .iter()
            .filter_map(|id| state.variants.get(id).cloned())
            .collect())
    }

    fn adjust_committed(&self, variant_id: VariantId, delta: i64) -> Result<Variant, StoreError> {
        let mut state = self.state.write().map_err(|_| StoreError::poisoned())?;
        let variant = state
            .variants
            .get_mut(&variant_id)
            .ok_or_else(|| StoreError::NotFound(format!("variant {variant_id}")))?;
        variant.adjust_committed(delta)?;
        Ok(variant.clone())
    }
}

impl CatalogStore for InMemoryLedgerStore {
    fn insert_product(&self, product: Product) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| StoreError::poisoned())?;
        let id = product.id_typed();
        if state.products.contains_key(&id) {
            return Err(StoreError::Concurrency(format!("product {id} already exists")));
        }
        state.products.insert(id, product);
        Ok(())
    }

    fn insert_variant(&self, variant: Variant) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| StoreError::poisoned())?;
        let id = variant.id_typed();
        let product_id = variant.product_id();
        if state.variants.contains_key(&id) {
            return Err(StoreError::Concurrency(format!("variant {id} already exists")));
        }
        let product = match state.products.get_mut(&product_id) {
            Some(p) if !p.is_deleted() => p,
            _ => return Err(StoreError::NotFound(format!("product {product_id}"))),
        };
        product.apply_flags(admit_variant(product.flags()));
        state.variants.insert(id, variant);
        Ok(())
    }

    fn product(&self, product_id: ProductId) -> Result<Option<Product>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::poisoned())?;
        Ok(state.products.get(&product_id).cloned())
    }

    fn variants_of(&self, product_id: ProductId) -> Result<Vec<Variant>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::poisoned())?;
        let mut variants: Vec<Variant> = state
            .variants
            .values()
            .filter(|v| v.product_id() == product_id)
            .cloned()
            .collect();
        variants.sort_by_key(|v| v.created_at());
        Ok(variants)
    }

    fn transition_variant(
        &self,
        variant_id: VariantId,
        transition: VariantTransition,
    ) -> Result<TransitionOutcome, StoreError> {
        let mut state = self.state.write().map_err(|_| StoreError::poisoned())?;

        let variant = state
            .variants
            .get_mut(&variant_id)
            .ok_or_else(|| StoreError::NotFound(format!("variant {variant_id}")))?;
        variant.transition(transition)?;
        let variant = variant.clone();
        let product_id = variant.product_id();

        let siblings: Vec<VariantStatus> = state
            .variants
            .values()
            .filter(|v| v.product_id() == product_id)
            .map(|v| v.status())
            .collect();

        let Some(product) = state.products.get_mut(&product_id) else {
            return Ok(TransitionOutcome {
                variant,
                product_flags: None,
                warning: Some(CascadeWarning {
                    product_id,
                    message: format!("product {product_id} not found"),
                }),
            });
        };

        let flags = cascade(product.flags(), transition, &siblings);
        product.apply_flags(flags);

        Ok(TransitionOutcome {
            variant,
            product_flags: Some(flags),
            warning: None,
        })
    }
}
