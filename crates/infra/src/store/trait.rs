use std::sync::Arc;

use serde::{Deserialize, Serialize};

use stockledger_catalog::{Product, ProductFlags, Variant, VariantTransition};
use stockledger_core::{ProductId, VariantId};
use stockledger_inventory::{StockChange, StockMovement, StockPosition};

use crate::error::StoreError;

/// Why a product's derived flags could not be updated after a variant transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeWarning {
    pub product_id: ProductId,
    pub message: String,
}

/// Result of one variant lifecycle transition.
///
/// The variant change is committed even when `warning` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub variant: Variant,
    /// Product flags after the cascade, when the cascade step succeeded.
    pub product_flags: Option<ProductFlags>,
    pub warning: Option<CascadeWarning>,
}

/// Persistent stock layers, movement log, and variant counters.
///
/// ## Unit of work
///
/// `commit()` applies one [`StockChange`] atomically: the variant counter,
/// every layer update, every new layer and every movement are written
/// together or not at all. The write only happens if the variant is still at
/// `change.expected_version`; otherwise `StoreError::Concurrency` is returned
/// and nothing is written.
///
/// Movements are append-only. Implementations must never update or delete them.
pub trait StockStore: Send + Sync {
    /// Variant, all of its layers, and the sequence of its latest movement.
    fn load_position(&self, variant_id: VariantId) -> Result<StockPosition, StoreError>;

    fn commit(&self, change: &StockChange) -> Result<(), StoreError>;

    /// Up to `limit` movements of a variant with `sequence > after_sequence`, ascending.
    fn movements_after(
        &self,
        variant_id: VariantId,
        after_sequence: u64,
        limit: usize,
    ) -> Result<Vec<StockMovement>, StoreError>;

    fn variant(&self, variant_id: VariantId) -> Result<Option<Variant>, StoreError>;

    /// Variants for `ids` in no particular order; unknown ids are skipped.
    fn variants(&self, ids: &[VariantId]) -> Result<Vec<Variant>, StoreError>;

    /// Reserve or release committed stock and return the updated variant.
    fn adjust_committed(&self, variant_id: VariantId, delta: i64) -> Result<Variant, StoreError>;
}

/// Products, variants, and their lifecycle flags.
pub trait CatalogStore: Send + Sync {
    fn insert_product(&self, product: Product) -> Result<(), StoreError>;

    /// The owning product must already exist.
    fn insert_variant(&self, variant: Variant) -> Result<(), StoreError>;

    fn product(&self, product_id: ProductId) -> Result<Option<Product>, StoreError>;

    fn variants_of(&self, product_id: ProductId) -> Result<Vec<Variant>, StoreError>;

    /// Apply `transition` to one variant and cascade to its product.
    ///
    /// Flag change and cascade run in one unit of work: siblings are re-read
    /// after the variant write and the product flags are set before any other
    /// writer can observe the product. A failure of the cascade step is
    /// reported in [`TransitionOutcome::warning`] and never undoes the variant
    /// change.
    fn transition_variant(
        &self,
        variant_id: VariantId,
        transition: VariantTransition,
    ) -> Result<TransitionOutcome, StoreError>;
}

impl<S> StockStore for Arc<S>
where
    S: StockStore + ?Sized,
{
    fn load_position(&self, variant_id: VariantId) -> Result<StockPosition, StoreError> {
        (**self).load_position(variant_id)
    }

    fn commit(&self, change: &StockChange) -> Result<(), StoreError> {
        (**self).commit(change)
    }

    fn movements_after(
        &self,
        variant_id: VariantId,
        after_sequence: u64,
        limit: usize,
    ) -> Result<Vec<StockMovement>, StoreError> {
        (**self).movements_after(variant_id, after_sequence, limit)
    }

    fn variant(&self, variant_id: VariantId) -> Result<Option<Variant>, StoreError> {
        (**self).variant(variant_id)
    }

    fn variants(&self, ids: &[VariantId]) -> Result<Vec<Variant>, StoreError> {
        (**self).variants(ids)
    }

    fn adjust_committed(&self, variant_id: VariantId, delta: i64) -> Result<Variant, StoreError> {
        (**self).adjust_committed(variant_id, delta)
    }
}

impl<S> CatalogStore for Arc<S>
where
    S: CatalogStore + ?Sized,
{
    fn insert_product(&self, product: Product) -> Result<(), StoreError> {
        (**self).insert_product(product)
    }

    fn insert_variant(&self, variant: Variant) -> Result<(), StoreError> {
        (**self).insert_variant(variant)
    }

    fn product(&self, product_id: ProductId) -> Result<Option<Product>, StoreError> {
        (**self).product(product_id)
    }

    fn variants_of(&self, product_id: ProductId) -> Result<Vec<Variant>, StoreError> {
        (**self).variants_of(product_id)
    }

    fn transition_variant(
        &self,
        variant_id: VariantId,
        transition: VariantTransition,
    ) -> Result<TransitionOutcome, StoreError> {
        (**self).transition_variant(variant_id, transition)
    }
}
