//! Lazy, paged iteration over a variant's movement log.

use std::collections::VecDeque;

use stockledger_core::VariantId;
use stockledger_inventory::StockMovement;

use crate::error::LedgerError;
use crate::store::StockStore;

/// Movements of one variant in ascending sequence, fetched a page at a time.
///
/// Finite: iteration ends at the ledger head seen by the last page fetch.
/// Restartable: [`MovementHistory::restart`] rewinds to the first movement
/// without re-creating the iterator. After a store error the iterator yields
/// that error once and then ends.
pub struct MovementHistory<'a, S: ?Sized> {
    store: &'a S,
    variant_id: VariantId,
    page_size: usize,
    after: u64,
    buffer: VecDeque<StockMovement>,
    exhausted: bool,
}

impl<'a, S> MovementHistory<'a, S>
where
    S: StockStore + ?Sized,
{
    pub fn new(store: &'a S, variant_id: VariantId, page_size: usize) -> Self {
        Self {
            store,
            variant_id,
            page_size: page_size.max(1),
            after: 0,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    pub fn variant_id(&self) -> VariantId {
        self.variant_id
    }

    /// Rewind to the beginning of the ledger.
    pub fn restart(&mut self) {
        self.after = 0;
        self.buffer.clear();
        self.exhausted = false;
    }

    fn fetch(&mut self) -> Result<(), LedgerError> {
        let page = self
            .store
            .movements_after(self.variant_id, self.after, self.page_size)?;
        if page.len() < self.page_size {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            self.after = last.sequence;
        }
        self.buffer.extend(page);
        Ok(())
    }
}

impl<S> Iterator for MovementHistory<'_, S>
where
    S: StockStore + ?Sized,
{
    type Item = Result<StockMovement, LedgerError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(err) = self.fetch() {
                self.exhausted = true;
                return Some(Err(err));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stockledger_catalog::{NewProduct, NewVariant, Product, Variant};
    use stockledger_core::ProductId;
    use stockledger_inventory::{StockIn, StockReference, stock_in};

    use crate::store::{CatalogStore as _, InMemoryLedgerStore};

    fn store_with_movements(count: i64) -> (InMemoryLedgerStore, VariantId) {
        let store = InMemoryLedgerStore::new();
        let product_id = ProductId::new();
        store
            .insert_product(
                Product::create(
                    product_id,
                    NewProduct {
                        name: "Gula Pasir".to_string(),
                        category_id: None,
                        has_variants: false,
                    },
                    Utc::now(),
                )
                .unwrap(),
            )
            .unwrap();
        let variant_id = VariantId::new();
        store
            .insert_variant(
                Variant::create(
                    variant_id,
                    NewVariant {
                        product_id,
                        unit: "kg".to_string(),
                        minimum_stock: 0,
                    },
                    Utc::now(),
                )
                .unwrap(),
            )
            .unwrap();

        for i in 0..count {
            let position = store.load_position(variant_id).unwrap();
            let outcome = stock_in(
                &position,
                &StockIn {
                    variant_id,
                    unit_cost: 10,
                    quantity: 1,
                    lot_code: None,
                    reference: StockReference::receiving(i),
                    occurred_at: Utc::now(),
                },
            )
            .unwrap();
            store.commit(&outcome.change).unwrap();
        }
        (store, variant_id)
    }

    #[test]
    fn yields_every_movement_across_pages() {
        let (store, variant_id) = store_with_movements(7);
        let seqs: Vec<u64> = MovementHistory::new(&store, variant_id, 3)
            .map(|m| m.unwrap().sequence)
            .collect();
        assert_eq!(seqs, (1..=7).collect::<Vec<_>>());
    }

    #[test]
    fn exact_page_multiple_terminates() {
        let (store, variant_id) = store_with_movements(4);
        assert_eq!(MovementHistory::new(&store, variant_id, 2).count(), 4);
    }

    #[test]
    fn restart_rewinds_to_first_movement() {
        let (store, variant_id) = store_with_movements(3);
        let mut history = MovementHistory::new(&store, variant_id, 2);
        assert_eq!(history.by_ref().count(), 3);
        assert!(history.next().is_none());

        history.restart();
        assert_eq!(history.next().unwrap().unwrap().sequence, 1);
    }

    #[test]
    fn unknown_variant_has_empty_history() {
        let store = InMemoryLedgerStore::new();
        assert_eq!(MovementHistory::new(&store, VariantId::new(), 8).count(), 0);
    }
}
