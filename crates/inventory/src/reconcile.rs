//! Reconciliation (stockopname): bring recorded stock in line with a count.
//!
//! `delta = counted - available`:
//! - positive: one stock-in of `delta` at the unit cost of the newest layer
//!   (zero when the variant never had a layer);
//! - negative: a FIFO stock-out of `|delta|`;
//! - zero: nothing is recorded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, VariantId};

use crate::fifo::{StockIn, StockOut, stock_in, stock_out};
use crate::movement::StockMovement;
use crate::position::{StockChange, StockPosition};
use crate::reference::StockReference;

/// Command: adjust a variant to a physical count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconcile {
    pub variant_id: VariantId,
    pub counted_quantity: i64,
    /// Id of the stockopname document.
    pub reference_id: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Count matched the ledger.
    Unchanged,
    Increased {
        change: StockChange,
        movement: StockMovement,
    },
    Decreased {
        change: StockChange,
        movements: Vec<StockMovement>,
        total_cost: i64,
    },
}

impl ReconcileOutcome {
    pub fn change(&self) -> Option<&StockChange> {
        match self {
            ReconcileOutcome::Unchanged => None,
            ReconcileOutcome::Increased { change, .. } => Some(change),
            ReconcileOutcome::Decreased { change, .. } => Some(change),
        }
    }

    pub fn movements(&self) -> Vec<StockMovement> {
        match self {
            ReconcileOutcome::Unchanged => Vec::new(),
            ReconcileOutcome::Increased { movement, .. } => vec![movement.clone()],
            ReconcileOutcome::Decreased { movements, .. } => movements.clone(),
        }
    }
}

pub fn reconcile(position: &StockPosition, cmd: &Reconcile) -> DomainResult<ReconcileOutcome> {
    if position.variant_id() != cmd.variant_id {
        return Err(DomainError::invariant(format!(
            "command for variant {} applied to position of {}",
            cmd.variant_id,
            position.variant_id()
        )));
    }
    position.ensure_live()?;

    if cmd.counted_quantity < 0 {
        return Err(DomainError::invalid_quantity(format!(
            "counted quantity cannot be negative, got {}",
            cmd.counted_quantity
        )));
    }

    let delta = cmd.counted_quantity - position.variant().available_stock();
    let reference = StockReference::stockopname(cmd.reference_id);

    let outcome = match delta.signum() {
        0 => ReconcileOutcome::Unchanged,
        1 => {
            let unit_cost = position.newest_layer().map(|l| l.unit_cost).unwrap_or(0);
            let outcome = stock_in(
                position,
                &StockIn {
                    variant_id: cmd.variant_id,
                    unit_cost,
                    quantity: delta,
                    lot_code: None,
                    reference,
                    occurred_at: cmd.occurred_at,
                },
            )?;
            ReconcileOutcome::Increased {
                change: outcome.change,
                movement: outcome.movement,
            }
        }
        _ => {
            let outcome = stock_out(
                position,
                &StockOut {
                    variant_id: cmd.variant_id,
                    quantity: -delta,
                    reference,
                    occurred_at: cmd.occurred_at,
                },
            )?;
            ReconcileOutcome::Decreased {
                change: outcome.change,
                movements: outcome.movements,
                total_cost: outcome.total_cost,
            }
        }
    };

    if let Some(change) = outcome.change() {
        if change.available_stock != cmd.counted_quantity {
            return Err(DomainError::invariant(format!(
                "reconciliation ended at {} instead of counted {}",
                change.available_stock, cmd.counted_quantity
            )));
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use stockledger_catalog::{NewVariant, Variant};
    use stockledger_core::ProductId;

    use crate::movement::Direction;
    use crate::reference::ReferenceKind;

    fn position_with_layers(layers: &[(i64, i64)]) -> StockPosition {
        let variant = Variant::create(
            VariantId::new(),
            NewVariant {
                product_id: ProductId::new(),
                unit: "pcs".to_string(),
                minimum_stock: 0,
            },
            Utc::now(),
        )
        .unwrap();
        let mut position = StockPosition::new(variant, Vec::new(), 0).unwrap();
        for (i, (quantity, unit_cost)) in layers.iter().enumerate() {
            let outcome = stock_in(
                &position,
                &StockIn {
                    variant_id: position.variant_id(),
                    unit_cost: *unit_cost,
                    quantity: *quantity,
                    lot_code: None,
                    reference: StockReference::receiving(i as i64),
                    occurred_at: Utc::now(),
                },
            )
            .unwrap();
            position.apply(&outcome.change).unwrap();
        }
        position
    }

    fn count(position: &StockPosition, counted_quantity: i64) -> Reconcile {
        Reconcile {
            variant_id: position.variant_id(),
            counted_quantity,
            reference_id: 500,
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn matching_count_records_nothing() {
        let position = position_with_layers(&[(10, 4)]);
        let outcome = reconcile(&position, &count(&position, 10)).unwrap();
        assert_eq!(outcome, ReconcileOutcome::Unchanged);
        assert!(outcome.movements().is_empty());
    }

    #[test]
    fn surplus_uses_newest_layer_cost() {
        let position = position_with_layers(&[(10, 4), (5, 7)]);
        match reconcile(&position, &count(&position, 18)).unwrap() {
            ReconcileOutcome::Increased { change, movement } => {
                assert_eq!(movement.quantity, 3);
                assert_eq!(movement.unit_cost, 7);
                assert_eq!(movement.direction, Direction::In);
                assert_eq!(movement.reference.kind, ReferenceKind::Stockopname);
                assert_eq!(movement.reference.id, 500);
                assert_eq!(change.available_stock, 18);
            }
            other => panic!("expected increase, got {other:?}"),
        }
    }

    #[test]
    fn surplus_without_history_costs_zero() {
        let position = position_with_layers(&[]);
        match reconcile(&position, &count(&position, 4)).unwrap() {
            ReconcileOutcome::Increased { movement, .. } => assert_eq!(movement.unit_cost, 0),
            other => panic!("expected increase, got {other:?}"),
        }
    }

    #[test]
    fn shortage_drains_fifo() {
        let position = position_with_layers(&[(10, 4), (5, 7)]);
        match reconcile(&position, &count(&position, 3)).unwrap() {
            ReconcileOutcome::Decreased {
                movements,
                total_cost,
                change,
            } => {
                assert_eq!(movements.len(), 2);
                assert_eq!(total_cost, 10 * 4 + 2 * 7);
                assert_eq!(change.available_stock, 3);
                assert!(movements.iter().all(|m| m.direction == Direction::Out));
            }
            other => panic!("expected decrease, got {other:?}"),
        }
    }

    #[test]
    fn negative_count_is_rejected() {
        let position = position_with_layers(&[(1, 1)]);
        assert!(matches!(
            reconcile(&position, &count(&position, -1)),
            Err(DomainError::InvalidQuantity(_))
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: reconciling always lands exactly on the count, moving stock
        /// in one direction only.
        #[test]
        fn lands_on_count(
            layers in prop::collection::vec((1i64..30, 0i64..50), 0..6),
            counted in 0i64..200,
        ) {
            let mut position = position_with_layers(&layers);
            let outcome = reconcile(&position, &count(&position, counted)).unwrap();

            let movements = outcome.movements();
            let directions: Vec<Direction> = movements.iter().map(|m| m.direction).collect();
            prop_assert!(directions.windows(2).all(|w| w[0] == w[1]));

            if let Some(change) = outcome.change() {
                position.apply(change).unwrap();
            }
            prop_assert_eq!(position.variant().available_stock(), counted);
            prop_assert_eq!(position.layer_sum(), counted);
        }
    }
}
