//! Replaying the movement log to cross-check the live counter.

use serde::{Deserialize, Serialize};

use stockledger_core::VariantId;

use crate::movement::StockMovement;

/// Running state of a ledger replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerReplay {
    /// Stock level reconstructed from signed quantities.
    pub level: i64,
    pub movements: u64,
    pub last_sequence: u64,
    /// Sequence of the first entry whose `final_stock` (or ordering) disagrees
    /// with the replay.
    pub broken_at: Option<u64>,
}

impl LedgerReplay {
    pub fn push(&mut self, movement: &StockMovement) {
        self.level += movement.signed_quantity();
        self.movements += 1;

        let out_of_order = movement.sequence <= self.last_sequence;
        if self.broken_at.is_none() && (out_of_order || movement.final_stock != self.level) {
            self.broken_at = Some(movement.sequence);
        }
        self.last_sequence = movement.sequence;
    }

    pub fn is_consistent(&self) -> bool {
        self.broken_at.is_none()
    }
}

/// Replay a variant's movements (ascending sequence) from zero.
pub fn replay<'a>(movements: impl IntoIterator<Item = &'a StockMovement>) -> LedgerReplay {
    let mut state = LedgerReplay::default();
    for m in movements {
        state.push(m);
    }
    state
}

/// Conservation check for one variant: counter vs. layers vs. replayed ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    pub variant_id: VariantId,
    pub counter: i64,
    pub layer_sum: i64,
    pub replay: LedgerReplay,
}

impl AuditReport {
    pub fn consistent(&self) -> bool {
        self.counter == self.layer_sum && self.counter == self.replay.level && self.replay.is_consistent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stockledger_core::{MovementId, StockLineId};

    use crate::movement::Direction;
    use crate::reference::StockReference;

    fn movement(sequence: u64, direction: Direction, quantity: i64, final_stock: i64) -> StockMovement {
        StockMovement {
            id: MovementId::new(),
            variant_id: VariantId::new(),
            stock_line_id: StockLineId::new(),
            direction,
            quantity,
            final_stock,
            unit_cost: 1,
            reference: StockReference::receiving(1),
            sequence,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn replays_running_level() {
        let log = vec![
            movement(1, Direction::In, 100, 100),
            movement(2, Direction::In, 50, 150),
            movement(3, Direction::Out, 100, 50),
            movement(4, Direction::Out, 20, 30),
        ];
        let state = replay(&log);
        assert_eq!(state.level, 30);
        assert_eq!(state.movements, 4);
        assert!(state.is_consistent());
    }

    #[test]
    fn flags_first_broken_snapshot() {
        let log = vec![
            movement(1, Direction::In, 10, 10),
            movement(2, Direction::Out, 3, 8),
            movement(3, Direction::Out, 1, 6),
        ];
        assert_eq!(replay(&log).broken_at, Some(2));
    }

    #[test]
    fn flags_out_of_order_sequence() {
        let log = vec![movement(2, Direction::In, 1, 1), movement(2, Direction::In, 1, 2)];
        assert_eq!(replay(&log).broken_at, Some(2));
    }

    #[test]
    fn report_requires_all_three_to_agree() {
        let state = replay(&[movement(1, Direction::In, 5, 5)]);
        let report = AuditReport {
            variant_id: VariantId::new(),
            counter: 5,
            layer_sum: 5,
            replay: state,
        };
        assert!(report.consistent());
        assert!(!AuditReport { layer_sum: 4, ..report }.consistent());
    }
}
