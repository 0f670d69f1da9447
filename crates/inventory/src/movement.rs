use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{Entity, MovementId, StockLineId, VariantId};

use crate::reference::StockReference;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in" => Some(Direction::In),
            "out" => Some(Direction::Out),
            _ => None,
        }
    }
}

/// Immutable ledger entry: one quantity change against one stock layer.
///
/// `final_stock` is the variant's on-hand level right after this entry, so
/// `final_stock[n] == final_stock[n-1] + signed_quantity[n]` along a
/// variant's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: MovementId,
    pub variant_id: VariantId,
    pub stock_line_id: StockLineId,
    pub direction: Direction,
    /// Units moved (always positive).
    pub quantity: i64,
    pub final_stock: i64,
    /// Unit cost of the layer the units entered or left.
    pub unit_cost: i64,
    pub reference: StockReference,
    /// Position in the variant's ledger, starting at 1.
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
}

impl StockMovement {
    pub fn signed_quantity(&self) -> i64 {
        match self.direction {
            Direction::In => self.quantity,
            Direction::Out => -self.quantity,
        }
    }
}

impl Entity for StockMovement {
    type Id = MovementId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
