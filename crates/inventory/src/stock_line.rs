use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{Entity, StockLineId, VariantId};

/// One cost-homogeneous quantity bucket of a variant.
///
/// Created by a stock-in, drained oldest-first by stock-outs. Layers are never
/// removed; an exhausted layer (`quantity == 0`) stays for costing history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLine {
    pub id: StockLineId,
    pub variant_id: VariantId,
    /// External lot/SKU code supplied by the receiving document, if any.
    pub lot_code: Option<String>,
    /// Units remaining in this layer.
    pub quantity: i64,
    /// Cost per unit in the smallest currency unit.
    pub unit_cost: i64,
    /// Creation order within the variant; the FIFO key.
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
}

impl StockLine {
    pub fn is_exhausted(&self) -> bool {
        self.quantity == 0
    }

    /// Remaining value of the layer (`quantity * unit_cost`).
    pub fn value(&self) -> Option<i64> {
        self.quantity.checked_mul(self.unit_cost)
    }
}

impl Entity for StockLine {
    type Id = StockLineId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
