//! FIFO costing engine.
//!
//! Stock-in appends a new layer (consumed last). Stock-out drains layers in
//! creation order, oldest first, and prices the issue at the cost of the
//! layers it drew from. One movement is emitted per layer touched, each
//! carrying the running on-hand level, so replaying the ledger in order
//! reconstructs the stock level exactly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, MovementId, StockLineId, VariantId};

use crate::movement::{Direction, StockMovement};
use crate::position::{LayerUpdate, StockChange, StockPosition};
use crate::reference::StockReference;
use crate::stock_line::StockLine;

/// Command: receive units at a known unit cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockIn {
    pub variant_id: VariantId,
    pub unit_cost: i64,
    pub quantity: i64,
    pub lot_code: Option<String>,
    pub reference: StockReference,
    pub occurred_at: DateTime<Utc>,
}

/// Command: issue units, FIFO.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockOut {
    pub variant_id: VariantId,
    pub quantity: i64,
    pub reference: StockReference,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockInOutcome {
    pub change: StockChange,
    pub stock_line: StockLine,
    pub movement: StockMovement,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockOutOutcome {
    pub change: StockChange,
    pub movements: Vec<StockMovement>,
    /// Cost of the issued units, smallest currency unit.
    pub total_cost: i64,
}

/// Units taken from one layer by a stock-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerDraw {
    pub stock_line_id: StockLineId,
    pub taken: i64,
    /// Layer quantity after the draw.
    pub remaining: i64,
    pub unit_cost: i64,
}

fn ensure_target(position: &StockPosition, variant_id: VariantId) -> DomainResult<()> {
    if position.variant_id() != variant_id {
        return Err(DomainError::invariant(format!(
            "command for variant {variant_id} applied to position of {}",
            position.variant_id()
        )));
    }
    Ok(())
}

/// Decide which layers a stock-out of `quantity` draws from.
///
/// `layers` must be in FIFO order. Exhausted layers are skipped.
pub fn plan_issue(layers: &[StockLine], quantity: i64) -> DomainResult<Vec<LayerDraw>> {
    if quantity <= 0 {
        return Err(DomainError::invalid_quantity("issue quantity must be positive"));
    }

    let available: i64 = layers.iter().map(|l| l.quantity).sum();
    if available < quantity {
        return Err(DomainError::insufficient_stock(quantity, available));
    }

    let mut remaining = quantity;
    let mut draws = Vec::new();
    for layer in layers.iter().filter(|l| !l.is_exhausted()) {
        if remaining == 0 {
            break;
        }
        let taken = remaining.min(layer.quantity);
        remaining -= taken;
        draws.push(LayerDraw {
            stock_line_id: layer.id,
            taken,
            remaining: layer.quantity - taken,
            unit_cost: layer.unit_cost,
        });
    }

    Ok(draws)
}

/// Create a layer for the received units and record one `in` movement.
pub fn stock_in(position: &StockPosition, cmd: &StockIn) -> DomainResult<StockInOutcome> {
    ensure_target(position, cmd.variant_id)?;
    position.ensure_live()?;

    if cmd.quantity <= 0 {
        return Err(DomainError::invalid_quantity(format!(
            "stock-in quantity must be positive, got {}",
            cmd.quantity
        )));
    }
    if cmd.unit_cost < 0 {
        return Err(DomainError::invalid_quantity(format!(
            "unit cost cannot be negative, got {}",
            cmd.unit_cost
        )));
    }
    position.ensure_conserved()?;

    let available_stock = position
        .variant()
        .available_stock()
        .checked_add(cmd.quantity)
        .ok_or_else(|| DomainError::invalid_quantity("stock level overflow"))?;

    let stock_line = StockLine {
        id: StockLineId::new(),
        variant_id: cmd.variant_id,
        lot_code: cmd.lot_code.clone(),
        quantity: cmd.quantity,
        unit_cost: cmd.unit_cost,
        sequence: position.next_layer_sequence(),
        created_at: cmd.occurred_at,
    };

    let movement = StockMovement {
        id: MovementId::new(),
        variant_id: cmd.variant_id,
        stock_line_id: stock_line.id,
        direction: Direction::In,
        quantity: cmd.quantity,
        final_stock: available_stock,
        unit_cost: cmd.unit_cost,
        reference: cmd.reference.clone(),
        sequence: position.last_movement_sequence() + 1,
        created_at: cmd.occurred_at,
    };

    let change = StockChange {
        variant_id: cmd.variant_id,
        expected_version: position.expected_version(),
        available_stock,
        new_layers: vec![stock_line.clone()],
        layer_updates: Vec::new(),
        movements: vec![movement.clone()],
    };

    Ok(StockInOutcome {
        change,
        stock_line,
        movement,
    })
}

/// Drain layers oldest-first and record one `out` movement per layer touched.
pub fn stock_out(position: &StockPosition, cmd: &StockOut) -> DomainResult<StockOutOutcome> {
    ensure_target(position, cmd.variant_id)?;
    position.ensure_live()?;

    if cmd.quantity <= 0 {
        return Err(DomainError::invalid_quantity(format!(
            "stock-out quantity must be positive, got {}",
            cmd.quantity
        )));
    }
    position.ensure_conserved()?;

    let on_hand = position.variant().available_stock();
    if cmd.quantity > on_hand {
        return Err(DomainError::insufficient_stock(cmd.quantity, on_hand));
    }

    let draws = plan_issue(position.layers(), cmd.quantity)?;

    let mut running = on_hand;
    let mut sequence = position.last_movement_sequence();
    let mut total_cost: i64 = 0;
    let mut movements = Vec::with_capacity(draws.len());
    let mut layer_updates = Vec::with_capacity(draws.len());

    for draw in &draws {
        running -= draw.taken;
        sequence += 1;
        let cost = draw
            .taken
            .checked_mul(draw.unit_cost)
            .and_then(|c| total_cost.checked_add(c))
            .ok_or_else(|| DomainError::invalid_quantity("issue cost overflow"))?;
        total_cost = cost;

        layer_updates.push(LayerUpdate {
            stock_line_id: draw.stock_line_id,
            quantity: draw.remaining,
        });
        movements.push(StockMovement {
            id: MovementId::new(),
            variant_id: cmd.variant_id,
            stock_line_id: draw.stock_line_id,
            direction: Direction::Out,
            quantity: draw.taken,
            final_stock: running,
            unit_cost: draw.unit_cost,
            reference: cmd.reference.clone(),
            sequence,
            created_at: cmd.occurred_at,
        });
    }

    let change = StockChange {
        variant_id: cmd.variant_id,
        expected_version: position.expected_version(),
        available_stock: running,
        new_layers: Vec::new(),
        layer_updates,
        movements: movements.clone(),
    };

    Ok(StockOutOutcome {
        change,
        movements,
        total_cost,
    })
}
