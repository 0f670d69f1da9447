//! Inventory stock ledger (domain layer).
//!
//! Stock layers, the append-only movement log, and the two engines that
//! change them: FIFO costing (stock-in / stock-out) and reconciliation
//! (stockopname). Everything here is deterministic domain logic: engines take
//! a [`StockPosition`] loaded by a store and return a [`StockChange`] for the
//! store to commit atomically.

pub mod audit;
pub mod fifo;
pub mod movement;
pub mod position;
pub mod reconcile;
pub mod reference;
pub mod stock_line;

pub use audit::{AuditReport, LedgerReplay, replay};
pub use fifo::{LayerDraw, StockIn, StockInOutcome, StockOut, StockOutOutcome, plan_issue, stock_in, stock_out};
pub use movement::{Direction, StockMovement};
pub use position::{LayerUpdate, StockChange, StockPosition, StockValuation};
pub use reconcile::{Reconcile, ReconcileOutcome, reconcile};
pub use reference::{ReferenceKind, StockReference};
pub use stock_line::StockLine;
