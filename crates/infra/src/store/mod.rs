//! Persistence boundary for the stock ledger and the catalog.
//!
//! Stores are synchronous; the Postgres adapter bridges to its async driver
//! internally. Every stock write goes through [`StockStore::commit`], which is
//! atomic and version-checked.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;
pub use r#trait::{CascadeWarning, CatalogStore, StockStore, TransitionOutcome};
