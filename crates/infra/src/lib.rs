//! Infrastructure layer: stores, locking, configuration and the ledger service.

pub mod config;
pub mod error;
pub mod history;
pub mod ledger;
pub mod locks;
pub mod store;


pub use config::LedgerConfig;
pub use error::{LedgerError, StoreError};
pub use history::MovementHistory;
pub use ledger::{Adjustment, StockIssue, StockLedger};
pub use locks::{VariantGuard, VariantLocks};
pub use store::{
    CascadeWarning, CatalogStore, InMemoryLedgerStore, PostgresLedgerStore, StockStore,
    TransitionOutcome,
};
