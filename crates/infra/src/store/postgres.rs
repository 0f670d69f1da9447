//! Postgres-backed stock ledger and catalog.
//!
//! ## Error mapping
//!
//! | SQLx error | SQLSTATE | `StoreError` | Scenario |
//! |------------|----------|--------------|----------|
//! | Database (unique violation) | `23505` | `Concurrency` | another writer took the same movement/layer sequence |
//! | Database (serialization failure) | `40001` | `Concurrency` | transaction lost a serialization race |
//! | Database (deadlock) | `40P01` | `Concurrency` | lock cycle broken by the server |
//! | Database (lock not available) | `55P03` | `Concurrency` | row lock wait hit `lock_timeout` |
//! | Database (foreign key violation) | `23503` | `NotFound` | referenced product/variant is missing |
//! | Database (other) | any | `Backend` | check constraints, trigger rejections, ... |
//! | PoolClosed / PoolTimedOut / Io / other | n/a | `Backend` | connection level failures |
//!
//! ## Sync bridge
//!
//! Store traits are synchronous. Each trait method runs its async
//! counterpart through `tokio::runtime::Handle::block_on`, so callers must be
//! inside a tokio runtime context but *not* on an async worker thread
//! (use `spawn_blocking`).

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use stockledger_catalog::{
    Product, ProductFlags, Variant, VariantStatus, VariantTransition, admit_variant, cascade,
};
use stockledger_core::{CategoryId, ExpectedVersion, MovementId, ProductId, StockLineId, VariantId};
use stockledger_inventory::{
    Direction, ReferenceKind, StockChange, StockLine, StockMovement, StockPosition, StockReference,
};

use super::r#trait::{CascadeWarning, CatalogStore, StockStore, TransitionOutcome};
use crate::config::LedgerConfig;
use crate::error::StoreError;

const MIGRATION: &str = include_str!("../../migrations/0001_stock_ledger.sql");

const VARIANT_COLUMNS: &str = "id, product_id, unit, minimum_stock, available_stock, \
     committed_stock, status, stock_version, created_at";

/// Postgres-backed stock store and catalog store.
///
/// Every stock change runs in one transaction: a conditional
/// `UPDATE variants ... WHERE stock_version = $expected` claims the variant,
/// then layers and movements are written. If the version moved on, zero rows
/// match and the whole transaction is dropped with `StoreError::Concurrency`.
/// `UNIQUE (variant_id, sequence)` on movements backs this up.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool from `config.database_url`.
    pub async fn connect(config: &LedgerConfig) -> Result<Self, StoreError> {
        let url = config
            .database_url
            .as_deref()
            .ok_or_else(|| StoreError::backend("DATABASE_URL is not set"))?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the ledger schema if it does not exist yet.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(MIGRATION)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(variant_id = %variant_id), err)]
    pub async fn fetch_position(&self, variant_id: VariantId) -> Result<StockPosition, StoreError> {
        let mut tx = self.begin("fetch_position").await?;

        // One snapshot for variant, layers and ledger head.
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_isolation", e))?;

        let variant = select_variant(&mut tx, variant_id, false)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("variant {variant_id}")))?;

        let rows = sqlx::query(
            r#"
            SELECT id, variant_id, lot_code, quantity, unit_cost, sequence, created_at
            FROM stock_lines
            WHERE variant_id = $1
            ORDER BY sequence ASC
            "#,
        )
        .bind(variant_id.as_uuid())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("load_layers", e))?;
        let layers = rows.iter().map(layer_from_row).collect::<Result<Vec<_>, _>>()?;

        let head: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(sequence), 0) FROM stock_movements WHERE variant_id = $1",
        )
        .bind(variant_id.as_uuid())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("load_ledger_head", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_read", e))?;

        Ok(StockPosition::new(variant, layers, head as u64)?)
    }

    #[instrument(
        skip(self, change),
        fields(
            variant_id = %change.variant_id,
            movements = change.movements.len(),
            new_layers = change.new_layers.len()
        ),
        err
    )]
    pub async fn commit_change(&self, change: &StockChange) -> Result<(), StoreError> {
        let variant_id = change.variant_id;
        let mut tx = self.begin("commit_change").await?;

        let claimed = match change.expected_version {
            ExpectedVersion::Exact(version) => sqlx::query(
                r#"
                UPDATE variants
                SET available_stock = $1, stock_version = stock_version + 1
                WHERE id = $2 AND stock_version = $3 AND status <> 'deleted'
                "#,
            )
            .bind(change.available_stock)
            .bind(variant_id.as_uuid())
            .bind(version as i64),
            ExpectedVersion::Any => sqlx::query(
                r#"
                UPDATE variants
                SET available_stock = $1, stock_version = stock_version + 1
                WHERE id = $2 AND status <> 'deleted'
                "#,
            )
            .bind(change.available_stock)
            .bind(variant_id.as_uuid()),
        }
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("claim_variant", e))?;

        if claimed.rows_affected() == 0 {
            let current = select_variant(&mut tx, variant_id, false).await?;
            return Err(match current {
                Some(v) if !v.is_deleted() => StoreError::Concurrency(format!(
                    "variant {variant_id} moved on (expected {:?}, stock version {})",
                    change.expected_version,
                    stockledger_core::AggregateRoot::version(&v)
                )),
                _ => StoreError::NotFound(format!("variant {variant_id}")),
            });
        }

        for update in &change.layer_updates {
            let updated = sqlx::query(
                "UPDATE stock_lines SET quantity = $1 WHERE id = $2 AND variant_id = $3",
            )
            .bind(update.quantity)
            .bind(update.stock_line_id.as_uuid())
            .bind(variant_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_layer", e))?;
            if updated.rows_affected() == 0 {
                return Err(StoreError::NotFound(format!(
                    "stock line {}",
                    update.stock_line_id
                )));
            }
        }

        for layer in &change.new_layers {
            sqlx::query(
                r#"
                INSERT INTO stock_lines (id, variant_id, lot_code, quantity, unit_cost, sequence, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(layer.id.as_uuid())
            .bind(layer.variant_id.as_uuid())
            .bind(layer.lot_code.as_deref())
            .bind(layer.quantity)
            .bind(layer.unit_cost)
            .bind(layer.sequence as i64)
            .bind(layer.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_layer", e))?;
        }

        for movement in &change.movements {
            sqlx::query(
                r#"
                INSERT INTO stock_movements (
                    id, variant_id, stock_line_id, direction, quantity, final_stock,
                    unit_cost, reference_kind, reference_id, sequence, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(movement.id.as_uuid())
            .bind(movement.variant_id.as_uuid())
            .bind(movement.stock_line_id.as_uuid())
            .bind(movement.direction.as_str())
            .bind(movement.quantity)
            .bind(movement.final_stock)
            .bind(movement.unit_cost)
            .bind(movement.reference.kind.as_str())
            .bind(movement.reference.id)
            .bind(movement.sequence as i64)
            .bind(movement.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_movement", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_change", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(variant_id = %variant_id), err)]
    pub async fn fetch_movements_after(
        &self,
        variant_id: VariantId,
        after_sequence: u64,
        limit: usize,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, variant_id, stock_line_id, direction, quantity, final_stock,
                   unit_cost, reference_kind, reference_id, sequence, created_at
            FROM stock_movements
            WHERE variant_id = $1 AND sequence > $2
            ORDER BY sequence ASC
            LIMIT $3
            "#,
        )
        .bind(variant_id.as_uuid())
        .bind(after_sequence as i64)
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("movements_after", e))?;

        rows.iter().map(movement_from_row).collect()
    }

    pub async fn fetch_variant(&self, variant_id: VariantId) -> Result<Option<Variant>, StoreError> {
        let row = sqlx::query(&format!("SELECT {VARIANT_COLUMNS} FROM variants WHERE id = $1"))
            .bind(variant_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_variant", e))?;
        row.as_ref().map(variant_from_row).transpose()
    }

    pub async fn fetch_variants(&self, ids: &[VariantId]) -> Result<Vec<Variant>, StoreError> {
        let uuids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        let rows = sqlx::query(&format!(
            "SELECT {VARIANT_COLUMNS} FROM variants WHERE id = ANY($1)"
        ))
        .bind(uuids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_variants", e))?;
        rows.iter().map(variant_from_row).collect()
    }

    #[instrument(skip(self), fields(variant_id = %variant_id), err)]
    pub async fn update_committed(&self, variant_id: VariantId, delta: i64) -> Result<Variant, StoreError> {
        let mut tx = self.begin("update_committed").await?;
        let mut variant = select_variant(&mut tx, variant_id, true)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("variant {variant_id}")))?;
        variant.adjust_committed(delta)?;

        sqlx::query("UPDATE variants SET committed_stock = $1 WHERE id = $2")
            .bind(variant.committed_stock())
            .bind(variant_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_committed", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_committed", e))?;
        Ok(variant)
    }

    #[instrument(skip(self, product), fields(product_id = %product.id_typed()), err)]
    pub async fn insert_product_row(&self, product: &Product) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, category_id, has_variants, is_archived, is_deleted, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(product.id_typed().as_uuid())
        .bind(product.name())
        .bind(product.category_id().map(|c| *c.as_uuid()))
        .bind(product.has_variants())
        .bind(product.is_archived())
        .bind(product.is_deleted())
        .bind(product.created_at())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_product", e))?;
        Ok(())
    }

    #[instrument(skip(self, variant), fields(variant_id = %variant.id_typed()), err)]
    pub async fn insert_variant_row(&self, variant: &Variant) -> Result<(), StoreError> {
        let product_id = variant.product_id();
        let mut tx = self.begin("insert_variant").await?;

        // Serializes with sibling cascades, which lock the same row.
        let row = sqlx::query("SELECT is_archived, is_deleted FROM products WHERE id = $1 FOR UPDATE")
            .bind(product_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_product", e))?
            .ok_or_else(|| StoreError::NotFound(format!("product {product_id}")))?;
        let current = ProductFlags {
            is_archived: row.try_get("is_archived").map_err(decode_error)?,
            is_deleted: row.try_get("is_deleted").map_err(decode_error)?,
        };
        if current.is_deleted {
            return Err(StoreError::NotFound(format!("product {product_id}")));
        }

        sqlx::query(
            r#"
            INSERT INTO variants (
                id, product_id, unit, minimum_stock, available_stock,
                committed_stock, status, stock_version, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(variant.id_typed().as_uuid())
        .bind(product_id.as_uuid())
        .bind(variant.unit())
        .bind(variant.minimum_stock())
        .bind(variant.available_stock())
        .bind(variant.committed_stock())
        .bind(variant.status().as_str())
        .bind(stockledger_core::AggregateRoot::version(variant) as i64)
        .bind(variant.created_at())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_variant", e))?;

        let next = admit_variant(current);
        if next != current {
            sqlx::query("UPDATE products SET is_archived = $1 WHERE id = $2")
                .bind(next.is_archived)
                .bind(product_id.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("update_product_flags", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_variant", e))?;
        Ok(())
    }

    pub async fn fetch_product(&self, product_id: ProductId) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, category_id, has_variants, is_archived, is_deleted, created_at
            FROM products
            WHERE id = $1
            "#,
        )
        .bind(product_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_product", e))?;
        row.as_ref().map(product_from_row).transpose()
    }

    pub async fn fetch_variants_of(&self, product_id: ProductId) -> Result<Vec<Variant>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {VARIANT_COLUMNS} FROM variants WHERE product_id = $1 ORDER BY created_at ASC"
        ))
        .bind(product_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_variants_of", e))?;
        rows.iter().map(variant_from_row).collect()
    }

    /// Variant flag change plus product cascade in one transaction.
    ///
    /// The cascade runs inside a savepoint. If it fails the savepoint is
    /// rolled back, the variant change still commits, and the failure comes
    /// back as a [`CascadeWarning`].
    #[instrument(skip(self), fields(variant_id = %variant_id, transition = %transition), err)]
    pub async fn apply_transition(
        &self,
        variant_id: VariantId,
        transition: VariantTransition,
    ) -> Result<TransitionOutcome, StoreError> {
        let mut tx = self.begin("apply_transition").await?;

        let mut variant = select_variant(&mut tx, variant_id, true)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("variant {variant_id}")))?;
        variant.transition(transition)?;

        sqlx::query("UPDATE variants SET status = $1 WHERE id = $2")
            .bind(variant.status().as_str())
            .bind(variant_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_status", e))?;

        savepoint(&mut tx, "SAVEPOINT product_cascade").await?;
        let (product_flags, warning) =
            match cascade_product(&mut tx, variant.product_id(), transition).await {
                Ok(flags) => {
                    savepoint(&mut tx, "RELEASE SAVEPOINT product_cascade").await?;
                    (Some(flags), None)
                }
                Err(err) => {
                    savepoint(&mut tx, "ROLLBACK TO SAVEPOINT product_cascade").await?;
                    let warning = CascadeWarning {
                        product_id: variant.product_id(),
                        message: err.to_string(),
                    };
                    (None, Some(warning))
                }
            };

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transition", e))?;

        Ok(TransitionOutcome {
            variant,
            product_flags,
            warning,
        })
    }

    async fn begin(&self, operation: &str) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))
    }
}

async fn savepoint(tx: &mut Transaction<'static, Postgres>, statement: &str) -> Result<(), StoreError> {
    sqlx::query(statement)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("savepoint", e))?;
    Ok(())
}

async fn select_variant(
    tx: &mut Transaction<'static, Postgres>,
    variant_id: VariantId,
    for_update: bool,
) -> Result<Option<Variant>, StoreError> {
    let lock = if for_update { " FOR UPDATE" } else { "" };
    let row = sqlx::query(&format!(
        "SELECT {VARIANT_COLUMNS} FROM variants WHERE id = $1{lock}"
    ))
    .bind(variant_id.as_uuid())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("select_variant", e))?;
    row.as_ref().map(variant_from_row).transpose()
}

/// Lock the product row, re-read sibling statuses and store the derived flags.
async fn cascade_product(
    tx: &mut Transaction<'static, Postgres>,
    product_id: ProductId,
    transition: VariantTransition,
) -> Result<ProductFlags, StoreError> {
    let row = sqlx::query("SELECT is_archived, is_deleted FROM products WHERE id = $1 FOR UPDATE")
        .bind(product_id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_product", e))?
        .ok_or_else(|| StoreError::NotFound(format!("product {product_id}")))?;
    let current = ProductFlags {
        is_archived: row.try_get("is_archived").map_err(decode_error)?,
        is_deleted: row.try_get("is_deleted").map_err(decode_error)?,
    };

    // Read after the product lock so concurrent sibling transitions are visible.
    let statuses: Vec<String> = sqlx::query_scalar("SELECT status FROM variants WHERE product_id = $1")
        .bind(product_id.as_uuid())
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("sibling_statuses", e))?;
    let statuses = statuses
        .iter()
        .map(|s| VariantStatus::parse(s))
        .collect::<Result<Vec<_>, _>>()?;

    let next = cascade(current, transition, &statuses);
    if next != current {
        sqlx::query("UPDATE products SET is_archived = $1, is_deleted = $2 WHERE id = $3")
            .bind(next.is_archived)
            .bind(next.is_deleted)
            .bind(product_id.as_uuid())
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("update_product_flags", e))?;
    }
    Ok(next)
}

fn runtime() -> Result<tokio::runtime::Handle, StoreError> {
    tokio::runtime::Handle::try_current().map_err(|_| {
        StoreError::backend(
            "PostgresLedgerStore requires a tokio runtime context; call it from spawn_blocking",
        )
    })
}

impl StockStore for PostgresLedgerStore {
    fn load_position(&self, variant_id: VariantId) -> Result<StockPosition, StoreError> {
        runtime()?.block_on(self.fetch_position(variant_id))
    }

    fn commit(&self, change: &StockChange) -> Result<(), StoreError> {
        runtime()?.block_on(self.commit_change(change))
    }

    fn movements_after(
        &self,
        variant_id: VariantId,
        after_sequence: u64,
        limit: usize,
    ) -> Result<Vec<StockMovement>, StoreError> {
        runtime()?.block_on(self.fetch_movements_after(variant_id, after_sequence, limit))
    }

    fn variant(&self, variant_id: VariantId) -> Result<Option<Variant>, StoreError> {
        runtime()?.block_on(self.fetch_variant(variant_id))
    }

    fn variants(&self, ids: &[VariantId]) -> Result<Vec<Variant>, StoreError> {
        runtime()?.block_on(self.fetch_variants(ids))
    }

    fn adjust_committed(&self, variant_id: VariantId, delta: i64) -> Result<Variant, StoreError> {
        runtime()?.block_on(self.update_committed(variant_id, delta))
    }
}

impl CatalogStore for PostgresLedgerStore {
    fn insert_product(&self, product: Product) -> Result<(), StoreError> {
        runtime()?.block_on(self.insert_product_row(&product))
    }

    fn insert_variant(&self, variant: Variant) -> Result<(), StoreError> {
        runtime()?.block_on(self.insert_variant_row(&variant))
    }

    fn product(&self, product_id: ProductId) -> Result<Option<Product>, StoreError> {
        runtime()?.block_on(self.fetch_product(product_id))
    }

    fn variants_of(&self, product_id: ProductId) -> Result<Vec<Variant>, StoreError> {
        runtime()?.block_on(self.fetch_variants_of(product_id))
    }

    fn transition_variant(
        &self,
        variant_id: VariantId,
        transition: VariantTransition,
    ) -> Result<TransitionOutcome, StoreError> {
        runtime()?.block_on(self.apply_transition(variant_id, transition))
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("40001") | Some("40P01") | Some("55P03") => {
                    StoreError::Concurrency(msg)
                }
                Some("23503") => StoreError::NotFound(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Backend(format!("timed out acquiring a connection in {operation}"))
        }
        other => StoreError::Backend(format!("{operation}: {other}")),
    }
}

fn decode_error(err: sqlx::Error) -> StoreError {
    StoreError::Backend(format!("failed to decode row: {err}"))
}

fn variant_from_row(row: &PgRow) -> Result<Variant, StoreError> {
    let status: String = row.try_get("status").map_err(decode_error)?;
    let stock_version: i64 = row.try_get("stock_version").map_err(decode_error)?;
    Ok(Variant::restore(
        VariantId::from_uuid(row.try_get("id").map_err(decode_error)?),
        ProductId::from_uuid(row.try_get("product_id").map_err(decode_error)?),
        row.try_get("unit").map_err(decode_error)?,
        row.try_get("minimum_stock").map_err(decode_error)?,
        row.try_get("available_stock").map_err(decode_error)?,
        row.try_get("committed_stock").map_err(decode_error)?,
        VariantStatus::parse(&status)?,
        stock_version as u64,
        row.try_get::<DateTime<Utc>, _>("created_at").map_err(decode_error)?,
    ))
}

fn product_from_row(row: &PgRow) -> Result<Product, StoreError> {
    let category: Option<Uuid> = row.try_get("category_id").map_err(decode_error)?;
    Ok(Product::restore(
        ProductId::from_uuid(row.try_get("id").map_err(decode_error)?),
        row.try_get("name").map_err(decode_error)?,
        category.map(CategoryId::from_uuid),
        row.try_get("has_variants").map_err(decode_error)?,
        row.try_get("is_archived").map_err(decode_error)?,
        row.try_get("is_deleted").map_err(decode_error)?,
        row.try_get("created_at").map_err(decode_error)?,
    ))
}

fn layer_from_row(row: &PgRow) -> Result<StockLine, StoreError> {
    let sequence: i64 = row.try_get("sequence").map_err(decode_error)?;
    Ok(StockLine {
        id: StockLineId::from_uuid(row.try_get("id").map_err(decode_error)?),
        variant_id: VariantId::from_uuid(row.try_get("variant_id").map_err(decode_error)?),
        lot_code: row.try_get("lot_code").map_err(decode_error)?,
        quantity: row.try_get("quantity").map_err(decode_error)?,
        unit_cost: row.try_get("unit_cost").map_err(decode_error)?,
        sequence: sequence as u64,
        created_at: row.try_get("created_at").map_err(decode_error)?,
    })
}

fn movement_from_row(row: &PgRow) -> Result<StockMovement, StoreError> {
    let direction: String = row.try_get("direction").map_err(decode_error)?;
    let direction = Direction::parse(&direction)
        .ok_or_else(|| StoreError::backend(format!("unknown movement direction '{direction}'")))?;
    let kind: String = row.try_get("reference_kind").map_err(decode_error)?;
    let sequence: i64 = row.try_get("sequence").map_err(decode_error)?;
    Ok(StockMovement {
        id: MovementId::from_uuid(row.try_get("id").map_err(decode_error)?),
        variant_id: VariantId::from_uuid(row.try_get("variant_id").map_err(decode_error)?),
        stock_line_id: StockLineId::from_uuid(row.try_get("stock_line_id").map_err(decode_error)?),
        direction,
        quantity: row.try_get("quantity").map_err(decode_error)?,
        final_stock: row.try_get("final_stock").map_err(decode_error)?,
        unit_cost: row.try_get("unit_cost").map_err(decode_error)?,
        reference: StockReference::new(ReferenceKind::from(kind), row.try_get("reference_id").map_err(decode_error)?),
        sequence: sequence as u64,
        created_at: row.try_get("created_at").map_err(decode_error)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockledger_catalog::NewVariant;
    use stockledger_inventory::StockReference;

    use crate::ledger::StockLedger;

    fn runtime_with_store() -> Option<(tokio::runtime::Runtime, PostgresLedgerStore)> {
        let config = LedgerConfig::from_env();
        config.database_url.as_ref()?;
        let rt = tokio::runtime::Runtime::new().unwrap();
        let store = rt.block_on(async {
            let store = PostgresLedgerStore::connect(&config).await.unwrap();
            store.migrate().await.unwrap();
            store
        });
        Some((rt, store))
    }

    #[test]
    #[ignore = "requires DATABASE_URL"]
    fn fifo_round_trip_against_postgres() {
        let Some((rt, store)) = runtime_with_store() else {
            return;
        };
        let _ctx = rt.enter();
        let ledger = StockLedger::new(store, LedgerConfig::default());

        let product = ledger.register_product("Beras", None, false).unwrap();
        let variant = ledger
            .register_variant(NewVariant {
                product_id: product.id_typed(),
                unit: "sak".to_string(),
                minimum_stock: 0,
            })
            .unwrap();
        let v = variant.id_typed();

        for (qty, cost) in [(100, 10), (50, 12)] {
            ledger
                .stock_in(stockledger_inventory::StockIn {
                    variant_id: v,
                    unit_cost: cost,
                    quantity: qty,
                    lot_code: None,
                    reference: StockReference::receiving(1),
                    occurred_at: Utc::now(),
                })
                .unwrap();
        }
        let issue = ledger
            .stock_out(stockledger_inventory::StockOut {
                variant_id: v,
                quantity: 120,
                reference: StockReference::fulfillment(3),
                occurred_at: Utc::now(),
            })
            .unwrap();

        assert_eq!(issue.total_cost, 1240);
        assert_eq!(ledger.detail_by_variant(v).unwrap().available_stock(), 30);
        assert!(ledger.audit(v).unwrap().consistent());
    }

    #[test]
    #[ignore = "requires DATABASE_URL"]
    fn blocked_product_cascade_is_a_warning() {
        let Some((rt, store)) = runtime_with_store() else {
            return;
        };
        let _ctx = rt.enter();
        let ledger = StockLedger::new(store.clone(), LedgerConfig::default());
        let product = ledger.register_product("Gula", None, false).unwrap();
        let product_id = product.id_typed();
        let v = ledger
            .register_variant(NewVariant {
                product_id,
                unit: "kg".to_string(),
                minimum_stock: 0,
            })
            .unwrap()
            .id_typed();

        // A second pool whose sessions give up on row locks quickly.
        let config = LedgerConfig::from_env();
        let impatient = rt.block_on(async {
            let options = config
                .database_url
                .as_deref()
                .unwrap()
                .parse::<sqlx::postgres::PgConnectOptions>()
                .unwrap()
                .options([("lock_timeout", "200ms")]);
            let pool = PgPoolOptions::new()
                .max_connections(2)
                .connect_with(options)
                .await
                .unwrap();
            PostgresLedgerStore::new(pool)
        });

        let mut holder = rt.block_on(store.pool().begin()).unwrap();
        rt.block_on(
            sqlx::query("SELECT id FROM products WHERE id = $1 FOR UPDATE")
                .bind(product_id.as_uuid())
                .execute(&mut *holder),
        )
        .unwrap();

        let outcome = impatient
            .transition_variant(v, VariantTransition::Archive)
            .unwrap();
        rt.block_on(holder.rollback()).unwrap();

        assert!(outcome.variant.is_archived());
        assert!(outcome.product_flags.is_none());
        assert_eq!(outcome.warning.map(|w| w.product_id), Some(product_id));
        assert!(store.variant(v).unwrap().unwrap().is_archived());
        assert!(!store.product(product_id).unwrap().unwrap().is_archived());
    }

    #[test]
    #[ignore = "requires DATABASE_URL"]
    fn new_variant_unarchives_product_row() {
        let Some((rt, store)) = runtime_with_store() else {
            return;
        };
        let _ctx = rt.enter();
        let ledger = StockLedger::new(store.clone(), LedgerConfig::default());
        let product = ledger.register_product("Teh", None, true).unwrap();
        let new_variant = || NewVariant {
            product_id: product.id_typed(),
            unit: "dus".to_string(),
            minimum_stock: 0,
        };
        let first = ledger.register_variant(new_variant()).unwrap().id_typed();
        ledger.archive_variant(first).unwrap();
        assert!(store.product(product.id_typed()).unwrap().unwrap().is_archived());

        ledger.register_variant(new_variant()).unwrap();
        assert!(!store.product(product.id_typed()).unwrap().unwrap().is_archived());
    }

    #[test]
    #[ignore = "requires DATABASE_URL"]
    fn stale_commit_is_a_conflict() {
        let Some((rt, store)) = runtime_with_store() else {
            return;
        };
        let _ctx = rt.enter();
        let ledger = StockLedger::new(store.clone(), LedgerConfig::default());
        let product = ledger.register_product("Minyak", None, false).unwrap();
        let v = ledger
            .register_variant(NewVariant {
                product_id: product.id_typed(),
                unit: "liter".to_string(),
                minimum_stock: 0,
            })
            .unwrap()
            .id_typed();

        let stale = store.load_position(v).unwrap();
        let receive = |id| {
            stockledger_inventory::stock_in(
                &stale,
                &stockledger_inventory::StockIn {
                    variant_id: v,
                    unit_cost: 1,
                    quantity: 1,
                    lot_code: None,
                    reference: StockReference::receiving(id),
                    occurred_at: Utc::now(),
                },
            )
            .unwrap()
        };
        store.commit(&receive(1).change).unwrap();
        let err = store.commit(&receive(2).change).unwrap_err();
        assert!(matches!(err, StoreError::Concurrency(_)));
    }
}
