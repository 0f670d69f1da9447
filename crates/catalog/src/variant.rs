use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{AggregateRoot, DomainError, DomainResult, ProductId, VariantId};

use crate::lifecycle::VariantTransition;

/// Lifecycle state of a variant. `Deleted` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantStatus {
    Active,
    Archived,
    Deleted,
}

impl VariantStatus {
    /// Next state for `transition`, or a validation error if the move is illegal.
    pub fn after(self, transition: VariantTransition) -> DomainResult<VariantStatus> {
        match (self, transition) {
            (VariantStatus::Deleted, _) => Err(DomainError::validation(
                "deleted variants cannot change state",
            )),
            (VariantStatus::Active, VariantTransition::Archive) => Ok(VariantStatus::Archived),
            (VariantStatus::Archived, VariantTransition::Archive) => {
                Err(DomainError::validation("variant is already archived"))
            }
            (VariantStatus::Archived, VariantTransition::Unarchive) => Ok(VariantStatus::Active),
            (VariantStatus::Active, VariantTransition::Unarchive) => {
                Err(DomainError::validation("variant is not archived"))
            }
            (_, VariantTransition::Delete) => Ok(VariantStatus::Deleted),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VariantStatus::Active => "active",
            VariantStatus::Archived => "archived",
            VariantStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "active" => Ok(VariantStatus::Active),
            "archived" => Ok(VariantStatus::Archived),
            "deleted" => Ok(VariantStatus::Deleted),
            other => Err(DomainError::validation(format!("unknown variant status '{other}'"))),
        }
    }
}

/// Input for registering a variant under a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewVariant {
    pub product_id: ProductId,
    /// Unit of measurement, e.g. "pcs", "box-12".
    pub unit: String,
    pub minimum_stock: i64,
}

/// A concrete stocked unit of a product.
///
/// `available_stock` mirrors the sum of the variant's live stock layers and
/// is only moved by the ledger. `stock_version` advances on every committed
/// stock change and guards concurrent writers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    id: VariantId,
    product_id: ProductId,
    unit: String,
    minimum_stock: i64,
    available_stock: i64,
    committed_stock: i64,
    status: VariantStatus,
    stock_version: u64,
    created_at: DateTime<Utc>,
}

impl Variant {
    pub fn create(id: VariantId, input: NewVariant, created_at: DateTime<Utc>) -> DomainResult<Self> {
        let unit = input.unit.trim();
        if unit.is_empty() {
            return Err(DomainError::validation("unit of measurement cannot be empty"));
        }
        if input.minimum_stock < 0 {
            return Err(DomainError::invalid_quantity("minimum stock cannot be negative"));
        }

        Ok(Self {
            id,
            product_id: input.product_id,
            unit: unit.to_string(),
            minimum_stock: input.minimum_stock,
            available_stock: 0,
            committed_stock: 0,
            status: VariantStatus::Active,
            stock_version: 0,
            created_at,
        })
    }

    /// Rebuild a variant from persisted columns.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: VariantId,
        product_id: ProductId,
        unit: String,
        minimum_stock: i64,
        available_stock: i64,
        committed_stock: i64,
        status: VariantStatus,
        stock_version: u64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            product_id,
            unit,
            minimum_stock,
            available_stock,
            committed_stock,
            status,
            stock_version,
            created_at,
        }
    }

    pub fn id_typed(&self) -> VariantId {
        self.id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn minimum_stock(&self) -> i64 {
        self.minimum_stock
    }

    pub fn available_stock(&self) -> i64 {
        self.available_stock
    }

    pub fn committed_stock(&self) -> i64 {
        self.committed_stock
    }

    /// Units on hand that are not promised to open sales documents.
    pub fn free_stock(&self) -> i64 {
        self.available_stock - self.committed_stock
    }

    pub fn status(&self) -> VariantStatus {
        self.status
    }

    pub fn is_archived(&self) -> bool {
        self.status == VariantStatus::Archived
    }

    pub fn is_deleted(&self) -> bool {
        self.status == VariantStatus::Deleted
    }

    pub fn is_below_minimum(&self) -> bool {
        self.available_stock < self.minimum_stock
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Record a new on-hand level after a committed stock change.
    pub fn record_stock(&mut self, available_stock: i64) -> DomainResult<()> {
        if available_stock < 0 {
            return Err(DomainError::invariant("available stock cannot go negative"));
        }
        self.available_stock = available_stock;
        self.stock_version += 1;
        Ok(())
    }

    /// Reserve (positive delta) or release (negative delta) committed stock.
    pub fn adjust_committed(&mut self, delta: i64) -> DomainResult<()> {
        if self.is_deleted() {
            return Err(DomainError::not_found(format!("variant {}", self.id)));
        }
        let next = self
            .committed_stock
            .checked_add(delta)
            .ok_or_else(|| DomainError::invalid_quantity("committed stock overflow"))?;
        if next < 0 {
            return Err(DomainError::invalid_quantity(format!(
                "cannot release {} committed units, only {} committed",
                -delta, self.committed_stock
            )));
        }
        self.committed_stock = next;
        Ok(())
    }

    /// Apply a lifecycle transition. Stock level is untouched.
    pub fn transition(&mut self, transition: VariantTransition) -> DomainResult<VariantStatus> {
        let next = self.status.after(transition)?;
        self.status = next;
        Ok(next)
    }
}

impl AggregateRoot for Variant {
    type Id = VariantId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.stock_version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant() -> Variant {
        Variant::create(
            VariantId::new(),
            NewVariant {
                product_id: ProductId::new(),
                unit: "pcs".to_string(),
                minimum_stock: 5,
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn new_variant_is_active_and_empty() {
        let v = variant();
        assert_eq!(v.status(), VariantStatus::Active);
        assert_eq!(v.available_stock(), 0);
        assert_eq!(v.version(), 0);
        assert!(v.is_below_minimum());
    }

    #[test]
    fn create_rejects_negative_minimum() {
        let err = Variant::create(
            VariantId::new(),
            NewVariant {
                product_id: ProductId::new(),
                unit: "pcs".to_string(),
                minimum_stock: -1,
            },
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::InvalidQuantity(_)));
    }

    #[test]
    fn record_stock_bumps_version_and_refuses_negative() {
        let mut v = variant();
        v.record_stock(10).unwrap();
        assert_eq!(v.available_stock(), 10);
        assert_eq!(v.version(), 1);

        assert!(v.record_stock(-1).is_err());
        assert_eq!(v.available_stock(), 10);
        assert_eq!(v.version(), 1);
    }

    #[test]
    fn committed_stock_cannot_go_negative() {
        let mut v = variant();
        v.adjust_committed(4).unwrap();
        v.adjust_committed(-3).unwrap();
        assert_eq!(v.committed_stock(), 1);
        assert!(matches!(v.adjust_committed(-2), Err(DomainError::InvalidQuantity(_))));
        assert_eq!(v.committed_stock(), 1);
    }

    #[test]
    fn free_stock_subtracts_commitments() {
        let mut v = variant();
        v.record_stock(20).unwrap();
        v.adjust_committed(7).unwrap();
        assert_eq!(v.free_stock(), 13);
    }

    #[test]
    fn deleted_is_terminal() {
        let mut v = variant();
        v.transition(VariantTransition::Delete).unwrap();
        for t in [
            VariantTransition::Archive,
            VariantTransition::Unarchive,
            VariantTransition::Delete,
        ] {
            assert!(matches!(v.transition(t), Err(DomainError::Validation(_))));
        }
        assert!(v.is_deleted());
    }

    #[test]
    fn archive_and_unarchive_round_trip() {
        let mut v = variant();
        assert_eq!(v.transition(VariantTransition::Archive).unwrap(), VariantStatus::Archived);
        assert!(v.transition(VariantTransition::Archive).is_err());
        assert_eq!(v.transition(VariantTransition::Unarchive).unwrap(), VariantStatus::Active);
        assert!(v.transition(VariantTransition::Unarchive).is_err());
    }

    #[test]
    fn archived_variant_can_be_deleted() {
        let mut v = variant();
        v.transition(VariantTransition::Archive).unwrap();
        assert_eq!(v.transition(VariantTransition::Delete).unwrap(), VariantStatus::Deleted);
    }

    #[test]
    fn status_text_round_trips() {
        for s in [VariantStatus::Active, VariantStatus::Archived, VariantStatus::Deleted] {
            assert_eq!(VariantStatus::parse(s.as_str()).unwrap(), s);
        }
        assert!(VariantStatus::parse("gone").is_err());
    }
}
