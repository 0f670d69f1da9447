use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{CategoryId, DomainError, Entity, ProductId};

use crate::lifecycle::ProductFlags;

/// A sellable/purchasable grouping of variants.
///
/// `is_archived` and `is_deleted` are derived from the variants and only
/// change through [`Product::apply_flags`], which stores call after a variant
/// transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    id: ProductId,
    name: String,
    category_id: Option<CategoryId>,
    has_variants: bool,
    is_archived: bool,
    is_deleted: bool,
    created_at: DateTime<Utc>,
}

/// Input for registering a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub category_id: Option<CategoryId>,
    pub has_variants: bool,
}

impl Product {
    pub fn create(id: ProductId, input: NewProduct, created_at: DateTime<Utc>) -> Result<Self, DomainError> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("product name cannot be empty"));
        }

        Ok(Self {
            id,
            name: name.to_string(),
            category_id: input.category_id,
            has_variants: input.has_variants,
            is_archived: false,
            is_deleted: false,
            created_at,
        })
    }

    /// Rebuild a product from persisted columns.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: ProductId,
        name: String,
        category_id: Option<CategoryId>,
        has_variants: bool,
        is_archived: bool,
        is_deleted: bool,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name,
            category_id,
            has_variants,
            is_archived,
            is_deleted,
            created_at,
        }
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category_id(&self) -> Option<CategoryId> {
        self.category_id
    }

    pub fn has_variants(&self) -> bool {
        self.has_variants
    }

    pub fn is_archived(&self) -> bool {
        self.is_archived
    }

    pub fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn flags(&self) -> ProductFlags {
        ProductFlags {
            is_archived: self.is_archived,
            is_deleted: self.is_deleted,
        }
    }

    pub fn apply_flags(&mut self, flags: ProductFlags) {
        self.is_archived = flags.is_archived;
        self.is_deleted = flags.is_deleted;
    }
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(name: &str) -> NewProduct {
        NewProduct {
            name: name.to_string(),
            category_id: None,
            has_variants: true,
        }
    }

    #[test]
    fn create_trims_name_and_starts_live() {
        let product = Product::create(ProductId::new(), input("  Coffee Beans "), Utc::now()).unwrap();
        assert_eq!(product.name(), "Coffee Beans");
        assert!(!product.is_archived());
        assert!(!product.is_deleted());
    }

    #[test]
    fn create_rejects_blank_name() {
        let err = Product::create(ProductId::new(), input("   "), Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn apply_flags_overwrites_both_flags() {
        let mut product = Product::create(ProductId::new(), input("Tea"), Utc::now()).unwrap();
        product.apply_flags(ProductFlags {
            is_archived: true,
            is_deleted: true,
        });
        assert!(product.is_archived());
        assert!(product.is_deleted());
    }
}
