//! Catalog domain module.
//!
//! Products and the variants that are actually stocked, plus the lifecycle
//! rules that derive a product's archived/deleted flags from its variants.
//! Pure domain logic (no IO, no storage).

pub mod lifecycle;
pub mod product;
pub mod variant;

pub use lifecycle::{ProductFlags, VariantTransition, admit_variant, cascade};
pub use product::{NewProduct, Product};
pub use variant::{NewVariant, Variant, VariantStatus};
