//! Variant lifecycle transitions and the product-level cascade.
//!
//! A product's `is_archived` / `is_deleted` flags are never set directly.
//! After a variant transition commits, the store re-reads every variant of the
//! product (inside the same unit of work) and asks [`cascade`] for the new
//! product flags.
//!
//! The two directions are deliberately asymmetric:
//! - archiving needs *every* variant archived (or deleted) before the product follows;
//! - un-archiving a single variant un-archives the product immediately.
//!
//! Deleting a variant can also archive the product: deleted variants count as
//! archived, so once no active variant remains the product is archived too.
//! A newly registered variant is active and clears the archived flag.

use serde::{Deserialize, Serialize};

use crate::variant::VariantStatus;

/// A lifecycle change requested on one variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantTransition {
    Archive,
    Unarchive,
    Delete,
}

impl core::fmt::Display for VariantTransition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            VariantTransition::Archive => "archive",
            VariantTransition::Unarchive => "unarchive",
            VariantTransition::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// Derived product flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductFlags {
    pub is_archived: bool,
    pub is_deleted: bool,
}

/// Compute product flags after `transition` was applied to one of its variants.
///
/// `variants` holds the status of every variant of the product *after* the
/// transition (the transitioned variant included).
pub fn cascade(
    current: ProductFlags,
    transition: VariantTransition,
    variants: &[VariantStatus],
) -> ProductFlags {
    let mut next = current;
    let none_active =
        !variants.is_empty() && variants.iter().all(|s| *s != VariantStatus::Active);
    match transition {
        VariantTransition::Archive => {
            if none_active {
                next.is_archived = true;
            }
        }
        VariantTransition::Unarchive => {
            next.is_archived = false;
        }
        VariantTransition::Delete => {
            if none_active {
                next.is_archived = true;
            }
            let all_deleted =
                !variants.is_empty() && variants.iter().all(|s| *s == VariantStatus::Deleted);
            if all_deleted {
                next.is_deleted = true;
            }
        }
    }
    next
}

/// Product flags after a new variant joins the product.
///
/// New variants start active, so the product can no longer be archived.
pub fn admit_variant(current: ProductFlags) -> ProductFlags {
    ProductFlags {
        is_archived: false,
        ..current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    use VariantStatus::{Active, Archived, Deleted};

    #[test]
    fn archiving_last_active_variant_archives_product() {
        let flags = cascade(ProductFlags::default(), VariantTransition::Archive, &[Archived, Archived]);
        assert!(flags.is_archived);
        assert!(!flags.is_deleted);
    }

    #[test]
    fn archiving_with_an_active_sibling_leaves_product_untouched() {
        let flags = cascade(ProductFlags::default(), VariantTransition::Archive, &[Archived, Active]);
        assert_eq!(flags, ProductFlags::default());
    }

    #[test]
    fn deleted_siblings_count_as_archived() {
        let flags = cascade(ProductFlags::default(), VariantTransition::Archive, &[Archived, Deleted]);
        assert!(flags.is_archived);
    }

    #[test]
    fn unarchive_clears_product_even_if_siblings_stay_archived() {
        let archived = ProductFlags {
            is_archived: true,
            is_deleted: false,
        };
        let flags = cascade(archived, VariantTransition::Unarchive, &[Active, Archived]);
        assert!(!flags.is_archived);
    }

    #[test]
    fn delete_needs_every_variant_deleted() {
        let flags = cascade(ProductFlags::default(), VariantTransition::Delete, &[Deleted, Archived]);
        assert!(!flags.is_deleted);

        let flags = cascade(ProductFlags::default(), VariantTransition::Delete, &[Deleted, Deleted]);
        assert!(flags.is_deleted);
    }

    #[test]
    fn deleting_last_active_variant_archives_product() {
        let flags = cascade(ProductFlags::default(), VariantTransition::Delete, &[Archived, Deleted]);
        assert!(flags.is_archived);
        assert!(!flags.is_deleted);

        let flags = cascade(ProductFlags::default(), VariantTransition::Delete, &[Active, Deleted]);
        assert_eq!(flags, ProductFlags::default());
    }

    #[test]
    fn admitted_variant_unarchives_product() {
        let archived = ProductFlags {
            is_archived: true,
            is_deleted: false,
        };
        assert_eq!(admit_variant(archived), ProductFlags::default());
    }

    #[test]
    fn empty_variant_set_never_cascades() {
        assert_eq!(
            cascade(ProductFlags::default(), VariantTransition::Archive, &[]),
            ProductFlags::default()
        );
        assert_eq!(
            cascade(ProductFlags::default(), VariantTransition::Delete, &[]),
            ProductFlags::default()
        );
    }

    fn status() -> impl Strategy<Value = VariantStatus> {
        prop_oneof![Just(Active), Just(Archived), Just(Deleted)]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: after an archive, the product is archived iff no variant is active
        /// (or it already was archived).
        #[test]
        fn archive_cascade_matches_all_inactive(
            statuses in prop::collection::vec(status(), 1..8),
            was_archived in any::<bool>(),
        ) {
            let current = ProductFlags { is_archived: was_archived, is_deleted: false };
            let flags = cascade(current, VariantTransition::Archive, &statuses);
            let none_active = statuses.iter().all(|s| *s != Active);
            prop_assert_eq!(flags.is_archived, was_archived || none_active);
            prop_assert!(!flags.is_deleted);
        }

        /// Property: after a delete, the product is deleted iff every variant is deleted
        /// and archived iff no variant is active.
        #[test]
        fn delete_cascade_tracks_remaining_variants(
            statuses in prop::collection::vec(status(), 1..8),
        ) {
            let flags = cascade(ProductFlags::default(), VariantTransition::Delete, &statuses);
            prop_assert_eq!(flags.is_deleted, statuses.iter().all(|s| *s == Deleted));
            prop_assert_eq!(flags.is_archived, statuses.iter().all(|s| *s != Active));
        }

        /// Property: un-archive always clears the archived flag and never touches deleted.
        #[test]
        fn unarchive_always_clears(
            statuses in prop::collection::vec(status(), 1..8),
            was_deleted in any::<bool>(),
        ) {
            let current = ProductFlags { is_archived: true, is_deleted: was_deleted };
            let flags = cascade(current, VariantTransition::Unarchive, &statuses);
            prop_assert!(!flags.is_archived);
            prop_assert_eq!(flags.is_deleted, was_deleted);
        }
    }
}
