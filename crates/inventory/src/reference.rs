//! Opaque pointer back to the business document that caused a movement.
//!
//! The ledger stores `(kind, id)` for audit and never branches on it.

use serde::{Deserialize, Serialize};

use stockledger_core::ValueObject;

/// Kind of document behind a movement.
///
/// Unknown kinds are kept verbatim in [`ReferenceKind::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ReferenceKind {
    Receiving,
    Fulfillment,
    DirectPlacement,
    Stockopname,
    Other(String),
}

impl ReferenceKind {
    pub fn as_str(&self) -> &str {
        match self {
            ReferenceKind::Receiving => "receiving",
            ReferenceKind::Fulfillment => "fulfillment",
            ReferenceKind::DirectPlacement => "direct_placement",
            ReferenceKind::Stockopname => "stockopname",
            ReferenceKind::Other(kind) => kind,
        }
    }
}

impl From<&str> for ReferenceKind {
    fn from(value: &str) -> Self {
        match value {
            "receiving" => ReferenceKind::Receiving,
            "fulfillment" => ReferenceKind::Fulfillment,
            "direct_placement" => ReferenceKind::DirectPlacement,
            "stockopname" => ReferenceKind::Stockopname,
            other => ReferenceKind::Other(other.to_string()),
        }
    }
}

impl From<String> for ReferenceKind {
    fn from(value: String) -> Self {
        ReferenceKind::from(value.as_str())
    }
}

impl From<ReferenceKind> for String {
    fn from(value: ReferenceKind) -> Self {
        value.as_str().to_string()
    }
}

impl core::fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(kind, document id)` pair recorded on every movement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockReference {
    pub kind: ReferenceKind,
    pub id: i64,
}

impl StockReference {
    pub fn new(kind: impl Into<ReferenceKind>, id: i64) -> Self {
        Self {
            kind: kind.into(),
            id,
        }
    }

    pub fn receiving(id: i64) -> Self {
        Self::new(ReferenceKind::Receiving, id)
    }

    pub fn fulfillment(id: i64) -> Self {
        Self::new(ReferenceKind::Fulfillment, id)
    }

    pub fn direct_placement(id: i64) -> Self {
        Self::new(ReferenceKind::DirectPlacement, id)
    }

    pub fn stockopname(id: i64) -> Self {
        Self::new(ReferenceKind::Stockopname, id)
    }
}

impl ValueObject for StockReference {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_kinds_use_snake_case_names() {
        assert_eq!(ReferenceKind::DirectPlacement.as_str(), "direct_placement");
        assert_eq!(ReferenceKind::from("stockopname"), ReferenceKind::Stockopname);
    }

    #[test]
    fn unknown_kinds_are_kept_verbatim() {
        let kind = ReferenceKind::from("consignment_return");
        assert_eq!(kind, ReferenceKind::Other("consignment_return".to_string()));
        assert_eq!(kind.to_string(), "consignment_return");
    }

    #[test]
    fn serializes_kind_as_plain_string() {
        let reference = StockReference::new("transfer", 9);
        let json = serde_json::to_value(&reference).unwrap();
        assert_eq!(json, serde_json::json!({ "kind": "transfer", "id": 9 }));

        let back: StockReference = serde_json::from_value(json).unwrap();
        assert_eq!(back, reference);
    }
}
