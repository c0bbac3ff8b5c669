// 🧾 Ledger data model - holders and the transactions between them
//
// A holder descriptor is an immutable value produced by a format adapter.
// Persisted rows wrap that value and add the fields the store assigns
// (id, created_at), so nothing is copied field-by-field between the two.

use crate::data::RawData;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// HOLDERS
// ============================================================================

/// Natural key of a holder. Two holders with the same `(type, identifier)`
/// pair are the same real-world party.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HolderIdentifier {
    /// Namespace of the identifier, e.g. `iban` or `dkb/payee`
    #[serde(rename = "type")]
    pub kind: String,
    pub identifier: String,
}

impl HolderIdentifier {
    pub fn new(kind: impl Into<String>, identifier: impl Into<String>) -> Self {
        HolderIdentifier {
            kind: kind.into(),
            identifier: identifier.into(),
        }
    }
}

impl fmt::Display for HolderIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.identifier)
    }
}

/// Holder as described by a statement, not yet persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HolderDescriptor {
    #[serde(flatten)]
    pub identifier: HolderIdentifier,
    pub name: String,
    pub parent_holder_id: Option<i64>,
    pub favorite: bool,
    pub data: RawData,
}

impl HolderDescriptor {
    /// Create a non-favorite root holder without data
    pub fn new(identifier: HolderIdentifier, name: impl Into<String>) -> Self {
        HolderDescriptor {
            identifier,
            name: name.into(),
            parent_holder_id: None,
            favorite: false,
            data: RawData::Absent,
        }
    }

    /// Builder pattern: mark as favorite
    pub fn favorite(mut self) -> Self {
        self.favorite = true;
        self
    }

    /// Builder pattern: attach provenance data
    pub fn with_data(mut self, data: RawData) -> Self {
        self.data = data;
        self
    }

    /// Builder pattern: place below another holder
    pub fn with_parent(mut self, parent_holder_id: i64) -> Self {
        self.parent_holder_id = Some(parent_holder_id);
        self
    }
}

/// Holder row as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedHolder {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub descriptor: HolderDescriptor,
}

impl PersistedHolder {
    pub fn identifier(&self) -> &HolderIdentifier {
        &self.descriptor.identifier
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

// ============================================================================
// TRANSACTIONS
// ============================================================================

/// Content of a transaction that does not depend on holder ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionBody {
    /// Always non-negative, in minor currency units (cents).
    /// Direction is expressed by the from/to holders.
    pub amount: u64,
    pub timestamp: DateTime<Utc>,
    pub data: RawData,
    pub parent_transaction_id: Option<i64>,
}

impl TransactionBody {
    pub fn new(amount: u64, timestamp: DateTime<Utc>) -> Self {
        TransactionBody {
            amount,
            timestamp,
            data: RawData::Absent,
            parent_transaction_id: None,
        }
    }

    /// Builder pattern: attach provenance data
    pub fn with_data(mut self, data: RawData) -> Self {
        self.data = data;
        self
    }
}

/// Transaction derived from a statement, referring to its holders by natural
/// key. Serialized as one entry of the dry-run document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateTransaction {
    pub transaction: TransactionBody,
    pub from_identifier: HolderIdentifier,
    pub to_identifier: HolderIdentifier,
}

/// Transaction with both holders resolved to stored ids, ready to insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTransaction {
    pub from_holder_id: i64,
    pub to_holder_id: i64,
    #[serde(flatten)]
    pub transaction: TransactionBody,
}

/// Transaction row as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedTransaction {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub from_holder_id: i64,
    pub to_holder_id: i64,
    #[serde(flatten)]
    pub transaction: TransactionBody,
}
