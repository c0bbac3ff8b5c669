// Repository seams consumed by the reconciliation engine.
//
// The engine never talks SQL. `db::SqliteStore` implements both traits; tests
// wrap it to count round trips.

use crate::error::StoreError;
use crate::model::{
    HolderDescriptor, HolderIdentifier, NewTransaction, PersistedHolder, PersistedTransaction,
};
use chrono::{DateTime, Utc};

pub trait HolderRepository {
    /// `Ok(None)` is the normal "not found" outcome, not an error.
    fn find_by_identity(
        &self,
        identifier: &HolderIdentifier,
    ) -> Result<Option<PersistedHolder>, StoreError>;

    /// Fails if the store rejects the row, e.g. on a uniqueness violation.
    fn insert_holder(&self, descriptor: &HolderDescriptor) -> Result<PersistedHolder, StoreError>;
}

pub trait TransactionRepository {
    /// All stored transactions with exactly these endpoints, amount and
    /// timestamp. May be empty.
    fn find_candidates(
        &self,
        from_holder_id: i64,
        to_holder_id: i64,
        amount: u64,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<PersistedTransaction>, StoreError>;

    /// Re-checks for an equivalent row before inserting and fails with
    /// `StoreError::AlreadyExists` if one is found.
    fn insert_transaction(
        &self,
        transaction: &NewTransaction,
    ) -> Result<PersistedTransaction, StoreError>;
}
