// 🔍 Transaction de-duplication by content
//
// A transaction is a duplicate when a stored row has the same endpoints,
// amount and timestamp (exact match) and a structurally equal data document.
// Shared by plan building and by the store's insert-time guard.

use crate::error::StoreError;
use crate::model::{PersistedTransaction, TransactionBody};
use crate::repository::TransactionRepository;

/// First stored row whose content equals `transaction`.
///
/// `candidates` are expected to come from `find_candidates`, so only the data
/// document is compared here; amount and timestamp are checked again to keep
/// the function correct for arbitrary input.
pub fn find_duplicate<'a>(
    candidates: &'a [PersistedTransaction],
    transaction: &TransactionBody,
) -> Option<&'a PersistedTransaction> {
    candidates.iter().find(|stored| {
        stored.transaction.amount == transaction.amount
            && stored.transaction.timestamp == transaction.timestamp
            && stored.transaction.data.structurally_eq(&transaction.data)
    })
}

/// Ask the repository whether an equivalent transaction between the two
/// stored holders already exists.
pub fn is_duplicate<R: TransactionRepository + ?Sized>(
    repository: &R,
    transaction: &TransactionBody,
    from_holder_id: i64,
    to_holder_id: i64,
) -> Result<bool, StoreError> {
    let candidates = repository.find_candidates(
        from_holder_id,
        to_holder_id,
        transaction.amount,
        transaction.timestamp,
    )?;
    Ok(find_duplicate(&candidates, transaction).is_some())
}
