// ⚖️ Reconciliation Engine - idempotent statement import
//
// Given a batch of statement records, decide which holders already exist,
// which must be created, and which transactions are new. The result is a
// plan that can be written out (dry run) or committed.
//
// Building a plan is read-only. Holder decisions are complete before any
// transaction is classified: a transaction can only duplicate a stored row if
// both of its holders are stored.

use crate::deduplication;
use crate::error::ReconcileError;
use crate::model::{
    CandidateTransaction, HolderDescriptor, HolderIdentifier, NewTransaction, PersistedHolder,
    TransactionBody,
};
use crate::parser::StatementRecord;
use crate::repository::{HolderRepository, TransactionRepository};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

// ============================================================================
// CONFLICT POLICY
// ============================================================================

/// What to do when the store reports a planned transaction as already
/// existing at commit time (written concurrently, or repeated in the batch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Fail the commit with `ReconcileError::AlreadyExists`
    #[default]
    Abort,
    /// Count the transaction as skipped and continue
    Skip,
}

// ============================================================================
// RECONCILIATION PLAN
// ============================================================================

/// Staged result of one import run.
///
/// An identifier is a key of at most one of `existing_holders` and
/// `holders_to_create`.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationPlan {
    existing_holders: BTreeMap<HolderIdentifier, PersistedHolder>,
    holders_to_create: BTreeMap<HolderIdentifier, HolderDescriptor>,
    transactions: Vec<CandidateTransaction>,
    duplicates: usize,
}

impl ReconciliationPlan {
    pub fn existing_holders(&self) -> &BTreeMap<HolderIdentifier, PersistedHolder> {
        &self.existing_holders
    }

    pub fn holders_to_create(&self) -> &BTreeMap<HolderIdentifier, HolderDescriptor> {
        &self.holders_to_create
    }

    /// Transactions to create, in batch order
    pub fn transactions(&self) -> &[CandidateTransaction] {
        &self.transactions
    }

    /// Number of candidates found to be already stored
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    /// Nothing would be written on commit
    pub fn is_empty(&self) -> bool {
        self.holders_to_create.is_empty() && self.transactions.is_empty()
    }

    fn knows(&self, identifier: &HolderIdentifier) -> bool {
        self.existing_holders.contains_key(identifier) || self.holders_to_create.contains_key(identifier)
    }

    fn existing_id(&self, identifier: &HolderIdentifier) -> Option<i64> {
        self.existing_holders.get(identifier).map(|holder| holder.id)
    }

    pub fn summary(&self) -> String {
        format!(
            "{} existing holders, {} holders to create, {} transactions to create, {} duplicates",
            self.existing_holders.len(),
            self.holders_to_create.len(),
            self.transactions.len(),
            self.duplicates
        )
    }
}

/// Dry-run document: holders to create and transactions to create.
#[derive(Serialize)]
struct PlanDocument<'a> {
    holders: Vec<&'a HolderDescriptor>,
    transactions: &'a [CandidateTransaction],
}

impl Serialize for ReconciliationPlan {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        PlanDocument {
            holders: self.holders_to_create.values().collect(),
            transactions: &self.transactions,
        }
        .serialize(serializer)
    }
}

/// Rows written by a commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitReport {
    pub holders_created: usize,
    pub transactions_created: usize,
    pub conflicts_skipped: usize,
}

impl CommitReport {
    pub fn summary(&self) -> String {
        format!(
            "created {} holders and {} transactions ({} skipped as already existing)",
            self.holders_created, self.transactions_created, self.conflicts_skipped
        )
    }
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

pub struct ReconciliationEngine<'a, H: ?Sized, T: ?Sized> {
    holders: &'a H,
    transactions: &'a T,
    cancel: CancellationToken,
    conflict_policy: ConflictPolicy,
}

impl<'a, H, T> ReconciliationEngine<'a, H, T>
where
    H: HolderRepository + ?Sized,
    T: TransactionRepository + ?Sized,
{
    /// The token is checked before every repository round trip.
    pub fn new(holders: &'a H, transactions: &'a T, cancel: CancellationToken) -> Self {
        ReconciliationEngine {
            holders,
            transactions,
            cancel,
            conflict_policy: ConflictPolicy::default(),
        }
    }

    pub fn with_conflict_policy(mut self, conflict_policy: ConflictPolicy) -> Self {
        self.conflict_policy = conflict_policy;
        self
    }

    fn checkpoint(&self) -> Result<(), ReconcileError> {
        if self.cancel.is_cancelled() {
            return Err(ReconcileError::Cancelled);
        }
        Ok(())
    }

    /// Record whether the holder exists or must be created.
    ///
    /// Memoized over the plan: an identifier seen before costs no lookup, and
    /// the first descriptor seen for it is the one kept.
    pub fn resolve_holder(
        &self,
        plan: &mut ReconciliationPlan,
        descriptor: &HolderDescriptor,
    ) -> Result<(), ReconcileError> {
        let identifier = &descriptor.identifier;
        if plan.knows(identifier) {
            return Ok(());
        }

        self.checkpoint()?;
        let found = self
            .holders
            .find_by_identity(identifier)
            .map_err(|e| ReconcileError::repository(format!("find holder {}", identifier), e))?;

        match found {
            Some(holder) => {
                debug!(holder = %identifier, id = holder.id, "holder exists");
                plan.existing_holders.insert(identifier.clone(), holder);
            }
            None => {
                debug!(holder = %identifier, "holder will be created");
                plan.holders_to_create
                    .insert(identifier.clone(), descriptor.clone());
            }
        }
        Ok(())
    }

    /// Whether an equivalent transaction between the two stored holders
    /// already exists.
    pub fn is_duplicate(
        &self,
        transaction: &TransactionBody,
        from_holder_id: i64,
        to_holder_id: i64,
    ) -> Result<bool, ReconcileError> {
        self.checkpoint()?;
        deduplication::is_duplicate(self.transactions, transaction, from_holder_id, to_holder_id)
            .map_err(|e| {
                ReconcileError::repository(
                    format!(
                        "check transaction {} -> {} ({} at {})",
                        from_holder_id, to_holder_id, transaction.amount, transaction.timestamp
                    ),
                    e,
                )
            })
    }

    /// Two passes: resolve every holder, then classify every transaction.
    #[instrument(skip_all, fields(records = records.len()))]
    pub fn build_plan(
        &self,
        records: &[Box<dyn StatementRecord>],
    ) -> Result<ReconciliationPlan, ReconcileError> {
        let mut plan = ReconciliationPlan::default();

        for record in records {
            self.resolve_holder(&mut plan, &record.from_holder())?;
            self.resolve_holder(&mut plan, &record.to_holder())?;
        }

        for record in records {
            let candidate = CandidateTransaction {
                transaction: record.transaction(),
                from_identifier: record.from_holder().identifier,
                to_identifier: record.to_holder().identifier,
            };

            // A holder that is not stored yet cannot be part of a stored transaction
            let (from_id, to_id) = match (
                plan.existing_id(&candidate.from_identifier),
                plan.existing_id(&candidate.to_identifier),
            ) {
                (Some(from_id), Some(to_id)) => (from_id, to_id),
                _ => {
                    plan.transactions.push(candidate);
                    continue;
                }
            };

            if self.is_duplicate(&candidate.transaction, from_id, to_id)? {
                debug!(
                    from = %candidate.from_identifier,
                    to = %candidate.to_identifier,
                    amount = candidate.transaction.amount,
                    "transaction already stored"
                );
                plan.duplicates += 1;
                continue;
            }
            plan.transactions.push(candidate);
        }

        info!(
            existing_holders = plan.existing_holders.len(),
            holders_to_create = plan.holders_to_create.len(),
            transactions = plan.transactions.len(),
            duplicates = plan.duplicates,
            "reconciliation plan built"
        );
        Ok(plan)
    }

    /// Write the plan: holders first, then transactions. Stops at the first
    /// error; rows already written are not undone here, so callers wanting
    /// atomicity run this inside one storage transaction.
    ///
    /// Created holders move from `holders_to_create` to `existing_holders` one
    /// by one, so a retried commit never inserts a holder twice.
    #[instrument(skip_all, fields(holders = plan.holders_to_create.len(), transactions = plan.transactions.len()))]
    pub fn commit(&self, plan: &mut ReconciliationPlan) -> Result<CommitReport, ReconcileError> {
        let mut report = CommitReport::default();

        let pending: Vec<HolderIdentifier> = plan.holders_to_create.keys().cloned().collect();
        for identifier in pending {
            if plan.existing_holders.contains_key(&identifier) {
                return Err(ReconcileError::Invariant(format!(
                    "holder {} is both stored and pending creation",
                    identifier
                )));
            }
            let descriptor = plan.holders_to_create.get(&identifier).ok_or_else(|| {
                ReconcileError::Invariant(format!("holder {} vanished from the plan", identifier))
            })?;

            self.checkpoint()?;
            let holder = self
                .holders
                .insert_holder(descriptor)
                .map_err(|e| ReconcileError::repository(format!("insert holder {}", identifier), e))?;

            debug!(holder = %identifier, id = holder.id, "holder created");
            plan.holders_to_create.remove(&identifier);
            plan.existing_holders.insert(identifier, holder);
            report.holders_created += 1;
        }

        for candidate in &plan.transactions {
            let from_holder_id = plan.existing_id(&candidate.from_identifier).ok_or_else(|| {
                ReconcileError::Invariant(format!(
                    "from holder {} unresolved at commit",
                    candidate.from_identifier
                ))
            })?;
            let to_holder_id = plan.existing_id(&candidate.to_identifier).ok_or_else(|| {
                ReconcileError::Invariant(format!(
                    "to holder {} unresolved at commit",
                    candidate.to_identifier
                ))
            })?;

            let new_transaction = NewTransaction {
                from_holder_id,
                to_holder_id,
                transaction: candidate.transaction.clone(),
            };

            self.checkpoint()?;
            match self.transactions.insert_transaction(&new_transaction) {
                Ok(_) => report.transactions_created += 1,
                Err(e) => {
                    let err = ReconcileError::repository(
                        format!(
                            "insert transaction {} -> {} ({} at {})",
                            candidate.from_identifier,
                            candidate.to_identifier,
                            candidate.transaction.amount,
                            candidate.transaction.timestamp
                        ),
                        e,
                    );
                    if err.is_already_exists() && self.conflict_policy == ConflictPolicy::Skip {
                        warn!(error = %err, "skipping transaction that already exists");
                        report.conflicts_skipped += 1;
                        continue;
                    }
                    return Err(err);
                }
            }
        }

        info!(
            holders_created = report.holders_created,
            transactions_created = report.transactions_created,
            conflicts_skipped = report.conflicts_skipped,
            "reconciliation plan committed"
        );
        Ok(report)
    }
}
