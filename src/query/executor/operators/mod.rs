// Query operators for the iterator-based (volcano) execution model. Each
// operator pulls rows from its children one `next` call at a time.

pub mod agg;
pub mod delete;
pub mod distinct;
pub mod insert;
pub mod join;
pub mod limit;
pub mod scan;
pub mod update;

use crate::common::types::Rid;
use crate::query::executor::result::{QueryResult, Tuple};

pub use agg::{Aggregate, AggregateType, AggregationExecutor};
pub use delete::DeleteExecutor;
pub use distinct::DistinctExecutor;
pub use insert::{InsertExecutor, InsertSource};
pub use join::{HashJoinExecutor, NestedLoopJoinExecutor};
pub use limit::LimitExecutor;
pub use scan::SeqScanExecutor;
pub use update::UpdateExecutor;

/// The Operator trait defines the interface for all query execution
/// operators. `next` yields one row and its record id, or `None` at
/// end-of-stream; mutation operators drain their child and yield nothing.
pub trait Operator: Send {
    /// Initialize the operator before execution
    fn init(&mut self) -> QueryResult<()>;

    /// Produce the next row, if any
    fn next(&mut self) -> QueryResult<Option<(Tuple, Rid)>>;

    /// Release any resources held by the operator
    fn close(&mut self) -> QueryResult<()>;
}

/// Joined and aggregated rows do not correspond to a stored record; they
/// carry the invalid rid.
pub(crate) fn synthetic_rid() -> Rid {
    Rid::new(crate::common::types::INVALID_PAGE_ID, 0)
}

/// Take an exclusive lock on a row about to be mutated, upgrading a held
/// shared lock in place. Returns `Ok(false)` if the transaction was
/// aborted instead of granted.
pub(crate) fn lock_for_write(
    txn: &crate::transaction::Transaction,
    lock_manager: &crate::transaction::LockManager,
    rid: Rid,
) -> QueryResult<bool> {
    if txn.is_exclusive_locked(rid) {
        return Ok(true);
    }
    let granted = if txn.is_shared_locked(rid) {
        lock_manager.lock_upgrade(txn, rid)?
    } else {
        lock_manager.lock_exclusive(txn, rid)?
    };
    Ok(granted)
}

/// Best-effort unlock after a mutation failed to apply. Exclusive locks
/// on successfully written rows are never released before commit or
/// abort; only the short-lock isolation levels give a lock back on the
/// failure path, since nothing was written under it.
pub(crate) fn unlock_after_failure(
    txn: &crate::transaction::Transaction,
    lock_manager: &crate::transaction::LockManager,
    rid: Rid,
) {
    use crate::transaction::IsolationLevel;
    if matches!(
        txn.isolation_level(),
        IsolationLevel::ReadCommitted | IsolationLevel::ReadUncommitted
    ) {
        lock_manager.unlock(txn, rid);
    }
}
