use std::collections::HashSet;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Rid, TxnId};
use crate::index::hash::key::IndexKey;
use crate::storage::table::TableHeap;

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Strict-2PL transaction lifecycle. Growing transactions may only
/// acquire locks, shrinking ones only release; Committed and Aborted are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

impl TransactionState {
    fn as_u8(self) -> u8 {
        match self {
            TransactionState::Growing => 0,
            TransactionState::Shrinking => 1,
            TransactionState::Committed => 2,
            TransactionState::Aborted => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => TransactionState::Growing,
            1 => TransactionState::Shrinking,
            2 => TransactionState::Committed,
            3 => TransactionState::Aborted,
            _ => unreachable!("invalid transaction state {}", value),
        }
    }
}

/// Why a transaction was forced to abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// Lock requested after the transaction entered its shrinking phase.
    LockOnShrinking,
    /// Shared locks are meaningless under READ_UNCOMMITTED.
    LockSharedOnReadUncommitted,
    /// A second upgrade raced a pending one on the same record.
    UpgradeConflict,
    /// Wounded by an older transaction.
    Deadlock,
}

#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Transaction {0} aborted: {1:?}")]
    Aborted(TxnId, AbortReason),

    #[error("Transaction {0} is not active")]
    InvalidState(TxnId),

    #[error("Transaction {0} not found")]
    NotFound(TxnId),

    #[error("Internal transaction error: {0}")]
    Internal(String),
}

/// Undo log entry. Table records carry the owning heap so rollback never
/// needs a catalog lookup; index records are resolved through the catalog
/// by oid because the index object is shared.
pub enum WriteRecord {
    TableInsert {
        rid: Rid,
        heap: Arc<TableHeap>,
    },
    TableDelete {
        rid: Rid,
        heap: Arc<TableHeap>,
    },
    TableUpdate {
        rid: Rid,
        old_data: Vec<u8>,
        heap: Arc<TableHeap>,
    },
    IndexInsert {
        index_oid: u32,
        key: IndexKey,
        rid: Rid,
    },
    IndexDelete {
        index_oid: u32,
        key: IndexKey,
        rid: Rid,
    },
    IndexUpdate {
        index_oid: u32,
        old_key: IndexKey,
        new_key: IndexKey,
        rid: Rid,
    },
}

/// An active database transaction. The state cell is atomic because
/// wound-wait lets any thread flip a victim to Aborted; every other
/// transition is made by the owning worker.
pub struct Transaction {
    id: TxnId,
    state: AtomicU8,
    isolation_level: IsolationLevel,
    abort_reason: Mutex<Option<AbortReason>>,
    shared_locks: Mutex<HashSet<Rid>>,
    exclusive_locks: Mutex<HashSet<Rid>>,
    write_records: Mutex<Vec<WriteRecord>>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            state: AtomicU8::new(TransactionState::Growing.as_u8()),
            isolation_level,
            abort_reason: Mutex::new(None),
            shared_locks: Mutex::new(HashSet::new()),
            exclusive_locks: Mutex::new(HashSet::new()),
            write_records: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        TransactionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn set_state(&self, state: TransactionState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    pub fn set_abort_reason(&self, reason: AbortReason) {
        *self.abort_reason.lock() = Some(reason);
    }

    pub fn abort_reason(&self) -> Option<AbortReason> {
        *self.abort_reason.lock()
    }

    pub fn is_shared_locked(&self, rid: Rid) -> bool {
        self.shared_locks.lock().contains(&rid)
    }

    pub fn is_exclusive_locked(&self, rid: Rid) -> bool {
        self.exclusive_locks.lock().contains(&rid)
    }

    pub fn add_shared_lock(&self, rid: Rid) {
        self.shared_locks.lock().insert(rid);
    }

    pub fn add_exclusive_lock(&self, rid: Rid) {
        self.exclusive_locks.lock().insert(rid);
    }

    pub fn remove_shared_lock(&self, rid: Rid) {
        self.shared_locks.lock().remove(&rid);
    }

    pub fn remove_exclusive_lock(&self, rid: Rid) {
        self.exclusive_locks.lock().remove(&rid);
    }

    /// Every rid this transaction holds any lock on.
    pub fn locked_rids(&self) -> Vec<Rid> {
        let mut rids: Vec<Rid> = self.shared_locks.lock().iter().copied().collect();
        rids.extend(self.exclusive_locks.lock().iter().copied());
        rids.sort();
        rids.dedup();
        rids
    }

    pub fn append_write_record(&self, record: WriteRecord) {
        self.write_records.lock().push(record);
    }

    pub fn take_write_records(&self) -> Vec<WriteRecord> {
        std::mem::take(&mut *self.write_records.lock())
    }
}
