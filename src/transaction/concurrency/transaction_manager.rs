use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::catalog::Catalog;
use crate::common::types::TxnId;
use crate::transaction::concurrency::lock_manager::LockManager;
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionError, TransactionState, WriteRecord,
};

/// Creates transactions with monotonically increasing ids and keeps the
/// registry the lock manager consults when wounding victims.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            next_txn_id: AtomicU32::new(1),
            transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Start a transaction. Ids are never reused, so they double as the
    /// age order wound-wait relies on.
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.transactions.lock().insert(txn_id, Arc::clone(&txn));
        txn
    }

    pub fn get_transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.transactions.lock().get(&txn_id).cloned()
    }

    /// Commit: make deferred deletes permanent, release every lock, and
    /// retire the transaction.
    pub fn commit(
        &self,
        txn: &Arc<Transaction>,
        lock_manager: &LockManager,
    ) -> Result<(), TransactionError> {
        match txn.state() {
            TransactionState::Committed | TransactionState::Aborted => {
                return Err(TransactionError::InvalidState(txn.id()))
            }
            _ => {}
        }

        for record in txn.take_write_records() {
            if let WriteRecord::TableDelete { rid, heap } = record {
                heap.apply_delete(rid)
                    .map_err(|e| TransactionError::Internal(e.to_string()))?;
            }
        }

        self.release_locks(txn, lock_manager);
        txn.set_state(TransactionState::Committed);
        self.transactions.lock().remove(&txn.id());
        Ok(())
    }

    /// Abort: undo table and index writes in reverse order, release every
    /// lock, and retire the transaction.
    pub fn abort(
        &self,
        txn: &Arc<Transaction>,
        lock_manager: &LockManager,
        catalog: &Catalog,
    ) -> Result<(), TransactionError> {
        if txn.state() == TransactionState::Committed {
            return Err(TransactionError::InvalidState(txn.id()));
        }

        let mut records = txn.take_write_records();
        while let Some(record) = records.pop() {
            self.undo(record, catalog)?;
        }

        self.release_locks(txn, lock_manager);
        txn.set_state(TransactionState::Aborted);
        self.transactions.lock().remove(&txn.id());
        Ok(())
    }

    fn undo(&self, record: WriteRecord, catalog: &Catalog) -> Result<(), TransactionError> {
        let internal = |e: &dyn std::fmt::Display| TransactionError::Internal(e.to_string());
        match record {
            WriteRecord::TableInsert { rid, heap } => {
                heap.mark_delete(rid).map_err(|e| internal(&e))?;
                heap.apply_delete(rid).map_err(|e| internal(&e))?;
            }
            WriteRecord::TableDelete { rid, heap } => {
                heap.rollback_delete(rid).map_err(|e| internal(&e))?;
            }
            WriteRecord::TableUpdate { rid, old_data, heap } => {
                heap.update(rid, &old_data).map_err(|e| internal(&e))?;
            }
            WriteRecord::IndexInsert { index_oid, key, rid } => {
                if let Some(index) = catalog.get_index(index_oid) {
                    index.index.remove(&key, &rid).map_err(|e| internal(&e))?;
                }
            }
            WriteRecord::IndexDelete { index_oid, key, rid } => {
                if let Some(index) = catalog.get_index(index_oid) {
                    index.index.insert(&key, &rid).map_err(|e| internal(&e))?;
                }
            }
            WriteRecord::IndexUpdate {
                index_oid,
                old_key,
                new_key,
                rid,
            } => {
                if let Some(index) = catalog.get_index(index_oid) {
                    index.index.remove(&new_key, &rid).map_err(|e| internal(&e))?;
                    index.index.insert(&old_key, &rid).map_err(|e| internal(&e))?;
                }
            }
        }
        Ok(())
    }

    fn release_locks(&self, txn: &Arc<Transaction>, lock_manager: &LockManager) {
        for rid in txn.locked_rids() {
            lock_manager.unlock(txn, rid);
        }
    }
}
