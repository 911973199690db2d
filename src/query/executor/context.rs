use std::sync::Arc;

use crate::catalog::Catalog;
use crate::storage::buffer::ParallelBufferPool;
use crate::transaction::{LockManager, Transaction, TransactionManager};

/// Everything an operator needs to run: storage, catalog, and the
/// transactional machinery for the invoking worker.
pub struct ExecutorContext {
    buffer_pool: Arc<ParallelBufferPool>,
    catalog: Arc<Catalog>,
    txn: Arc<Transaction>,
    lock_manager: Arc<LockManager>,
    txn_manager: Arc<TransactionManager>,
}

impl ExecutorContext {
    pub fn new(
        buffer_pool: Arc<ParallelBufferPool>,
        catalog: Arc<Catalog>,
        txn: Arc<Transaction>,
        lock_manager: Arc<LockManager>,
        txn_manager: Arc<TransactionManager>,
    ) -> Self {
        Self {
            buffer_pool,
            catalog,
            txn,
            lock_manager,
            txn_manager,
        }
    }

    pub fn buffer_pool(&self) -> &Arc<ParallelBufferPool> {
        &self.buffer_pool
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn txn(&self) -> &Arc<Transaction> {
        &self.txn
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    pub fn txn_manager(&self) -> &Arc<TransactionManager> {
        &self.txn_manager
    }
}
