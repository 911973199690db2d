use std::sync::Arc;

use anyhow::Result;
use tempfile::NamedTempFile;

use tarndb::catalog::{Catalog, Column, DataType, Schema, TableInfo};
use tarndb::query::executor::result::{DataValue, Tuple};
use tarndb::query::executor::ExecutorContext;
use tarndb::storage::buffer::ParallelBufferPool;
use tarndb::storage::disk::DiskManager;
use tarndb::transaction::{IsolationLevel, LockManager, Transaction, TransactionManager};

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<(NamedTempFile, String)> {
    let file = NamedTempFile::new()?;
    let path = file.path().to_str().unwrap().to_string();
    Ok((file, path))
}

// Create a single-instance buffer pool with a temporary database
#[allow(dead_code)]
pub fn create_test_pool(pool_size: usize) -> Result<(Arc<ParallelBufferPool>, NamedTempFile)> {
    create_sharded_pool(1, pool_size)
}

// Create a sharded buffer pool with a temporary database
#[allow(dead_code)]
pub fn create_sharded_pool(
    num_instances: u32,
    pool_size_per_instance: usize,
) -> Result<(Arc<ParallelBufferPool>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let disk = Arc::new(DiskManager::new(path)?);
    let pool = Arc::new(ParallelBufferPool::new(num_instances, pool_size_per_instance, disk));
    Ok((pool, file))
}

/// Everything a transactional executor test needs, wired together.
#[allow(dead_code)]
pub struct TestEngine {
    pub pool: Arc<ParallelBufferPool>,
    pub catalog: Arc<Catalog>,
    pub txn_manager: Arc<TransactionManager>,
    pub lock_manager: Arc<LockManager>,
    _file: NamedTempFile,
}

#[allow(dead_code)]
impl TestEngine {
    pub fn new(pool_size: usize) -> Result<Self> {
        let (pool, file) = create_test_pool(pool_size)?;
        let catalog = Arc::new(Catalog::new(Arc::clone(&pool)));
        let txn_manager = Arc::new(TransactionManager::new());
        let lock_manager = Arc::new(LockManager::new(Arc::clone(&txn_manager)));
        Ok(Self {
            pool,
            catalog,
            txn_manager,
            lock_manager,
            _file: file,
        })
    }

    pub fn begin(&self, isolation: IsolationLevel) -> Arc<Transaction> {
        self.txn_manager.begin(isolation)
    }

    pub fn context(&self, txn: &Arc<Transaction>) -> Arc<ExecutorContext> {
        Arc::new(ExecutorContext::new(
            Arc::clone(&self.pool),
            Arc::clone(&self.catalog),
            Arc::clone(txn),
            Arc::clone(&self.lock_manager),
            Arc::clone(&self.txn_manager),
        ))
    }

    pub fn commit(&self, txn: &Arc<Transaction>) -> Result<()> {
        self.txn_manager.commit(txn, &self.lock_manager)?;
        Ok(())
    }

    pub fn abort(&self, txn: &Arc<Transaction>) -> Result<()> {
        self.txn_manager.abort(txn, &self.lock_manager, &self.catalog)?;
        Ok(())
    }

    /// Create the (id INTEGER, name TEXT) table used across tests.
    pub fn create_accounts_table(&self) -> Result<Arc<TableInfo>> {
        let schema = Schema::new(vec![
            Column::new("id", DataType::Integer),
            Column::new("name", DataType::Text),
        ]);
        Ok(self.catalog.create_table("accounts", schema)?)
    }
}

// Build an (id, name) tuple
#[allow(dead_code)]
pub fn account_tuple(id: i64, name: &str) -> Tuple {
    Tuple::new(vec![
        DataValue::Integer(id),
        DataValue::Text(name.to_string()),
    ])
}
