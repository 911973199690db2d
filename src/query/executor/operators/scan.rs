use std::sync::Arc;

use crate::catalog::TableOid;
use crate::common::types::Rid;
use crate::query::executor::context::ExecutorContext;
use crate::query::executor::operators::Operator;
use crate::query::executor::result::{QueryError, QueryResult, Tuple};
use crate::storage::table::TableIterator;
use crate::transaction::IsolationLevel;

/// Sequential scan over a table heap with an optional pushed-down
/// predicate.
///
/// Lock protocol: READ_UNCOMMITTED takes no locks; READ_COMMITTED takes a
/// shared lock per row and releases it as soon as the row is produced;
/// REPEATABLE_READ keeps shared locks until commit. Rows already locked
/// by this transaction are not re-locked.
pub struct SeqScanExecutor {
    ctx: Arc<ExecutorContext>,
    table_oid: TableOid,
    predicate: Option<Box<dyn Fn(&Tuple) -> bool + Send + Sync>>,
    iter: Option<TableIterator>,
}

impl SeqScanExecutor {
    pub fn new(
        ctx: Arc<ExecutorContext>,
        table_oid: TableOid,
        predicate: Option<Box<dyn Fn(&Tuple) -> bool + Send + Sync>>,
    ) -> Self {
        Self {
            ctx,
            table_oid,
            predicate,
            iter: None,
        }
    }
}

impl Operator for SeqScanExecutor {
    fn init(&mut self) -> QueryResult<()> {
        let table = self
            .ctx
            .catalog()
            .get_table(self.table_oid)
            .ok_or_else(|| QueryError::TableNotFound(format!("oid {}", self.table_oid)))?;
        self.iter = Some(table.heap.iter());
        Ok(())
    }

    fn next(&mut self) -> QueryResult<Option<(Tuple, Rid)>> {
        let iter = match self.iter.as_mut() {
            Some(iter) => iter,
            None => return Ok(None),
        };
        let txn = Arc::clone(self.ctx.txn());
        let lock_manager = Arc::clone(self.ctx.lock_manager());

        loop {
            let (rid, bytes) = match iter.next_record()? {
                Some(entry) => entry,
                None => return Ok(None),
            };
            let tuple = Tuple::from_bytes(&bytes)?;
            if let Some(predicate) = &self.predicate {
                if !predicate(&tuple) {
                    continue;
                }
            }

            if txn.isolation_level() != IsolationLevel::ReadUncommitted
                && !txn.is_shared_locked(rid)
                && !txn.is_exclusive_locked(rid)
                && !lock_manager.lock_shared(&txn, rid)?
            {
                return Ok(None);
            }

            if txn.isolation_level() == IsolationLevel::ReadCommitted
                && txn.is_shared_locked(rid)
            {
                lock_manager.unlock(&txn, rid);
            }

            return Ok(Some((tuple, rid)));
        }
    }

    fn close(&mut self) -> QueryResult<()> {
        self.iter = None;
        Ok(())
    }
}
