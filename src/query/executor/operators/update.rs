use std::sync::Arc;

use crate::catalog::{index_key_for, TableOid};
use crate::common::types::Rid;
use crate::query::executor::context::ExecutorContext;
use crate::query::executor::operators::{lock_for_write, unlock_after_failure, Operator};
use crate::query::executor::result::{QueryError, QueryResult, Tuple};
use crate::transaction::WriteRecord;

/// Rewrites every row produced by the child through `update_fn`, keeping
/// the indexes in sync and logging undo records. Each affected row is
/// exclusively locked (upgrading from shared where the scan below already
/// locked it). Produces no rows.
pub struct UpdateExecutor {
    ctx: Arc<ExecutorContext>,
    table_oid: TableOid,
    child: Box<dyn Operator>,
    update_fn: Box<dyn Fn(&Tuple) -> Tuple + Send + Sync>,
    done: bool,
}

impl UpdateExecutor {
    pub fn new(
        ctx: Arc<ExecutorContext>,
        table_oid: TableOid,
        child: Box<dyn Operator>,
        update_fn: Box<dyn Fn(&Tuple) -> Tuple + Send + Sync>,
    ) -> Self {
        Self {
            ctx,
            table_oid,
            child,
            update_fn,
            done: false,
        }
    }
}

impl Operator for UpdateExecutor {
    fn init(&mut self) -> QueryResult<()> {
        self.done = false;
        self.child.init()
    }

    fn next(&mut self) -> QueryResult<Option<(Tuple, Rid)>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;

        let table = self
            .ctx
            .catalog()
            .get_table(self.table_oid)
            .ok_or_else(|| QueryError::TableNotFound(format!("oid {}", self.table_oid)))?;
        let txn = Arc::clone(self.ctx.txn());
        let lock_manager = Arc::clone(self.ctx.lock_manager());
        let indexes = self.ctx.catalog().get_table_indexes(&table.name);

        while let Some((old_tuple, rid)) = self.child.next()? {
            if !lock_for_write(&txn, &lock_manager, rid)? {
                return Ok(None);
            }

            let new_tuple = (self.update_fn)(&old_tuple);
            let old_bytes = old_tuple.to_bytes()?;
            if let Err(e) = table.heap.update(rid, &new_tuple.to_bytes()?) {
                unlock_after_failure(&txn, &lock_manager, rid);
                return Err(e.into());
            }

            txn.append_write_record(WriteRecord::TableUpdate {
                rid,
                old_data: old_bytes,
                heap: Arc::clone(&table.heap),
            });

            for index_info in &indexes {
                // The stale entry is keyed by the pre-image.
                let old_key = index_key_for(&old_tuple.values[index_info.key_column]);
                let new_key = index_key_for(&new_tuple.values[index_info.key_column]);
                index_info.index.remove(&old_key, &rid)?;
                index_info.index.insert(&new_key, &rid)?;
                txn.append_write_record(WriteRecord::IndexUpdate {
                    index_oid: index_info.oid,
                    old_key,
                    new_key,
                    rid,
                });
            }
            // The exclusive lock is held until commit or abort; only the
            // failed-mutation path above gives it back early.
        }

        Ok(None)
    }

    fn close(&mut self) -> QueryResult<()> {
        self.child.close()
    }
}
