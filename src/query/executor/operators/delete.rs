use std::sync::Arc;

use crate::catalog::{index_key_for, TableOid};
use crate::common::types::Rid;
use crate::query::executor::context::ExecutorContext;
use crate::query::executor::operators::{lock_for_write, unlock_after_failure, Operator};
use crate::query::executor::result::{QueryError, QueryResult, Tuple};
use crate::transaction::WriteRecord;

/// Tombstones every row produced by the child and removes its index
/// entries, logging undo records. Deletes become permanent at commit and
/// are rolled back in place on abort. Produces no rows.
pub struct DeleteExecutor {
    ctx: Arc<ExecutorContext>,
    table_oid: TableOid,
    child: Box<dyn Operator>,
    done: bool,
}

impl DeleteExecutor {
    pub fn new(ctx: Arc<ExecutorContext>, table_oid: TableOid, child: Box<dyn Operator>) -> Self {
        Self {
            ctx,
            table_oid,
            child,
            done: false,
        }
    }
}

impl Operator for DeleteExecutor {
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

        while let Some((tuple, rid)) = self.child.next()? {
            if !lock_for_write(&txn, &lock_manager, rid)? {
                return Ok(None);
            }

            if let Err(e) = table.heap.mark_delete(rid) {
                unlock_after_failure(&txn, &lock_manager, rid);
                return Err(e.into());
            }

            txn.append_write_record(WriteRecord::TableDelete {
                rid,
                heap: Arc::clone(&table.heap),
            });

            for index_info in &indexes {
                let key = index_key_for(&tuple.values[index_info.key_column]);
                index_info.index.remove(&key, &rid)?;
                txn.append_write_record(WriteRecord::IndexDelete {
                    index_oid: index_info.oid,
                    key,
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
