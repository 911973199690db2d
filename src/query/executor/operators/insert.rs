use std::sync::Arc;

use crate::catalog::{index_key_for, TableOid};
use crate::common::types::Rid;
use crate::query::executor::context::ExecutorContext;
use crate::query::executor::operators::Operator;
use crate::query::executor::result::{QueryError, QueryResult, Tuple};
use crate::transaction::WriteRecord;

/// Row source for an insert: literal tuples or a child operator.
pub enum InsertSource {
    Raw(Vec<Tuple>),
    Child(Box<dyn Operator>),
}

/// Inserts every source row into the table and its indexes, recording
/// undo information on the transaction. Produces no rows itself; the
/// whole batch is applied by one `next` call, iteratively.
pub struct InsertExecutor {
    ctx: Arc<ExecutorContext>,
    table_oid: TableOid,
    source: InsertSource,
    raw_cursor: usize,
    done: bool,
}

impl InsertExecutor {
    pub fn new(ctx: Arc<ExecutorContext>, table_oid: TableOid, source: InsertSource) -> Self {
        Self {
            ctx,
            table_oid,
            source,
            raw_cursor: 0,
            done: false,
        }
    }

    fn next_source_tuple(&mut self) -> QueryResult<Option<Tuple>> {
        match &mut self.source {
            InsertSource::Raw(tuples) => {
                if self.raw_cursor < tuples.len() {
                    let tuple = tuples[self.raw_cursor].clone();
                    self.raw_cursor += 1;
                    Ok(Some(tuple))
                } else {
                    Ok(None)
                }
            }
            InsertSource::Child(child) => Ok(child.next()?.map(|(tuple, _rid)| tuple)),
        }
    }
}

impl Operator for InsertExecutor {
    fn init(&mut self) -> QueryResult<()> {
        self.raw_cursor = 0;
        self.done = false;
        if let InsertSource::Child(child) = &mut self.source {
            child.init()?;
        }
        Ok(())
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

        while let Some(tuple) = self.next_source_tuple()? {
            let rid = table.heap.insert(&tuple.to_bytes()?)?;

            // The rid is brand new, so this lock cannot block, but it
            // keeps the row covered until commit like any other write.
            if !lock_manager.lock_exclusive(&txn, rid)? {
                return Ok(None);
            }

            txn.append_write_record(WriteRecord::TableInsert {
                rid,
                heap: Arc::clone(&table.heap),
            });

            for index_info in &indexes {
                let key = index_key_for(&tuple.values[index_info.key_column]);
                index_info.index.insert(&key, &rid)?;
                txn.append_write_record(WriteRecord::IndexInsert {
                    index_oid: index_info.oid,
                    key,
                    rid,
                });
            }
        }

        Ok(None)
    }

    fn close(&mut self) -> QueryResult<()> {
        if let InsertSource::Child(child) = &mut self.source {
            child.close()?;
        }
        Ok(())
    }
}
