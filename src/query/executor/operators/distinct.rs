use std::collections::HashSet;

use crate::common::types::Rid;
use crate::query::executor::operators::Operator;
use crate::query::executor::result::{DataValue, QueryResult, Tuple};

/// Suppresses duplicate child rows, comparing full value vectors.
pub struct DistinctExecutor {
    child: Box<dyn Operator>,
    seen: HashSet<Vec<DataValue>>,
}

impl DistinctExecutor {
    pub fn new(child: Box<dyn Operator>) -> Self {
        Self {
            child,
            seen: HashSet::new(),
        }
    }
}

impl Operator for DistinctExecutor {
    fn init(&mut self) -> QueryResult<()> {
        self.seen.clear();
        self.child.init()
    }

    fn next(&mut self) -> QueryResult<Option<(Tuple, Rid)>> {
        while let Some((tuple, rid)) = self.child.next()? {
            if self.seen.insert(tuple.values.clone()) {
                return Ok(Some((tuple, rid)));
            }
        }
        Ok(None)
    }

    fn close(&mut self) -> QueryResult<()> {
        self.seen.clear();
        self.child.close()
    }
}
