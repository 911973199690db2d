use crate::common::types::Rid;
use crate::query::executor::operators::Operator;
use crate::query::executor::result::{QueryResult, Tuple};

/// Passes through at most `limit` child rows.
pub struct LimitExecutor {
    child: Box<dyn Operator>,
    limit: usize,
    produced: usize,
}

impl LimitExecutor {
    pub fn new(child: Box<dyn Operator>, limit: usize) -> Self {
        Self {
            child,
            limit,
            produced: 0,
        }
    }
}

impl Operator for LimitExecutor {
    fn init(&mut self) -> QueryResult<()> {
        self.produced = 0;
        self.child.init()
    }

    fn next(&mut self) -> QueryResult<Option<(Tuple, Rid)>> {
        if self.produced >= self.limit {
            return Ok(None);
        }
        match self.child.next()? {
            Some(row) => {
                self.produced += 1;
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }

    fn close(&mut self) -> QueryResult<()> {
        self.child.close()
    }
}
