use std::collections::{HashMap, VecDeque};

use crate::common::types::Rid;
use crate::query::executor::operators::{synthetic_rid, Operator};
use crate::query::executor::result::{DataValue, QueryResult, Tuple};

/// Nested loop join: every pair of child rows is tested against the join
/// predicate. The right side is re-initialized for each left row.
pub struct NestedLoopJoinExecutor {
    left: Box<dyn Operator>,
    right: Box<dyn Operator>,
    predicate: Box<dyn Fn(&Tuple, &Tuple) -> bool + Send + Sync>,
    current_left: Option<Tuple>,
}

impl NestedLoopJoinExecutor {
    pub fn new(
        left: Box<dyn Operator>,
        right: Box<dyn Operator>,
        predicate: Box<dyn Fn(&Tuple, &Tuple) -> bool + Send + Sync>,
    ) -> Self {
        Self {
            left,
            right,
            predicate,
            current_left: None,
        }
    }

    fn joined(left: &Tuple, right: &Tuple) -> Tuple {
        let mut values = left.values.clone();
        values.extend(right.values.iter().cloned());
        Tuple::new(values)
    }
}

impl Operator for NestedLoopJoinExecutor {
    fn init(&mut self) -> QueryResult<()> {
        self.left.init()?;
        self.right.init()?;
        self.current_left = self.left.next()?.map(|(tuple, _)| tuple);
        Ok(())
    }

    fn next(&mut self) -> QueryResult<Option<(Tuple, Rid)>> {
        loop {
            let left_tuple = match &self.current_left {
                Some(tuple) => tuple.clone(),
                None => return Ok(None),
            };

            while let Some((right_tuple, _)) = self.right.next()? {
                if (self.predicate)(&left_tuple, &right_tuple) {
                    return Ok(Some((Self::joined(&left_tuple, &right_tuple), synthetic_rid())));
                }
            }

            // Right side exhausted: advance left, rewind right.
            self.current_left = self.left.next()?.map(|(tuple, _)| tuple);
            if self.current_left.is_some() {
                self.right.init()?;
            }
        }
    }

    fn close(&mut self) -> QueryResult<()> {
        self.left.close()?;
        self.right.close()
    }
}

/// Hash join: builds a table over the left child keyed by the join
/// column, then streams the right child and probes.
pub struct HashJoinExecutor {
    left: Box<dyn Operator>,
    right: Box<dyn Operator>,
    left_key: Box<dyn Fn(&Tuple) -> DataValue + Send + Sync>,
    right_key: Box<dyn Fn(&Tuple) -> DataValue + Send + Sync>,
    hash_table: HashMap<DataValue, Vec<Tuple>>,
    pending: VecDeque<Tuple>,
}

impl HashJoinExecutor {
    pub fn new(
        left: Box<dyn Operator>,
        right: Box<dyn Operator>,
        left_key: Box<dyn Fn(&Tuple) -> DataValue + Send + Sync>,
        right_key: Box<dyn Fn(&Tuple) -> DataValue + Send + Sync>,
    ) -> Self {
        Self {
            left,
            right,
            left_key,
            right_key,
            hash_table: HashMap::new(),
            pending: VecDeque::new(),
        }
    }
}

impl Operator for HashJoinExecutor {
    fn init(&mut self) -> QueryResult<()> {
        self.left.init()?;
        self.right.init()?;
        self.hash_table.clear();
        self.pending.clear();

        // Build phase over the left child.
        while let Some((tuple, _)) = self.left.next()? {
            let key = (self.left_key)(&tuple);
            self.hash_table.entry(key).or_default().push(tuple);
        }
        Ok(())
    }

    fn next(&mut self) -> QueryResult<Option<(Tuple, Rid)>> {
        loop {
            if let Some(tuple) = self.pending.pop_front() {
                return Ok(Some((tuple, synthetic_rid())));
            }

            let (right_tuple, _) = match self.right.next()? {
                Some(row) => row,
                None => return Ok(None),
            };
            let key = (self.right_key)(&right_tuple);
            if let Some(matches) = self.hash_table.get(&key) {
                for left_tuple in matches {
                    let mut values = left_tuple.values.clone();
                    values.extend(right_tuple.values.iter().cloned());
                    self.pending.push_back(Tuple::new(values));
                }
            }
        }
    }

    fn close(&mut self) -> QueryResult<()> {
        self.hash_table.clear();
        self.pending.clear();
        self.left.close()?;
        self.right.close()
    }
}
