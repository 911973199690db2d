use std::collections::HashMap;

use crate::common::types::Rid;
use crate::query::executor::operators::{synthetic_rid, Operator};
use crate::query::executor::result::{DataValue, QueryResult, Tuple};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateType {
    CountStar,
    Count,
    Sum,
    Min,
    Max,
}

/// One aggregate over a child column (the column is ignored for
/// `CountStar`).
#[derive(Debug, Clone, Copy)]
pub struct Aggregate {
    pub kind: AggregateType,
    pub column: usize,
}

/// Hash aggregation: groups child rows by the group-by columns, folds
/// each group through the aggregates, then iterates the groups. Output
/// rows are the group-by values followed by the aggregate values.
pub struct AggregationExecutor {
    child: Box<dyn Operator>,
    group_by: Vec<usize>,
    aggregates: Vec<Aggregate>,
    having: Option<Box<dyn Fn(&[DataValue], &[DataValue]) -> bool + Send + Sync>>,
    results: Vec<Tuple>,
    cursor: usize,
    built: bool,
}

impl AggregationExecutor {
    pub fn new(
        child: Box<dyn Operator>,
        group_by: Vec<usize>,
        aggregates: Vec<Aggregate>,
        having: Option<Box<dyn Fn(&[DataValue], &[DataValue]) -> bool + Send + Sync>>,
    ) -> Self {
        Self {
            child,
            group_by,
            aggregates,
            having,
            results: Vec::new(),
            cursor: 0,
            built: false,
        }
    }

    fn initial_accumulators(&self) -> Vec<DataValue> {
        self.aggregates
            .iter()
            .map(|agg| match agg.kind {
                AggregateType::CountStar | AggregateType::Count => DataValue::Integer(0),
                AggregateType::Sum => DataValue::Integer(0),
                AggregateType::Min | AggregateType::Max => DataValue::Null,
            })
            .collect()
    }

    fn combine(&self, accumulators: &mut [DataValue], tuple: &Tuple) {
        for (accumulator, agg) in accumulators.iter_mut().zip(self.aggregates.iter()) {
            let input = tuple.values.get(agg.column);
            match agg.kind {
                AggregateType::CountStar => {
                    if let DataValue::Integer(n) = accumulator {
                        *n += 1;
                    }
                }
                AggregateType::Count => {
                    if let (DataValue::Integer(n), Some(value)) = (&mut *accumulator, input) {
                        if *value != DataValue::Null {
                            *n += 1;
                        }
                    }
                }
                AggregateType::Sum => {
                    if let Some(value) = input {
                        *accumulator = match (&*accumulator, value) {
                            (DataValue::Integer(a), DataValue::Integer(b)) => {
                                DataValue::Integer(a + b)
                            }
                            (DataValue::Integer(a), DataValue::Float(b)) => {
                                DataValue::Float(*a as f64 + b)
                            }
                            (DataValue::Float(a), DataValue::Integer(b)) => {
                                DataValue::Float(a + *b as f64)
                            }
                            (DataValue::Float(a), DataValue::Float(b)) => DataValue::Float(a + b),
                            (current, _) => current.clone(),
                        };
                    }
                }
                AggregateType::Min => {
                    if let Some(value) = input {
                        if *accumulator == DataValue::Null
                            || value.partial_cmp(accumulator) == Some(std::cmp::Ordering::Less)
                        {
                            *accumulator = value.clone();
                        }
                    }
                }
                AggregateType::Max => {
                    if let Some(value) = input {
                        if *accumulator == DataValue::Null
                            || value.partial_cmp(accumulator) == Some(std::cmp::Ordering::Greater)
                        {
                            *accumulator = value.clone();
                        }
                    }
                }
            }
        }
    }

    fn build(&mut self) -> QueryResult<()> {
        let mut groups: HashMap<Vec<DataValue>, Vec<DataValue>> = HashMap::new();
        let mut group_order: Vec<Vec<DataValue>> = Vec::new();

        while let Some((tuple, _)) = self.child.next()? {
            let key: Vec<DataValue> = self
                .group_by
                .iter()
                .map(|&idx| tuple.values[idx].clone())
                .collect();
            if !groups.contains_key(&key) {
                groups.insert(key.clone(), self.initial_accumulators());
                group_order.push(key.clone());
            }
            let accumulators = groups.get_mut(&key).expect("group exists");
            self.combine(accumulators, &tuple);
        }

        for key in group_order {
            let accumulators = groups.remove(&key).expect("group exists");
            if let Some(having) = &self.having {
                if !having(&key, &accumulators) {
                    continue;
                }
            }
            let mut values = key;
            values.extend(accumulators);
            self.results.push(Tuple::new(values));
        }
        self.built = true;
        Ok(())
    }
}

impl Operator for AggregationExecutor {
    fn init(&mut self) -> QueryResult<()> {
        self.results.clear();
        self.cursor = 0;
        self.built = false;
        self.child.init()
    }

    fn next(&mut self) -> QueryResult<Option<(Tuple, Rid)>> {
        if !self.built {
            self.build()?;
        }
        if self.cursor >= self.results.len() {
            return Ok(None);
        }
        let tuple = self.results[self.cursor].clone();
        self.cursor += 1;
        Ok(Some((tuple, synthetic_rid())))
    }

    fn close(&mut self) -> QueryResult<()> {
        self.results.clear();
        self.child.close()
    }
}
