use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::common::types::Rid;
use crate::execution::error::ExecutionError;
use crate::execution::executors::compare_keys;
use crate::execution::plan::{OrderByType, TopNPlan};
use crate::execution::{BoxedExecutor, Executor, ExecutorContext};
use crate::storage::table::{Schema, Tuple, Value};

/// Heap entry ordered so that the *worst* tuple under the sort order sits
/// on top of the max-heap and gets displaced first.
struct HeapEntry {
    keys: Vec<Value>,
    directions: Arc<Vec<OrderByType>>,
    tuple: Tuple,
    rid: Rid,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_keys(&self.keys, &other.keys, &self.directions)
    }
}

/// Keeps only the N best tuples while consuming its child, then drains them
/// in sort order.
pub struct TopNExecutor {
    _ctx: Arc<ExecutorContext>,
    plan: TopNPlan,
    child: BoxedExecutor,
    results: Vec<(Tuple, Rid)>,
    position: usize,
}

impl TopNExecutor {
    pub fn new(ctx: Arc<ExecutorContext>, plan: TopNPlan, child: BoxedExecutor) -> Self {
        Self {
            _ctx: ctx,
            plan,
            child,
            results: Vec::new(),
            position: 0,
        }
    }
}

impl Executor for TopNExecutor {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.child.init()?;
        let child_schema = self.child.output_schema().clone();
        let directions: Arc<Vec<OrderByType>> =
            Arc::new(self.plan.order_bys.iter().map(|(d, _)| *d).collect());

        let mut heap: BinaryHeap<HeapEntry> = BinaryHeap::with_capacity(self.plan.n + 1);
        while let Some((tuple, rid)) = self.child.next()? {
            let mut keys = Vec::with_capacity(self.plan.order_bys.len());
            for (_, expr) in &self.plan.order_bys {
                keys.push(expr.evaluate(&tuple, &child_schema)?);
            }
            heap.push(HeapEntry {
                keys,
                directions: directions.clone(),
                tuple,
                rid,
            });
            if heap.len() > self.plan.n {
                heap.pop();
            }
        }

        self.results = heap
            .into_sorted_vec()
            .into_iter()
            .map(|e| (e.tuple, e.rid))
            .collect();
        self.position = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, ExecutionError> {
        if self.position >= self.results.len() {
            return Ok(None);
        }
        let out = self.results[self.position].clone();
        self.position += 1;
        Ok(Some(out))
    }

    fn output_schema(&self) -> &Schema {
        self.child.output_schema()
    }
}
