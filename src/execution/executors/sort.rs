use std::sync::Arc;

use crate::common::types::Rid;
use crate::execution::error::ExecutionError;
use crate::execution::executors::compare_keys;
use crate::execution::plan::{OrderByType, SortPlan};
use crate::execution::{BoxedExecutor, Executor, ExecutorContext};
use crate::storage::table::{Schema, Tuple, Value};

/// Full materializing sort over the order-by list, ties broken by the next
/// key in sequence.
pub struct SortExecutor {
    _ctx: Arc<ExecutorContext>,
    plan: SortPlan,
    child: BoxedExecutor,
    sorted: Vec<(Tuple, Rid)>,
    position: usize,
}

impl SortExecutor {
    pub fn new(ctx: Arc<ExecutorContext>, plan: SortPlan, child: BoxedExecutor) -> Self {
        Self {
            _ctx: ctx,
            plan,
            child,
            sorted: Vec::new(),
            position: 0,
        }
    }
}

impl Executor for SortExecutor {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.child.init()?;
        let child_schema = self.child.output_schema().clone();
        let directions: Vec<OrderByType> =
            self.plan.order_bys.iter().map(|(d, _)| *d).collect();

        // Precompute the sort keys so the comparator stays infallible.
        let mut keyed: Vec<(Vec<Value>, Tuple, Rid)> = Vec::new();
        while let Some((tuple, rid)) = self.child.next()? {
            let mut keys = Vec::with_capacity(self.plan.order_bys.len());
            for (_, expr) in &self.plan.order_bys {
                keys.push(expr.evaluate(&tuple, &child_schema)?);
            }
            keyed.push((keys, tuple, rid));
        }

        keyed.sort_by(|a, b| compare_keys(&a.0, &b.0, &directions));
        self.sorted = keyed.into_iter().map(|(_, t, r)| (t, r)).collect();
        self.position = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, ExecutionError> {
        if self.position >= self.sorted.len() {
            return Ok(None);
        }
        let out = self.sorted[self.position].clone();
        self.position += 1;
        Ok(Some(out))
    }

    fn output_schema(&self) -> &Schema {
        self.child.output_schema()
    }
}
