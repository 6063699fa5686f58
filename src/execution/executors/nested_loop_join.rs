use crate::common::types::{Rid, INVALID_PAGE_ID};
use crate::execution::error::ExecutionError;
use crate::execution::plan::{JoinType, NestedLoopJoinPlan};
use crate::execution::{BoxedExecutor, Executor, ExecutorContext};
use crate::storage::table::{Schema, Tuple, Value};
use std::sync::Arc;

/// Left-deep nested loop join. The right side is materialized once during
/// `init` and replayed for every left tuple.
///
/// INNER emits the predicate-filtered cross product; LEFT additionally
/// emits one null-padded row for any left tuple that matched nothing, with
/// the matched flag resetting on every fresh left tuple.
pub struct NestedLoopJoinExecutor {
    _ctx: Arc<ExecutorContext>,
    plan: NestedLoopJoinPlan,
    left: BoxedExecutor,
    right: BoxedExecutor,
    schema: Schema,
    right_tuples: Vec<Tuple>,
    current_left: Option<Tuple>,
    right_pos: usize,
    left_matched: bool,
}

impl NestedLoopJoinExecutor {
    pub fn new(
        ctx: Arc<ExecutorContext>,
        plan: NestedLoopJoinPlan,
        left: BoxedExecutor,
        right: BoxedExecutor,
    ) -> Self {
        let schema = left.output_schema().join(right.output_schema());
        Self {
            _ctx: ctx,
            plan,
            left,
            right,
            schema,
            right_tuples: Vec::new(),
            current_left: None,
            right_pos: 0,
            left_matched: false,
        }
    }
}

impl Executor for NestedLoopJoinExecutor {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.left.init()?;
        self.right.init()?;
        self.right_tuples.clear();
        while let Some((tuple, _)) = self.right.next()? {
            self.right_tuples.push(tuple);
        }
        self.current_left = None;
        self.right_pos = 0;
        self.left_matched = false;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, ExecutionError> {
        let out_rid = Rid::new(INVALID_PAGE_ID, 0);
        loop {
            if self.current_left.is_none() {
                match self.left.next()? {
                    Some((tuple, _)) => {
                        self.current_left = Some(tuple);
                        self.right_pos = 0;
                        self.left_matched = false;
                    }
                    None => return Ok(None),
                }
            }
            let left_tuple = self.current_left.as_ref().unwrap();

            while self.right_pos < self.right_tuples.len() {
                let right_tuple = &self.right_tuples[self.right_pos];
                self.right_pos += 1;

                let matched = self.plan.predicate.evaluate_join(
                    left_tuple,
                    self.left.output_schema(),
                    right_tuple,
                    self.right.output_schema(),
                )? == Value::Boolean(true);
                if matched {
                    self.left_matched = true;
                    return Ok(Some((left_tuple.join(right_tuple), out_rid)));
                }
            }

            // Right side exhausted for this left tuple.
            let pad = self.plan.join_type == JoinType::Left && !self.left_matched;
            let left_tuple = self.current_left.take().unwrap();
            if pad {
                let nulls = Tuple::nulls(self.right.output_schema());
                return Ok(Some((left_tuple.join(&nulls), out_rid)));
            }
        }
    }

    fn output_schema(&self) -> &Schema {
        &self.schema
    }
}
