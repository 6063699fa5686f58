use std::collections::HashMap;
use std::sync::Arc;

use crate::common::types::{Rid, INVALID_PAGE_ID};
use crate::execution::error::ExecutionError;
use crate::execution::plan::{AggregationPlan, AggregationType};
use crate::execution::{BoxedExecutor, Executor, ExecutorContext};
use crate::storage::table::{Column, DataType, Schema, Tuple, Value};

/// Hash aggregation: `init` materializes the whole aggregate table, `next`
/// drains it one group at a time.
pub struct AggregationExecutor {
    _ctx: Arc<ExecutorContext>,
    plan: AggregationPlan,
    child: BoxedExecutor,
    schema: Schema,
    results: Vec<Tuple>,
    position: usize,
}

impl AggregationExecutor {
    pub fn new(ctx: Arc<ExecutorContext>, plan: AggregationPlan, child: BoxedExecutor) -> Self {
        let mut columns = Vec::new();
        for (i, _) in plan.group_bys.iter().enumerate() {
            columns.push(Column::new(format!("group_{}", i), DataType::Integer));
        }
        for (i, _) in plan.aggregates.iter().enumerate() {
            columns.push(Column::new(format!("agg_{}", i), DataType::Integer));
        }
        Self {
            _ctx: ctx,
            plan,
            child,
            schema: Schema::new(columns),
            results: Vec::new(),
            position: 0,
        }
    }

    fn initial_states(&self) -> Vec<Value> {
        self.plan
            .aggregates
            .iter()
            .map(|(agg_type, _)| match agg_type {
                AggregationType::CountStar => Value::Integer(0),
                _ => Value::Null,
            })
            .collect()
    }

    fn combine(agg_type: AggregationType, state: &mut Value, input: Value) {
        match agg_type {
            AggregationType::CountStar => {
                let n = state.as_integer().unwrap_or(0);
                *state = Value::Integer(n + 1);
            }
            AggregationType::Count => {
                if !input.is_null() {
                    let n = state.as_integer().unwrap_or(0);
                    *state = Value::Integer(n + 1);
                }
            }
            AggregationType::Sum => {
                if let Value::Integer(v) = input {
                    *state = match state {
                        Value::Integer(acc) => Value::Integer(*acc + v),
                        _ => Value::Integer(v),
                    };
                }
            }
            AggregationType::Min => {
                if !input.is_null() && (state.is_null() || input < *state) {
                    *state = input;
                }
            }
            AggregationType::Max => {
                if !input.is_null() && (state.is_null() || input > *state) {
                    *state = input;
                }
            }
        }
    }
}

impl Executor for AggregationExecutor {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.child.init()?;

        let mut table: HashMap<Vec<Value>, Vec<Value>> = HashMap::new();
        let child_schema = self.child.output_schema().clone();

        while let Some((tuple, _)) = self.child.next()? {
            let mut group = Vec::with_capacity(self.plan.group_bys.len());
            for expr in &self.plan.group_bys {
                group.push(expr.evaluate(&tuple, &child_schema)?);
            }

            let initial = self.initial_states();
            let states = table.entry(group).or_insert(initial);
            for (i, (agg_type, expr)) in self.plan.aggregates.iter().enumerate() {
                let input = expr.evaluate(&tuple, &child_schema)?;
                Self::combine(*agg_type, &mut states[i], input);
            }
        }

        // No groups and no input: a single row of initial states (count-star
        // zero, everything else null). Grouped empty input yields nothing.
        if table.is_empty() && self.plan.group_bys.is_empty() {
            table.insert(Vec::new(), self.initial_states());
        }

        self.results = table
            .into_iter()
            .map(|(mut group, states)| {
                group.extend(states);
                Tuple::new(group)
            })
            .collect();
        self.position = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, ExecutionError> {
        if self.position >= self.results.len() {
            return Ok(None);
        }
        let tuple = self.results[self.position].clone();
        self.position += 1;
        Ok(Some((tuple, Rid::new(INVALID_PAGE_ID, 0))))
    }

    fn output_schema(&self) -> &Schema {
        &self.schema
    }
}
