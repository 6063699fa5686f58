use std::collections::HashMap;
use std::sync::Arc;

use crate::common::types::{Rid, INVALID_PAGE_ID};
use crate::execution::error::ExecutionError;
use crate::execution::plan::{HashJoinPlan, JoinType};
use crate::execution::{BoxedExecutor, Executor, ExecutorContext};
use crate::storage::table::{Schema, Tuple, Value};

/// Equi-join via an in-memory hash table built from the right child during
/// `init` and probed with each left tuple during `next`.
pub struct HashJoinExecutor {
    _ctx: Arc<ExecutorContext>,
    plan: HashJoinPlan,
    left: BoxedExecutor,
    right: BoxedExecutor,
    schema: Schema,
    hash_table: HashMap<Vec<Value>, Vec<Tuple>>,
    current_left: Option<Tuple>,
    current_matches: Vec<Tuple>,
    match_pos: usize,
    left_matched: bool,
}

impl HashJoinExecutor {
    pub fn new(
        ctx: Arc<ExecutorContext>,
        plan: HashJoinPlan,
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
            hash_table: HashMap::new(),
            current_left: None,
            current_matches: Vec::new(),
            match_pos: 0,
            left_matched: false,
        }
    }

    /// Join key for one side; None when any component is NULL, which can
    /// never match anything.
    fn key_of(
        tuple: &Tuple,
        schema: &Schema,
        exprs: &[crate::execution::expression::Expression],
    ) -> Result<Option<Vec<Value>>, ExecutionError> {
        let mut key = Vec::with_capacity(exprs.len());
        for expr in exprs {
            let value = expr.evaluate(tuple, schema)?;
            if value.is_null() {
                return Ok(None);
            }
            key.push(value);
        }
        Ok(Some(key))
    }
}

impl Executor for HashJoinExecutor {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.left.init()?;
        self.right.init()?;

        self.hash_table.clear();
        while let Some((tuple, _)) = self.right.next()? {
            if let Some(key) =
                Self::key_of(&tuple, self.right.output_schema(), &self.plan.right_keys)?
            {
                self.hash_table.entry(key).or_default().push(tuple);
            }
        }
        self.current_left = None;
        self.current_matches = Vec::new();
        self.match_pos = 0;
        self.left_matched = false;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, ExecutionError> {
        let out_rid = Rid::new(INVALID_PAGE_ID, 0);
        loop {
            if self.current_left.is_some() {
                if self.match_pos < self.current_matches.len() {
                    let left_tuple = self.current_left.as_ref().unwrap();
                    let right_tuple = &self.current_matches[self.match_pos];
                    self.match_pos += 1;
                    self.left_matched = true;
                    return Ok(Some((left_tuple.join(right_tuple), out_rid)));
                }
                let pad = self.plan.join_type == JoinType::Left && !self.left_matched;
                let left_tuple = self.current_left.take().unwrap();
                if pad {
                    let nulls = Tuple::nulls(self.right.output_schema());
                    return Ok(Some((left_tuple.join(&nulls), out_rid)));
                }
                continue;
            }

            match self.left.next()? {
                Some((tuple, _)) => {
                    self.current_matches = Self::key_of(
                        &tuple,
                        self.left.output_schema(),
                        &self.plan.left_keys,
                    )?
                    .and_then(|key| self.hash_table.get(&key).cloned())
                    .unwrap_or_default();
                    self.match_pos = 0;
                    self.left_matched = false;
                    self.current_left = Some(tuple);
                }
                None => return Ok(None),
            }
        }
    }

    fn output_schema(&self) -> &Schema {
        &self.schema
    }
}
