use crate::common::types::{Rid, INVALID_PAGE_ID};
use crate::execution::error::ExecutionError;
use crate::execution::{Executor, ExecutorContext};
use crate::storage::table::{Schema, Tuple};
use std::sync::Arc;

/// Emits a fixed list of tuples; the child side of INSERT ... VALUES.
pub struct ValuesExecutor {
    _ctx: Arc<ExecutorContext>,
    schema: Schema,
    rows: Vec<Tuple>,
    position: usize,
}

impl ValuesExecutor {
    pub fn new(ctx: Arc<ExecutorContext>, schema: Schema, rows: Vec<Tuple>) -> Self {
        Self {
            _ctx: ctx,
            schema,
            rows,
            position: 0,
        }
    }
}

impl Executor for ValuesExecutor {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.position = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, ExecutionError> {
        if self.position >= self.rows.len() {
            return Ok(None);
        }
        let tuple = self.rows[self.position].clone();
        self.position += 1;
        Ok(Some((tuple, Rid::new(INVALID_PAGE_ID, 0))))
    }

    fn output_schema(&self) -> &Schema {
        &self.schema
    }
}
