use std::sync::Arc;

use crate::catalog::TableInfo;
use crate::common::types::{Rid, INVALID_PAGE_ID};
use crate::execution::error::ExecutionError;
use crate::execution::plan::DeletePlan;
use crate::execution::{BoxedExecutor, Executor, ExecutorContext};
use crate::storage::page::TupleMeta;
use crate::storage::table::{Column, DataType, Schema, Tuple, Value};
use crate::transaction::LockMode;

/// Tombstones every tuple its child produces and removes the matching
/// index entries, then reports the row count.
pub struct DeleteExecutor {
    ctx: Arc<ExecutorContext>,
    table: Arc<TableInfo>,
    child: BoxedExecutor,
    schema: Schema,
    done: bool,
}

impl DeleteExecutor {
    pub fn new(
        ctx: Arc<ExecutorContext>,
        plan: DeletePlan,
        child: BoxedExecutor,
    ) -> Result<Self, ExecutionError> {
        let table = ctx
            .catalog
            .table_by_oid(plan.table_oid)
            .ok_or(ExecutionError::UnknownTable(plan.table_oid))?;
        Ok(Self {
            ctx,
            table,
            child,
            schema: Schema::new(vec![Column::new("deleted", DataType::Integer)]),
            done: false,
        })
    }
}

impl Executor for DeleteExecutor {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.child.init()?;
        let granted = self.ctx.lock_manager.lock_table(
            &self.ctx.txn,
            LockMode::IntentionExclusive,
            self.table.oid,
        )?;
        if !granted {
            return Err(ExecutionError::LockDenied);
        }
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, ExecutionError> {
        if self.done {
            return Ok(None);
        }
        self.done = true;

        let mut count = 0i64;
        while let Some((tuple, rid)) = self.child.next()? {
            let granted = self.ctx.lock_manager.lock_row(
                &self.ctx.txn,
                LockMode::Exclusive,
                self.table.oid,
                rid,
            )?;
            if !granted {
                return Err(ExecutionError::LockDenied);
            }

            self.table
                .heap
                .update_tuple_meta(TupleMeta { is_deleted: true }, rid)?;
            for index in self.ctx.catalog.table_indexes(self.table.oid) {
                if let Some(key) = index.key_of(&tuple) {
                    index.tree.remove(&key)?;
                }
            }
            count += 1;
        }

        Ok(Some((
            Tuple::new(vec![Value::Integer(count)]),
            Rid::new(INVALID_PAGE_ID, 0),
        )))
    }

    fn output_schema(&self) -> &Schema {
        &self.schema
    }
}
