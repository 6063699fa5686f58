use std::sync::Arc;

use crate::catalog::TableInfo;
use crate::common::types::{Rid, INVALID_PAGE_ID};
use crate::execution::error::ExecutionError;
use crate::execution::plan::InsertPlan;
use crate::execution::{BoxedExecutor, Executor, ExecutorContext};
use crate::storage::page::TupleMeta;
use crate::storage::table::{Column, DataType, Schema, Tuple, Value};
use crate::transaction::LockMode;

/// Consumes its child, appending every tuple to the heap and to each index
/// on the table, then reports the row count as a single output tuple.
pub struct InsertExecutor {
    ctx: Arc<ExecutorContext>,
    table: Arc<TableInfo>,
    child: BoxedExecutor,
    schema: Schema,
    done: bool,
}

impl InsertExecutor {
    pub fn new(
        ctx: Arc<ExecutorContext>,
        plan: InsertPlan,
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
            schema: Schema::new(vec![Column::new("inserted", DataType::Integer)]),
            done: false,
        })
    }
}

impl Executor for InsertExecutor {
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
        while let Some((tuple, _)) = self.child.next()? {
            let rid = self.table.heap.insert_tuple(TupleMeta::live(), &tuple)?;
            let granted = self.ctx.lock_manager.lock_row(
                &self.ctx.txn,
                LockMode::Exclusive,
                self.table.oid,
                rid,
            )?;
            if !granted {
                return Err(ExecutionError::LockDenied);
            }

            for index in self.ctx.catalog.table_indexes(self.table.oid) {
                if let Some(key) = index.key_of(&tuple) {
                    index.tree.insert(key, rid)?;
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
