use std::sync::Arc;

use crate::catalog::TableInfo;
use crate::common::types::{Rid, INVALID_PAGE_ID};
use crate::execution::error::ExecutionError;
use crate::execution::plan::UpdatePlan;
use crate::execution::{BoxedExecutor, Executor, ExecutorContext};
use crate::storage::page::TupleMeta;
use crate::storage::table::{Column, DataType, Schema, Tuple, Value};
use crate::transaction::LockMode;

/// Update as delete-then-insert: the old tuple is tombstoned, the rewritten
/// tuple appended, and every index sees a remove followed by an insert.
pub struct UpdateExecutor {
    ctx: Arc<ExecutorContext>,
    plan: UpdatePlan,
    table: Arc<TableInfo>,
    child: BoxedExecutor,
    schema: Schema,
    done: bool,
}

impl UpdateExecutor {
    pub fn new(
        ctx: Arc<ExecutorContext>,
        plan: UpdatePlan,
        child: BoxedExecutor,
    ) -> Result<Self, ExecutionError> {
        let table = ctx
            .catalog
            .table_by_oid(plan.table_oid)
            .ok_or(ExecutionError::UnknownTable(plan.table_oid))?;
        Ok(Self {
            ctx,
            plan,
            table,
            child,
            schema: Schema::new(vec![Column::new("updated", DataType::Integer)]),
            done: false,
        })
    }
}

impl Executor for UpdateExecutor {
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
        while let Some((old_tuple, old_rid)) = self.child.next()? {
            let granted = self.ctx.lock_manager.lock_row(
                &self.ctx.txn,
                LockMode::Exclusive,
                self.table.oid,
                old_rid,
            )?;
            if !granted {
                return Err(ExecutionError::LockDenied);
            }

            let mut new_values = Vec::with_capacity(self.plan.targets.len());
            for target in &self.plan.targets {
                new_values.push(target.evaluate(&old_tuple, &self.table.schema)?);
            }
            let new_tuple = Tuple::new(new_values);

            self.table
                .heap
                .update_tuple_meta(TupleMeta { is_deleted: true }, old_rid)?;
            let new_rid = self.table.heap.insert_tuple(TupleMeta::live(), &new_tuple)?;
            let granted = self.ctx.lock_manager.lock_row(
                &self.ctx.txn,
                LockMode::Exclusive,
                self.table.oid,
                new_rid,
            )?;
            if !granted {
                return Err(ExecutionError::LockDenied);
            }

            for index in self.ctx.catalog.table_indexes(self.table.oid) {
                if let Some(old_key) = index.key_of(&old_tuple) {
                    index.tree.remove(&old_key)?;
                }
                if let Some(new_key) = index.key_of(&new_tuple) {
                    index.tree.insert(new_key, new_rid)?;
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
