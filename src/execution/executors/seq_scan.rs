use std::sync::Arc;

use crate::catalog::TableInfo;
use crate::common::types::Rid;
use crate::execution::error::ExecutionError;
use crate::execution::plan::SeqScanPlan;
use crate::execution::{Executor, ExecutorContext};
use crate::storage::table::{Schema, TableIterator, Tuple, Value};
use crate::transaction::{IsolationLevel, LockMode};

/// Full scan of a table heap, skipping tombstones.
///
/// Locking follows the transaction's isolation level: READ_UNCOMMITTED
/// takes no locks at all; the other levels take IS on the table and S on
/// each returned row, which READ_COMMITTED drops again right away.
pub struct SeqScanExecutor {
    ctx: Arc<ExecutorContext>,
    plan: SeqScanPlan,
    table: Arc<TableInfo>,
    iter: Option<TableIterator>,
}

impl SeqScanExecutor {
    pub fn new(ctx: Arc<ExecutorContext>, plan: SeqScanPlan) -> Result<Self, ExecutionError> {
        let table = ctx
            .catalog
            .table_by_oid(plan.table_oid)
            .ok_or(ExecutionError::UnknownTable(plan.table_oid))?;
        Ok(Self {
            ctx,
            plan,
            table,
            iter: None,
        })
    }

    fn takes_locks(&self) -> bool {
        self.ctx.txn.isolation_level() != IsolationLevel::ReadUncommitted
    }
}

impl Executor for SeqScanExecutor {
    fn init(&mut self) -> Result<(), ExecutionError> {
        if self.takes_locks() && self.ctx.txn.held_table_lock(self.table.oid).is_none() {
            let granted = self.ctx.lock_manager.lock_table(
                &self.ctx.txn,
                LockMode::IntentionShared,
                self.table.oid,
            )?;
            if !granted {
                return Err(ExecutionError::LockDenied);
            }
        }
        self.iter = Some(self.table.heap.iter());
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, ExecutionError> {
        loop {
            let entry = match self.iter.as_mut().expect("init() not called").next() {
                Some(entry) => entry?,
                None => return Ok(None),
            };
            let (meta, tuple, rid) = entry;
            if meta.is_deleted {
                continue;
            }
            if let Some(predicate) = &self.plan.predicate {
                if predicate.evaluate(&tuple, &self.table.schema)? != Value::Boolean(true) {
                    continue;
                }
            }

            // Skip the row lock when this transaction already holds one
            // (a re-scan after its own writes would otherwise downgrade).
            if self.takes_locks()
                && !self
                    .ctx
                    .txn
                    .holds_row_lock(LockMode::Exclusive, self.table.oid, rid)
            {
                let granted = self.ctx.lock_manager.lock_row(
                    &self.ctx.txn,
                    LockMode::Shared,
                    self.table.oid,
                    rid,
                )?;
                if !granted {
                    return Err(ExecutionError::LockDenied);
                }
                if self.ctx.txn.isolation_level() == IsolationLevel::ReadCommitted {
                    // RC only needs the lock for the duration of the read.
                    self.ctx
                        .lock_manager
                        .unlock_row(&self.ctx.txn, self.table.oid, rid, true)?;
                }
            }
            return Ok(Some((tuple, rid)));
        }
    }

    fn output_schema(&self) -> &Schema {
        &self.table.schema
    }
}
