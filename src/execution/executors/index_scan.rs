use std::sync::Arc;

use crate::catalog::{IndexInfo, TableInfo};
use crate::common::types::Rid;
use crate::execution::error::ExecutionError;
use crate::execution::plan::IndexScanPlan;
use crate::execution::{Executor, ExecutorContext};
use crate::index::btree::BPlusTreeIterator;
use crate::storage::table::{Schema, Tuple};

/// Walks a B+ tree index in key order and materializes each hit from the
/// table heap, skipping tombstones.
pub struct IndexScanExecutor {
    _ctx: Arc<ExecutorContext>,
    index: Arc<IndexInfo>,
    table: Arc<TableInfo>,
    iter: Option<BPlusTreeIterator<i64>>,
    start_key: Option<i64>,
}

impl IndexScanExecutor {
    pub fn new(ctx: Arc<ExecutorContext>, plan: IndexScanPlan) -> Result<Self, ExecutionError> {
        let index = ctx
            .catalog
            .index_by_oid(plan.index_oid)
            .ok_or(ExecutionError::UnknownIndex(plan.index_oid))?;
        let table = ctx
            .catalog
            .table_by_oid(index.table_oid)
            .ok_or(ExecutionError::UnknownTable(index.table_oid))?;
        Ok(Self {
            _ctx: ctx,
            index,
            table,
            iter: None,
            start_key: plan.start_key,
        })
    }
}

impl Executor for IndexScanExecutor {
    fn init(&mut self) -> Result<(), ExecutionError> {
        let iter = match self.start_key {
            Some(key) => self.index.tree.iter_from(&key)?,
            None => self.index.tree.iter()?,
        };
        self.iter = Some(iter);
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, ExecutionError> {
        loop {
            let entry = match self.iter.as_mut().expect("init() not called").next() {
                Some(entry) => entry?,
                None => return Ok(None),
            };
            let (_key, rid) = entry;
            let (meta, tuple) = self.table.heap.get_tuple(rid)?;
            if meta.is_deleted {
                continue;
            }
            return Ok(Some((tuple, rid)));
        }
    }

    fn output_schema(&self) -> &Schema {
        &self.table.schema
    }
}
