// Pull-model query execution: every operator implements `Executor` and
// produces tuples one at a time on demand.

pub mod error;
pub mod executors;
pub mod expression;
pub mod plan;

use std::sync::Arc;

use crate::catalog::Catalog;
use crate::common::types::Rid;
use crate::storage::buffer::BufferPoolManager;
use crate::storage::table::{Schema, Tuple};
use crate::transaction::{LockManager, Transaction};

pub use error::ExecutionError;

/// Everything an executor needs from the engine around it.
pub struct ExecutorContext {
    pub bpm: Arc<BufferPoolManager>,
    pub catalog: Arc<Catalog>,
    pub lock_manager: Arc<LockManager>,
    pub txn: Arc<Transaction>,
}

impl ExecutorContext {
    pub fn new(
        bpm: Arc<BufferPoolManager>,
        catalog: Arc<Catalog>,
        lock_manager: Arc<LockManager>,
        txn: Arc<Transaction>,
    ) -> Self {
        Self {
            bpm,
            catalog,
            lock_manager,
            txn,
        }
    }
}

/// The iterator-model contract. `init` runs once and may materialize an
/// input; `next` hands back one tuple with its rid until exhausted.
pub trait Executor {
    fn init(&mut self) -> Result<(), ExecutionError>;
    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, ExecutionError>;
    fn output_schema(&self) -> &Schema;
}

pub type BoxedExecutor = Box<dyn Executor + Send>;
