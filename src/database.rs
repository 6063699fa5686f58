use std::path::Path;
use std::sync::Arc;

use crate::catalog::Catalog;
use crate::common::config::{BufferPoolConfig, LockManagerConfig};
use crate::execution::ExecutorContext;
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};
use crate::transaction::{IsolationLevel, LockManager, Transaction, TransactionManager};

/// The engine's wiring: one buffer pool over one database file, one lock
/// manager, one transaction registry, one catalog. Construct it once at
/// startup and call `shutdown` before exit so dirty pages reach disk and
/// the deadlock detector thread is joined.
pub struct Database {
    pub bpm: Arc<BufferPoolManager>,
    pub catalog: Arc<Catalog>,
    pub lock_manager: Arc<LockManager>,
    pub txn_manager: Arc<TransactionManager>,
}

impl Database {
    pub fn open(
        db_path: impl AsRef<Path>,
        buffer_config: BufferPoolConfig,
        lock_config: LockManagerConfig,
    ) -> Result<Self, BufferPoolError> {
        let bpm = Arc::new(BufferPoolManager::new(buffer_config, db_path)?);
        let catalog = Arc::new(Catalog::new(bpm.clone()));
        let lock_manager = Arc::new(LockManager::new(lock_config));
        let txn_manager = Arc::new(TransactionManager::new());
        lock_manager.start_detection(txn_manager.clone());

        Ok(Self {
            bpm,
            catalog,
            lock_manager,
            txn_manager,
        })
    }

    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        self.txn_manager.begin(isolation_level)
    }

    pub fn commit(&self, txn: &Transaction) {
        self.txn_manager.commit(txn, &self.lock_manager);
    }

    pub fn abort(&self, txn: &Transaction) {
        self.txn_manager.abort(txn, &self.lock_manager);
    }

    /// Executor context for one transaction's plan tree.
    pub fn executor_context(&self, txn: Arc<Transaction>) -> Arc<ExecutorContext> {
        Arc::new(ExecutorContext::new(
            self.bpm.clone(),
            self.catalog.clone(),
            self.lock_manager.clone(),
            txn,
        ))
    }

    /// Flush everything resident and stop the deadlock detector.
    pub fn shutdown(&self) -> Result<(), BufferPoolError> {
        self.lock_manager.shutdown();
        self.bpm.flush_all_pages()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::TupleMeta;
    use crate::storage::table::{Column, DataType, Schema, Tuple, Value};
    use crate::transaction::TransactionState;
    use tempfile::NamedTempFile;

    #[test]
    fn test_open_use_shutdown() {
        let file = NamedTempFile::new().unwrap();
        let db = Database::open(
            file.path(),
            BufferPoolConfig::default(),
            LockManagerConfig::default(),
        )
        .unwrap();

        let table = db
            .catalog
            .create_table(
                "t",
                Schema::new(vec![Column::new("id", DataType::Integer)]),
            )
            .unwrap();
        table
            .heap
            .insert_tuple(TupleMeta::live(), &Tuple::new(vec![Value::Integer(1)]))
            .unwrap();

        let txn = db.begin(IsolationLevel::RepeatableRead);
        db.commit(&txn);
        assert_eq!(txn.state(), TransactionState::Committed);

        db.shutdown().unwrap();
    }
}
