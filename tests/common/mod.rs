use std::sync::Arc;

use anyhow::Result;
use tempfile::NamedTempFile;

use corrodb::catalog::Catalog;
use corrodb::common::config::{BufferPoolConfig, LockManagerConfig};
use corrodb::storage::buffer::BufferPoolManager;
use corrodb::storage::page::TupleMeta;
use corrodb::storage::table::{Column, DataType, Schema, Tuple, Value};
use corrodb::transaction::{LockManager, TransactionManager};

// Pipe `log` output into the test harness when RUST_LOG is set
#[allow(dead_code)]
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// Create a buffer pool manager backed by a temporary database file
#[allow(dead_code)]
pub fn create_test_buffer_pool(pool_size: usize) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    init_logging();
    let file = NamedTempFile::new()?;
    let config = BufferPoolConfig {
        pool_size,
        replacer_k: 2,
    };
    let bpm = Arc::new(BufferPoolManager::new(config, file.path())?);
    Ok((bpm, file))
}

// Everything the executor tests need wired together
#[allow(dead_code)]
pub struct TestEngine {
    pub bpm: Arc<BufferPoolManager>,
    pub catalog: Arc<Catalog>,
    pub lock_manager: Arc<LockManager>,
    pub txn_manager: Arc<TransactionManager>,
    _file: NamedTempFile,
}

#[allow(dead_code)]
pub fn create_test_engine() -> Result<TestEngine> {
    init_logging();
    let file = NamedTempFile::new()?;
    let bpm = Arc::new(BufferPoolManager::new(
        BufferPoolConfig {
            pool_size: 256,
            replacer_k: 2,
        },
        file.path(),
    )?);
    Ok(TestEngine {
        catalog: Arc::new(Catalog::new(bpm.clone())),
        lock_manager: Arc::new(LockManager::new(LockManagerConfig::default())),
        txn_manager: Arc::new(TransactionManager::new()),
        bpm,
        _file: file,
    })
}

#[allow(dead_code)]
pub fn numbers_schema() -> Schema {
    Schema::new(vec![
        Column::new("k", DataType::Integer),
        Column::new("label", DataType::Varchar),
    ])
}

#[allow(dead_code)]
pub fn number_row(k: i64) -> Tuple {
    Tuple::new(vec![Value::Integer(k), Value::Varchar(format!("row{}", k))])
}

// Seed a table with one row per key, bypassing the executors
#[allow(dead_code)]
pub fn seed_table(engine: &TestEngine, name: &str, keys: &[i64]) -> Result<()> {
    let table = engine.catalog.create_table(name, numbers_schema())?;
    for &k in keys {
        table.heap.insert_tuple(TupleMeta::live(), &number_row(k))?;
    }
    Ok(())
}
