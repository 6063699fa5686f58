use thiserror::Error;

use crate::catalog::CatalogError;
use crate::common::types::TableOid;
use crate::index::btree::BTreeError;
use crate::storage::buffer::BufferPoolError;
use crate::storage::table::TableHeapError;
use crate::transaction::TransactionError;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Unknown table oid {0}")]
    UnknownTable(TableOid),

    #[error("Unknown index oid {0}")]
    UnknownIndex(u32),

    #[error("Lock denied by isolation policy")]
    LockDenied,

    #[error("Expression error: {0}")]
    Expression(String),

    #[error("Buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),

    #[error("Table heap error: {0}")]
    TableHeap(#[from] TableHeapError),

    #[error("Index error: {0}")]
    Index(#[from] BTreeError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),
}
