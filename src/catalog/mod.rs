use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::TableOid;
use crate::index::btree::{BPlusTree, BTreeError};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::table::{Schema, TableHeap, TableHeapError, Tuple, Value};

pub type IndexOid = u32;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Table {0} already exists")]
    TableExists(String),

    #[error("Table {0} not found")]
    TableNotFound(String),

    #[error("Index {0} already exists")]
    IndexExists(String),

    #[error("Table heap error: {0}")]
    TableHeap(#[from] TableHeapError),

    #[error("Index error: {0}")]
    Index(#[from] BTreeError),
}

pub struct TableInfo {
    pub name: String,
    pub oid: TableOid,
    pub schema: Schema,
    pub heap: Arc<TableHeap>,
}

/// Secondary index over a single integer key column.
pub struct IndexInfo {
    pub name: String,
    pub oid: IndexOid,
    pub table_oid: TableOid,
    pub key_column: usize,
    pub tree: Arc<BPlusTree<i64>>,
}

impl IndexInfo {
    /// Extract the index key from a table tuple. Null keys are not indexed.
    pub fn key_of(&self, tuple: &Tuple) -> Option<i64> {
        match tuple.value(self.key_column) {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }
}

/// Registry of tables and their indexes; the executors resolve every oid
/// through here.
pub struct Catalog {
    bpm: Arc<BufferPoolManager>,
    tables: Mutex<HashMap<TableOid, Arc<TableInfo>>>,
    table_names: Mutex<HashMap<String, TableOid>>,
    indexes: Mutex<HashMap<IndexOid, Arc<IndexInfo>>>,
    index_names: Mutex<HashMap<String, IndexOid>>,
    table_indexes: Mutex<HashMap<TableOid, Vec<IndexOid>>>,
    next_table_oid: AtomicU32,
    next_index_oid: AtomicU32,
}

impl Catalog {
    pub fn new(bpm: Arc<BufferPoolManager>) -> Self {
        Self {
            bpm,
            tables: Mutex::new(HashMap::new()),
            table_names: Mutex::new(HashMap::new()),
            indexes: Mutex::new(HashMap::new()),
            index_names: Mutex::new(HashMap::new()),
            table_indexes: Mutex::new(HashMap::new()),
            next_table_oid: AtomicU32::new(0),
            next_index_oid: AtomicU32::new(0),
        }
    }

    pub fn create_table(
        &self,
        name: impl Into<String>,
        schema: Schema,
    ) -> Result<Arc<TableInfo>, CatalogError> {
        let name = name.into();
        let mut names = self.table_names.lock();
        if names.contains_key(&name) {
            return Err(CatalogError::TableExists(name));
        }

        let oid = self.next_table_oid.fetch_add(1, Ordering::SeqCst);
        let heap = Arc::new(TableHeap::new(self.bpm.clone())?);
        let info = Arc::new(TableInfo {
            name: name.clone(),
            oid,
            schema,
            heap,
        });

        names.insert(name, oid);
        self.tables.lock().insert(oid, info.clone());
        self.table_indexes.lock().insert(oid, Vec::new());
        Ok(info)
    }

    pub fn table(&self, name: &str) -> Result<Arc<TableInfo>, CatalogError> {
        let oid = *self
            .table_names
            .lock()
            .get(name)
            .ok_or_else(|| CatalogError::TableNotFound(name.to_string()))?;
        Ok(self.tables.lock()[&oid].clone())
    }

    pub fn table_by_oid(&self, oid: TableOid) -> Option<Arc<TableInfo>> {
        self.tables.lock().get(&oid).cloned()
    }

    /// Create a B+ tree index over one integer column and backfill it from
    /// the table's current contents.
    pub fn create_index(
        &self,
        name: impl Into<String>,
        table_name: &str,
        key_column: usize,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Arc<IndexInfo>, CatalogError> {
        let name = name.into();
        if self.index_names.lock().contains_key(&name) {
            return Err(CatalogError::IndexExists(name));
        }
        let table = self.table(table_name)?;

        let tree = Arc::new(BPlusTree::new(
            self.bpm.clone(),
            leaf_max_size,
            internal_max_size,
        )?);
        let oid = self.next_index_oid.fetch_add(1, Ordering::SeqCst);
        let info = Arc::new(IndexInfo {
            name: name.clone(),
            oid,
            table_oid: table.oid,
            key_column,
            tree,
        });

        for entry in table.heap.iter() {
            let (meta, tuple, rid) = entry?;
            if meta.is_deleted {
                continue;
            }
            if let Some(key) = info.key_of(&tuple) {
                info.tree.insert(key, rid)?;
            }
        }

        self.index_names.lock().insert(name, oid);
        self.indexes.lock().insert(oid, info.clone());
        self.table_indexes
            .lock()
            .entry(table.oid)
            .or_default()
            .push(oid);
        Ok(info)
    }

    pub fn index(&self, name: &str) -> Option<Arc<IndexInfo>> {
        let oid = *self.index_names.lock().get(name)?;
        self.indexes.lock().get(&oid).cloned()
    }

    pub fn index_by_oid(&self, oid: IndexOid) -> Option<Arc<IndexInfo>> {
        self.indexes.lock().get(&oid).cloned()
    }

    /// Every index attached to a table, for the mutating executors.
    pub fn table_indexes(&self, oid: TableOid) -> Vec<Arc<IndexInfo>> {
        let index_oids = self.table_indexes.lock();
        let indexes = self.indexes.lock();
        index_oids
            .get(&oid)
            .map(|oids| oids.iter().map(|i| indexes[i].clone()).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::BufferPoolConfig;
    use crate::storage::table::{Column, DataType};
    use tempfile::NamedTempFile;

    fn test_catalog() -> (Catalog, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let bpm = Arc::new(
            BufferPoolManager::new(BufferPoolConfig::default(), file.path()).unwrap(),
        );
        (Catalog::new(bpm), file)
    }

    fn simple_schema() -> Schema {
        Schema::new(vec![
            Column::new("id", DataType::Integer),
            Column::new("name", DataType::Varchar),
        ])
    }

    #[test]
    fn test_create_and_lookup_table() {
        let (catalog, _file) = test_catalog();
        let info = catalog.create_table("users", simple_schema()).unwrap();
        assert_eq!(catalog.table("users").unwrap().oid, info.oid);
        assert!(catalog.table("missing").is_err());
        assert!(matches!(
            catalog.create_table("users", simple_schema()),
            Err(CatalogError::TableExists(_))
        ));
    }

    #[test]
    fn test_create_index_backfills() {
        use crate::storage::page::TupleMeta;

        let (catalog, _file) = test_catalog();
        let info = catalog.create_table("t", simple_schema()).unwrap();
        for i in [5i64, 1, 9] {
            info.heap
                .insert_tuple(
                    TupleMeta::live(),
                    &Tuple::new(vec![
                        Value::Integer(i),
                        Value::Varchar(format!("row{}", i)),
                    ]),
                )
                .unwrap();
        }

        let index = catalog.create_index("t_id", "t", 0, 16, 16).unwrap();
        assert!(index.tree.get_value(&5).unwrap().is_some());
        assert!(index.tree.get_value(&2).unwrap().is_none());
        assert_eq!(catalog.table_indexes(info.oid).len(), 1);
    }
}
