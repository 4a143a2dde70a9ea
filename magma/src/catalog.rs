//! In-memory catalog of tables and their secondary indexes.
//!
//! Indexes follow the single-integer-key convention: each index covers one
//! integer column and maps its value to the tuple's rid through a disk
//! extendible hash table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use basalt::buffer_pool::BufferPoolManager;
use basalt::hash_index::{default_key_hash, DiskExtendibleHashTable};
use basalt::transaction::TableProvider;
use basalt::{Rid, TableHeap, TableOid};

use crate::errors::ExecutionError;
use crate::types::{DataType, Schema};

const INDEX_HEADER_MAX_DEPTH: u32 = 2;
const INDEX_DIRECTORY_MAX_DEPTH: u32 = 9;
const INDEX_BUCKET_MAX_SIZE: u32 = 64;

fn i64_key_hash(key: &i64) -> u32 {
    default_key_hash(&key.to_le_bytes())
}

pub struct TableInfo {
    pub oid: TableOid,
    pub name: String,
    pub schema: Schema,
    pub heap: Arc<TableHeap>,
}

pub struct IndexInfo {
    pub name: String,
    pub table_name: String,
    /// Position of the indexed column in the table schema.
    pub key_column: usize,
    pub key_schema: Schema,
    pub index: DiskExtendibleHashTable<i64, Rid>,
}

pub struct Catalog {
    bpm: Arc<BufferPoolManager>,
    tables: RwLock<HashMap<TableOid, Arc<TableInfo>>>,
    table_names: RwLock<HashMap<String, TableOid>>,
    indexes: RwLock<HashMap<String, Arc<IndexInfo>>>,
    table_indexes: RwLock<HashMap<String, Vec<String>>>,
    next_oid: AtomicU32,
}

impl Catalog {
    pub fn new(bpm: Arc<BufferPoolManager>) -> Self {
        Self {
            bpm,
            tables: RwLock::new(HashMap::new()),
            table_names: RwLock::new(HashMap::new()),
            indexes: RwLock::new(HashMap::new()),
            table_indexes: RwLock::new(HashMap::new()),
            next_oid: AtomicU32::new(1),
        }
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPoolManager> {
        &self.bpm
    }

    pub fn create_table(
        &self,
        name: &str,
        schema: Schema,
    ) -> Result<Arc<TableInfo>, ExecutionError> {
        let mut table_names = self.table_names.write().unwrap();
        if table_names.contains_key(name) {
            return Err(ExecutionError::GenericError(format!(
                "table {name} already exists"
            )));
        }

        let oid = self.next_oid.fetch_add(1, Ordering::SeqCst);
        let heap = Arc::new(TableHeap::new(Arc::clone(&self.bpm))?);
        let info = Arc::new(TableInfo {
            oid,
            name: name.to_string(),
            schema,
            heap,
        });

        table_names.insert(name.to_string(), oid);
        self.tables.write().unwrap().insert(oid, Arc::clone(&info));
        crate::magma_debug_log!("[Catalog::create_table] {name} -> oid {oid}");
        Ok(info)
    }

    pub fn table(&self, oid: TableOid) -> Option<Arc<TableInfo>> {
        self.tables.read().unwrap().get(&oid).cloned()
    }

    pub fn table_by_name(&self, name: &str) -> Option<Arc<TableInfo>> {
        let oid = *self.table_names.read().unwrap().get(name)?;
        self.table(oid)
    }

    /// Creates a hash index over one integer column and backfills it from
    /// the table's committed base tuples.
    pub fn create_index(
        &self,
        index_name: &str,
        table_name: &str,
        key_column: usize,
    ) -> Result<Arc<IndexInfo>, ExecutionError> {
        let table = self
            .table_by_name(table_name)
            .ok_or_else(|| ExecutionError::TableNotFound(table_name.to_string()))?;
        let column = table
            .schema
            .column(key_column)
            .ok_or_else(|| ExecutionError::ColumnNotFound(format!("column #{key_column}")))?;
        if !matches!(column.data_type, DataType::Int | DataType::Bigint) {
            return Err(ExecutionError::GenericError(format!(
                "index {index_name} requires an integer key column"
            )));
        }

        let mut indexes = self.indexes.write().unwrap();
        if indexes.contains_key(index_name) {
            return Err(ExecutionError::GenericError(format!(
                "index {index_name} already exists"
            )));
        }

        let index = DiskExtendibleHashTable::new(
            Arc::clone(&self.bpm),
            i64_key_hash,
            INDEX_HEADER_MAX_DEPTH,
            INDEX_DIRECTORY_MAX_DEPTH,
            INDEX_BUCKET_MAX_SIZE,
        )?;

        let mut iter = table.heap.iter()?;
        while !iter.is_end() {
            let rid = iter.rid();
            let (meta, bytes) = iter.get_tuple()?;
            iter.advance()?;
            if meta.is_deleted {
                continue;
            }
            let row = crate::tuple::parse_row(&bytes, &table.schema)?;
            if let Some(key) = row[key_column].as_i64() {
                index.insert(&key, &rid)?;
            }
        }

        let info = Arc::new(IndexInfo {
            name: index_name.to_string(),
            table_name: table_name.to_string(),
            key_column,
            key_schema: Schema::new(vec![column.clone()]),
            index,
        });
        indexes.insert(index_name.to_string(), Arc::clone(&info));
        self.table_indexes
            .write()
            .unwrap()
            .entry(table_name.to_string())
            .or_default()
            .push(index_name.to_string());
        Ok(info)
    }

    pub fn index(&self, index_name: &str) -> Option<Arc<IndexInfo>> {
        self.indexes.read().unwrap().get(index_name).cloned()
    }

    pub fn table_indexes(&self, table_name: &str) -> Vec<Arc<IndexInfo>> {
        let table_indexes = self.table_indexes.read().unwrap();
        let indexes = self.indexes.read().unwrap();
        table_indexes
            .get(table_name)
            .map(|names| {
                names
                    .iter()
                    .filter_map(|name| indexes.get(name).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl TableProvider for Catalog {
    fn table_heap(&self, oid: TableOid) -> Option<Arc<TableHeap>> {
        Some(Arc::clone(&self.table(oid)?.heap))
    }

    fn table_oids(&self) -> Vec<TableOid> {
        self.tables.read().unwrap().keys().copied().collect()
    }
}
