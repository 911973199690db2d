// Catalog: table and index registry consumed by the executors and the
// transaction manager's undo path. Not persisted; the storage engine core
// treats it as an external collaborator.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::RwLock;
use thiserror::Error;

use crate::common::types::Rid;
use crate::index::hash::key::{Fnv1aHasher, IndexKey};
use crate::index::hash::{ExtendibleHashIndex, HashIndexError};
use crate::query::executor::result::{DataValue, Tuple};
use crate::storage::buffer::ParallelBufferPool;
use crate::storage::table::{TableHeap, TableHeapError};

pub type TableOid = u32;
pub type IndexOid = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Integer,
    Float,
    Text,
    Boolean,
}

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Table {0} already exists")]
    TableExists(String),
    #[error("Table {0} not found")]
    TableNotFound(String),
    #[error("Column {0} not found")]
    ColumnNotFound(String),
    #[error("Heap error: {0}")]
    Heap(#[from] TableHeapError),
    #[error("Index error: {0}")]
    Index(#[from] HashIndexError),
    #[error("Tuple decode error: {0}")]
    Decode(#[from] bincode::Error),
}

pub struct TableInfo {
    pub name: String,
    pub oid: TableOid,
    pub schema: Schema,
    pub heap: Arc<TableHeap>,
}

/// The concrete index type every table index uses: 8-byte folded keys
/// mapping to record ids.
pub type TableIndex = ExtendibleHashIndex<IndexKey, Rid, Fnv1aHasher>;

pub struct IndexInfo {
    pub name: String,
    pub oid: IndexOid,
    pub table_name: String,
    pub key_column: usize,
    pub index: TableIndex,
}

/// Fold a column value into the fixed-width index key. Integers and
/// floats keep their bit patterns; text hashes down to eight bytes.
pub fn index_key_for(value: &DataValue) -> IndexKey {
    match value {
        DataValue::Null => IndexKey::from_u64(u64::MAX),
        DataValue::Integer(i) => IndexKey::from_u64(*i as u64),
        DataValue::Float(f) => IndexKey::from_u64(f.to_bits()),
        DataValue::Boolean(b) => IndexKey::from_u64(*b as u64),
        DataValue::Text(s) => {
            let mut bytes = [0u8; 8];
            LittleEndian::write_u64(&mut bytes, Fnv1aHasher::hash_bytes(s.as_bytes()));
            IndexKey(bytes)
        }
    }
}

pub struct Catalog {
    buffer_pool: Arc<ParallelBufferPool>,
    tables: RwLock<HashMap<TableOid, Arc<TableInfo>>>,
    table_names: RwLock<HashMap<String, TableOid>>,
    indexes: RwLock<HashMap<IndexOid, Arc<IndexInfo>>>,
    table_indexes: RwLock<HashMap<String, Vec<IndexOid>>>,
    next_table_oid: AtomicU32,
    next_index_oid: AtomicU32,
}

impl Catalog {
    pub fn new(buffer_pool: Arc<ParallelBufferPool>) -> Self {
        Self {
            buffer_pool,
            tables: RwLock::new(HashMap::new()),
            table_names: RwLock::new(HashMap::new()),
            indexes: RwLock::new(HashMap::new()),
            table_indexes: RwLock::new(HashMap::new()),
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
        if self.table_names.read().contains_key(&name) {
            return Err(CatalogError::TableExists(name));
        }

        let heap = Arc::new(TableHeap::new(Arc::clone(&self.buffer_pool))?);
        let oid = self.next_table_oid.fetch_add(1, Ordering::SeqCst);
        let info = Arc::new(TableInfo {
            name: name.clone(),
            oid,
            schema,
            heap,
        });

        self.tables.write().insert(oid, Arc::clone(&info));
        self.table_names.write().insert(name, oid);
        Ok(info)
    }

    pub fn get_table(&self, oid: TableOid) -> Option<Arc<TableInfo>> {
        self.tables.read().get(&oid).cloned()
    }

    pub fn get_table_by_name(&self, name: &str) -> Option<Arc<TableInfo>> {
        let oid = *self.table_names.read().get(name)?;
        self.get_table(oid)
    }

    /// Create a hash index over one column of an existing table and
    /// backfill it from the heap.
    pub fn create_index(
        &self,
        index_name: impl Into<String>,
        table_name: &str,
        key_column_name: &str,
    ) -> Result<Arc<IndexInfo>, CatalogError> {
        let table = self
            .get_table_by_name(table_name)
            .ok_or_else(|| CatalogError::TableNotFound(table_name.to_string()))?;
        let key_column = table
            .schema
            .column_index(key_column_name)
            .ok_or_else(|| CatalogError::ColumnNotFound(key_column_name.to_string()))?;

        let index = TableIndex::new(Arc::clone(&self.buffer_pool), Fnv1aHasher)?;

        let mut iter = table.heap.iter();
        while let Some((rid, bytes)) = iter.next_record()? {
            let tuple = Tuple::from_bytes(&bytes)?;
            index.insert(&index_key_for(&tuple.values[key_column]), &rid)?;
        }

        let oid = self.next_index_oid.fetch_add(1, Ordering::SeqCst);
        let info = Arc::new(IndexInfo {
            name: index_name.into(),
            oid,
            table_name: table_name.to_string(),
            key_column,
            index,
        });

        self.indexes.write().insert(oid, Arc::clone(&info));
        self.table_indexes
            .write()
            .entry(table_name.to_string())
            .or_default()
            .push(oid);
        Ok(info)
    }

    pub fn get_index(&self, oid: IndexOid) -> Option<Arc<IndexInfo>> {
        self.indexes.read().get(&oid).cloned()
    }

    pub fn get_table_indexes(&self, table_name: &str) -> Vec<Arc<IndexInfo>> {
        let oids = self
            .table_indexes
            .read()
            .get(table_name)
            .cloned()
            .unwrap_or_default();
        let indexes = self.indexes.read();
        oids.iter().filter_map(|oid| indexes.get(oid).cloned()).collect()
    }
}
