mod column;
pub mod reader;
pub mod symbol;
pub mod writer;

pub use reader::TableReader;
pub use symbol::SymbolMap;
pub use writer::{Row, TableWriter};

use crate::error::Result;
use crate::files::{
    create_column_version_file, fsync_dir, write_table_name_file, TXN_FILE_NAME,
    TXN_LOG_FILE_NAME,
};
use crate::meta::{create_meta_file, TableMetadata};
use crate::seq::TxnLog;
use crate::txn::TxWriter;
use cairn_datatype::Value;
use std::fmt;
use std::fs;
use std::path::Path;

/// Lays out the directory of a new table. Fails if `dir` exists.
pub fn create_table_dir(dir: &Path, table_name: &str, meta: &TableMetadata) -> Result<()> {
    fs::create_dir(dir)?;
    write_table_name_file(dir, table_name)?;
    create_meta_file(dir, meta)?;
    TxWriter::create(&dir.join(TXN_FILE_NAME), meta.symbol_positions().len())?;
    create_column_version_file(dir)?;
    if meta.wal_enabled {
        TxnLog::open_rw(&dir.join(TXN_LOG_FILE_NAME))?;
    }
    for (_, col) in meta.live_columns().filter(|(_, c)| c.ty.is_symbol()) {
        SymbolMap::create(dir, col)?;
    }
    fsync_dir(dir)?;
    if let Some(parent) = dir.parent() {
        fsync_dir(parent)?;
    }
    Ok(())
}

/// TableToken identifies a table of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableToken {
    pub table_name: String,
    pub dir_name: String,
    pub table_id: i32,
    pub wal: bool,
}

impl TableToken {
    #[inline]
    pub fn is_wal(&self) -> bool {
        self.wal
    }
}

impl fmt::Display for TableToken {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[id={}]", self.table_name, self.table_id)
    }
}

static NULL_VALUE: Value = Value::Null;

/// A row of a table or query result, values indexed by column position.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    values: Vec<Value>,
}

impl Record {
    #[inline]
    pub fn new(values: Vec<Value>) -> Self {
        Record { values }
    }

    /// Returns value at `idx`, null if out of range.
    #[inline]
    pub fn get(&self, idx: usize) -> &Value {
        self.values.get(idx).unwrap_or(&NULL_VALUE)
    }

    #[inline]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    #[inline]
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<Vec<Value>> for Record {
    #[inline]
    fn from(values: Vec<Value>) -> Self {
        Record { values }
    }
}
