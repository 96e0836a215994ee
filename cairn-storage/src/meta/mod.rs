//! Table metadata: column descriptors, schema changes and the `_meta` file.
pub mod codec;
pub mod file;

pub use codec::*;
pub use file::*;

use crate::error::{Error, Result};
use crate::files::is_valid_column_name;
use crate::partition::PartitionBy;
use bitflags::bitflags;
use cairn_datatype::ColumnType;
use std::collections::HashMap;

/// Format version of metadata written by this runtime.
pub const METADATA_VERSION: i32 = 426;

pub const MIN_INDEX_VALUE_BLOCK_SIZE: i32 = 4;
pub const MAX_INDEX_VALUE_BLOCK_SIZE: i32 = 8 * 1024 * 1024;
pub const DEFAULT_INDEX_VALUE_BLOCK_SIZE: i32 = 256;
pub const MIN_SYMBOL_CAPACITY: i32 = 2;
pub const MAX_SYMBOL_CAPACITY: i32 = 1 << 30;
pub const MAX_SYMBOL_CAPACITY_CACHED: i32 = 1 << 25;
pub const DEFAULT_SYMBOL_CAPACITY: i32 = 256;

bitflags! {
    pub struct ColumnFlags: i64 {
        const INDEXED = 0x01;
        const SEQUENTIAL = 0x02;
        const SYMBOL_CACHE = 0x04;
        const DEDUP_KEY = 0x08;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub ty: ColumnType,
    pub flags: ColumnFlags,
    pub index_block_capacity: i32,
    pub symbol_capacity: i32,
    /// Txn that created the column files, -1 if created with the table.
    pub name_txn: i64,
    /// Soft-deleted column, persisted with negated type tag.
    pub deleted: bool,
}

impl ColumnDescriptor {
    #[inline]
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        let mut flags = ColumnFlags::empty();
        if ty.is_symbol() {
            flags |= ColumnFlags::SYMBOL_CACHE;
        }
        ColumnDescriptor {
            name: name.into(),
            ty,
            flags,
            index_block_capacity: 0,
            symbol_capacity: if ty.is_symbol() { DEFAULT_SYMBOL_CAPACITY } else { 0 },
            name_txn: -1,
            deleted: false,
        }
    }

    #[inline]
    pub fn is_indexed(&self) -> bool {
        self.flags.contains(ColumnFlags::INDEXED)
    }

    #[inline]
    pub fn is_dedup_key(&self) -> bool {
        self.flags.contains(ColumnFlags::DEDUP_KEY)
    }

    #[inline]
    pub fn is_symbol_cached(&self) -> bool {
        self.flags.contains(ColumnFlags::SYMBOL_CACHE)
    }

    /// Type tag as persisted in the metadata file.
    #[inline]
    pub fn type_tag(&self) -> i32 {
        if self.deleted {
            -self.ty.tag()
        } else {
            self.ty.tag()
        }
    }
}

/// Options of a symbol column.
#[derive(Debug, Clone, Copy)]
pub struct SymbolOptions {
    pub capacity: i32,
    pub cached: bool,
    /// Index block capacity, None if not indexed.
    pub index_block_capacity: Option<i32>,
}

impl Default for SymbolOptions {
    #[inline]
    fn default() -> Self {
        SymbolOptions {
            capacity: DEFAULT_SYMBOL_CAPACITY,
            cached: true,
            index_block_capacity: None,
        }
    }
}

/// Case-insensitive column name equality, folding like `ColumnNameIndex`.
#[inline]
pub fn column_name_eq(a: &str, b: &str) -> bool {
    a == b || a.to_lowercase() == b.to_lowercase()
}

/// Case-insensitive mapping from live column name to column position.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ColumnNameIndex {
    positions: HashMap<String, usize>,
    dense: Vec<usize>,
}

impl ColumnNameIndex {
    #[inline]
    pub fn get(&self, name: &str) -> Option<usize> {
        self.positions.get(&name.to_lowercase()).copied()
    }

    /// Inserts a live column. Returns false if the name already exists.
    #[inline]
    pub fn insert(&mut self, name: &str, position: usize) -> bool {
        let key = name.to_lowercase();
        if self.positions.contains_key(&key) {
            return false;
        }
        self.positions.insert(key, position);
        self.dense.push(position);
        true
    }

    /// Positions of live columns in column order.
    #[inline]
    pub fn live_positions(&self) -> &[usize] {
        &self.dense
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.dense.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.dense.is_empty()
    }

    #[inline]
    pub fn clear(&mut self) {
        self.positions.clear();
        self.dense.clear();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableMetadata {
    pub table_id: i32,
    pub partition_by: PartitionBy,
    /// Position of designated timestamp, -1 if none.
    pub timestamp_index: i32,
    pub max_uncommitted_rows: i32,
    pub o3_max_lag: i64,
    pub structure_version: i64,
    pub wal_enabled: bool,
    pub columns: Vec<ColumnDescriptor>,
}

impl TableMetadata {
    #[inline]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    #[inline]
    pub fn timestamp_index(&self) -> Option<usize> {
        if self.timestamp_index < 0 {
            None
        } else {
            Some(self.timestamp_index as usize)
        }
    }

    /// Position of a live column, name is case-insensitive.
    #[inline]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| !c.deleted && column_name_eq(&c.name, name))
    }

    #[inline]
    pub fn live_columns(&self) -> impl Iterator<Item = (usize, &ColumnDescriptor)> {
        self.columns.iter().enumerate().filter(|(_, c)| !c.deleted)
    }

    #[inline]
    pub fn dedup_key_positions(&self) -> Vec<usize> {
        self.live_columns()
            .filter(|(_, c)| c.is_dedup_key())
            .map(|(i, _)| i)
            .collect()
    }

    /// Positions of all columns ever created as symbol, including deleted ones.
    /// The order defines symbol slots of the transaction record.
    #[inline]
    pub fn symbol_positions(&self) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.ty.is_symbol())
            .map(|(i, _)| i)
            .collect()
    }

    /// Slot of a symbol column in the transaction record.
    #[inline]
    pub fn symbol_slot(&self, position: usize) -> Option<usize> {
        self.symbol_positions().iter().position(|p| *p == position)
    }

    pub fn name_index(&self) -> ColumnNameIndex {
        let mut index = ColumnNameIndex::default();
        for (i, c) in self.live_columns() {
            index.insert(&c.name, i);
        }
        index
    }

    #[inline]
    fn live_position(&self, name: &str, position: i32) -> Result<usize> {
        self.column_index(name)
            .ok_or_else(|| Error::sql(position, format!("column does not exist [name={}]", name)))
    }

    fn check_new_name(&self, name: &str, position: i32, limit: usize) -> Result<()> {
        if !is_valid_column_name(name, limit) {
            return Err(Error::sql(
                position,
                format!("invalid column name [name={}]", name),
            ));
        }
        if self.column_index(name).is_some() {
            return Err(Error::sql(
                position,
                format!("duplicate column name [name={}]", name),
            ));
        }
        Ok(())
    }

    /// Appends a new column created at `name_txn`.
    pub fn add_column(
        &mut self,
        name: &str,
        ty: ColumnType,
        symbol: Option<SymbolOptions>,
        name_txn: i64,
        limit: usize,
    ) -> Result<()> {
        let position = self.columns.len() as i32;
        self.check_new_name(name, position, limit)?;
        let mut col = ColumnDescriptor::new(name, ty);
        if ty.is_symbol() {
            apply_symbol_options(&mut col, symbol.unwrap_or_default(), position)?;
        } else if symbol.is_some() {
            return Err(Error::sql(
                position,
                "indexes are supported only for SYMBOL columns",
            ));
        }
        col.name_txn = name_txn;
        self.columns.push(col);
        self.structure_version += 1;
        Ok(())
    }

    pub fn drop_column(&mut self, name: &str) -> Result<()> {
        let idx = self.live_position(name, 0)?;
        if self.timestamp_index() == Some(idx) {
            return Err(Error::sql(
                0,
                format!("cannot remove designated timestamp [name={}]", name),
            ));
        }
        let col = &mut self.columns[idx];
        col.deleted = true;
        col.flags.remove(ColumnFlags::DEDUP_KEY);
        self.structure_version += 1;
        Ok(())
    }

    pub fn rename_column(&mut self, name: &str, new_name: &str, limit: usize) -> Result<()> {
        let idx = self.live_position(name, 0)?;
        if !column_name_eq(name, new_name) {
            self.check_new_name(new_name, 0, limit)?;
        } else if !is_valid_column_name(new_name, limit) {
            return Err(Error::sql(0, format!("invalid column name [name={}]", new_name)));
        }
        self.columns[idx].name = new_name.to_string();
        self.structure_version += 1;
        Ok(())
    }

    /// Retypes a column: the old column is soft-deleted and a column of the
    /// same name and new type is appended, created at `name_txn`.
    /// Returns positions of old and new column.
    pub fn change_column_type(
        &mut self,
        name: &str,
        ty: ColumnType,
        name_txn: i64,
    ) -> Result<(usize, usize)> {
        let idx = self.live_position(name, 0)?;
        if self.timestamp_index() == Some(idx) {
            return Err(Error::sql(
                0,
                format!("cannot change type of designated timestamp [name={}]", name),
            ));
        }
        let old = &self.columns[idx];
        if old.ty == ty {
            return Err(Error::sql(
                0,
                format!("column is already of type {} [name={}]", ty.name(), name),
            ));
        }
        let mut col = ColumnDescriptor::new(old.name.clone(), ty);
        col.name_txn = name_txn;
        if old.is_dedup_key() {
            col.flags |= ColumnFlags::DEDUP_KEY;
        }
        self.columns[idx].deleted = true;
        self.columns[idx].flags.remove(ColumnFlags::DEDUP_KEY);
        self.columns.push(col);
        self.structure_version += 1;
        Ok((idx, self.columns.len() - 1))
    }
}

fn apply_symbol_options(col: &mut ColumnDescriptor, opts: SymbolOptions, position: i32) -> Result<()> {
    let capacity = ceil_pow2(opts.capacity);
    if capacity < MIN_SYMBOL_CAPACITY {
        return Err(Error::sql(
            position,
            format!("min symbol capacity is {}", MIN_SYMBOL_CAPACITY),
        ));
    }
    if capacity > MAX_SYMBOL_CAPACITY {
        return Err(Error::sql(
            position,
            format!("max symbol capacity is {}", MAX_SYMBOL_CAPACITY),
        ));
    }
    if opts.cached && capacity > MAX_SYMBOL_CAPACITY_CACHED {
        return Err(Error::sql(
            position,
            format!("max cached symbol capacity is {}", MAX_SYMBOL_CAPACITY_CACHED),
        ));
    }
    col.symbol_capacity = capacity;
    col.flags.set(ColumnFlags::SYMBOL_CACHE, opts.cached);
    if let Some(block) = opts.index_block_capacity {
        let block = ceil_pow2(block);
        if block < MIN_INDEX_VALUE_BLOCK_SIZE {
            return Err(Error::sql(
                position,
                format!("min index block capacity is {}", MIN_INDEX_VALUE_BLOCK_SIZE),
            ));
        }
        if block > MAX_INDEX_VALUE_BLOCK_SIZE {
            return Err(Error::sql(
                position,
                format!("max index block capacity is {}", MAX_INDEX_VALUE_BLOCK_SIZE),
            ));
        }
        col.flags |= ColumnFlags::INDEXED;
        col.index_block_capacity = block;
    }
    Ok(())
}

/// Rounds up to power of two, saturating at 2^30.
#[inline]
fn ceil_pow2(v: i32) -> i32 {
    if v <= 1 {
        return v;
    }
    (v as u32).checked_next_power_of_two().map_or(1 << 30, |p| p.min(1 << 30) as i32)
}

/// Description of a new table.
#[derive(Debug, Clone)]
pub struct TableStructure {
    pub name: String,
    pub partition_by: PartitionBy,
    pub wal: bool,
    columns: Vec<(String, ColumnType, Option<SymbolOptions>)>,
    timestamp: Option<String>,
    dedup_keys: Vec<String>,
    max_uncommitted_rows: Option<i32>,
    o3_max_lag: Option<i64>,
}

impl TableStructure {
    #[inline]
    pub fn new(name: impl Into<String>, partition_by: PartitionBy) -> Self {
        TableStructure {
            name: name.into(),
            partition_by,
            wal: false,
            columns: vec![],
            timestamp: None,
            dedup_keys: vec![],
            max_uncommitted_rows: None,
            o3_max_lag: None,
        }
    }

    #[inline]
    pub fn column(mut self, name: impl Into<String>, ty: ColumnType) -> Self {
        self.columns.push((name.into(), ty, None));
        self
    }

    #[inline]
    pub fn symbol(mut self, name: impl Into<String>, opts: SymbolOptions) -> Self {
        self.columns.push((name.into(), ColumnType::Symbol, Some(opts)));
        self
    }

    /// Adds the designated timestamp column.
    #[inline]
    pub fn timestamp(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.columns.push((name.clone(), ColumnType::Timestamp, None));
        self.timestamp = Some(name);
        self
    }

    #[inline]
    pub fn wal(mut self, wal: bool) -> Self {
        self.wal = wal;
        self
    }

    #[inline]
    pub fn dedup_keys(mut self, keys: &[&str]) -> Self {
        self.dedup_keys = keys.iter().map(|s| s.to_string()).collect();
        self
    }

    #[inline]
    pub fn max_uncommitted_rows(mut self, rows: i32) -> Self {
        self.max_uncommitted_rows = Some(rows);
        self
    }

    #[inline]
    pub fn o3_max_lag(mut self, lag: i64) -> Self {
        self.o3_max_lag = Some(lag);
        self
    }

    /// Validates the structure and builds metadata of structure version 0.
    pub fn to_metadata(
        &self,
        table_id: i32,
        limit: usize,
        default_max_uncommitted_rows: i32,
        default_o3_max_lag: i64,
    ) -> Result<TableMetadata> {
        let mut meta = TableMetadata {
            table_id,
            partition_by: self.partition_by,
            timestamp_index: -1,
            max_uncommitted_rows: self
                .max_uncommitted_rows
                .unwrap_or(default_max_uncommitted_rows),
            o3_max_lag: self.o3_max_lag.unwrap_or(default_o3_max_lag),
            structure_version: 0,
            wal_enabled: self.wal,
            columns: Vec::with_capacity(self.columns.len()),
        };
        if self.columns.is_empty() {
            return Err(Error::sql(0, "table must have at least one column"));
        }
        for (name, ty, symbol) in &self.columns {
            meta.add_column(name, *ty, *symbol, -1, limit)?;
        }
        if let Some(ts) = &self.timestamp {
            let idx = meta.column_index(ts).ok_or_else(|| {
                Error::sql(0, format!("invalid designated timestamp column [name={}]", ts))
            })?;
            meta.timestamp_index = idx as i32;
        } else if self.partition_by.is_partitioned() {
            return Err(Error::sql(
                0,
                "partitioning is possible only on tables with designated timestamps",
            ));
        }
        if self.wal && !self.partition_by.is_partitioned() {
            return Err(Error::sql(0, "WAL table must be partitioned"));
        }
        if !self.dedup_keys.is_empty() {
            if !self.wal {
                return Err(Error::sql(0, "deduplication is possible only on WAL tables"));
            }
            let mut has_timestamp = false;
            for key in &self.dedup_keys {
                let idx = meta.column_index(key).ok_or_else(|| {
                    Error::sql(0, format!("deduplicate key column not found [column={}]", key))
                })?;
                has_timestamp |= meta.timestamp_index() == Some(idx);
                meta.columns[idx].flags |= ColumnFlags::DEDUP_KEY;
            }
            if !has_timestamp {
                return Err(Error::sql(
                    0,
                    "deduplicate key list must include dedicated timestamp column",
                ));
            }
        }
        meta.structure_version = 0;
        Ok(meta)
    }
}
