//! Binary layout of the `_meta` file, little-endian.
//!
//! | offset | size | field                     |
//! |--------|------|---------------------------|
//! | 0      | 4    | column count              |
//! | 4      | 4    | partition by              |
//! | 8      | 4    | timestamp index           |
//! | 12     | 4    | format version            |
//! | 16     | 4    | table id                  |
//! | 20     | 4    | max uncommitted rows      |
//! | 24     | 8    | o3 max lag                |
//! | 32     | 8    | structure version         |
//! | 40     | 4    | WAL enabled               |
//! | 128    | 32*n | column records            |
//! | ...    |      | names, i32 length + UTF-8 |
//!
//! Column record: type i32, flags i64, index block capacity i32,
//! symbol capacity i32, name txn i64, 4 bytes reserved.
use super::{ColumnDescriptor, ColumnFlags, ColumnNameIndex, TableMetadata};
use crate::error::{MetaError, Result};
use crate::mem::{get_i32, get_i64, put_i32, put_i64};
use crate::partition::PartitionBy;
use cairn_datatype::{name_of_tag, ColumnType};

pub const META_OFFSET_COUNT: usize = 0;
pub const META_OFFSET_PARTITION_BY: usize = 4;
pub const META_OFFSET_TIMESTAMP_INDEX: usize = 8;
pub const META_OFFSET_VERSION: usize = 12;
pub const META_OFFSET_TABLE_ID: usize = 16;
pub const META_OFFSET_MAX_UNCOMMITTED_ROWS: usize = 20;
pub const META_OFFSET_O3_MAX_LAG: usize = 24;
pub const META_OFFSET_STRUCTURE_VERSION: usize = 32;
pub const META_OFFSET_WAL_ENABLED: usize = 40;
pub const META_OFFSET_COLUMN_TYPES: usize = 128;
pub const META_COLUMN_DATA_SIZE: usize = 32;

const COLUMN_OFFSET_TYPE: usize = 0;
const COLUMN_OFFSET_FLAGS: usize = 4;
const COLUMN_OFFSET_INDEX_BLOCK_CAPACITY: usize = 12;
const COLUMN_OFFSET_SYMBOL_CAPACITY: usize = 16;
const COLUMN_OFFSET_NAME_TXN: usize = 20;

pub const MAX_COLUMN_NAME_BYTES: usize = 255;

#[inline]
fn column_offset(index: usize) -> usize {
    META_OFFSET_COLUMN_TYPES + index * META_COLUMN_DATA_SIZE
}

/// Serializes metadata with given format version and table id.
pub fn write_metadata(meta: &TableMetadata, version: i32, table_id: i32) -> Vec<u8> {
    let count = meta.columns.len();
    let mut buf = vec![0u8; column_offset(count)];
    put_i32(&mut buf, META_OFFSET_COUNT, count as i32);
    put_i32(&mut buf, META_OFFSET_PARTITION_BY, meta.partition_by.tag());
    put_i32(&mut buf, META_OFFSET_TIMESTAMP_INDEX, meta.timestamp_index);
    put_i32(&mut buf, META_OFFSET_VERSION, version);
    put_i32(&mut buf, META_OFFSET_TABLE_ID, table_id);
    put_i32(
        &mut buf,
        META_OFFSET_MAX_UNCOMMITTED_ROWS,
        meta.max_uncommitted_rows,
    );
    put_i64(&mut buf, META_OFFSET_O3_MAX_LAG, meta.o3_max_lag);
    put_i64(
        &mut buf,
        META_OFFSET_STRUCTURE_VERSION,
        meta.structure_version,
    );
    put_i32(&mut buf, META_OFFSET_WAL_ENABLED, meta.wal_enabled as i32);
    for (i, col) in meta.columns.iter().enumerate() {
        let base = column_offset(i);
        put_i32(&mut buf, base + COLUMN_OFFSET_TYPE, col.type_tag());
        put_i64(&mut buf, base + COLUMN_OFFSET_FLAGS, col.flags.bits());
        put_i32(
            &mut buf,
            base + COLUMN_OFFSET_INDEX_BLOCK_CAPACITY,
            col.index_block_capacity,
        );
        put_i32(
            &mut buf,
            base + COLUMN_OFFSET_SYMBOL_CAPACITY,
            col.symbol_capacity,
        );
        put_i64(&mut buf, base + COLUMN_OFFSET_NAME_TXN, col.name_txn);
    }
    for col in &meta.columns {
        buf.extend_from_slice(&(col.name.len() as i32).to_le_bytes());
        buf.extend_from_slice(col.name.as_bytes());
    }
    buf
}

/// Validates metadata bytes and returns index of live column names.
#[inline]
pub fn validate_metadata(bytes: &[u8], expected_version: i32) -> Result<ColumnNameIndex> {
    let mut index = ColumnNameIndex::default();
    validate_metadata_into(bytes, expected_version, &mut index)?;
    Ok(index)
}

/// Validates metadata bytes and fills the given name index.
/// The index is left empty if validation fails.
pub fn validate_metadata_into(
    bytes: &[u8],
    expected_version: i32,
    index: &mut ColumnNameIndex,
) -> Result<()> {
    index.clear();
    let res = validate(bytes, expected_version, index);
    if res.is_err() {
        index.clear();
    }
    res.map_err(Into::into)
}

fn validate(
    bytes: &[u8],
    expected_version: i32,
    index: &mut ColumnNameIndex,
) -> std::result::Result<(), MetaError> {
    if bytes.len() < META_OFFSET_COLUMN_TYPES {
        return Err(MetaError::FileTooSmall {
            size: bytes.len(),
            required: META_OFFSET_COLUMN_TYPES,
        });
    }
    let version = get_i32(bytes, META_OFFSET_VERSION);
    if version != expected_version {
        return Err(MetaError::VersionMismatch {
            expected: expected_version,
            actual: version,
        });
    }
    let count = get_i32(bytes, META_OFFSET_COUNT);
    if count <= 0 {
        return Err(MetaError::InvalidColumnCount(count));
    }
    let names_offset = column_offset(count as usize);
    if bytes.len() < names_offset {
        return Err(MetaError::FileTooSmall {
            size: bytes.len(),
            required: names_offset,
        });
    }
    let partition_by = get_i32(bytes, META_OFFSET_PARTITION_BY);
    if PartitionBy::from_tag(partition_by).is_none() {
        return Err(MetaError::InvalidPartitionBy(partition_by));
    }
    let ts_index = get_i32(bytes, META_OFFSET_TIMESTAMP_INDEX);
    if ts_index < -1 || ts_index >= count {
        return Err(MetaError::TimestampIndexOutOfRange {
            index: ts_index,
            count,
        });
    }
    for i in 0..count as usize {
        let base = column_offset(i);
        let tag = get_i32(bytes, base + COLUMN_OFFSET_TYPE);
        let ty = decode_column_type(tag, i)?;
        let flags = ColumnFlags::from_bits_truncate(get_i64(bytes, base + COLUMN_OFFSET_FLAGS));
        if flags.contains(ColumnFlags::INDEXED) {
            if !ty.is_symbol() {
                return Err(MetaError::IndexOnNonSymbol(i));
            }
            let capacity = get_i32(bytes, base + COLUMN_OFFSET_INDEX_BLOCK_CAPACITY);
            if capacity < 2 {
                return Err(MetaError::InvalidIndexBlockCapacity { index: i, capacity });
            }
        }
    }
    if ts_index > -1 {
        let tag = get_i32(
            bytes,
            column_offset(ts_index as usize) + COLUMN_OFFSET_TYPE,
        );
        if tag != ColumnType::Timestamp.tag() {
            return Err(MetaError::TimestampNotTimestamp(name_of_tag(tag)));
        }
    }
    let mut offset = names_offset;
    for i in 0..count as usize {
        let name = read_name(bytes, &mut offset, i)?;
        let tag = get_i32(bytes, column_offset(i) + COLUMN_OFFSET_TYPE);
        if tag < 0 {
            continue;
        }
        if !index.insert(name, i) {
            return Err(MetaError::DuplicateColumn {
                index: i,
                name: name.to_string(),
            });
        }
    }
    Ok(())
}

fn read_name<'a>(
    bytes: &'a [u8],
    offset: &mut usize,
    index: usize,
) -> std::result::Result<&'a str, MetaError> {
    if bytes.len() < *offset + 4 {
        return Err(MetaError::FileTooSmall {
            size: bytes.len(),
            required: *offset + 4,
        });
    }
    let len = get_i32(bytes, *offset);
    if len < 1 || len as usize > MAX_COLUMN_NAME_BYTES {
        return Err(MetaError::InvalidColumnName(index));
    }
    let start = *offset + 4;
    let end = start + len as usize;
    if bytes.len() < end {
        return Err(MetaError::FileTooSmall {
            size: bytes.len(),
            required: end,
        });
    }
    *offset = end;
    std::str::from_utf8(&bytes[start..end]).map_err(|_| MetaError::InvalidColumnName(index))
}

/// Validates and decodes metadata.
pub fn read_metadata(bytes: &[u8], expected_version: i32) -> Result<TableMetadata> {
    validate_metadata(bytes, expected_version)?;
    let count = get_i32(bytes, META_OFFSET_COUNT) as usize;
    let partition_by = PartitionBy::from_tag(get_i32(bytes, META_OFFSET_PARTITION_BY))
        .ok_or(MetaError::InvalidPartitionBy(get_i32(bytes, META_OFFSET_PARTITION_BY)))?;
    let mut columns = Vec::with_capacity(count);
    let mut offset = column_offset(count);
    for i in 0..count {
        let base = column_offset(i);
        let tag = get_i32(bytes, base + COLUMN_OFFSET_TYPE);
        let ty = decode_column_type(tag, i)?;
        let name = read_name(bytes, &mut offset, i)?;
        columns.push(ColumnDescriptor {
            name: name.to_string(),
            ty,
            flags: ColumnFlags::from_bits_truncate(get_i64(bytes, base + COLUMN_OFFSET_FLAGS)),
            index_block_capacity: get_i32(bytes, base + COLUMN_OFFSET_INDEX_BLOCK_CAPACITY),
            symbol_capacity: get_i32(bytes, base + COLUMN_OFFSET_SYMBOL_CAPACITY),
            name_txn: get_i64(bytes, base + COLUMN_OFFSET_NAME_TXN),
            deleted: tag < 0,
        });
    }
    Ok(TableMetadata {
        table_id: get_i32(bytes, META_OFFSET_TABLE_ID),
        partition_by,
        timestamp_index: get_i32(bytes, META_OFFSET_TIMESTAMP_INDEX),
        max_uncommitted_rows: get_i32(bytes, META_OFFSET_MAX_UNCOMMITTED_ROWS),
        o3_max_lag: get_i64(bytes, META_OFFSET_O3_MAX_LAG),
        structure_version: get_i64(bytes, META_OFFSET_STRUCTURE_VERSION),
        wal_enabled: get_i32(bytes, META_OFFSET_WAL_ENABLED) != 0,
        columns,
    })
}

/// Column type of a type tag. Negative tags mark deleted columns.
#[inline]
fn decode_column_type(tag: i32, index: usize) -> std::result::Result<ColumnType, MetaError> {
    tag.checked_abs()
        .and_then(ColumnType::from_tag)
        .ok_or(MetaError::InvalidColumnType { index, tag })
}
