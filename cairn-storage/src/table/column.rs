//! Column files inside a partition directory.
//!
//! Fixed-size columns store one value per row in `{col}.d`. Variable-size
//! columns store length-prefixed values in `{col}.d` and `rows + 1` i64
//! offsets in `{col}.i`, entry `k` being the end of row `k - 1`.
//! Symbol columns store the i32 dictionary key.
//!
//! Only the first `row_count` rows published by the transaction file are
//! valid. Appends always start at that row, overwriting whatever an
//! aborted commit left behind.
use crate::error::{Error, Result};
use crate::files::{column_file_name, DATA_FILE_EXT, OFFSET_FILE_EXT};
use crate::meta::ColumnDescriptor;
use cairn_datatype::{ColumnType, Value};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

#[inline]
pub(crate) fn data_file(part_dir: &Path, col: &ColumnDescriptor) -> PathBuf {
    part_dir.join(column_file_name(&col.name, DATA_FILE_EXT, col.name_txn))
}

#[inline]
pub(crate) fn offset_file(part_dir: &Path, col: &ColumnDescriptor) -> PathBuf {
    part_dir.join(column_file_name(&col.name, OFFSET_FILE_EXT, col.name_txn))
}

/// Type used to encode values of the column on disk.
#[inline]
fn storage_type(ty: ColumnType) -> ColumnType {
    if ty.is_symbol() {
        ColumnType::Int
    } else {
        ty
    }
}

#[inline]
fn open_rw(path: &Path) -> Result<File> {
    let f = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    Ok(f)
}

fn read_at(f: &File, offset: u64, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    f.read_exact_at(&mut buf, offset)?;
    Ok(buf)
}

fn read_offsets(f: &File, lo: usize, count: usize) -> Result<Vec<u64>> {
    let bytes = read_at(f, (lo * 8) as u64, count * 8)?;
    Ok(bytes
        .chunks_exact(8)
        .map(|c| u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
        .collect())
}

/// Writes `values` as rows `rows..rows + values.len()` of the column.
/// Symbol values must already be resolved to keys.
pub(crate) fn append_column(
    part_dir: &Path,
    col: &ColumnDescriptor,
    rows: usize,
    values: &[Value],
) -> Result<()> {
    let ty = storage_type(col.ty);
    let data = open_rw(&data_file(part_dir, col))?;
    match ty.fixed_size() {
        Some(size) => {
            let mut buf = Vec::with_capacity(values.len() * size);
            for v in values {
                v.encode_fixed(ty, &mut buf)?;
            }
            data.write_all_at(&buf, (rows * size) as u64)?;
        }
        None => {
            let index = open_rw(&offset_file(part_dir, col))?;
            let start = if rows == 0 {
                index.write_all_at(&0u64.to_le_bytes(), 0)?;
                0
            } else {
                read_offsets(&index, rows, 1)?[0]
            };
            let mut buf = vec![];
            let mut offsets = Vec::with_capacity(values.len() * 8);
            for v in values {
                v.encode_var(ty, &mut buf)?;
                offsets.extend_from_slice(&(start + buf.len() as u64).to_le_bytes());
            }
            data.write_all_at(&buf, start)?;
            index.write_all_at(&offsets, ((rows + 1) * 8) as u64)?;
        }
    }
    Ok(())
}

/// Reads rows `lo..hi` of the column. Symbol columns yield keys.
pub(crate) fn read_column(
    part_dir: &Path,
    col: &ColumnDescriptor,
    lo: usize,
    hi: usize,
) -> Result<Vec<Value>> {
    if lo >= hi {
        return Ok(vec![]);
    }
    let ty = storage_type(col.ty);
    let data = File::open(data_file(part_dir, col))?;
    match ty.fixed_size() {
        Some(size) => {
            let bytes = read_at(&data, (lo * size) as u64, (hi - lo) * size)?;
            bytes
                .chunks_exact(size)
                .map(|b| Value::decode_fixed(ty, b).map_err(Error::from))
                .collect()
        }
        None => {
            let index = File::open(offset_file(part_dir, col))?;
            let offsets = read_offsets(&index, lo, hi - lo + 1)?;
            let start = offsets[0];
            let bytes = read_at(&data, start, (offsets[hi - lo] - start) as usize)?;
            let mut res = Vec::with_capacity(hi - lo);
            for pair in offsets.windows(2) {
                let from = (pair[0] - start) as usize;
                let to = (pair[1] - start) as usize;
                let (v, _) = Value::decode_var(ty, &bytes[from..to])?;
                res.push(v);
            }
            Ok(res)
        }
    }
}

/// Reads the timestamp of a single row.
pub(crate) fn read_timestamp(part_dir: &Path, col: &ColumnDescriptor, row: usize) -> Result<i64> {
    let v = read_column(part_dir, col, row, row + 1)?;
    v.first()
        .and_then(Value::as_timestamp)
        .ok_or_else(|| {
            Error::critical(
                -1,
                format!(
                    "null designated timestamp [dir={}, row={}]",
                    part_dir.display(),
                    row
                ),
            )
        })
}

/// Hard-links every file of `from` to the file names of `to`.
pub(crate) fn link_column(part_dir: &Path, from: &ColumnDescriptor, to: &ColumnDescriptor) -> Result<()> {
    std::fs::hard_link(data_file(part_dir, from), data_file(part_dir, to))?;
    if from.ty.is_var_size() {
        std::fs::hard_link(offset_file(part_dir, from), offset_file(part_dir, to))?;
    }
    Ok(())
}

/// Removes files of a column, ignoring files that do not exist.
pub(crate) fn remove_column(part_dir: &Path, col: &ColumnDescriptor) -> Result<()> {
    let mut paths = vec![data_file(part_dir, col)];
    if col.ty.is_var_size() {
        paths.push(offset_file(part_dir, col));
    }
    for p in paths {
        match std::fs::remove_file(&p) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
            _ => (),
        }
    }
    Ok(())
}
