use crate::error::{Error, Result};
use crate::files::{column_file_name, SYMBOL_CHAR_FILE_EXT, SYMBOL_OFFSET_FILE_EXT};
use crate::meta::ColumnDescriptor;
use cairn_datatype::value::NULL_INT;
use cairn_datatype::{ColumnType, Value};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

/// Upper bound of pre-allocated dictionary slots.
const MAX_PREALLOCATED_SYMBOLS: usize = 1 << 16;

/// SymbolMap is the dictionary of a symbol column, shared by all
/// partitions and stored at the table root.
///
/// `{col}.c` holds length-prefixed values in key order, `{col}.o` holds
/// the i64 start offset of each value. Only the first `count` values
/// published by the transaction file are visible.
#[derive(Debug)]
pub struct SymbolMap {
    offsets_path: PathBuf,
    chars_path: PathBuf,
    values: Vec<String>,
    keys: HashMap<String, i32>,
    /// Number of values persisted to files.
    flushed: usize,
    /// End of the last persisted value in `.c`.
    chars_end: u64,
}

impl SymbolMap {
    /// Loads the first `count` values of the dictionary.
    pub fn open(table_dir: &Path, col: &ColumnDescriptor, count: usize) -> Result<Self> {
        let (offsets_path, chars_path) = symbol_file_paths(table_dir, col);
        let cap = (col.symbol_capacity.max(0) as usize).min(MAX_PREALLOCATED_SYMBOLS);
        let mut map = SymbolMap {
            offsets_path,
            chars_path,
            values: Vec::with_capacity(cap),
            keys: HashMap::with_capacity(cap),
            flushed: 0,
            chars_end: 0,
        };
        map.reload(count)?;
        Ok(map)
    }

    /// Creates empty dictionary files, truncating leftovers.
    pub fn create(table_dir: &Path, col: &ColumnDescriptor) -> Result<Self> {
        let map = Self::open(table_dir, col, 0)?;
        map.truncate_files()?;
        Ok(map)
    }

    /// Loads values up to `count` that are not yet loaded.
    pub fn reload(&mut self, count: usize) -> Result<()> {
        if count <= self.flushed {
            return Ok(());
        }
        let offsets = File::open(&self.offsets_path)?;
        let chars = File::open(&self.chars_path)?;
        let n = count - self.flushed;
        let mut buf = vec![0u8; 8];
        offsets.read_exact_at(&mut buf, (self.flushed * 8) as u64)?;
        let start = u64::from_le_bytes([
            buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
        ]);
        let len = chars.metadata()?.len().saturating_sub(start) as usize;
        let mut data = vec![0u8; len];
        chars.read_exact_at(&mut data, start)?;
        let mut pos = 0;
        for _ in 0..n {
            let (v, consumed) = Value::decode_var(ColumnType::String, &data[pos..])?;
            let s = match v {
                Value::Str(s) => s,
                _ => {
                    return Err(Error::critical(
                        -1,
                        format!("null symbol value [path={}]", self.chars_path.display()),
                    ))
                }
            };
            self.keys.insert(s.clone(), self.values.len() as i32);
            self.values.push(s);
            pos += consumed;
        }
        self.flushed = count;
        self.chars_end = start + pos as u64;
        Ok(())
    }

    /// Drops file content beyond the persisted values.
    pub fn truncate_files(&self) -> Result<()> {
        let offsets = open_rw(&self.offsets_path)?;
        offsets.set_len((self.flushed * 8) as u64)?;
        let chars = open_rw(&self.chars_path)?;
        chars.set_len(self.chars_end)?;
        Ok(())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns key of `value`, adding it to the dictionary if absent.
    pub fn put(&mut self, value: &str) -> i32 {
        if let Some(k) = self.keys.get(value) {
            return *k;
        }
        let key = self.values.len() as i32;
        self.keys.insert(value.to_string(), key);
        self.values.push(value.to_string());
        key
    }

    /// Resolves a symbol cell to its key, null stays null.
    pub fn encode(&mut self, value: &Value) -> Value {
        match value {
            Value::Null => Value::Null,
            Value::Str(s) => Value::Int(self.put(s)),
            other => Value::Int(self.put(&other.to_string())),
        }
    }

    #[inline]
    pub fn value_of(&self, key: i32) -> Option<&str> {
        if key == NULL_INT || key < 0 {
            return None;
        }
        self.values.get(key as usize).map(|s| s.as_str())
    }

    /// Resolves a stored key back to text.
    pub fn decode(&self, value: &Value) -> Result<Value> {
        match value {
            Value::Int(k) => self
                .value_of(*k)
                .map(|s| Value::Str(s.to_string()))
                .ok_or_else(|| {
                    Error::critical(
                        -1,
                        format!(
                            "symbol key out of range [path={}, key={}]",
                            self.chars_path.display(),
                            k
                        ),
                    )
                }),
            _ => Ok(Value::Null),
        }
    }

    /// Persists values added since the last flush.
    pub fn flush(&mut self) -> Result<()> {
        if self.flushed == self.values.len() {
            return Ok(());
        }
        let mut chars = vec![];
        let mut offsets = Vec::with_capacity((self.values.len() - self.flushed) * 8);
        for v in &self.values[self.flushed..] {
            offsets.extend_from_slice(&(self.chars_end + chars.len() as u64).to_le_bytes());
            Value::Str(v.clone()).encode_var(ColumnType::String, &mut chars)?;
        }
        open_rw(&self.chars_path)?.write_all_at(&chars, self.chars_end)?;
        open_rw(&self.offsets_path)?.write_all_at(&offsets, (self.flushed * 8) as u64)?;
        self.chars_end += chars.len() as u64;
        self.flushed = self.values.len();
        Ok(())
    }

    /// Forgets values added since the last flush.
    pub fn rollback(&mut self) {
        for v in self.values.drain(self.flushed..) {
            self.keys.remove(&v);
        }
    }

    /// Forgets values beyond `count`, used when a commit failed after flush.
    pub fn rollback_to(&mut self, count: usize) -> Result<()> {
        if count >= self.values.len() {
            return Ok(());
        }
        let start = if count < self.flushed {
            let offsets = File::open(&self.offsets_path)?;
            let mut buf = [0u8; 8];
            offsets.read_exact_at(&mut buf, (count * 8) as u64)?;
            Some(u64::from_le_bytes(buf))
        } else {
            None
        };
        for v in self.values.drain(count..) {
            self.keys.remove(&v);
        }
        if let Some(start) = start {
            self.flushed = count;
            self.chars_end = start;
        }
        Ok(())
    }
}

/// Returns `.o` and `.c` paths of a symbol column dictionary.
#[inline]
pub fn symbol_file_paths(table_dir: &Path, col: &ColumnDescriptor) -> (PathBuf, PathBuf) {
    (
        table_dir.join(column_file_name(&col.name, SYMBOL_OFFSET_FILE_EXT, col.name_txn)),
        table_dir.join(column_file_name(&col.name, SYMBOL_CHAR_FILE_EXT, col.name_txn)),
    )
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
