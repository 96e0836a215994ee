//! Table directory layout.
//!
//! ```text
//! {root}/{table}[~{id}]/
//!     _meta            table metadata
//!     _txn             transaction record store
//!     _cv              column version file
//!     _name            table name, NUL terminated
//!     _lock            advisory lock of the writer
//!     _txnlog          sequencer log of WAL tables
//!     _mv, _mv.s       view definition and refresh state
//!     {col}.o, {col}.c symbol dictionary offsets and chars
//!     {partition}/     {col}.d data, {col}.i offsets of var-size data
//! ```
use crate::error::{Error, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const META_FILE_NAME: &str = "_meta";
pub const META_SWAP_FILE_NAME: &str = "_meta.swp";
pub const TXN_FILE_NAME: &str = "_txn";
pub const COLUMN_VERSION_FILE_NAME: &str = "_cv";
pub const TABLE_NAME_FILE_NAME: &str = "_name";
pub const LOCK_FILE_NAME: &str = "_lock";
pub const TXN_LOG_FILE_NAME: &str = "_txnlog";
pub const MAT_VIEW_FILE_NAME: &str = "_mv";
pub const MAT_VIEW_STATE_FILE_NAME: &str = "_mv.s";

pub const COLUMN_VERSION_FILE_HEADER_SIZE: usize = 40;
/// Separator between table name and table id of WAL table directory.
pub const TABLE_ID_SEPARATOR: char = '~';

pub const DATA_FILE_EXT: &str = "d";
pub const OFFSET_FILE_EXT: &str = "i";
pub const SYMBOL_OFFSET_FILE_EXT: &str = "o";
pub const SYMBOL_CHAR_FILE_EXT: &str = "c";

/// File name of a column file, suffixed with column name txn if the
/// column was re-created after table creation.
#[inline]
pub fn column_file_name(column: &str, ext: &str, name_txn: i64) -> String {
    if name_txn > -1 {
        format!("{}.{}.{}", column, ext, name_txn)
    } else {
        format!("{}.{}", column, ext)
    }
}

#[inline]
pub fn table_dir_name(table_name: &str, table_id: i32, wal: bool) -> String {
    if wal {
        format!("{}{}{}", table_name, TABLE_ID_SEPARATOR, table_id)
    } else {
        table_name.to_string()
    }
}

/// Exclusive advisory lock of a table writer.
/// Released when dropped.
#[derive(Debug)]
pub struct TableLock {
    file: File,
    path: PathBuf,
}

impl TableLock {
    pub fn acquire(table_dir: &Path) -> Result<Self> {
        let path = table_dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
                return Err(Error::TableLocked(path));
            }
            return Err(err.into());
        }
        debug!(path = %path.display(), "table lock acquired");
        Ok(TableLock { file, path })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TableLock {
    fn drop(&mut self) {
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

/// Makes sure the file is backed by at least `len` bytes of disk.
/// Never shrinks the file.
pub fn allocate_disk_space(file: &File, len: u64) -> Result<()> {
    if file.metadata()?.len() >= len {
        return Ok(());
    }
    #[cfg(target_os = "linux")]
    {
        let rc = unsafe { libc::posix_fallocate(file.as_raw_fd(), 0, len as libc::off_t) };
        match rc {
            0 => return Ok(()),
            libc::EOPNOTSUPP | libc::EINVAL => (),
            errno => return Err(Error::critical(errno, "could not allocate disk space")),
        }
    }
    file.set_len(len)?;
    Ok(())
}

#[inline]
pub fn fsync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

/// Replaces a small file through temp file, fsync and rename.
pub fn write_file_atomically(dir: &Path, name: &str, bytes: &[u8]) -> Result<()> {
    let tmp = dir.join(format!("{}.tmp", name));
    {
        let mut f = File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, dir.join(name))?;
    fsync_dir(dir)
}

#[inline]
pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    let mut buf = vec![];
    File::open(path)?.read_to_end(&mut buf)?;
    Ok(buf)
}

pub fn create_column_version_file(table_dir: &Path) -> Result<()> {
    let mut f = File::create(table_dir.join(COLUMN_VERSION_FILE_NAME))?;
    f.write_all(&[0u8; COLUMN_VERSION_FILE_HEADER_SIZE])?;
    f.sync_all()?;
    Ok(())
}

pub fn write_table_name_file(table_dir: &Path, table_name: &str) -> Result<()> {
    let mut bytes = Vec::with_capacity(table_name.len() + 1);
    bytes.extend_from_slice(table_name.as_bytes());
    bytes.push(0);
    let mut f = File::create(table_dir.join(TABLE_NAME_FILE_NAME))?;
    f.write_all(&bytes)?;
    f.sync_all()?;
    Ok(())
}

pub fn read_table_name_file(table_dir: &Path) -> Result<String> {
    let bytes = read_file(&table_dir.join(TABLE_NAME_FILE_NAME))?;
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8(bytes[..end].to_vec())
        .map_err(|_| Error::critical(-1, "table name file is not valid UTF-8"))
}

#[inline]
fn is_forbidden_char(c: char) -> bool {
    matches!(
        c,
        '?' | ',' | '\'' | '"' | '\\' | '/' | ':' | ')' | '(' | '+' | '*' | '%' | '~'
            | '\u{0}'..='\u{1f}'
            | '\u{7f}'
            | '\u{feff}'
    )
}

/// Table names become directory names: no path separators, no dot-only
/// segments and no leading or trailing dot.
pub fn is_valid_table_name(name: &str, limit: usize) -> bool {
    if name.is_empty() || name.len() > limit {
        return false;
    }
    if name.starts_with('.') || name.ends_with('.') || name.contains("..") {
        return false;
    }
    !name.chars().any(is_forbidden_char)
}

/// Column names become file name prefixes, dots and dashes are excluded
/// on top of table name rules.
pub fn is_valid_column_name(name: &str, limit: usize) -> bool {
    if name.is_empty() || name.len() > limit {
        return false;
    }
    !name
        .chars()
        .any(|c| c == '.' || c == '-' || is_forbidden_char(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_file_name() {
        assert_eq!(column_file_name("price", DATA_FILE_EXT, -1), "price.d");
        assert_eq!(column_file_name("sym", SYMBOL_CHAR_FILE_EXT, 3), "sym.c.3");
        assert_eq!(table_dir_name("trades", 7, true), "trades~7");
        assert_eq!(table_dir_name("trades", 7, false), "trades");
    }

    #[test]
    fn test_name_validation() {
        assert!(is_valid_table_name("base_price", 127));
        assert!(is_valid_table_name("x.y", 127));
        assert!(!is_valid_table_name("", 127));
        assert!(!is_valid_table_name("..", 127));
        assert!(!is_valid_table_name("a/b", 127));
        assert!(!is_valid_table_name(".hidden", 127));
        assert!(!is_valid_table_name("abc", 2));
        assert!(is_valid_column_name("price", 127));
        assert!(!is_valid_column_name("p.x", 127));
        assert!(!is_valid_column_name("p-x", 127));
        assert!(!is_valid_column_name("p\u{feff}", 127));
        assert!(!is_valid_column_name("a\nb", 127));
    }

    #[test]
    fn test_table_lock_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let lock = TableLock::acquire(dir.path()).unwrap();
        assert!(matches!(
            TableLock::acquire(dir.path()),
            Err(Error::TableLocked(_))
        ));
        drop(lock);
        assert!(TableLock::acquire(dir.path()).is_ok());
    }

    #[test]
    fn test_small_files() {
        let dir = tempfile::tempdir().unwrap();
        write_table_name_file(dir.path(), "base_price").unwrap();
        assert_eq!(read_table_name_file(dir.path()).unwrap(), "base_price");
        create_column_version_file(dir.path()).unwrap();
        let cv = read_file(&dir.path().join(COLUMN_VERSION_FILE_NAME)).unwrap();
        assert_eq!(cv.len(), COLUMN_VERSION_FILE_HEADER_SIZE);
        write_file_atomically(dir.path(), "x", b"abc").unwrap();
        assert_eq!(read_file(&dir.path().join("x")).unwrap(), b"abc");
        let f = OpenOptions::new()
            .read(true)
            .write(true)
            .open(dir.path().join("x"))
            .unwrap();
        allocate_disk_space(&f, 4096).unwrap();
        assert_eq!(f.metadata().unwrap().len(), 4096);
    }
}
