use super::codec::{read_metadata, write_metadata};
use super::{TableMetadata, METADATA_VERSION};
use crate::error::{Error, Result};
use crate::files::{fsync_dir, read_file, META_FILE_NAME, META_SWAP_FILE_NAME};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Writes `_meta` of a new table.
pub fn create_meta_file(table_dir: &Path, meta: &TableMetadata) -> Result<()> {
    let bytes = write_metadata(meta, METADATA_VERSION, meta.table_id);
    let mut f = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(table_dir.join(META_FILE_NAME))?;
    f.write_all(&bytes)?;
    f.sync_all()?;
    Ok(())
}

#[inline]
fn swap_file_path(table_dir: &Path, index: u32) -> PathBuf {
    if index == 0 {
        table_dir.join(META_SWAP_FILE_NAME)
    } else {
        table_dir.join(format!("{}.{}", META_SWAP_FILE_NAME, index))
    }
}

/// Replaces `_meta` without ever exposing a partial file to readers:
/// the new content is written and synced to a swap file which is then
/// renamed over the live file.
pub fn replace_meta_file(table_dir: &Path, meta: &TableMetadata, retry_count: u32) -> Result<()> {
    let bytes = write_metadata(meta, METADATA_VERSION, meta.table_id);
    let mut last_err = None;
    for i in 0..retry_count.max(1) {
        let swap = swap_file_path(table_dir, i);
        if swap.exists() {
            if let Err(e) = fs::remove_file(&swap) {
                warn!(path = %swap.display(), error = %e, "cannot remove stale metadata swap file");
                last_err = Some(e);
                continue;
            }
        }
        let mut f = match OpenOptions::new().write(true).create_new(true).open(&swap) {
            Ok(f) => f,
            Err(e) => {
                last_err = Some(e);
                continue;
            }
        };
        f.write_all(&bytes)?;
        f.sync_all()?;
        drop(f);
        fs::rename(&swap, table_dir.join(META_FILE_NAME))?;
        fsync_dir(table_dir)?;
        debug!(
            dir = %table_dir.display(),
            structure_version = meta.structure_version,
            "metadata replaced"
        );
        return Ok(());
    }
    let errno = last_err.as_ref().and_then(|e| e.raw_os_error()).unwrap_or(-1);
    Err(Error::critical(
        errno,
        format!("cannot open metadata swap file [dir={}]", table_dir.display()),
    ))
}

/// Loads `_meta`, spinning while the file is temporarily missing.
pub fn load_meta_file(table_dir: &Path, timeout: Duration) -> Result<TableMetadata> {
    let path = table_dir.join(META_FILE_NAME);
    let deadline = Instant::now() + timeout;
    loop {
        match read_file(&path) {
            Ok(bytes) => return read_metadata(&bytes, METADATA_VERSION),
            Err(e) if e.is_file_not_found() => {
                if Instant::now() >= deadline {
                    warn!(path = %path.display(), "metadata file did not reappear in time");
                    return Err(Error::MetadataReadTimeout(path.display().to_string()));
                }
                thread::sleep(Duration::from_millis(1));
            }
            Err(e) => return Err(e),
        }
    }
}
