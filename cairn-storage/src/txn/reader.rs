use super::{record_size, slot_offsets, TxnRecord};
use crate::error::{Error, Result};
use crate::mem::MappedFile;
use std::path::Path;
use std::sync::atomic::{fence, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// TxReader loads consistent snapshots of a `_txn` file without locking,
/// racing the writer.
pub struct TxReader {
    file: MappedFile,
    /// Version of the cached record, None before first load.
    version: Option<u64>,
    record: TxnRecord,
}

impl TxReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = MappedFile::open_ro(path)?;
        Ok(TxReader {
            file,
            version: None,
            record: TxnRecord::empty(0),
        })
    }

    /// Version of the last loaded snapshot.
    #[inline]
    pub fn version(&self) -> Option<u64> {
        self.version
    }

    /// Last loaded record.
    #[inline]
    pub fn record(&self) -> &TxnRecord {
        &self.record
    }

    /// Reads the published record. A read that overlaps a commit is torn
    /// and retried until `timeout` elapses.
    pub fn read_snapshot(&mut self, timeout: Duration) -> Result<&TxnRecord> {
        let deadline = Instant::now() + timeout;
        let mut attempts = 0u32;
        loop {
            let v1 = self.file.load_version();
            if self.version == Some(v1) {
                return Ok(&self.record);
            }
            if let Some(rec) = self.try_read(v1)? {
                fence(Ordering::Acquire);
                let v2 = self.file.load_version();
                if v1 == v2 {
                    self.version = Some(v1);
                    self.record = rec;
                    return Ok(&self.record);
                }
            }
            attempts += 1;
            trace!(path = %self.file.path().display(), version = v1, attempts, "torn txn read");
            if Instant::now() >= deadline {
                warn!(
                    path = %self.file.path().display(),
                    attempts,
                    "timeout reading transaction file"
                );
                return Err(Error::TxnReadTimeout);
            }
            thread::yield_now();
        }
    }

    /// Reads the slot of `version`, returns None on inconsistent data.
    fn try_read(&mut self, version: u64) -> Result<Option<TxnRecord>> {
        let (offset, symbols, partitions) = slot_offsets(version);
        let offset = self.file.get_i32(offset)?;
        let symbols = self.file.get_i32(symbols)?;
        let partitions = self.file.get_i32(partitions)?;
        if offset <= 0 || symbols < 0 || partitions < 0 {
            return Ok(None);
        }
        let (offset, symbols, partitions) = (offset as usize, symbols as usize, partitions as usize);
        let size = record_size(symbols, partitions);
        if offset + size > self.file.len() {
            self.file.remap_to_file_size()?;
            if offset + size > self.file.len() {
                return Ok(None);
            }
        }
        let bytes = self.file.get_bytes(offset, size)?;
        Ok(TxnRecord::decode(&bytes, symbols, partitions))
    }
}
