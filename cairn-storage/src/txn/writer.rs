use super::{record_size, slot_offsets, TxnRecord, TX_BASE_HEADER_SIZE};
use crate::error::{Error, Result};
use crate::mem::MappedFile;
use std::path::Path;
use tracing::debug;

/// TxWriter is the single writer of a `_txn` file.
///
/// Each commit writes the full record into the slot not designated by
/// the current version, then publishes it by bumping the version.
/// The previously published record stays intact until the commit after.
pub struct TxWriter {
    file: MappedFile,
    version: u64,
    record: TxnRecord,
}

impl TxWriter {
    /// Creates `_txn` in reset state, slot A authoritative.
    pub fn create(path: &Path, symbol_count: usize) -> Result<Self> {
        if path.exists() {
            return Err(Error::critical(
                libc::EEXIST,
                format!("transaction file already exists[path={}]", path.display()),
            ));
        }
        let record = TxnRecord::empty(symbol_count);
        let bytes = record.encode();
        let file = MappedFile::open_rw(path, TX_BASE_HEADER_SIZE + bytes.len())?;
        file.put_bytes(TX_BASE_HEADER_SIZE, &bytes)?;
        let (offset, symbols, partitions) = slot_offsets(0);
        file.put_i32(offset, TX_BASE_HEADER_SIZE as i32)?;
        file.put_i32(symbols, record.symbols_bytes() as i32)?;
        file.put_i32(partitions, record.partitions_bytes() as i32)?;
        let mut writer = TxWriter {
            file,
            version: 0,
            record,
        };
        writer.publish(0)?;
        writer.file.sync()?;
        Ok(writer)
    }

    /// Opens an existing `_txn` file. The caller holds the table lock,
    /// so the published record cannot change underneath.
    pub fn open(path: &Path) -> Result<Self> {
        let file = MappedFile::open_rw(path, TX_BASE_HEADER_SIZE)?;
        let version = file.load_version();
        let (offset, symbols, partitions) = slot_offsets(version);
        let offset = file.get_i32(offset)? as usize;
        let symbols = file.get_i32(symbols)? as usize;
        let partitions = file.get_i32(partitions)? as usize;
        let bytes = file.get_bytes(offset, record_size(symbols, partitions))?;
        let record = TxnRecord::decode(&bytes, symbols, partitions).ok_or_else(|| {
            Error::critical(
                -1,
                format!("corrupt transaction file[path={}]", path.display()),
            )
        })?;
        Ok(TxWriter {
            file,
            version,
            record,
        })
    }

    /// Last published record.
    #[inline]
    pub fn record(&self) -> &TxnRecord {
        &self.record
    }

    #[inline]
    pub fn txn(&self) -> u64 {
        self.record.txn
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Commits the next table state. The txn number and lag checksum of
    /// `next` are assigned here. Returns the new txn.
    pub fn commit(&mut self, next: &TxnRecord) -> Result<u64> {
        let mut rec = next.clone();
        rec.txn = self.record.txn + 1;
        rec.update_lag_checksum();
        let bytes = rec.encode();

        let (active_offset, active_symbols, active_partitions) = slot_offsets(self.version);
        let active_offset = self.file.get_i32(active_offset)? as usize;
        let active_size = record_size(
            self.file.get_i32(active_symbols)? as usize,
            self.file.get_i32(active_partitions)? as usize,
        );
        let offset = if TX_BASE_HEADER_SIZE + bytes.len() <= active_offset {
            TX_BASE_HEADER_SIZE
        } else {
            active_offset + active_size
        };
        self.file.extend(offset + bytes.len())?;
        self.file.put_bytes(offset, &bytes)?;

        let version = self.version + 1;
        let (slot_offset, slot_symbols, slot_partitions) = slot_offsets(version);
        self.file.put_i32(slot_offset, offset as i32)?;
        self.file.put_i32(slot_symbols, rec.symbols_bytes() as i32)?;
        self.file.put_i32(slot_partitions, rec.partitions_bytes() as i32)?;
        self.publish(version)?;
        debug!(
            path = %self.file.path().display(),
            txn = rec.txn,
            version,
            offset,
            rows = rec.row_count(),
            partitions = rec.partitions.len(),
            "txn committed"
        );
        self.record = rec;
        Ok(self.record.txn)
    }

    /// Publishes the slot designated by `version`. This is the only place
    /// the version word is written; the release store orders every prior
    /// record and slot header write before it.
    #[inline]
    fn publish(&mut self, version: u64) -> Result<()> {
        self.file.store_version(version)?;
        self.version = version;
        Ok(())
    }

    #[inline]
    pub fn sync(&self) -> Result<()> {
        self.file.sync()
    }
}
