use super::column::read_column;
use super::symbol::SymbolMap;
use super::{Record, TableToken};
use crate::cancel::Cancellation;
use crate::error::Result;
use crate::files::TXN_FILE_NAME;
use crate::meta::{load_meta_file, TableMetadata};
use crate::partition::partition_dir_name;
use crate::txn::{TxReader, TxnRecord};
use cairn_datatype::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

/// TableReader reads committed rows of a table as of the last loaded
/// transaction snapshot. It never blocks the writer.
pub struct TableReader {
    token: TableToken,
    dir: PathBuf,
    timeout: Duration,
    meta: TableMetadata,
    tx: TxReader,
    symbols: HashMap<usize, SymbolMap>,
}

impl TableReader {
    /// Opens reader and loads the latest snapshot. `timeout` bounds
    /// torn-read retries and metadata reload spin.
    pub fn open(dir: &Path, token: TableToken, timeout: Duration) -> Result<Self> {
        let meta = load_meta_file(dir, timeout)?;
        let tx = TxReader::open(&dir.join(TXN_FILE_NAME))?;
        let mut reader = TableReader {
            token,
            dir: dir.to_path_buf(),
            timeout,
            meta,
            tx,
            symbols: HashMap::new(),
        };
        reader.reload()?;
        Ok(reader)
    }

    #[inline]
    pub fn token(&self) -> &TableToken {
        &self.token
    }

    #[inline]
    pub fn metadata(&self) -> &TableMetadata {
        &self.meta
    }

    /// Loaded snapshot.
    #[inline]
    pub fn snapshot(&self) -> &TxnRecord {
        self.tx.record()
    }

    #[inline]
    pub fn txn(&self) -> u64 {
        self.tx.record().txn
    }

    #[inline]
    pub fn seq_txn(&self) -> u64 {
        self.tx.record().seq_txn
    }

    #[inline]
    pub fn row_count(&self) -> u64 {
        self.tx.record().row_count()
    }

    /// Loads the latest snapshot, reloading metadata when the table
    /// structure changed. Returns whether the snapshot moved.
    pub fn reload(&mut self) -> Result<bool> {
        let prev = self.tx.version();
        let rec = self.tx.read_snapshot(self.timeout)?;
        let structure_version = rec.structure_version as i64;
        let counts = rec.symbols.clone();
        if structure_version != self.meta.structure_version {
            self.meta = load_meta_file(&self.dir, self.timeout)?;
            self.symbols.clear();
            debug!(
                table = %self.token,
                structure_version = self.meta.structure_version,
                "reader metadata reloaded"
            );
        }
        for (slot, pos) in self.meta.symbol_positions().into_iter().enumerate() {
            let col = &self.meta.columns[pos];
            if col.deleted {
                self.symbols.remove(&pos);
                continue;
            }
            let count = counts.get(slot).map_or(0, |c| c.permanent.max(0) as usize);
            match self.symbols.get_mut(&pos) {
                Some(map) => map.reload(count)?,
                None => {
                    let map = SymbolMap::open(&self.dir, col, count)?;
                    self.symbols.insert(pos, map);
                }
            }
        }
        Ok(prev != self.tx.version())
    }

    /// All rows of the loaded snapshot in partition and timestamp order.
    pub fn records(&mut self) -> Result<Vec<Record>> {
        self.records_between(i64::MIN, i64::MAX, &Cancellation::new())
    }

    /// Rows with designated timestamp in `[lo, hi)`. Tables without
    /// designated timestamp return all rows.
    ///
    /// A partition can be purged by a concurrent rewrite after the
    /// snapshot was loaded, in which case the snapshot is reloaded and
    /// the scan restarts.
    pub fn records_between(
        &mut self,
        lo: i64,
        hi: i64,
        cancel: &Cancellation,
    ) -> Result<Vec<Record>> {
        let deadline = Instant::now() + self.timeout;
        loop {
            match self.scan(lo, hi, cancel) {
                Err(e) if e.is_file_not_found() && Instant::now() < deadline => {
                    debug!(table = %self.token, error = %e, "partition gone while scanning");
                    self.reload()?;
                }
                res => return res,
            }
        }
    }

    fn scan(&self, lo: i64, hi: i64, cancel: &Cancellation) -> Result<Vec<Record>> {
        let by = self.meta.partition_by;
        let ts_col = self.meta.timestamp_index();
        let mut res = vec![];
        for p in &self.tx.record().partitions {
            if ts_col.is_some() && (p.timestamp >= hi || by.next(p.timestamp)? <= lo) {
                continue;
            }
            let dir = self.dir.join(partition_dir_name(by, p.timestamp, p.name_txn)?);
            let rows = p.row_count as usize;
            let (from, to) = match ts_col {
                Some(tc) => {
                    let ts = read_column(&dir, &self.meta.columns[tc], 0, rows)?;
                    let before = |bound: i64| {
                        ts.partition_point(|v| v.as_timestamp().map_or(true, |t| t < bound))
                    };
                    (before(lo), before(hi))
                }
                None => (0, rows),
            };
            if from >= to {
                continue;
            }
            let mut columns: Vec<std::vec::IntoIter<Value>> =
                Vec::with_capacity(self.meta.column_count());
            for (pos, col) in self.meta.columns.iter().enumerate() {
                if col.deleted {
                    columns.push(vec![].into_iter());
                    continue;
                }
                let mut values = read_column(&dir, col, from, to)?;
                if let Some(map) = self.symbols.get(&pos) {
                    values = values
                        .iter()
                        .map(|v| map.decode(v))
                        .collect::<Result<Vec<_>>>()?;
                }
                columns.push(values.into_iter());
            }
            for _ in from..to {
                cancel.check()?;
                let values = columns
                    .iter_mut()
                    .map(|c| c.next().unwrap_or(Value::Null))
                    .collect();
                res.push(Record::new(values));
            }
        }
        Ok(res)
    }
}
