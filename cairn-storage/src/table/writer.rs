use super::column::{append_column, link_column, read_column, read_timestamp, remove_column};
use super::symbol::{symbol_file_paths, SymbolMap};
use super::TableToken;
use crate::conf::EngineConfig;
use crate::error::{Error, Result};
use crate::files::{TableLock, TXN_FILE_NAME, TXN_LOG_FILE_NAME};
use crate::meta::{
    load_meta_file, replace_meta_file, ColumnDescriptor, SymbolOptions, TableMetadata,
};
use crate::partition::partition_dir_name;
use crate::seq::{SeqTxnTracker, TxnLog};
use crate::txn::{PartitionEntry, SymbolCount, TxWriter, TxnRecord};
use cairn_datatype::timestamp::{MAX_TIMESTAMP, MIN_TIMESTAMP};
use cairn_datatype::{ColumnType, Value};
use flume::Sender;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

struct PendingRow {
    timestamp: i64,
    values: Vec<Value>,
}

/// TableWriter is the single writer of a table, guarded by the table lock
/// for its whole lifetime.
///
/// Rows are buffered until `commit`, which writes column files and then
/// publishes the new state through the transaction file. Readers never
/// see uncommitted rows.
pub struct TableWriter {
    token: TableToken,
    dir: PathBuf,
    file_name_limit: usize,
    meta_swap_retry_count: u32,
    meta: TableMetadata,
    tx: TxWriter,
    txn_log: Option<TxnLog>,
    /// Dictionaries of live symbol columns by column position.
    symbols: HashMap<usize, SymbolMap>,
    pending: Vec<PendingRow>,
    tracker: Arc<SeqTxnTracker>,
    notifier: Option<Sender<()>>,
    // released last
    _lock: TableLock,
}

impl TableWriter {
    pub fn open(
        dir: &Path,
        token: TableToken,
        config: &EngineConfig,
        tracker: Arc<SeqTxnTracker>,
        notifier: Option<Sender<()>>,
    ) -> Result<Self> {
        let lock = TableLock::acquire(dir)?;
        let meta = load_meta_file(dir, config.spin_lock_timeout())?;
        let tx = TxWriter::open(&dir.join(TXN_FILE_NAME))?;
        let mut symbols = HashMap::new();
        for (slot, pos) in meta.symbol_positions().into_iter().enumerate() {
            let col = &meta.columns[pos];
            if col.deleted {
                continue;
            }
            let count = tx
                .record()
                .symbols
                .get(slot)
                .map_or(0, |c| c.permanent.max(0) as usize);
            let map = SymbolMap::open(dir, col, count)?;
            // drop values written by a commit that never got published
            map.truncate_files()?;
            symbols.insert(pos, map);
        }
        let txn_log = if meta.wal_enabled {
            let mut log = TxnLog::open_rw(&dir.join(TXN_LOG_FILE_NAME))?;
            let rec = tx.record();
            while log.max_seq_txn() < rec.seq_txn {
                warn!(
                    table = %token,
                    seq_txn = log.max_seq_txn() + 1,
                    "sequencer log behind transaction file, restoring entry"
                );
                log.append(rec.txn, rec.min_timestamp, rec.max_timestamp, rec.row_count())?;
            }
            Some(log)
        } else {
            None
        };
        debug!(table = %token, txn = tx.txn(), "table writer opened");
        Ok(TableWriter {
            token,
            dir: dir.to_path_buf(),
            file_name_limit: config.file_name_limit,
            meta_swap_retry_count: config.meta_swap_retry_count,
            meta,
            tx,
            txn_log,
            symbols,
            pending: vec![],
            tracker,
            notifier,
            _lock: lock,
        })
    }

    #[inline]
    pub fn token(&self) -> &TableToken {
        &self.token
    }

    #[inline]
    pub fn metadata(&self) -> &TableMetadata {
        &self.meta
    }

    /// Last published transaction record.
    #[inline]
    pub fn record(&self) -> &TxnRecord {
        self.tx.record()
    }

    #[inline]
    pub fn txn(&self) -> u64 {
        self.tx.txn()
    }

    #[inline]
    pub fn seq_txn(&self) -> u64 {
        self.tx.record().seq_txn
    }

    /// Committed row count.
    #[inline]
    pub fn row_count(&self) -> u64 {
        self.tx.record().row_count()
    }

    #[inline]
    pub fn pending_row_count(&self) -> usize {
        self.pending.len()
    }

    /// Starts a new row. `timestamp` is the value of the designated
    /// timestamp and is ignored by tables without one.
    pub fn new_row(&mut self, timestamp: i64) -> Result<Row<'_>> {
        let mut values = vec![Value::Null; self.meta.column_count()];
        if let Some(idx) = self.meta.timestamp_index() {
            if !(MIN_TIMESTAMP..=MAX_TIMESTAMP).contains(&timestamp) {
                return Err(Error::InvalidArgument(format!(
                    "designated timestamp out of range [ts={}]",
                    timestamp
                )));
            }
            values[idx] = Value::Timestamp(timestamp);
        }
        Ok(Row {
            writer: self,
            timestamp,
            values,
        })
    }

    /// Publishes buffered rows, returns the txn of the table after commit.
    pub fn commit(&mut self) -> Result<u64> {
        if self.pending.is_empty() {
            return Ok(self.tx.txn());
        }
        let rows = std::mem::take(&mut self.pending);
        let counts: Vec<(usize, usize)> = self.symbols.iter().map(|(p, m)| (*p, m.len())).collect();
        match self.commit_rows(rows) {
            Ok(txn) => Ok(txn),
            Err(e) => {
                for (pos, count) in counts {
                    if let Some(map) = self.symbols.get_mut(&pos) {
                        map.rollback_to(count)?;
                    }
                }
                error!(table = %self.token, error = %e, "commit failed");
                Err(e)
            }
        }
    }

    fn commit_rows(&mut self, mut rows: Vec<PendingRow>) -> Result<u64> {
        let txn = self.tx.txn() + 1;
        let by = self.meta.partition_by;
        let ts_col = self.meta.timestamp_index();
        let dedup = self.meta.dedup_key_positions();

        for row in &mut rows {
            for (pos, map) in self.symbols.iter_mut() {
                row.values[*pos] = map.encode(&row.values[*pos]);
            }
        }
        let mut groups: BTreeMap<i64, Vec<PendingRow>> = BTreeMap::new();
        for row in rows {
            groups.entry(by.floor(row.timestamp)?).or_default().push(row);
        }

        let mut next = self.tx.record().clone();
        let mut partitions = next.partitions.clone();
        let mut superseded = vec![];
        let mut partition_table_changed = false;
        let (mut min_ts, mut max_ts, mut row_total) = (i64::MAX, i64::MIN, 0u64);
        for (floor, mut group) in groups {
            row_total += group.len() as u64;
            for r in &group {
                min_ts = min_ts.min(r.timestamp);
                max_ts = max_ts.max(r.timestamp);
            }
            match partitions.iter().position(|p| p.timestamp == floor) {
                Some(i) => {
                    let entry = partitions[i];
                    let dir = self.partition_dir(floor, entry.name_txn)?;
                    let rows_before = entry.row_count as usize;
                    let append = dedup.is_empty()
                        && match ts_col {
                            None => true,
                            Some(tc) => {
                                is_sorted(&group)
                                    && (rows_before == 0
                                        || read_timestamp(&dir, &self.meta.columns[tc], rows_before - 1)?
                                            <= group[0].timestamp)
                            }
                        };
                    if append {
                        self.write_rows(&dir, rows_before, &group)?;
                        partitions[i].row_count += group.len() as u64;
                    } else {
                        let mut merged = self.read_rows(&dir, rows_before)?;
                        merged.append(&mut group);
                        let merged = sort_dedup(merged, &dedup);
                        let new_dir = self.partition_dir(floor, txn as i64)?;
                        create_partition_dir(&new_dir)?;
                        self.write_rows(&new_dir, 0, &merged)?;
                        debug!(
                            table = %self.token,
                            partition = %new_dir.display(),
                            rows = merged.len(),
                            "partition rewritten"
                        );
                        superseded.push(dir);
                        partitions[i].row_count = merged.len() as u64;
                        partitions[i].name_txn = txn as i64;
                        partition_table_changed = true;
                    }
                }
                None => {
                    let group = if ts_col.is_some() {
                        sort_dedup(group, &dedup)
                    } else {
                        group
                    };
                    let mut name_txn = -1;
                    let mut dir = self.partition_dir(floor, name_txn)?;
                    if dir.exists() {
                        name_txn = txn as i64;
                        dir = self.partition_dir(floor, name_txn)?;
                    }
                    create_partition_dir(&dir)?;
                    self.write_rows(&dir, 0, &group)?;
                    partitions.push(PartitionEntry::new(floor, group.len() as u64, name_txn));
                    partition_table_changed = true;
                }
            }
        }

        next.set_partitions(partitions);
        if ts_col.is_some() {
            next.min_timestamp = next.min_timestamp.min(min_ts);
            next.max_timestamp = next.max_timestamp.max(max_ts);
        }
        if partition_table_changed {
            next.partition_table_version += 1;
        }
        let slots = self.meta.symbol_positions();
        next.symbols.resize(slots.len(), SymbolCount::default());
        for (slot, pos) in slots.into_iter().enumerate() {
            if let Some(map) = self.symbols.get_mut(&pos) {
                map.flush()?;
                let count = map.len() as i32;
                next.symbols[slot] = SymbolCount {
                    permanent: count,
                    transient: count,
                };
            }
        }
        let txn = self.publish(next, min_ts, max_ts, row_total)?;
        self.purge(superseded);
        Ok(txn)
    }

    /// Commits `next`, appending a sequencer log entry for WAL tables.
    fn publish(&mut self, mut next: TxnRecord, min_ts: i64, max_ts: i64, rows: u64) -> Result<u64> {
        next.structure_version = self.meta.structure_version as u64;
        if let Some(log) = &self.txn_log {
            next.seq_txn = log.max_seq_txn() + 1;
        }
        let txn = self.tx.commit(&next)?;
        let seq_txn = match self.txn_log.as_mut() {
            Some(log) => log.append(txn, min_ts, max_ts, rows)?,
            None => txn,
        };
        self.tracker.notify_commit(seq_txn);
        if self.txn_log.is_some() {
            if let Some(n) = &self.notifier {
                // a pending wakeup already covers this commit
                let _ = n.try_send(());
            }
        }
        info!(
            table = %self.token,
            txn,
            seq_txn,
            rows,
            total_rows = self.tx.record().row_count(),
            "table committed"
        );
        Ok(txn)
    }

    fn purge(&self, dirs: Vec<PathBuf>) {
        for dir in dirs {
            match fs::remove_dir_all(&dir) {
                Ok(()) => debug!(table = %self.token, partition = %dir.display(), "partition purged"),
                Err(e) => warn!(
                    table = %self.token,
                    partition = %dir.display(),
                    error = %e,
                    "cannot purge partition"
                ),
            }
        }
    }

    /// Discards buffered rows.
    pub fn rollback(&mut self) {
        if !self.pending.is_empty() {
            debug!(table = %self.token, rows = self.pending.len(), "rows rolled back");
        }
        self.pending.clear();
        for map in self.symbols.values_mut() {
            map.rollback();
        }
    }

    /// Removes all rows of the table.
    pub fn truncate(&mut self) -> Result<u64> {
        self.rollback();
        let mut next = self.tx.record().clone();
        let dirs = next
            .partitions
            .iter()
            .map(|p| self.partition_dir(p.timestamp, p.name_txn))
            .collect::<Result<Vec<_>>>()?;
        next.set_partitions(vec![]);
        next.min_timestamp = i64::MAX;
        next.max_timestamp = i64::MIN;
        next.data_version += 1;
        next.partition_table_version += 1;
        next.truncate_version += 1;
        let txn = self.publish(next, i64::MAX, i64::MIN, 0)?;
        self.purge(dirs);
        Ok(txn)
    }

    #[inline]
    fn partition_dir(&self, floor: i64, name_txn: i64) -> Result<PathBuf> {
        Ok(self
            .dir
            .join(partition_dir_name(self.meta.partition_by, floor, name_txn)?))
    }

    fn partition_dirs(&self) -> Result<Vec<(PathBuf, usize)>> {
        self.tx
            .record()
            .partitions
            .iter()
            .map(|p| Ok((self.partition_dir(p.timestamp, p.name_txn)?, p.row_count as usize)))
            .collect()
    }

    fn write_rows(&self, dir: &Path, start: usize, rows: &[PendingRow]) -> Result<()> {
        for (pos, col) in self.meta.live_columns() {
            let values: Vec<Value> = rows.iter().map(|r| r.values[pos].clone()).collect();
            append_column(dir, col, start, &values)?;
        }
        Ok(())
    }

    /// Reads committed rows of a partition, symbols stay encoded.
    fn read_rows(&self, dir: &Path, count: usize) -> Result<Vec<PendingRow>> {
        let mut rows: Vec<PendingRow> = (0..count)
            .map(|_| PendingRow {
                timestamp: 0,
                values: vec![Value::Null; self.meta.column_count()],
            })
            .collect();
        for (pos, col) in self.meta.live_columns() {
            for (row, v) in rows.iter_mut().zip(read_column(dir, col, 0, count)?) {
                row.values[pos] = v;
            }
        }
        if let Some(tc) = self.meta.timestamp_index() {
            for row in &mut rows {
                row.timestamp = row.values[tc].as_timestamp().unwrap_or(i64::MIN);
            }
        }
        Ok(rows)
    }

    /// Replaces `_meta` and publishes the structure change.
    fn publish_structure(&mut self, meta: TableMetadata, mut next: TxnRecord) -> Result<u64> {
        replace_meta_file(&self.dir, &meta, self.meta_swap_retry_count)?;
        self.meta = meta;
        next.column_version += 1;
        let txn = self.publish(next, i64::MAX, i64::MIN, 0)?;
        info!(
            table = %self.token,
            structure_version = self.meta.structure_version,
            "table structure changed"
        );
        Ok(txn)
    }

    /// Adds a column. Existing rows read null.
    pub fn add_column(
        &mut self,
        name: &str,
        ty: ColumnType,
        symbol: Option<SymbolOptions>,
    ) -> Result<()> {
        self.commit()?;
        let name_txn = (self.tx.txn() + 1) as i64;
        let mut meta = self.meta.clone();
        meta.add_column(name, ty, symbol, name_txn, self.file_name_limit)?;
        let pos = meta.columns.len() - 1;
        let col = meta.columns[pos].clone();
        for (dir, rows) in self.partition_dirs()? {
            append_column(&dir, &col, 0, &vec![Value::Null; rows])?;
        }
        let mut next = self.tx.record().clone();
        let map = if ty.is_symbol() {
            next.symbols.push(SymbolCount::default());
            Some(SymbolMap::create(&self.dir, &col)?)
        } else {
            None
        };
        self.publish_structure(meta, next)?;
        if let Some(map) = map {
            self.symbols.insert(pos, map);
        }
        Ok(())
    }

    pub fn drop_column(&mut self, name: &str) -> Result<()> {
        self.commit()?;
        let pos = self
            .meta
            .column_index(name)
            .ok_or_else(|| Error::sql(0, format!("column does not exist [name={}]", name)))?;
        let col = self.meta.columns[pos].clone();
        let mut meta = self.meta.clone();
        meta.drop_column(name)?;
        let next = self.tx.record().clone();
        self.publish_structure(meta, next)?;
        self.symbols.remove(&pos);
        self.remove_column_files(&col);
        Ok(())
    }

    pub fn rename_column(&mut self, name: &str, new_name: &str) -> Result<()> {
        self.commit()?;
        let pos = self
            .meta
            .column_index(name)
            .ok_or_else(|| Error::sql(0, format!("column does not exist [name={}]", name)))?;
        let mut meta = self.meta.clone();
        meta.rename_column(name, new_name, self.file_name_limit)?;
        let from = self.meta.columns[pos].clone();
        let to = meta.columns[pos].clone();
        if from.name == to.name {
            let next = self.tx.record().clone();
            self.publish_structure(meta, next)?;
            return Ok(());
        }
        for (dir, _) in self.partition_dirs()? {
            link_column(&dir, &from, &to)?;
        }
        if from.ty.is_symbol() {
            let (old_o, old_c) = symbol_file_paths(&self.dir, &from);
            let (new_o, new_c) = symbol_file_paths(&self.dir, &to);
            fs::hard_link(old_o, new_o)?;
            fs::hard_link(old_c, new_c)?;
        }
        let next = self.tx.record().clone();
        self.publish_structure(meta, next)?;
        if let Some(map) = self.symbols.remove(&pos) {
            let count = map.len();
            self.symbols.insert(pos, SymbolMap::open(&self.dir, &to, count)?);
        }
        self.remove_column_files(&from);
        Ok(())
    }

    /// Changes column type, converting every committed value.
    pub fn change_column_type(&mut self, name: &str, ty: ColumnType) -> Result<()> {
        self.commit()?;
        let name_txn = (self.tx.txn() + 1) as i64;
        let mut meta = self.meta.clone();
        let (old_pos, new_pos) = meta.change_column_type(name, ty, name_txn)?;
        let old = self.meta.columns[old_pos].clone();
        let new = meta.columns[new_pos].clone();
        let mut new_map = if ty.is_symbol() {
            Some(SymbolMap::create(&self.dir, &new)?)
        } else {
            None
        };
        for (dir, rows) in self.partition_dirs()? {
            let mut values = read_column(&dir, &old, 0, rows)?;
            if let Some(map) = self.symbols.get(&old_pos) {
                values = values
                    .iter()
                    .map(|v| map.decode(v))
                    .collect::<Result<Vec<_>>>()?;
            }
            let values = values
                .iter()
                .map(|v| -> Result<Value> {
                    let v = v.cast_to(ty)?;
                    Ok(match new_map.as_mut() {
                        Some(m) => m.encode(&v),
                        None => v,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            append_column(&dir, &new, 0, &values)?;
        }
        let mut next = self.tx.record().clone();
        if let Some(m) = new_map.as_mut() {
            m.flush()?;
            let count = m.len() as i32;
            next.symbols.push(SymbolCount {
                permanent: count,
                transient: count,
            });
        }
        self.publish_structure(meta, next)?;
        self.symbols.remove(&old_pos);
        if let Some(m) = new_map {
            self.symbols.insert(new_pos, m);
        }
        self.remove_column_files(&old);
        Ok(())
    }

    fn remove_column_files(&self, col: &ColumnDescriptor) {
        let mut res = self
            .partition_dirs()
            .and_then(|dirs| dirs.iter().try_for_each(|(dir, _)| remove_column(dir, col)));
        if res.is_ok() && col.ty.is_symbol() {
            let (o, c) = symbol_file_paths(&self.dir, col);
            res = fs::remove_file(o)
                .and_then(|_| fs::remove_file(c))
                .map_err(Error::from);
        }
        if let Err(e) = res {
            warn!(table = %self.token, column = %col.name, error = %e, "cannot remove column files");
        }
    }
}

/// Row under construction, buffered by `append`.
pub struct Row<'a> {
    writer: &'a mut TableWriter,
    timestamp: i64,
    values: Vec<Value>,
}

impl Row<'_> {
    /// Sets value of column at `col`, converting it to the column type.
    pub fn put(&mut self, col: usize, value: Value) -> Result<()> {
        let meta = &self.writer.meta;
        let desc = meta
            .columns
            .get(col)
            .filter(|c| !c.deleted)
            .ok_or_else(|| Error::InvalidArgument(format!("invalid column index [index={}]", col)))?;
        if meta.timestamp_index() == Some(col) {
            return Err(Error::InvalidArgument(format!(
                "designated timestamp is set by new row [column={}]",
                desc.name
            )));
        }
        self.values[col] = value.cast_to(desc.ty)?;
        Ok(())
    }

    pub fn put_by_name(&mut self, name: &str, value: Value) -> Result<()> {
        let col = self
            .writer
            .meta
            .column_index(name)
            .ok_or_else(|| Error::InvalidArgument(format!("column not found [name={}]", name)))?;
        self.put(col, value)
    }

    /// Buffers the row. Commits once the uncommitted row threshold of the
    /// table is reached.
    pub fn append(self) -> Result<()> {
        let Row {
            writer,
            timestamp,
            values,
        } = self;
        writer.pending.push(PendingRow { timestamp, values });
        if writer.pending.len() >= writer.meta.max_uncommitted_rows.max(1) as usize {
            writer.commit()?;
        }
        Ok(())
    }

    /// Buffers the row regardless of the uncommitted row threshold. Rows
    /// stay invisible until an explicit commit.
    pub fn append_buffered(self) {
        let Row {
            writer,
            timestamp,
            values,
        } = self;
        writer.pending.push(PendingRow { timestamp, values });
    }

    /// Discards the row.
    #[inline]
    pub fn cancel(self) {}
}

#[inline]
fn is_sorted(rows: &[PendingRow]) -> bool {
    rows.windows(2).all(|w| w[0].timestamp <= w[1].timestamp)
}

/// Stable sort by timestamp. Rows sharing dedup key values collapse into
/// the last one, which came later in commit order.
fn sort_dedup(mut rows: Vec<PendingRow>, dedup: &[usize]) -> Vec<PendingRow> {
    rows.sort_by_key(|r| r.timestamp);
    if dedup.is_empty() {
        return rows;
    }
    let mut res: Vec<PendingRow> = Vec::with_capacity(rows.len());
    let mut index: HashMap<Vec<u8>, usize> = HashMap::new();
    for row in rows {
        let mut key = vec![];
        for p in dedup {
            row.values[*p].write_key(&mut key);
        }
        match index.get(&key) {
            Some(i) => res[*i] = row,
            None => {
                index.insert(key, res.len());
                res.push(row);
            }
        }
    }
    res
}

/// Creates an empty partition directory, removing leftovers of an
/// aborted commit.
fn create_partition_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::meta::TableStructure;
    use crate::partition::PartitionBy;
    use crate::seq::TxnLog;
    use crate::table::{create_table_dir, TableReader};
    use cairn_datatype::timestamp::parse_timestamp;
    use std::time::Duration;

    struct Fixture {
        _dir: tempfile::TempDir,
        table_dir: PathBuf,
        token: TableToken,
        config: EngineConfig,
        tracker: Arc<SeqTxnTracker>,
    }

    impl Fixture {
        fn new(structure: TableStructure) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let config = EngineConfig::new(dir.path());
            let meta = structure.to_metadata(1, 127, 1000, 0).unwrap();
            let table_dir = dir.path().join(&structure.name);
            create_table_dir(&table_dir, &structure.name, &meta).unwrap();
            let token = TableToken {
                table_name: structure.name.clone(),
                dir_name: structure.name.clone(),
                table_id: 1,
                wal: structure.wal,
            };
            Fixture {
                _dir: dir,
                table_dir,
                token,
                config,
                tracker: Arc::new(SeqTxnTracker::default()),
            }
        }

        fn writer(&self) -> TableWriter {
            TableWriter::open(
                &self.table_dir,
                self.token.clone(),
                &self.config,
                Arc::clone(&self.tracker),
                None,
            )
            .unwrap()
        }

        fn rows(&self) -> Vec<Vec<Value>> {
            let mut r =
                TableReader::open(&self.table_dir, self.token.clone(), Duration::from_secs(1))
                    .unwrap();
            r.records()
                .unwrap()
                .into_iter()
                .map(|r| r.into_values())
                .collect()
        }
    }

    fn ts(s: &str) -> i64 {
        parse_timestamp(s).unwrap()
    }

    fn insert(w: &mut TableWriter, t: &str, sym: &str, price: f64) {
        let mut row = w.new_row(ts(t)).unwrap();
        row.put_by_name("sym", Value::Str(sym.into())).unwrap();
        row.put_by_name("price", Value::Double(price)).unwrap();
        row.append().unwrap();
    }

    fn prices() -> TableStructure {
        TableStructure::new("prices", PartitionBy::Day)
            .symbol("sym", SymbolOptions::default())
            .column("price", ColumnType::Double)
            .timestamp("ts")
    }

    #[test]
    fn test_append_in_order() {
        let f = Fixture::new(prices());
        let mut w = f.writer();
        insert(&mut w, "2024-09-10T12:00", "a", 1.0);
        insert(&mut w, "2024-09-10T13:00", "b", 2.0);
        assert_eq!(w.commit().unwrap(), 1);
        insert(&mut w, "2024-09-10T14:00", "a", 3.0);
        assert_eq!(w.commit().unwrap(), 2);
        // empty commit publishes nothing
        assert_eq!(w.commit().unwrap(), 2);

        let rec = w.record();
        assert_eq!(rec.row_count(), 3);
        assert_eq!(rec.partitions.len(), 1);
        assert_eq!(rec.partitions[0].name_txn, -1);
        assert_eq!(rec.min_timestamp, ts("2024-09-10T12:00"));
        assert_eq!(rec.max_timestamp, ts("2024-09-10T14:00"));
        assert_eq!(rec.symbols[0].permanent, 2);
        assert_eq!(f.tracker.writer_txn(), 2);
        let rows = f.rows();
        assert_eq!(rows[2][1], Value::Double(3.0));
        assert_eq!(rows[2][0], Value::Str("a".into()));
    }

    #[test]
    fn test_out_of_order_rewrites_partition() {
        let f = Fixture::new(prices());
        let mut w = f.writer();
        insert(&mut w, "2024-09-10T12:00", "a", 1.0);
        insert(&mut w, "2024-09-11T12:00", "a", 5.0);
        w.commit().unwrap();
        insert(&mut w, "2024-09-10T08:00", "b", 2.0);
        let txn = w.commit().unwrap();

        let rec = w.record().clone();
        assert_eq!(rec.partitions[0].name_txn, txn as i64);
        assert_eq!(rec.partitions[1].name_txn, -1);
        assert_eq!(rec.fixed_row_count, 2);
        assert_eq!(rec.transient_row_count, 1);
        assert!(f.table_dir.join(format!("2024-09-10.{}", txn)).exists());
        assert!(!f.table_dir.join("2024-09-10").exists());
        let rows = f.rows();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0][0], Value::Str("b".into()));
        assert_eq!(rows[1][1], Value::Double(1.0));
        assert_eq!(rows[2][1], Value::Double(5.0));
    }

    #[test]
    fn test_dedup_upsert_keeps_newest_row() {
        let f = Fixture::new(prices().wal(true).dedup_keys(&["ts", "sym"]));
        let mut w = f.writer();
        insert(&mut w, "2024-09-10T12:00", "a", 1.0);
        insert(&mut w, "2024-09-10T12:00", "b", 2.0);
        insert(&mut w, "2024-09-10T12:00", "a", 1.5);
        w.commit().unwrap();
        assert_eq!(w.row_count(), 2);
        insert(&mut w, "2024-09-10T12:00", "b", 2.5);
        insert(&mut w, "2024-09-10T13:00", "b", 3.0);
        w.commit().unwrap();

        let rows = f.rows();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0][0], Value::Str("a".into()));
        assert_eq!(rows[0][1], Value::Double(1.5));
        assert_eq!(rows[1][1], Value::Double(2.5));
        assert_eq!(rows[2][1], Value::Double(3.0));
    }

    #[test]
    fn test_wal_commit_appends_sequencer_log() {
        let f = Fixture::new(prices().wal(true));
        let mut w = f.writer();
        insert(&mut w, "2024-09-10T12:00", "a", 1.0);
        insert(&mut w, "2024-09-10T15:00", "a", 1.0);
        w.commit().unwrap();
        insert(&mut w, "2024-09-12T01:00", "a", 1.0);
        w.commit().unwrap();
        assert_eq!(w.seq_txn(), 2);
        assert_eq!(f.tracker.writer_txn(), 2);
        let mut log = TxnLog::open_ro(&f.table_dir.join(TXN_LOG_FILE_NAME)).unwrap();
        let entries = log.read_range(0, 2).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].min_timestamp, ts("2024-09-10T12:00"));
        assert_eq!(entries[0].max_timestamp, ts("2024-09-10T15:00"));
        assert_eq!(entries[0].row_count, 2);
        assert_eq!(entries[1].txn, 2);
    }

    #[test]
    fn test_rollback_and_cancel() {
        let f = Fixture::new(prices());
        let mut w = f.writer();
        insert(&mut w, "2024-09-10T12:00", "a", 1.0);
        w.new_row(ts("2024-09-10T13:00")).unwrap().cancel();
        assert_eq!(w.pending_row_count(), 1);
        w.rollback();
        assert_eq!(w.commit().unwrap(), 0);
        assert!(f.rows().is_empty());
        let mut row = w.new_row(ts("2024-09-10T13:00")).unwrap();
        assert!(row.put(2, Value::Timestamp(0)).is_err());
        assert!(row.put(7, Value::Null).is_err());
        assert!(row.put_by_name("nope", Value::Null).is_err());
    }

    #[test]
    fn test_threshold_commit() {
        let f = Fixture::new(prices().max_uncommitted_rows(2));
        let mut w = f.writer();
        insert(&mut w, "2024-09-10T12:00", "a", 1.0);
        insert(&mut w, "2024-09-10T13:00", "a", 2.0);
        assert_eq!(w.record().txn, 1);
        assert_eq!(f.rows().len(), 2);

        for (i, t) in ["2024-09-10T14:00", "2024-09-10T15:00", "2024-09-10T16:00"]
            .into_iter()
            .enumerate()
        {
            let mut row = w.new_row(ts(t)).unwrap();
            row.put_by_name("price", Value::Double(i as f64)).unwrap();
            row.append_buffered();
        }
        assert_eq!(w.record().txn, 1);
        assert_eq!(f.rows().len(), 2);
        w.rollback();
        assert_eq!(w.commit().unwrap(), 1);
        assert_eq!(f.rows().len(), 2);
    }

    #[test]
    fn test_truncate() {
        let f = Fixture::new(prices());
        let mut w = f.writer();
        insert(&mut w, "2024-09-10T12:00", "a", 1.0);
        insert(&mut w, "2024-09-11T12:00", "a", 1.0);
        w.commit().unwrap();
        w.truncate().unwrap();
        let rec = w.record();
        assert_eq!(rec.row_count(), 0);
        assert_eq!(rec.truncate_version, 1);
        assert_eq!(rec.min_timestamp, i64::MAX);
        assert!(!f.table_dir.join("2024-09-10").exists());
        assert!(f.rows().is_empty());
        insert(&mut w, "2024-09-10T12:00", "c", 4.0);
        w.commit().unwrap();
        assert_eq!(f.rows().len(), 1);
    }

    #[test]
    fn test_single_writer() {
        let f = Fixture::new(prices());
        let _w = f.writer();
        let res = TableWriter::open(
            &f.table_dir,
            f.token.clone(),
            &f.config,
            Arc::clone(&f.tracker),
            None,
        );
        assert!(matches!(res, Err(Error::TableLocked(_))));
    }

    #[test]
    fn test_add_and_drop_column() {
        let f = Fixture::new(prices());
        let mut w = f.writer();
        insert(&mut w, "2024-09-10T12:00", "a", 1.0);
        w.commit().unwrap();
        w.add_column("venue", ColumnType::Symbol, None).unwrap();
        w.add_column("qty", ColumnType::Long, None).unwrap();
        assert_eq!(w.metadata().structure_version, 2);
        let mut row = w.new_row(ts("2024-09-10T13:00")).unwrap();
        row.put_by_name("venue", Value::Str("lse".into())).unwrap();
        row.put_by_name("qty", Value::Long(7)).unwrap();
        row.append().unwrap();
        w.commit().unwrap();
        let rows = f.rows();
        assert_eq!(rows[0][3], Value::Null);
        assert_eq!(rows[0][4], Value::Null);
        assert_eq!(rows[1][3], Value::Str("lse".into()));
        assert_eq!(rows[1][4], Value::Long(7));

        w.drop_column("price").unwrap();
        assert!(w.metadata().column_index("price").is_none());
        assert!(!f.table_dir.join("2024-09-10").join("price.d").exists());
        assert!(matches!(w.drop_column("ts"), Err(Error::Sql { .. })));
        let rows = f.rows();
        assert_eq!(rows[1][1], Value::Null);
        assert_eq!(rows[1][4], Value::Long(7));
    }

    #[test]
    fn test_rename_and_retype_column() {
        let f = Fixture::new(prices());
        let mut w = f.writer();
        insert(&mut w, "2024-09-10T12:00", "a", 1.25);
        w.commit().unwrap();
        w.rename_column("sym", "ticker").unwrap();
        assert!(f.table_dir.join("ticker.c").exists());
        assert!(!f.table_dir.join("sym.c").exists());
        assert_eq!(f.rows()[0][0], Value::Str("a".into()));

        let txn = w.txn();
        w.change_column_type("price", ColumnType::String).unwrap();
        let pos = w.metadata().column_index("price").unwrap();
        assert_eq!(pos, 3);
        assert_eq!(w.metadata().columns[pos].name_txn, (txn + 1) as i64);
        assert_eq!(f.rows()[0][pos], Value::Str("1.25".into()));

        w.change_column_type("ticker", ColumnType::Varchar).unwrap();
        let pos = w.metadata().column_index("ticker").unwrap();
        let mut row = w.new_row(ts("2024-09-10T13:00")).unwrap();
        row.put(pos, Value::Str("b".into())).unwrap();
        row.append().unwrap();
        w.commit().unwrap();
        let rows = f.rows();
        assert_eq!(rows[0][pos], Value::Str("a".into()));
        assert_eq!(rows[1][pos], Value::Str("b".into()));
    }

    #[test]
    fn test_reopen_restores_state() {
        let f = Fixture::new(prices().wal(true));
        {
            let mut w = f.writer();
            insert(&mut w, "2024-09-10T12:00", "a", 1.0);
            insert(&mut w, "2024-09-10T13:00", "b", 1.0);
            w.commit().unwrap();
            // never committed
            insert(&mut w, "2024-09-10T14:00", "c", 1.0);
        }
        let mut w = f.writer();
        assert_eq!(w.row_count(), 2);
        assert_eq!(w.seq_txn(), 1);
        insert(&mut w, "2024-09-10T14:00", "a", 1.0);
        w.commit().unwrap();
        assert_eq!(w.record().symbols[0].permanent, 2);
        assert_eq!(f.rows().len(), 3);
    }
}
