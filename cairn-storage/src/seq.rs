//! Sequencer log of WAL tables and per-table txn tracking.
//!
//! `_txnlog` starts with the max sequencer txn as i64, followed by one
//! 48-byte entry per commit: seq txn, txn, min timestamp, max timestamp,
//! row count and commit time. The header doubles as version word: an entry
//! is fully written before the header announces it.
use crate::error::Result;
use crate::files::{read_file, write_file_atomically, MAT_VIEW_STATE_FILE_NAME};
use crate::mem::{get_i64, MappedFile};
use crossbeam_utils::CachePadded;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::debug;

pub const TXN_LOG_HEADER_SIZE: usize = 8;
pub const TXN_LOG_ENTRY_SIZE: usize = 48;
const TXN_LOG_INITIAL_ENTRIES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxnLogEntry {
    pub seq_txn: u64,
    pub txn: u64,
    pub min_timestamp: i64,
    pub max_timestamp: i64,
    pub row_count: u64,
    pub commit_micros: i64,
}

pub struct TxnLog {
    file: MappedFile,
}

impl TxnLog {
    /// Opens the log for appending, creating it if missing.
    pub fn open_rw(path: &Path) -> Result<Self> {
        let file = MappedFile::open_rw(
            path,
            TXN_LOG_HEADER_SIZE + TXN_LOG_INITIAL_ENTRIES * TXN_LOG_ENTRY_SIZE,
        )?;
        Ok(TxnLog { file })
    }

    pub fn open_ro(path: &Path) -> Result<Self> {
        let file = MappedFile::open_ro(path)?;
        Ok(TxnLog { file })
    }

    #[inline]
    pub fn max_seq_txn(&self) -> u64 {
        self.file.load_version()
    }

    #[inline]
    fn entry_offset(seq_txn: u64) -> usize {
        TXN_LOG_HEADER_SIZE + (seq_txn as usize - 1) * TXN_LOG_ENTRY_SIZE
    }

    /// Appends an entry for a committed txn, returns its sequencer txn.
    pub fn append(&mut self, txn: u64, min_ts: i64, max_ts: i64, row_count: u64) -> Result<u64> {
        let seq_txn = self.max_seq_txn() + 1;
        let offset = Self::entry_offset(seq_txn);
        if offset + TXN_LOG_ENTRY_SIZE > self.file.len() {
            self.file.extend(self.file.len() * 2)?;
        }
        let commit_micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_micros() as i64);
        let mut buf = Vec::with_capacity(TXN_LOG_ENTRY_SIZE);
        for v in [
            seq_txn as i64,
            txn as i64,
            min_ts,
            max_ts,
            row_count as i64,
            commit_micros,
        ] {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        self.file.put_bytes(offset, &buf)?;
        self.file.store_version(seq_txn)?;
        Ok(seq_txn)
    }

    /// Entries with sequencer txn in `(from, to]`.
    pub fn read_range(&mut self, from: u64, to: u64) -> Result<Vec<TxnLogEntry>> {
        let to = to.min(self.max_seq_txn());
        if from >= to {
            return Ok(vec![]);
        }
        if Self::entry_offset(to) + TXN_LOG_ENTRY_SIZE > self.file.len() {
            self.file.remap_to_file_size()?;
        }
        let start = Self::entry_offset(from + 1);
        let bytes = self
            .file
            .get_bytes(start, (to - from) as usize * TXN_LOG_ENTRY_SIZE)?;
        Ok(bytes
            .chunks_exact(TXN_LOG_ENTRY_SIZE)
            .map(|b| TxnLogEntry {
                seq_txn: get_i64(b, 0) as u64,
                txn: get_i64(b, 8) as u64,
                min_timestamp: get_i64(b, 16),
                max_timestamp: get_i64(b, 24),
                row_count: get_i64(b, 32) as u64,
                commit_micros: get_i64(b, 40),
            })
            .collect())
    }

    /// Min and max timestamp touched by txns in `(from, to]`,
    /// None if they carried no rows.
    pub fn timestamp_range(&mut self, from: u64, to: u64) -> Result<Option<(i64, i64)>> {
        let range = self
            .read_range(from, to)?
            .into_iter()
            .filter(|e| e.row_count > 0)
            .fold(None, |acc: Option<(i64, i64)>, e| match acc {
                None => Some((e.min_timestamp, e.max_timestamp)),
                Some((lo, hi)) => Some((lo.min(e.min_timestamp), hi.max(e.max_timestamp))),
            });
        Ok(range)
    }
}

/// Tracks the latest sequencer txn of a table and, when the table is a
/// materialized view, how far it has consumed its base table.
#[derive(Debug)]
pub struct SeqTxnTracker {
    writer_txn: CachePadded<AtomicU64>,
    /// -1 until loaded from the durable refresh state.
    last_refresh_base_txn: CachePadded<AtomicI64>,
    backoff: Mutex<MemoryBackoff>,
}

#[derive(Debug, Default)]
struct MemoryBackoff {
    until: Option<Instant>,
    current: Duration,
}

impl Default for SeqTxnTracker {
    #[inline]
    fn default() -> Self {
        Self::new(0)
    }
}

impl SeqTxnTracker {
    #[inline]
    pub fn new(writer_txn: u64) -> Self {
        SeqTxnTracker {
            writer_txn: CachePadded::new(AtomicU64::new(writer_txn)),
            last_refresh_base_txn: CachePadded::new(AtomicI64::new(-1)),
            backoff: Mutex::new(MemoryBackoff::default()),
        }
    }

    #[inline]
    pub fn writer_txn(&self) -> u64 {
        self.writer_txn.load(Ordering::Acquire)
    }

    /// Records a committed sequencer txn, never moving backwards.
    #[inline]
    pub fn notify_commit(&self, seq_txn: u64) {
        self.writer_txn.fetch_max(seq_txn, Ordering::AcqRel);
    }

    #[inline]
    pub fn last_refresh_base_txn(&self) -> i64 {
        self.last_refresh_base_txn.load(Ordering::Acquire)
    }

    /// Sets value loaded from durable state unless a newer one was
    /// published meanwhile. Returns the effective value.
    #[inline]
    pub fn init_last_refresh_base_txn(&self, txn: i64) -> i64 {
        match self.last_refresh_base_txn.compare_exchange(
            -1,
            txn,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => txn,
            Err(current) => current,
        }
    }

    #[inline]
    pub fn set_last_refresh_base_txn(&self, txn: i64) {
        self.last_refresh_base_txn.store(txn, Ordering::Release);
    }

    /// Whether refresh is deferred due to recent memory pressure.
    #[inline]
    pub fn is_memory_pressure(&self) -> bool {
        let g = self.backoff.lock();
        matches!(g.until, Some(until) if Instant::now() < until)
    }

    /// Defers refresh, doubling the delay on each consecutive call.
    pub fn on_memory_pressure(&self, initial: Duration, max: Duration) {
        let mut g = self.backoff.lock();
        g.current = if g.current.is_zero() {
            initial
        } else {
            (g.current * 2).min(max)
        };
        g.until = Some(Instant::now() + g.current);
        debug!(backoff_ms = g.current.as_millis() as u64, "memory pressure backoff");
    }

    #[inline]
    pub fn reset_memory_pressure(&self) {
        let mut g = self.backoff.lock();
        g.until = None;
        g.current = Duration::ZERO;
    }
}

/// Durable refresh state of a materialized view, kept in `_mv.s`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatViewDurableState {
    /// Last base table sequencer txn reflected in the view, -1 if never refreshed.
    pub last_refresh_base_txn: i64,
    pub last_refresh_micros: i64,
}

impl MatViewDurableState {
    /// Loads state of the view stored in `dir`, default if never written.
    pub fn load(dir: &Path) -> Result<Self> {
        match read_file(&dir.join(MAT_VIEW_STATE_FILE_NAME)) {
            Ok(bytes) => {
                let (state, _) =
                    bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;
                Ok(state)
            }
            Err(e) if e.is_file_not_found() => Ok(MatViewDurableState {
                last_refresh_base_txn: -1,
                ..Default::default()
            }),
            Err(e) => Err(e),
        }
    }

    pub fn store(&self, dir: &Path) -> Result<()> {
        let bytes = bincode::serde::encode_to_vec(self, bincode::config::standard())?;
        write_file_atomically(dir, MAT_VIEW_STATE_FILE_NAME, &bytes)
    }
}
