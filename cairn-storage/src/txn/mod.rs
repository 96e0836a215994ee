//! Double-buffered transaction record store (`_txn`).
//!
//! Header, little-endian:
//!
//! | offset | size | field                              |
//! |--------|------|------------------------------------|
//! | 0      | 8    | version, even selects A, odd B     |
//! | 8      | 4    | A: record offset                   |
//! | 12     | 4    | A: symbol section bytes            |
//! | 16     | 4    | A: partition table bytes           |
//! | 32     | 4    | B: record offset                   |
//! | 36     | 4    | B: symbol section bytes            |
//! | 40     | 4    | B: partition table bytes           |
//!
//! Record, relative to its offset:
//!
//! | offset | size | field                   |
//! |--------|------|-------------------------|
//! | 0      | 8    | txn                     |
//! | 8      | 8    | transient row count     |
//! | 16     | 8    | fixed row count         |
//! | 24     | 8    | min timestamp           |
//! | 32     | 8    | max timestamp           |
//! | 40     | 8    | structure version       |
//! | 48     | 8    | data version            |
//! | 56     | 8    | partition table version |
//! | 64     | 8    | column version          |
//! | 72     | 8    | truncate version        |
//! | 80     | 8    | sequencer txn           |
//! | 88     | 4    | lag checksum            |
//! | 92     | 4    | lag txn count           |
//! | 96     | 4    | lag row count           |
//! | 100    | 8    | lag min timestamp       |
//! | 108    | 8    | lag max timestamp       |
//! | 128    | 4    | symbol column count     |
//! | 132    | 8*n  | symbol {permanent, transient} counts |
//! | ..     | 4    | partition table bytes   |
//! | ..     | 32*p | partition tuples        |
//! | ..     | 8    | txn check               |
//!
//! Partition tuple: timestamp, row count with flags (bit 61 parquet,
//! bit 62 read-only), name txn, parquet file size.
mod reader;
mod writer;

pub use reader::TxReader;
pub use writer::TxWriter;

use crate::mem::{get_i32, get_i64, put_i32, put_i64};

pub const TX_OFFSET_VERSION: usize = 0;
pub const TX_BASE_OFFSET_A: usize = 8;
pub const TX_BASE_OFFSET_SYMBOLS_SIZE_A: usize = 12;
pub const TX_BASE_OFFSET_PARTITIONS_SIZE_A: usize = 16;
pub const TX_BASE_OFFSET_B: usize = 32;
pub const TX_BASE_OFFSET_SYMBOLS_SIZE_B: usize = 36;
pub const TX_BASE_OFFSET_PARTITIONS_SIZE_B: usize = 40;
pub const TX_BASE_HEADER_SIZE: usize = 64;

pub const TX_OFFSET_TXN: usize = 0;
pub const TX_OFFSET_TRANSIENT_ROW_COUNT: usize = 8;
pub const TX_OFFSET_FIXED_ROW_COUNT: usize = 16;
pub const TX_OFFSET_MIN_TIMESTAMP: usize = 24;
pub const TX_OFFSET_MAX_TIMESTAMP: usize = 32;
pub const TX_OFFSET_STRUCT_VERSION: usize = 40;
pub const TX_OFFSET_DATA_VERSION: usize = 48;
pub const TX_OFFSET_PARTITION_TABLE_VERSION: usize = 56;
pub const TX_OFFSET_COLUMN_VERSION: usize = 64;
pub const TX_OFFSET_TRUNCATE_VERSION: usize = 72;
pub const TX_OFFSET_SEQ_TXN: usize = 80;
pub const TX_OFFSET_LAG_CHECKSUM: usize = 88;
pub const TX_OFFSET_LAG_TXN_COUNT: usize = 92;
pub const TX_OFFSET_LAG_ROW_COUNT: usize = 96;
pub const TX_OFFSET_LAG_MIN_TIMESTAMP: usize = 100;
pub const TX_OFFSET_LAG_MAX_TIMESTAMP: usize = 108;
pub const TX_OFFSET_MAP_WRITER_COUNT: usize = 128;
pub const TX_RECORD_HEADER_SIZE: usize = 132;

pub const SYMBOL_COUNT_SIZE: usize = 8;
pub const PARTITION_ENTRY_SIZE: usize = 32;

const PARTITION_PARQUET_BIT: u32 = 61;
const PARTITION_READ_ONLY_BIT: u32 = 62;
const PARTITION_ROW_COUNT_MASK: u64 = (1 << PARTITION_PARQUET_BIT) - 1;

/// Slot header fields of the given version.
#[inline]
pub(crate) fn slot_offsets(version: u64) -> (usize, usize, usize) {
    if version & 1 == 0 {
        (
            TX_BASE_OFFSET_A,
            TX_BASE_OFFSET_SYMBOLS_SIZE_A,
            TX_BASE_OFFSET_PARTITIONS_SIZE_A,
        )
    } else {
        (
            TX_BASE_OFFSET_B,
            TX_BASE_OFFSET_SYMBOLS_SIZE_B,
            TX_BASE_OFFSET_PARTITIONS_SIZE_B,
        )
    }
}

/// Total bytes of a record with given section sizes.
#[inline]
pub fn record_size(symbols_bytes: usize, partitions_bytes: usize) -> usize {
    TX_RECORD_HEADER_SIZE + symbols_bytes + 4 + partitions_bytes + 8
}

/// Checksum over lag state, guards the out-of-order lag fields.
#[inline]
pub fn calculate_lag_checksum(
    txn: u64,
    seq_txn: u64,
    lag_row_count: i32,
    lag_min_timestamp: i64,
    lag_max_timestamp: i64,
    lag_txn_count: i32,
) -> i32 {
    let mut c = lag_min_timestamp;
    c = c.wrapping_mul(31).wrapping_add(lag_max_timestamp);
    c = c.wrapping_mul(31).wrapping_add(txn as i64);
    c = c.wrapping_mul(31).wrapping_add(seq_txn as i64);
    c = c.wrapping_mul(31).wrapping_add(lag_row_count as i64);
    c = c.wrapping_mul(31).wrapping_add(lag_txn_count as i64);
    (c ^ ((c as u64) >> 32) as i64) as i32
}

/// Committed row counts of a symbol dictionary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SymbolCount {
    pub permanent: i32,
    pub transient: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionEntry {
    /// Floored timestamp of the partition.
    pub timestamp: i64,
    pub row_count: u64,
    /// Txn of last rewrite, -1 if never rewritten.
    pub name_txn: i64,
    pub parquet_file_size: i64,
    pub parquet: bool,
    pub read_only: bool,
}

impl PartitionEntry {
    #[inline]
    pub fn new(timestamp: i64, row_count: u64, name_txn: i64) -> Self {
        PartitionEntry {
            timestamp,
            row_count,
            name_txn,
            parquet_file_size: -1,
            parquet: false,
            read_only: false,
        }
    }

    #[inline]
    fn masked_row_count(&self) -> i64 {
        let mut v = self.row_count & PARTITION_ROW_COUNT_MASK;
        if self.parquet {
            v |= 1 << PARTITION_PARQUET_BIT;
        }
        if self.read_only {
            v |= 1 << PARTITION_READ_ONLY_BIT;
        }
        v as i64
    }

    #[inline]
    fn from_masked(timestamp: i64, masked: i64, name_txn: i64, parquet_file_size: i64) -> Self {
        let masked = masked as u64;
        PartitionEntry {
            timestamp,
            row_count: masked & PARTITION_ROW_COUNT_MASK,
            name_txn,
            parquet_file_size,
            parquet: masked & (1 << PARTITION_PARQUET_BIT) != 0,
            read_only: masked & (1 << PARTITION_READ_ONLY_BIT) != 0,
        }
    }
}

/// Full state of one committed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnRecord {
    pub txn: u64,
    /// Rows of the last partition.
    pub transient_row_count: u64,
    /// Rows of all partitions but the last.
    pub fixed_row_count: u64,
    pub min_timestamp: i64,
    pub max_timestamp: i64,
    pub structure_version: u64,
    pub data_version: u64,
    pub partition_table_version: u64,
    pub column_version: u64,
    pub truncate_version: u64,
    pub seq_txn: u64,
    pub lag_checksum: i32,
    pub lag_txn_count: i32,
    pub lag_row_count: i32,
    pub lag_min_timestamp: i64,
    pub lag_max_timestamp: i64,
    pub symbols: Vec<SymbolCount>,
    /// Partitions ordered by timestamp.
    pub partitions: Vec<PartitionEntry>,
}

impl TxnRecord {
    /// Reset state of a new or truncated table.
    pub fn empty(symbol_count: usize) -> Self {
        let mut rec = TxnRecord {
            txn: 0,
            transient_row_count: 0,
            fixed_row_count: 0,
            min_timestamp: i64::MAX,
            max_timestamp: i64::MIN,
            structure_version: 0,
            data_version: 0,
            partition_table_version: 0,
            column_version: 0,
            truncate_version: 0,
            seq_txn: 0,
            lag_checksum: 0,
            lag_txn_count: 0,
            lag_row_count: 0,
            lag_min_timestamp: i64::MAX,
            lag_max_timestamp: i64::MIN,
            symbols: vec![SymbolCount::default(); symbol_count],
            partitions: vec![],
        };
        rec.update_lag_checksum();
        rec
    }

    #[inline]
    pub fn row_count(&self) -> u64 {
        self.fixed_row_count + self.transient_row_count
    }

    #[inline]
    pub fn update_lag_checksum(&mut self) {
        self.lag_checksum = calculate_lag_checksum(
            self.txn,
            self.seq_txn,
            self.lag_row_count,
            self.lag_min_timestamp,
            self.lag_max_timestamp,
            self.lag_txn_count,
        );
    }

    #[inline]
    pub fn partition_index(&self, timestamp: i64) -> Option<usize> {
        self.partitions
            .binary_search_by_key(&timestamp, |p| p.timestamp)
            .ok()
    }

    /// Replaces partition table and derives row counts from it.
    pub fn set_partitions(&mut self, mut partitions: Vec<PartitionEntry>) {
        partitions.sort_by_key(|p| p.timestamp);
        let total: u64 = partitions.iter().map(|p| p.row_count).sum();
        self.transient_row_count = partitions.last().map_or(0, |p| p.row_count);
        self.fixed_row_count = total - self.transient_row_count;
        self.partitions = partitions;
    }

    #[inline]
    pub fn symbols_bytes(&self) -> usize {
        self.symbols.len() * SYMBOL_COUNT_SIZE
    }

    #[inline]
    pub fn partitions_bytes(&self) -> usize {
        self.partitions.len() * PARTITION_ENTRY_SIZE
    }

    #[inline]
    pub fn encoded_size(&self) -> usize {
        record_size(self.symbols_bytes(), self.partitions_bytes())
    }

    /// Encodes the record. `txn` comes first and its check value last.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; TX_RECORD_HEADER_SIZE];
        put_i64(&mut buf, TX_OFFSET_TXN, self.txn as i64);
        put_i64(
            &mut buf,
            TX_OFFSET_TRANSIENT_ROW_COUNT,
            self.transient_row_count as i64,
        );
        put_i64(&mut buf, TX_OFFSET_FIXED_ROW_COUNT, self.fixed_row_count as i64);
        put_i64(&mut buf, TX_OFFSET_MIN_TIMESTAMP, self.min_timestamp);
        put_i64(&mut buf, TX_OFFSET_MAX_TIMESTAMP, self.max_timestamp);
        put_i64(&mut buf, TX_OFFSET_STRUCT_VERSION, self.structure_version as i64);
        put_i64(&mut buf, TX_OFFSET_DATA_VERSION, self.data_version as i64);
        put_i64(
            &mut buf,
            TX_OFFSET_PARTITION_TABLE_VERSION,
            self.partition_table_version as i64,
        );
        put_i64(&mut buf, TX_OFFSET_COLUMN_VERSION, self.column_version as i64);
        put_i64(&mut buf, TX_OFFSET_TRUNCATE_VERSION, self.truncate_version as i64);
        put_i64(&mut buf, TX_OFFSET_SEQ_TXN, self.seq_txn as i64);
        put_i32(&mut buf, TX_OFFSET_LAG_CHECKSUM, self.lag_checksum);
        put_i32(&mut buf, TX_OFFSET_LAG_TXN_COUNT, self.lag_txn_count);
        put_i32(&mut buf, TX_OFFSET_LAG_ROW_COUNT, self.lag_row_count);
        put_i64(&mut buf, TX_OFFSET_LAG_MIN_TIMESTAMP, self.lag_min_timestamp);
        put_i64(&mut buf, TX_OFFSET_LAG_MAX_TIMESTAMP, self.lag_max_timestamp);
        put_i32(&mut buf, TX_OFFSET_MAP_WRITER_COUNT, self.symbols.len() as i32);
        buf.reserve(self.encoded_size() - TX_RECORD_HEADER_SIZE);
        for s in &self.symbols {
            buf.extend_from_slice(&s.permanent.to_le_bytes());
            buf.extend_from_slice(&s.transient.to_le_bytes());
        }
        buf.extend_from_slice(&(self.partitions_bytes() as i32).to_le_bytes());
        for p in &self.partitions {
            buf.extend_from_slice(&p.timestamp.to_le_bytes());
            buf.extend_from_slice(&p.masked_row_count().to_le_bytes());
            buf.extend_from_slice(&p.name_txn.to_le_bytes());
            buf.extend_from_slice(&p.parquet_file_size.to_le_bytes());
        }
        buf.extend_from_slice(&(self.txn as i64).to_le_bytes());
        buf
    }

    /// Decodes a record with section sizes taken from its slot header.
    /// Returns None if the bytes are inconsistent, which readers treat
    /// as a torn read.
    pub fn decode(bytes: &[u8], symbols_bytes: usize, partitions_bytes: usize) -> Option<Self> {
        if symbols_bytes % SYMBOL_COUNT_SIZE != 0 || partitions_bytes % PARTITION_ENTRY_SIZE != 0 {
            return None;
        }
        if bytes.len() < record_size(symbols_bytes, partitions_bytes) {
            return None;
        }
        let symbol_count = get_i32(bytes, TX_OFFSET_MAP_WRITER_COUNT);
        if symbol_count < 0 || symbol_count as usize * SYMBOL_COUNT_SIZE != symbols_bytes {
            return None;
        }
        let txn = get_i64(bytes, TX_OFFSET_TXN);
        let mut offset = TX_RECORD_HEADER_SIZE;
        let mut symbols = Vec::with_capacity(symbol_count as usize);
        for _ in 0..symbol_count {
            symbols.push(SymbolCount {
                permanent: get_i32(bytes, offset),
                transient: get_i32(bytes, offset + 4),
            });
            offset += SYMBOL_COUNT_SIZE;
        }
        if get_i32(bytes, offset) as usize != partitions_bytes {
            return None;
        }
        offset += 4;
        let mut partitions = Vec::with_capacity(partitions_bytes / PARTITION_ENTRY_SIZE);
        for _ in 0..partitions_bytes / PARTITION_ENTRY_SIZE {
            partitions.push(PartitionEntry::from_masked(
                get_i64(bytes, offset),
                get_i64(bytes, offset + 8),
                get_i64(bytes, offset + 16),
                get_i64(bytes, offset + 24),
            ));
            offset += PARTITION_ENTRY_SIZE;
        }
        let txn_check = get_i64(bytes, offset);
        if txn_check != txn {
            return None;
        }
        Some(TxnRecord {
            txn: txn as u64,
            transient_row_count: get_i64(bytes, TX_OFFSET_TRANSIENT_ROW_COUNT) as u64,
            fixed_row_count: get_i64(bytes, TX_OFFSET_FIXED_ROW_COUNT) as u64,
            min_timestamp: get_i64(bytes, TX_OFFSET_MIN_TIMESTAMP),
            max_timestamp: get_i64(bytes, TX_OFFSET_MAX_TIMESTAMP),
            structure_version: get_i64(bytes, TX_OFFSET_STRUCT_VERSION) as u64,
            data_version: get_i64(bytes, TX_OFFSET_DATA_VERSION) as u64,
            partition_table_version: get_i64(bytes, TX_OFFSET_PARTITION_TABLE_VERSION) as u64,
            column_version: get_i64(bytes, TX_OFFSET_COLUMN_VERSION) as u64,
            truncate_version: get_i64(bytes, TX_OFFSET_TRUNCATE_VERSION) as u64,
            seq_txn: get_i64(bytes, TX_OFFSET_SEQ_TXN) as u64,
            lag_checksum: get_i32(bytes, TX_OFFSET_LAG_CHECKSUM),
            lag_txn_count: get_i32(bytes, TX_OFFSET_LAG_TXN_COUNT),
            lag_row_count: get_i32(bytes, TX_OFFSET_LAG_ROW_COUNT),
            lag_min_timestamp: get_i64(bytes, TX_OFFSET_LAG_MIN_TIMESTAMP),
            lag_max_timestamp: get_i64(bytes, TX_OFFSET_LAG_MAX_TIMESTAMP),
            symbols,
            partitions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_record() {
        let rec = TxnRecord::empty(2);
        assert_eq!(rec.row_count(), 0);
        assert_eq!(rec.min_timestamp, i64::MAX);
        assert_eq!(rec.max_timestamp, i64::MIN);
        assert_eq!(
            rec.lag_checksum,
            calculate_lag_checksum(0, 0, 0, i64::MAX, i64::MIN, 0)
        );
        let bytes = rec.encode();
        assert_eq!(bytes.len(), rec.encoded_size());
        assert_eq!(bytes.len(), 132 + 16 + 4 + 8);
        let decoded = TxnRecord::decode(&bytes, 16, 0).unwrap();
        assert_eq!(decoded, rec);
    }

    #[test]
    fn test_lag_checksum_fold() {
        // all-zero state folds to zero
        assert_eq!(calculate_lag_checksum(0, 0, 0, 0, 0, 0), 0);
        // 31-multiplier fold of (1, 0, 0, 0, 0, 0) is 31^5, which fits in i32
        assert_eq!(calculate_lag_checksum(0, 0, 0, 1, 0, 0), 28629151);
        assert_ne!(
            calculate_lag_checksum(1, 0, 0, i64::MAX, i64::MIN, 0),
            calculate_lag_checksum(2, 0, 0, i64::MAX, i64::MIN, 0)
        );
    }

    #[test]
    fn test_partition_flags() {
        let mut rec = TxnRecord::empty(0);
        rec.txn = 9;
        let mut p = PartitionEntry::new(86_400_000_000, 42, 3);
        p.parquet = true;
        p.parquet_file_size = 4096;
        rec.set_partitions(vec![p, PartitionEntry::new(0, 8, -1)]);
        assert_eq!(rec.partitions[0].timestamp, 0);
        assert_eq!(rec.fixed_row_count, 8);
        assert_eq!(rec.transient_row_count, 42);
        assert_eq!(rec.partition_index(86_400_000_000), Some(1));
        let bytes = rec.encode();
        let decoded = TxnRecord::decode(&bytes, 0, 64).unwrap();
        assert!(decoded.partitions[1].parquet);
        assert!(!decoded.partitions[1].read_only);
        assert_eq!(decoded.partitions[1].row_count, 42);
        assert_eq!(decoded, rec);
    }

    #[test]
    fn test_torn_record_rejected() {
        let mut rec = TxnRecord::empty(1);
        rec.txn = 5;
        let mut bytes = rec.encode();
        let len = bytes.len();
        bytes[len - 8..].copy_from_slice(&4i64.to_le_bytes());
        assert!(TxnRecord::decode(&bytes, 8, 0).is_none());
        assert!(TxnRecord::decode(&rec.encode(), 16, 0).is_none());
        assert!(TxnRecord::decode(&rec.encode()[..100], 8, 0).is_none());
    }
}
