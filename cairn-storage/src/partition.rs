//! Partition addressing.
//!
//! A partition is identified by the floored timestamp of its bucket and the
//! txn that last rewrote it. The directory name is the formatted bucket,
//! suffixed by `.{name_txn}` once the partition has been rewritten.
use crate::error::{Error, Result};
use cairn_datatype::timestamp::{
    self, add_months, floor_day, floor_hour, floor_month, floor_week, floor_year, to_datetime,
    MICROS_PER_DAY, MICROS_PER_HOUR, MICROS_PER_WEEK,
};
use cairn_datatype::{Date, Datetime, Time, Weekday};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PARTITION_NAME: &str = "default";
pub const PARQUET_SUFFIX: &str = ".parquet";
/// Partition timestamp of unpartitioned tables.
pub const DEFAULT_PARTITION_TIMESTAMP: i64 = 0;

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartitionBy {
    Day = 0,
    Month = 1,
    Year = 2,
    None = 3,
    Hour = 4,
    Week = 5,
}

impl PartitionBy {
    #[inline]
    pub fn from_tag(tag: i32) -> Option<Self> {
        let p = match tag {
            0 => PartitionBy::Day,
            1 => PartitionBy::Month,
            2 => PartitionBy::Year,
            3 => PartitionBy::None,
            4 => PartitionBy::Hour,
            5 => PartitionBy::Week,
            _ => return None,
        };
        Some(p)
    }

    #[inline]
    pub fn tag(self) -> i32 {
        self as i32
    }

    #[inline]
    pub fn from_name(name: &str) -> Option<Self> {
        let p = match name.to_ascii_uppercase().as_str() {
            "DAY" => PartitionBy::Day,
            "MONTH" => PartitionBy::Month,
            "YEAR" => PartitionBy::Year,
            "NONE" => PartitionBy::None,
            "HOUR" => PartitionBy::Hour,
            "WEEK" => PartitionBy::Week,
            _ => return None,
        };
        Some(p)
    }

    #[inline]
    pub fn name(self) -> &'static str {
        match self {
            PartitionBy::Day => "DAY",
            PartitionBy::Month => "MONTH",
            PartitionBy::Year => "YEAR",
            PartitionBy::None => "NONE",
            PartitionBy::Hour => "HOUR",
            PartitionBy::Week => "WEEK",
        }
    }

    #[inline]
    pub fn is_partitioned(self) -> bool {
        self != PartitionBy::None
    }

    /// Start of the partition containing `ts`.
    #[inline]
    pub fn floor(self, ts: i64) -> Result<i64> {
        let res = match self {
            PartitionBy::Day => floor_day(ts),
            PartitionBy::Hour => floor_hour(ts),
            PartitionBy::Week => floor_week(ts),
            PartitionBy::Month => floor_month(ts)?,
            PartitionBy::Year => floor_year(ts)?,
            PartitionBy::None => DEFAULT_PARTITION_TIMESTAMP,
        };
        Ok(res)
    }

    /// Start of the partition following the one starting at `floor`.
    #[inline]
    pub fn next(self, floor: i64) -> Result<i64> {
        let res = match self {
            PartitionBy::Day => floor + MICROS_PER_DAY,
            PartitionBy::Hour => floor + MICROS_PER_HOUR,
            PartitionBy::Week => floor + MICROS_PER_WEEK,
            PartitionBy::Month => add_months(floor, 1)?,
            PartitionBy::Year => add_months(floor, 12)?,
            PartitionBy::None => i64::MAX,
        };
        Ok(res)
    }

    /// Formats the bucket key of the partition containing `ts`.
    pub fn format_key(self, ts: i64) -> Result<String> {
        if self == PartitionBy::None {
            return Ok(DEFAULT_PARTITION_NAME.to_string());
        }
        let dt = to_datetime(self.floor(ts)?)?;
        let key = match self {
            PartitionBy::Day => {
                format!("{:04}-{:02}-{:02}", dt.year(), dt.month() as u8, dt.day())
            }
            PartitionBy::Month => format!("{:04}-{:02}", dt.year(), dt.month() as u8),
            PartitionBy::Year => format!("{:04}", dt.year()),
            PartitionBy::Hour => format!(
                "{:04}-{:02}-{:02}T{:02}",
                dt.year(),
                dt.month() as u8,
                dt.day(),
                dt.hour()
            ),
            PartitionBy::Week => {
                let (year, week, _) = dt.date().to_iso_week_date();
                format!("{:04}-W{:02}", year, week)
            }
            PartitionBy::None => unreachable!(),
        };
        Ok(key)
    }

    /// Parses a bucket key produced by `format_key`.
    pub fn parse_key(self, key: &str) -> Result<i64> {
        let invalid = || Error::InvalidArgument(format!("invalid partition name '{}'", key));
        let ts = match self {
            PartitionBy::None => {
                if key != DEFAULT_PARTITION_NAME {
                    return Err(invalid());
                }
                DEFAULT_PARTITION_TIMESTAMP
            }
            PartitionBy::Day if key.len() == 10 => {
                timestamp::parse_timestamp(key).map_err(|_| invalid())?
            }
            PartitionBy::Month if key.len() == 7 => {
                timestamp::parse_timestamp(&format!("{}-01", key)).map_err(|_| invalid())?
            }
            PartitionBy::Year if key.len() == 4 => {
                timestamp::parse_timestamp(&format!("{}-01-01", key)).map_err(|_| invalid())?
            }
            PartitionBy::Hour if key.len() == 13 => {
                timestamp::parse_timestamp(&format!("{}:00", key)).map_err(|_| invalid())?
            }
            PartitionBy::Week if key.len() == 8 => {
                let (year, week) = key.split_once("-W").ok_or_else(invalid)?;
                let year: i32 = year.parse().map_err(|_| invalid())?;
                let week: u8 = week.parse().map_err(|_| invalid())?;
                let date = Date::from_iso_week_date(year, week, Weekday::Monday)
                    .map_err(|_| invalid())?;
                timestamp::from_datetime(Datetime::new(date, Time::MIDNIGHT))
            }
            _ => return Err(invalid()),
        };
        Ok(ts)
    }
}

/// Directory name of a native partition.
#[inline]
pub fn partition_dir_name(by: PartitionBy, ts: i64, name_txn: i64) -> Result<String> {
    let mut name = by.format_key(ts)?;
    if name_txn > -1 {
        name.push('.');
        name.push_str(&name_txn.to_string());
    }
    Ok(name)
}

/// File name of a partition packed into a single parquet file.
#[inline]
pub fn parquet_partition_file_name(by: PartitionBy, ts: i64, name_txn: i64) -> Result<String> {
    let mut name = partition_dir_name(by, ts, name_txn)?;
    name.push_str(PARQUET_SUFFIX);
    Ok(name)
}

/// Inverse of `partition_dir_name`, returns partition timestamp and name txn.
pub fn parse_partition_dir_name(by: PartitionBy, name: &str) -> Result<(i64, i64)> {
    let (key, name_txn) = match name.split_once('.') {
        Some((key, suffix)) => {
            let txn: i64 = suffix.parse().map_err(|_| {
                Error::InvalidArgument(format!("invalid partition name '{}'", name))
            })?;
            if txn < 0 {
                return Err(Error::InvalidArgument(format!(
                    "invalid partition name '{}'",
                    name
                )));
            }
            (key, txn)
        }
        None => (name, -1),
    };
    Ok((by.parse_key(key)?, name_txn))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_datatype::timestamp::parse_timestamp;
    use proptest::prelude::*;

    // 1970-01-01 to 2100-01-01
    const MAX_TEST_TS: i64 = 4_102_444_800_000_000;

    fn partition_by() -> impl Strategy<Value = PartitionBy> {
        prop_oneof![
            Just(PartitionBy::Day),
            Just(PartitionBy::Month),
            Just(PartitionBy::Year),
            Just(PartitionBy::None),
            Just(PartitionBy::Hour),
            Just(PartitionBy::Week),
        ]
    }

    #[test]
    fn test_partition_dir_names() {
        let ts = parse_timestamp("2024-09-10T12:34:56").unwrap();
        assert_eq!(partition_dir_name(PartitionBy::Day, ts, -1).unwrap(), "2024-09-10");
        assert_eq!(partition_dir_name(PartitionBy::Day, ts, 5).unwrap(), "2024-09-10.5");
        assert_eq!(partition_dir_name(PartitionBy::Month, ts, -1).unwrap(), "2024-09");
        assert_eq!(partition_dir_name(PartitionBy::Year, ts, 0).unwrap(), "2024.0");
        assert_eq!(partition_dir_name(PartitionBy::None, ts, -1).unwrap(), "default");
        assert_eq!(partition_dir_name(PartitionBy::Hour, ts, -1).unwrap(), "2024-09-10T12");
        assert_eq!(partition_dir_name(PartitionBy::Week, ts, -1).unwrap(), "2024-W37");
        assert_eq!(
            parquet_partition_file_name(PartitionBy::Day, ts, 2).unwrap(),
            "2024-09-10.2.parquet"
        );
    }

    #[test]
    fn test_iso_week_at_year_boundary() {
        // 2021-01-01 belongs to week 53 of 2020.
        let ts = parse_timestamp("2021-01-01").unwrap();
        assert_eq!(partition_dir_name(PartitionBy::Week, ts, -1).unwrap(), "2020-W53");
        let (floor, txn) = parse_partition_dir_name(PartitionBy::Week, "2020-W53").unwrap();
        assert_eq!(floor, parse_timestamp("2020-12-28").unwrap());
        assert_eq!(txn, -1);
    }

    #[test]
    fn test_parse_partition_dir_name() {
        let ts = parse_timestamp("2024-09-10T12:00").unwrap();
        for by in [
            PartitionBy::Day,
            PartitionBy::Month,
            PartitionBy::Year,
            PartitionBy::Hour,
            PartitionBy::Week,
            PartitionBy::None,
        ] {
            for name_txn in [-1, 0, 17] {
                let name = partition_dir_name(by, ts, name_txn).unwrap();
                let (floor, txn) = parse_partition_dir_name(by, &name).unwrap();
                assert_eq!(floor, by.floor(ts).unwrap());
                assert_eq!(txn, name_txn);
            }
        }
        assert!(parse_partition_dir_name(PartitionBy::Day, "2024-09").is_err());
        assert!(parse_partition_dir_name(PartitionBy::Day, "2024-09-10.x").is_err());
        assert!(parse_partition_dir_name(PartitionBy::Day, "_meta").is_err());
    }

    #[test]
    fn test_next_partition() {
        let ts = parse_timestamp("2024-12-10").unwrap();
        let by = PartitionBy::Month;
        let next = by.next(by.floor(ts).unwrap()).unwrap();
        assert_eq!(next, parse_timestamp("2025-01-01").unwrap());
        assert_eq!(PartitionBy::None.next(0).unwrap(), i64::MAX);
        assert_eq!(PartitionBy::from_name("hour"), Some(PartitionBy::Hour));
        assert_eq!(PartitionBy::from_tag(9), None);
    }

    proptest! {
        #[test]
        fn test_partition_dir_name_is_injective(
            by in partition_by(),
            ts1 in 0..MAX_TEST_TS,
            ts2 in 0..MAX_TEST_TS,
            txn1 in -1i64..1000,
            txn2 in -1i64..1000,
        ) {
            let key1 = (by.floor(ts1).unwrap(), txn1);
            let key2 = (by.floor(ts2).unwrap(), txn2);
            let name1 = partition_dir_name(by, ts1, txn1).unwrap();
            let name2 = partition_dir_name(by, ts2, txn2).unwrap();
            prop_assert_eq!(key1 == key2, name1 == name2);
            prop_assert_eq!(parse_partition_dir_name(by, &name1).unwrap(), key1);
        }
    }
}
