//! Timestamps are microseconds since unix epoch in UTC.
//!
//! Calendar based bucketing (month, year, ISO week) goes through
//! the `time` crate, fixed-length bucketing uses Euclidean division
//! so that timestamps before epoch floor downwards.
use crate::error::{Error, Result};
use static_init::dynamic;
use time::format_description::{self, FormatItem};
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime};

pub const MICROS_PER_MILLI: i64 = 1_000;
pub const MICROS_PER_SECOND: i64 = 1_000_000;
pub const MICROS_PER_MINUTE: i64 = 60 * MICROS_PER_SECOND;
pub const MICROS_PER_HOUR: i64 = 60 * MICROS_PER_MINUTE;
pub const MICROS_PER_DAY: i64 = 24 * MICROS_PER_HOUR;
pub const MICROS_PER_WEEK: i64 = 7 * MICROS_PER_DAY;

/// Smallest and largest timestamps accepted as query bounds.
pub const MIN_TIMESTAMP: i64 = i64::MIN + 1;
pub const MAX_TIMESTAMP: i64 = i64::MAX - 1;

#[dynamic]
static FULL_FORMAT: Vec<FormatItem<'static>> =
    format_description::parse("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]")
        .unwrap();

#[dynamic]
static SECOND_FORMAT: Vec<FormatItem<'static>> =
    format_description::parse("[year]-[month]-[day]T[hour]:[minute]:[second]").unwrap();

#[dynamic]
static MINUTE_FORMAT: Vec<FormatItem<'static>> =
    format_description::parse("[year]-[month]-[day]T[hour]:[minute]").unwrap();

#[dynamic]
static DATE_FORMAT: Vec<FormatItem<'static>> =
    format_description::parse("[year]-[month]-[day]").unwrap();

#[inline]
pub fn to_datetime(micros: i64) -> Result<PrimitiveDateTime> {
    let nanos = micros as i128 * 1000;
    let odt = OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .map_err(|_| Error::TimestampOutOfRange(micros))?;
    Ok(PrimitiveDateTime::new(odt.date(), odt.time()))
}

#[inline]
pub fn from_datetime(dt: PrimitiveDateTime) -> i64 {
    (dt.assume_utc().unix_timestamp_nanos() / 1000) as i64
}

#[inline]
pub fn floor_hour(micros: i64) -> i64 {
    micros - micros.rem_euclid(MICROS_PER_HOUR)
}

#[inline]
pub fn floor_day(micros: i64) -> i64 {
    micros - micros.rem_euclid(MICROS_PER_DAY)
}

/// Floors to Monday 00:00 of the ISO week.
#[inline]
pub fn floor_week(micros: i64) -> i64 {
    // 1970-01-01 is a Thursday.
    let shifted = micros + 3 * MICROS_PER_DAY;
    shifted - shifted.rem_euclid(MICROS_PER_WEEK) - 3 * MICROS_PER_DAY
}

#[inline]
pub fn floor_month(micros: i64) -> Result<i64> {
    let date = to_datetime(micros)?.date();
    let first = first_day(date.year(), date.month(), micros)?;
    Ok(from_datetime(first.midnight()))
}

#[inline]
pub fn floor_year(micros: i64) -> Result<i64> {
    let date = to_datetime(micros)?.date();
    let first = first_day(date.year(), Month::January, micros)?;
    Ok(from_datetime(first.midnight()))
}

/// Adds months to a timestamp which is already floored to month start.
#[inline]
pub fn add_months(micros: i64, months: i32) -> Result<i64> {
    let date = to_datetime(micros)?.date();
    let total = date.year() * 12 + (date.month() as i32 - 1) + months;
    let year = total.div_euclid(12);
    let month = Month::try_from((total.rem_euclid(12) + 1) as u8)
        .map_err(|_| Error::TimestampOutOfRange(micros))?;
    let first = first_day(year, month, micros)?;
    Ok(from_datetime(first.midnight()))
}

#[inline]
fn first_day(year: i32, month: Month, micros: i64) -> Result<Date> {
    Date::from_calendar_date(year, month, 1).map_err(|_| Error::TimestampOutOfRange(micros))
}

/// Formats timestamp as `yyyy-MM-ddTHH:mm:ss.SSSSSSZ`.
pub fn format_timestamp(micros: i64) -> Result<String> {
    let dt = to_datetime(micros)?;
    Ok(format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:06}Z",
        dt.year(),
        dt.month() as u8,
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second(),
        dt.microsecond()
    ))
}

/// Parses an ISO-8601 like timestamp in UTC.
/// Accepts date only, minute, second and sub-second precision,
/// with optional trailing `Z`.
pub fn parse_timestamp(input: &str) -> Result<i64> {
    let s = input.strip_suffix('Z').unwrap_or(input);
    if let Ok(dt) = PrimitiveDateTime::parse(s, &*FULL_FORMAT) {
        return Ok(from_datetime(dt));
    }
    if let Ok(dt) = PrimitiveDateTime::parse(s, &*SECOND_FORMAT) {
        return Ok(from_datetime(dt));
    }
    if let Ok(dt) = PrimitiveDateTime::parse(s, &*MINUTE_FORMAT) {
        return Ok(from_datetime(dt));
    }
    let date = Date::parse(s, &*DATE_FORMAT)?;
    Ok(from_datetime(date.midnight()))
}

/// Parses a fixed-length sampling period such as `15m` or `1h`.
/// Calendar units (month, year) have no fixed length and are rejected.
pub fn parse_period(input: &str) -> Result<i64> {
    let s = input.trim();
    let unit = s.chars().last().ok_or(Error::InvalidFormat)?;
    let value: i64 = s[..s.len() - unit.len_utf8()]
        .parse()
        .map_err(|_| Error::InvalidFormat)?;
    if value <= 0 {
        return Err(Error::InvalidFormat);
    }
    let unit_micros = match unit {
        'U' => 1,
        'T' => MICROS_PER_MILLI,
        's' => MICROS_PER_SECOND,
        'm' => MICROS_PER_MINUTE,
        'h' => MICROS_PER_HOUR,
        'd' => MICROS_PER_DAY,
        'w' => MICROS_PER_WEEK,
        _ => return Err(Error::InvalidFormat),
    };
    value.checked_mul(unit_micros).ok_or(Error::InvalidFormat)
}
