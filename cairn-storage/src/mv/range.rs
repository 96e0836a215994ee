/// Widens `[min, max]` outward to whole sample-by buckets of `period`
/// aligned to `origin`. Returns `[from, to)` or `None` when `min > max`.
///
/// `from` is the start of the bucket holding `min`, `to` the end of the
/// bucket holding `max`. Both are clamped to the i64 range.
pub fn align_to_buckets(min: i64, max: i64, period: i64, origin: i64) -> Option<(i64, i64)> {
    if min > max || period <= 0 {
        return None;
    }
    let (min, max, period, origin) = (min as i128, max as i128, period as i128, origin as i128);
    let from = origin + (min - origin).div_euclid(period) * period;
    let to = origin + ((max - origin).div_euclid(period) + 1) * period;
    Some((clamp(from), clamp(to)))
}

#[inline]
fn clamp(v: i128) -> i64 {
    v.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_datatype::timestamp::{parse_timestamp, MICROS_PER_HOUR};
    use proptest::prelude::*;

    #[test]
    fn test_align_hours() {
        let min = parse_timestamp("2024-09-10T12:01").unwrap();
        let max = parse_timestamp("2024-09-10T13:02").unwrap();
        let (from, to) = align_to_buckets(min, max, MICROS_PER_HOUR, 0).unwrap();
        assert_eq!(from, parse_timestamp("2024-09-10T12:00").unwrap());
        assert_eq!(to, parse_timestamp("2024-09-10T14:00").unwrap());

        // bucket boundary is inclusive on the left
        let (from, to) = align_to_buckets(from, from, MICROS_PER_HOUR, 0).unwrap();
        assert_eq!(to - from, MICROS_PER_HOUR);
    }

    #[test]
    fn test_align_edge_cases() {
        assert_eq!(align_to_buckets(10, 5, 60, 0), None);
        assert_eq!(align_to_buckets(0, 5, 0, 0), None);
        // negative timestamps floor toward minus infinity
        assert_eq!(align_to_buckets(-1, -1, 10, 0), Some((-10, 0)));
        assert_eq!(align_to_buckets(7, 7, 10, 3), Some((3, 13)));
        let (_, to) = align_to_buckets(i64::MAX - 1, i64::MAX - 1, MICROS_PER_HOUR, 0).unwrap();
        assert_eq!(to, i64::MAX);
    }

    proptest! {
        #[test]
        fn prop_no_bucket_dropped(
            a in -1_000_000_000_000i64..1_000_000_000_000,
            b in -1_000_000_000_000i64..1_000_000_000_000,
            period in 1i64..10_000_000_000,
            origin in -1_000_000_000i64..1_000_000_000,
        ) {
            let (min, max) = (a.min(b), a.max(b));
            let (from, to) = align_to_buckets(min, max, period, origin).unwrap();
            prop_assert!(from <= min);
            prop_assert!(max < to);
            prop_assert_eq!((from - origin).rem_euclid(period), 0);
            prop_assert_eq!((to - origin).rem_euclid(period), 0);
            // never wider than the buckets actually touched
            prop_assert!(min - from < period);
            prop_assert!(to - max <= period);
        }
    }
}
