use time::macros::format_description;
use time::{Duration, OffsetDateTime, PrimitiveDateTime, format_description::FormatItem};

/// Second-precision UTC timestamps. Fixed width, so stored values compare
/// lexicographically in SQL.
const ISO8601_SECONDS: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");

const BATCH_STAMP: &[FormatItem<'static>] =
    format_description!("[year][month][day]_[hour][minute][second]");

pub fn now_iso8601() -> String {
    format_iso8601(OffsetDateTime::now_utc())
}

pub fn format_iso8601(ts: OffsetDateTime) -> String {
    ts.format(ISO8601_SECONDS)
        .unwrap_or_else(|_| ts.unix_timestamp().to_string())
}

/// Timestamp `secs` seconds before now, in the stored format.
pub fn iso8601_seconds_ago(secs: u64) -> String {
    let secs = i64::try_from(secs).unwrap_or(i64::MAX);
    let cutoff = OffsetDateTime::now_utc()
        .checked_sub(Duration::seconds(secs))
        .unwrap_or(OffsetDateTime::UNIX_EPOCH);
    format_iso8601(cutoff)
}

pub fn parse_iso8601(raw: &str) -> Option<OffsetDateTime> {
    PrimitiveDateTime::parse(raw, ISO8601_SECONDS)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

/// Batch correlation id, e.g. `20260301_141502`.
pub fn batch_stamp() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(BATCH_STAMP)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso8601_round_trips_at_second_precision() {
        let now = now_iso8601();
        assert_eq!(now.len(), "2026-01-01T00:00:00Z".len());
        let parsed = parse_iso8601(&now).expect("parse own format");
        assert_eq!(format_iso8601(parsed), now);
    }

    #[test]
    fn cutoff_sorts_before_now() {
        let cutoff = iso8601_seconds_ago(120);
        assert!(cutoff < now_iso8601());
    }

    #[test]
    fn batch_stamp_has_date_and_time_parts() {
        let stamp = batch_stamp();
        let (date, clock) = stamp.split_once('_').expect("underscore separator");
        assert_eq!(date.len(), 8);
        assert_eq!(clock.len(), 6);
        assert!(stamp.chars().filter(|c| *c != '_').all(|c| c.is_ascii_digit()));
    }
}
