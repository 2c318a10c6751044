//! Timestamp parsing shared by the grammars and the generic extractors.
//! Everything is interpreted as UTC.

use time::{format_description::well_known::Rfc3339, macros::format_description, Date, OffsetDateTime, PrimitiveDateTime};

/// `YYYYMMDDHHMMSS`.
pub fn parse_compact(s: &str) -> Option<OffsetDateTime> {
    let format = format_description!("[year][month][day][hour][minute][second]");
    PrimitiveDateTime::parse(s.trim(), &format)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

/// `YYYYMMDD`, at midnight.
pub fn parse_compact_date(s: &str) -> Option<OffsetDateTime> {
    let format = format_description!("[year][month][day]");
    Date::parse(s.trim(), &format).ok().map(at_midnight)
}

/// Date and time fields of a flow record.
///
/// The pair is read as one `YYYYMMDDHHMMSS` stamp. Some senders put the full
/// stamp (or just the date) into the date field, so those are tried next.
pub fn parse_flow_datetime(date: &str, time: &str) -> Option<OffsetDateTime> {
    let date = date.trim();
    if date.is_empty() {
        return None;
    }
    let combined = format!("{date}{}", time.trim());
    parse_compact(&combined)
        .or_else(|| parse_compact(date))
        .or_else(|| parse_compact_date(date))
}

/// Dates found in delimited, object-notation, markup and free-text sources.
/// Formats are tried in a fixed order; `None` means none matched.
pub fn parse_loose_date(s: &str) -> Option<OffsetDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(ts) = OffsetDateTime::parse(s, &Rfc3339) {
        return Some(ts);
    }

    let spaced = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let t_separated = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    for format in [spaced, t_separated] {
        if let Ok(ts) = PrimitiveDateTime::parse(s, &format) {
            return Some(ts.assume_utc());
        }
    }

    if let Some(ts) = parse_compact(s) {
        return Some(ts);
    }

    let iso = format_description!("[year]-[month]-[day]");
    let compact = format_description!("[year][month][day]");
    let day_first = format_description!("[day padding:none]/[month padding:none]/[year]");
    let month_first = format_description!("[month padding:none]/[day padding:none]/[year]");
    [iso, compact, day_first, month_first]
        .into_iter()
        .find_map(|format| Date::parse(s, &format).ok())
        .map(at_midnight)
}

fn at_midnight(date: Date) -> OffsetDateTime {
    date.midnight().assume_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn flow_datetime_combines_date_and_time() {
        assert_eq!(
            parse_flow_datetime("20160222", "093000"),
            Some(datetime!(2016-02-22 09:30:00 UTC))
        );
    }

    #[test]
    fn flow_datetime_accepts_full_stamp_in_date_field() {
        assert_eq!(
            parse_flow_datetime("20160222000000", "20160222000000"),
            Some(datetime!(2016-02-22 00:00:00 UTC))
        );
        assert_eq!(parse_flow_datetime("20160222", ""), Some(datetime!(2016-02-22 00:00:00 UTC)));
    }

    #[test]
    fn flow_datetime_rejects_garbage() {
        assert_eq!(parse_flow_datetime("X", "MRCY"), None);
        assert_eq!(parse_flow_datetime("", "120000"), None);
        assert_eq!(parse_compact("2016022212000"), None);
    }

    #[test]
    fn loose_dates_try_formats_in_order() {
        assert_eq!(parse_loose_date("2024-01-15"), Some(datetime!(2024-01-15 00:00:00 UTC)));
        assert_eq!(parse_loose_date("20240115"), Some(datetime!(2024-01-15 00:00:00 UTC)));
        assert_eq!(parse_loose_date("2024-01-15T10:20:30Z"), Some(datetime!(2024-01-15 10:20:30 UTC)));
        assert_eq!(parse_loose_date("2024-01-15 10:20:30"), Some(datetime!(2024-01-15 10:20:30 UTC)));
        // Day-first wins when both readings are valid.
        assert_eq!(parse_loose_date("02/03/2024"), Some(datetime!(2024-03-02 00:00:00 UTC)));
        assert_eq!(parse_loose_date("12/31/2024"), Some(datetime!(2024-12-31 00:00:00 UTC)));
        assert_eq!(parse_loose_date("yesterday"), None);
    }
}
