use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};

/// Date format accepted on the command line and used by the nightly index.
pub const DATE_FORMAT: &str = "%Y.%m.%d";

/// Every calendar day from `start` to `end`, both inclusive.
///
/// Returns an empty list when `start` is after `end`.
pub fn date_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let days = (end - start).num_days();
    if days < 0 {
        return Vec::new();
    }
    (0..=days).map(|offset| start + Duration::days(offset)).collect()
}

pub fn parse_cli_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
        .with_context(|| format!("'{raw}' is not a date in YYYY.MM.DD format"))
}

pub fn format_nightly_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Local file name a nightly for `date` is downloaded to.
pub fn nightly_file_name(date: NaiveDate) -> String {
    format!("nightly_{}.apk", date.format("%Y_%m_%d"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn range_includes_both_endpoints() {
        let dates = date_range(day(2021, 3, 1), day(2021, 3, 4));
        assert_eq!(dates.len(), 4);
        assert_eq!(dates.first(), Some(&day(2021, 3, 1)));
        assert_eq!(dates.last(), Some(&day(2021, 3, 4)));
    }

    #[test]
    fn range_is_contiguous_across_month_boundary() {
        let dates = date_range(day(2020, 2, 27), day(2020, 3, 2));
        assert_eq!(dates.len(), 5);
        for pair in dates.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::days(1));
        }
        assert!(dates.contains(&day(2020, 2, 29)));
    }

    #[test]
    fn single_day_range() {
        assert_eq!(date_range(day(2021, 1, 1), day(2021, 1, 1)), vec![day(2021, 1, 1)]);
    }

    #[test]
    fn reversed_range_is_empty() {
        assert!(date_range(day(2021, 1, 2), day(2021, 1, 1)).is_empty());
    }

    #[test]
    fn parses_and_formats_cli_dates() {
        let parsed = parse_cli_date("2021.03.15").expect("parse");
        assert_eq!(parsed, day(2021, 3, 15));
        assert_eq!(format_nightly_date(parsed), "2021.03.15");
        assert_eq!(nightly_file_name(parsed), "nightly_2021_03_15.apk");
        assert!(parse_cli_date("2021-03-15").is_err());
    }
}
