use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Calendar distance between two dates.
///
/// `months` is the total month distance and already includes `years * 12`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateDiff {
    pub years: i32,
    pub months: i32,
}

/// Year/month distance from `older` to `younger`.
///
/// Only the year and month components take part. Two dates inside the same
/// month are always `{0, 0}` apart, whatever their days are. A negative raw
/// month difference borrows one year before the total is formed.
///
/// # Examples
/// - 2020-01-15 → 2021-03-01: `{ years: 1, months: 14 }`
/// - 2020-05-01 → 2021-02-01: `{ years: 0, months: 9 }`
pub fn date_diff(older: NaiveDate, younger: NaiveDate) -> DateDiff {
    let mut years = younger.year() - older.year();
    let mut months = younger.month() as i32 - older.month() as i32;
    if months < 0 {
        months += 12;
        years -= 1;
    }
    DateDiff {
        years,
        months: months + years * 12,
    }
}

/// Whole years elapsed between `date` and `today`, measured with [`date_diff`].
pub fn age_in_years(date: NaiveDate, today: NaiveDate) -> i32 {
    date_diff(date, today).years
}

/// Makes a label usable as a rollup key: trimmed, with inner whitespace runs
/// replaced by a single hyphen.
pub fn normalize_name(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join("-")
}

/// First eight hex digits of the SHA-256 of `text`.
pub fn short_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    hex::encode(&digest[..4])
}
