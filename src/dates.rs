//! Lenient birth-date parsing. Only the year is ever used downstream, so anything that
//! does not parse simply falls back to a default year.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};

/// Year assumed for records whose birth date is missing or unreadable.
pub const DEFAULT_BIRTH_YEAR: i32 = 1990;

// Two-digit year forms come first: "%Y" would also accept "85" as the year 85.
const DATE_FORMATS: &[&str] = &[
    "%m/%d/%y",
    "%m-%d-%y",
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%Y/%m/%d",
    "%m-%d-%Y",
    "%d %B %Y",
    "%d %b %Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%b %d %Y",
];

const DATE_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Parses a free-form date string and returns its year, if it can be read.
pub fn parse_birth_year(raw: &str) -> Option<i32> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }

    if text.bytes().all(|b| b.is_ascii_digit()) {
        return match text.len() {
            4 => text.parse().ok(),
            8 => compact_date_year(text),
            _ => None,
        };
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.year());
    }

    for format in DATE_TIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt.year());
        }
    }

    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
        .map(|date| date.year())
}

/// `YYYYMMDD`, accepted only when it names a real calendar date.
fn compact_date_year(text: &str) -> Option<i32> {
    let year: i32 = text[0..4].parse().ok()?;
    let month: u32 = text[4..6].parse().ok()?;
    let day: u32 = text[6..8].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day).map(|_| year)
}

/// Year to key the first-name lookup on: the parsed year, or `default_year`.
pub fn birth_year_or(raw: Option<&str>, default_year: i32) -> i32 {
    raw.and_then(parse_birth_year).unwrap_or(default_year)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_formats_yield_the_year() {
        assert_eq!(parse_birth_year("1985-06-01"), Some(1985));
        assert_eq!(parse_birth_year("06/01/1985"), Some(1985));
        assert_eq!(parse_birth_year("1985/06/01"), Some(1985));
        assert_eq!(parse_birth_year("19850601"), Some(1985));
        assert_eq!(parse_birth_year("June 1, 1985"), Some(1985));
        assert_eq!(parse_birth_year("1 Jun 1985"), Some(1985));
        assert_eq!(parse_birth_year("1985-06-01T08:30:00"), Some(1985));
        assert_eq!(parse_birth_year("1985-06-01T08:30:00Z"), Some(1985));
        assert_eq!(parse_birth_year(" 1985 "), Some(1985));
    }

    #[test]
    fn two_digit_years_follow_chrono_pivot() {
        assert_eq!(parse_birth_year("06/01/85"), Some(1985));
        assert_eq!(parse_birth_year("06/01/05"), Some(2005));
    }

    #[test]
    fn garbage_falls_back_to_the_default_year() {
        assert_eq!(parse_birth_year("not a date"), None);
        assert_eq!(parse_birth_year("13/45/1985"), None);
        assert_eq!(parse_birth_year("19851301"), None);
        assert_eq!(birth_year_or(Some("unknown"), DEFAULT_BIRTH_YEAR), 1990);
        assert_eq!(birth_year_or(None, DEFAULT_BIRTH_YEAR), 1990);
        assert_eq!(birth_year_or(Some(""), 1975), 1975);
        assert_eq!(birth_year_or(Some("2001-02-03"), 1975), 2001);
    }
}
