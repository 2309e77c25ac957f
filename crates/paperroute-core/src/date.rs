//! Document date parsing.

use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};

/// Day-first formats. Month-first US dates are deliberately not accepted,
/// "03/04/2024" is always the 3rd of April.
const DAY_FIRST_FORMATS: &[&str] = &["%d/%m/%Y", "%d.%m.%Y"];

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"];

/// Parse a document date as returned by the synthesis service.
///
/// Tries ISO dates first, then ISO datetimes (with or without offset),
/// then the day-first formats.
pub fn parse_document_date(value: &str) -> Result<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::InvalidDate("empty string".to_string()));
    }

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(date);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.date_naive());
    }

    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(dt.date());
        }
    }

    for fmt in DAY_FIRST_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, fmt) {
            return Ok(date);
        }
    }

    Err(Error::InvalidDate(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_iso_formats() {
        assert_eq!(parse_document_date("2024-03-15").unwrap(), ymd(2024, 3, 15));
        assert_eq!(
            parse_document_date("2024-03-15T10:30:00").unwrap(),
            ymd(2024, 3, 15)
        );
        assert_eq!(
            parse_document_date("2024-03-15T10:30:00+02:00").unwrap(),
            ymd(2024, 3, 15)
        );
    }

    #[test]
    fn test_parse_day_first_formats() {
        assert_eq!(parse_document_date("15/03/2024").unwrap(), ymd(2024, 3, 15));
        assert_eq!(parse_document_date("15.03.2024").unwrap(), ymd(2024, 3, 15));
        // Ambiguous slash dates are day-first
        assert_eq!(parse_document_date("03/04/2024").unwrap(), ymd(2024, 4, 3));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_document_date("").is_err());
        assert!(parse_document_date("   ").is_err());
        assert!(parse_document_date("next tuesday").is_err());
        assert!(parse_document_date("2024-13-45").is_err());
    }

    #[test]
    fn test_parse_trims_whitespace() {
        assert_eq!(parse_document_date("  2024-01-02 \n").unwrap(), ymd(2024, 1, 2));
    }
}
