//! Business rules. Handlers stay thin and call into these modules.

pub mod booking;
pub mod carwash;
pub mod carwash_admin;
pub mod payment;
pub mod pricing;
pub mod slots;
pub mod users;
pub mod wash_type;

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

use crate::error::ApiError;

/// Moscow timezone offset (UTC+3). Car wash schedules are wall-clock Moscow time.
const MSK_OFFSET_SECS: i32 = 3 * 3600;

pub const DEFAULT_PER_PAGE: i64 = 20;
pub const MAX_PER_PAGE: i64 = 100;

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+7\d{10}$").expect("valid phone regex"));

fn moscow() -> FixedOffset {
    FixedOffset::east_opt(MSK_OFFSET_SECS).expect("offset within a day")
}

/// Current Moscow wall-clock time.
pub fn moscow_now() -> NaiveDateTime {
    Utc::now().with_timezone(&moscow()).naive_local()
}

/// Convert a UTC instant to Moscow wall-clock time.
pub fn to_moscow(at: DateTime<Utc>) -> NaiveDateTime {
    at.with_timezone(&moscow()).naive_local()
}

/// Strict `+7XXXXXXXXXX` check used for car wash contacts.
pub fn validate_strict_phone(phone: &str) -> Result<(), ApiError> {
    if PHONE_RE.is_match(phone) {
        Ok(())
    } else {
        Err(ApiError::bad_request(
            "Phone number must start with +7 followed by 10 digits",
        ))
    }
}

/// Trimmed, non-empty, at most `max` chars.
pub fn required_text(field: &str, value: &str, max: usize) -> Result<String, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::bad_request(format!("{field} must not be empty")));
    }
    if trimmed.chars().count() > max {
        return Err(ApiError::bad_request(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// Validated `(page, per_page, offset)`.
pub fn paging(page: Option<i64>, per_page: Option<i64>) -> Result<(i64, i64, i64), ApiError> {
    let page = page.unwrap_or(1);
    let per_page = per_page.unwrap_or(DEFAULT_PER_PAGE);
    if page < 1 {
        return Err(ApiError::bad_request("page must be >= 1"));
    }
    if !(1..=MAX_PER_PAGE).contains(&per_page) {
        return Err(ApiError::bad_request(format!(
            "per_page must be between 1 and {MAX_PER_PAGE}"
        )));
    }
    Ok((page, per_page, (page - 1) * per_page))
}

pub fn page_count(total: i64, per_page: i64) -> i64 {
    if total <= 0 {
        0
    } else {
        (total + per_page - 1) / per_page
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_phone() {
        assert!(validate_strict_phone("+79991234567").is_ok());
        assert!(validate_strict_phone("89991234567").is_err());
        assert!(validate_strict_phone("+7999123456").is_err());
        assert!(validate_strict_phone("+7999123456a").is_err());
    }

    #[test]
    fn test_required_text() {
        assert_eq!(required_text("name", "  Foam  ", 10).unwrap(), "Foam");
        assert!(required_text("name", "   ", 10).is_err());
        assert!(required_text("name", "abcdefghijk", 10).is_err());
    }

    #[test]
    fn test_paging_defaults() {
        assert_eq!(paging(None, None).unwrap(), (1, 20, 0));
        assert_eq!(paging(Some(3), Some(10)).unwrap(), (3, 10, 20));
    }

    #[test]
    fn test_paging_bounds() {
        assert!(paging(Some(0), None).is_err());
        assert!(paging(None, Some(0)).is_err());
        assert!(paging(None, Some(101)).is_err());
        assert!(paging(None, Some(100)).is_ok());
    }

    #[test]
    fn test_page_count() {
        assert_eq!(page_count(0, 20), 0);
        assert_eq!(page_count(1, 20), 1);
        assert_eq!(page_count(20, 20), 1);
        assert_eq!(page_count(21, 20), 2);
    }
}
