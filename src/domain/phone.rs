//! Destination number normalization
//!
//! Indonesian MSISDN handling: local numbers written with a leading `0` are
//! rewritten to the `62` country prefix, separators and `+` are stripped.

use thiserror::Error;

/// Minimum digits after the `62` country prefix.
const MIN_SUBSCRIBER_DIGITS: usize = 9;
/// Maximum digits after the `62` country prefix.
const MAX_SUBSCRIBER_DIGITS: usize = 13;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PhoneError {
    #[error("destination number is empty")]
    Empty,
    #[error("destination number must use the 62 country prefix")]
    InvalidPrefix,
    #[error("destination number too short")]
    TooShort,
    #[error("destination number too long")]
    TooLong,
}

/// Normalize a destination number to `62…` digit form.
///
/// Strips every non-digit character (spaces, dashes, `+`), rewrites a leading
/// `0` to `62`, and validates the subscriber part length. The result is
/// always 11 to 15 digits.
pub fn normalize(raw: &str) -> Result<String, PhoneError> {
    let mut digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return Err(PhoneError::Empty);
    }

    if digits.starts_with('0') {
        digits.replace_range(0..1, "62");
    }

    if !digits.starts_with("62") {
        return Err(PhoneError::InvalidPrefix);
    }

    let subscriber_len = digits.len() - 2;
    if subscriber_len < MIN_SUBSCRIBER_DIGITS {
        return Err(PhoneError::TooShort);
    }
    if subscriber_len > MAX_SUBSCRIBER_DIGITS {
        return Err(PhoneError::TooLong);
    }

    Ok(digits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_number_with_separators() {
        assert_eq!(normalize("0812-3456-789").unwrap(), "628123456789");
    }

    #[test]
    fn test_plus_prefix_stripped() {
        assert_eq!(normalize("+628123456789").unwrap(), "628123456789");
    }

    #[test]
    fn test_already_normalized() {
        assert_eq!(normalize("628123456789").unwrap(), "628123456789");
    }

    #[test]
    fn test_spaces_stripped() {
        assert_eq!(normalize("0812 3456 7890").unwrap(), "6281234567890");
    }

    #[test]
    fn test_too_short_rejected() {
        // 8 digits after the 62 prefix
        assert_eq!(normalize("6281234567"), Err(PhoneError::TooShort));
        assert_eq!(normalize("0812345"), Err(PhoneError::TooShort));
    }

    #[test]
    fn test_too_long_rejected() {
        assert_eq!(normalize("62812345678901234"), Err(PhoneError::TooLong));
    }

    #[test]
    fn test_foreign_prefix_rejected() {
        assert_eq!(normalize("18005551234"), Err(PhoneError::InvalidPrefix));
    }

    #[test]
    fn test_empty_rejected() {
        assert_eq!(normalize("---"), Err(PhoneError::Empty));
    }
}
