//! Input checks shared by the service modules.

use crate::error::{AppError, AppResult};

pub const MIN_PASSWORD_LEN: usize = 6;

/// Trims a required text field, rejecting blank values.
pub fn required(field: &str, value: &str) -> AppResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::validation(format!("{} is required.", field)));
    }
    Ok(value.to_string())
}

pub fn required_max(field: &str, value: &str, max_chars: usize) -> AppResult<String> {
    let value = required(field, value)?;
    if value.chars().count() > max_chars {
        return Err(AppError::validation(format!(
            "{} must be at most {} characters.",
            field, max_chars
        )));
    }
    Ok(value)
}

/// Trims an optional field; blank collapses to `None`.
pub fn optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub fn email(value: &str) -> AppResult<String> {
    let email = value.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    };
    if !valid || email.chars().any(char::is_whitespace) {
        return Err(AppError::validation("Please provide a valid email address."));
    }
    Ok(email)
}

pub fn password(value: &str) -> AppResult<()> {
    if value.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::validation(format!(
            "Password must be at least {} characters.",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("  A@X.com ", "a@x.com")]
    #[case("donor@agosh.org", "donor@agosh.org")]
    fn emails_are_normalised(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(email(input).unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("no-at-sign")]
    #[case("@x.com")]
    #[case("a@localhost")]
    #[case("a b@x.com")]
    fn malformed_emails_are_rejected(#[case] input: &str) {
        assert!(email(input).is_err());
    }

    #[test]
    fn short_passwords_are_rejected() {
        assert!(password("12345").is_err());
        assert!(password("secret1").is_ok());
    }

    #[test]
    fn length_limits_count_characters() {
        assert!(required_max("Title", &"é".repeat(100), 100).is_ok());
        assert!(required_max("Title", &"a".repeat(101), 100).is_err());
        assert!(required_max("Title", "   ", 100).is_err());
    }

    #[test]
    fn blank_optionals_collapse() {
        assert_eq!(optional(Some("  ")), None);
        assert_eq!(optional(Some(" x ")), Some("x".to_string()));
        assert_eq!(optional(None), None);
    }
}
