//! Request validation utilities.
//!
//! Single-field checks return [`ValidationResult`]. Handlers gather them in a
//! [`ValidationErrors`] collector so a request with several bad fields is
//! rejected once, listing every problem.

use std::fmt;

use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;

use crate::documents::{normalize_vehicle_number, Fees};
use crate::lifecycle::parse_display_date;

use super::api_error::{ApiError, ErrorCode};

/// Validation error type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Collects field errors across a whole request.
#[derive(Debug, Default)]
pub struct ValidationErrors {
    errors: Vec<ValidationError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the value on success, record the error otherwise.
    pub fn check<T>(&mut self, result: ValidationResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.errors.push(e);
                None
            }
        }
    }

    pub fn push(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    /// `Ok(())` when nothing was recorded, otherwise an `INVALID_REQUEST`
    /// error whose details list every problem.
    pub fn into_result(self) -> Result<(), ApiError> {
        if self.errors.is_empty() {
            return Ok(());
        }

        let message = if self.errors.len() == 1 {
            self.errors[0].to_string()
        } else {
            format!("{} fields are invalid", self.errors.len())
        };

        Err(ApiError::with_details(
            ErrorCode::InvalidRequest,
            message,
            serde_json::json!({ "errors": self.errors }),
        ))
    }
}

/// Validate that a string is not empty or whitespace only.
///
/// # Example
/// ```
/// use rto::server::validation::validate_not_empty;
///
/// assert!(validate_not_empty("Ravi", "holder_name").is_ok());
/// assert!(validate_not_empty("   ", "holder_name").is_err());
/// ```
pub fn validate_not_empty(value: &str, field_name: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        Err(ValidationError::new(field_name, "cannot be empty"))
    } else {
        Ok(())
    }
}

/// Validate string length (in characters) is within bounds.
pub fn validate_length(
    value: &str,
    min: usize,
    max: usize,
    field_name: &str,
) -> ValidationResult<()> {
    let len = value.chars().count();
    if len < min {
        Err(ValidationError::new(
            field_name,
            format!("must be at least {min} characters"),
        ))
    } else if len > max {
        Err(ValidationError::new(
            field_name,
            format!("must be at most {max} characters"),
        ))
    } else {
        Ok(())
    }
}

/// Trim an optional free-text field; blank becomes `None`.
pub fn clean_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Validate and normalize a vehicle registration number.
///
/// Whitespace is removed and letters uppercased before checking for 4-15
/// characters of `A-Z`, `0-9` or `-`.
///
/// # Example
/// ```
/// use rto::server::validation::validate_vehicle_number;
///
/// assert_eq!(validate_vehicle_number("cg 04 ab 1234", "vehicle_number").unwrap(), "CG04AB1234");
/// assert!(validate_vehicle_number("CG#04", "vehicle_number").is_err());
/// ```
pub fn validate_vehicle_number(value: &str, field_name: &str) -> ValidationResult<String> {
    let normalized = normalize_vehicle_number(value);
    let re = Regex::new(r"^[A-Z0-9-]{4,15}$")
        .map_err(|e| ValidationError::new(field_name, format!("pattern error: {e}")))?;

    if re.is_match(&normalized) {
        Ok(normalized)
    } else {
        Err(ValidationError::new(
            field_name,
            "invalid vehicle number (4-15 letters, digits or hyphens)",
        ))
    }
}

/// Validate an optional 10-digit mobile number. `+91` and spaces are ignored.
pub fn validate_mobile(value: Option<&str>, field_name: &str) -> ValidationResult<Option<String>> {
    let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };

    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let digits = compact.strip_prefix("+91").unwrap_or(&compact);
    let re = Regex::new(r"^[0-9]{10}$")
        .map_err(|e| ValidationError::new(field_name, format!("pattern error: {e}")))?;

    if re.is_match(digits) {
        Ok(Some(digits.to_string()))
    } else {
        Err(ValidationError::new(
            field_name,
            "invalid mobile number (expected 10 digits)",
        ))
    }
}

/// Parse a date in `DD-MM-YYYY`, `DD/MM/YYYY` or `YYYY-MM-DD` form.
///
/// # Example
/// ```
/// use rto::server::validation::validate_date;
///
/// assert!(validate_date("31-12-2025", "valid_to").is_ok());
/// assert!(validate_date("2025-12-31", "valid_to").is_ok());
/// assert!(validate_date("31.12.2025", "valid_to").is_err());
/// ```
pub fn validate_date(value: &str, field_name: &str) -> ValidationResult<NaiveDate> {
    parse_display_date(value).ok_or_else(|| {
        ValidationError::new(
            field_name,
            "invalid date (expected DD-MM-YYYY, DD/MM/YYYY or YYYY-MM-DD)",
        )
    })
}

/// Validate that a validity period does not end before it starts.
pub fn validate_date_range(valid_from: NaiveDate, valid_to: NaiveDate) -> ValidationResult<()> {
    if valid_from > valid_to {
        Err(ValidationError::new(
            "valid_to",
            "must not be earlier than valid_from",
        ))
    } else {
        Ok(())
    }
}

/// Every problem with a fee/payment pair.
pub fn validate_fees(fees: Fees) -> Vec<ValidationError> {
    fees.problems()
        .into_iter()
        .map(|(field, message)| ValidationError::new(field, message))
        .collect()
}

/// Usernames are 3-32 characters of letters, digits, `.`, `_` or `-`.
pub fn validate_username(value: &str, field_name: &str) -> ValidationResult<()> {
    let re = Regex::new(r"^[a-zA-Z0-9._-]{3,32}$")
        .map_err(|e| ValidationError::new(field_name, format!("pattern error: {e}")))?;

    if re.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::new(
            field_name,
            "invalid username (3-32 letters, digits, '.', '_' or '-')",
        ))
    }
}

pub fn validate_password(value: &str, field_name: &str) -> ValidationResult<()> {
    // bcrypt ignores input past 72 bytes
    if value.len() > 72 {
        return Err(ValidationError::new(field_name, "must be at most 72 bytes"));
    }
    validate_length(value, 8, 72, field_name)
}
