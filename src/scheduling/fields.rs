//! Required-field and partial-merge helpers shared by the services.

use super::ServiceError;

/// Trimmed value, or `None` when absent or blank.
pub fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

pub fn required(name: &str, value: Option<&str>) -> Result<String, ServiceError> {
    non_empty(value)
        .map(str::to_string)
        .ok_or_else(|| ServiceError::Validation(format!("{name} is required")))
}

/// Keeps `current` unless `incoming` carries a non-blank value.
pub fn merged(current: &str, incoming: Option<&str>) -> String {
    non_empty(incoming).unwrap_or(current).to_string()
}
