//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur when constructing domain components.
///
/// Every variant is a configuration error: the control loop itself has no
/// failure modes, so these surface before any session starts.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// Invalid field value
    #[error("Invalid {field}: {value} (expected {expected})")]
    InvalidFieldValue {
        field: String,
        value: String,
        expected: String,
    },
}

impl DomainError {
    /// Shorthand for building an `InvalidFieldValue` error.
    pub fn invalid(
        field: impl Into<String>,
        value: impl ToString,
        expected: impl Into<String>,
    ) -> Self {
        Self::InvalidFieldValue {
            field: field.into(),
            value: value.to_string(),
            expected: expected.into(),
        }
    }
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;

/// Rejects a value that is NaN, infinite or below `min`.
pub(crate) fn ensure_at_least(field: &str, value: f64, min: f64) -> DomainResult<f64> {
    if value.is_finite() && value >= min {
        Ok(value)
    } else {
        Err(DomainError::invalid(field, value, format!("finite value >= {min}")))
    }
}

/// Rejects a value that is NaN, infinite or not strictly positive.
pub(crate) fn ensure_positive(field: &str, value: f64) -> DomainResult<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(DomainError::invalid(field, value, "finite value > 0"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_field_display() {
        let err = DomainError::invalid("loss_grace_s", -1.0, "finite value >= 0");
        assert_eq!(
            err.to_string(),
            "Invalid loss_grace_s: -1 (expected finite value >= 0)"
        );
    }

    #[test]
    fn test_ensure_helpers() {
        assert!(ensure_at_least("x", 0.0, 0.0).is_ok());
        assert!(ensure_at_least("x", -0.1, 0.0).is_err());
        assert!(ensure_at_least("x", f64::NAN, 0.0).is_err());
        assert!(ensure_positive("x", 0.0).is_err());
        assert!(ensure_positive("x", f64::INFINITY).is_err());
        assert_eq!(ensure_positive("x", 2.5), Ok(2.5));
    }
}
