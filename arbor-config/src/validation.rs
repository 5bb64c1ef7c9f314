// Configuration validation

use crate::{ConfigError, Result};

/// Trait for validating configuration
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// Field-level validation rules
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate that a value is not empty (ignoring whitespace)
    pub fn not_empty(value: &str, field: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::invalid(field, "cannot be empty"));
        }
        Ok(())
    }

    /// Validate that a number is within range
    pub fn in_range<T: PartialOrd + std::fmt::Display>(
        value: T,
        min: T,
        max: T,
        field: &str,
    ) -> Result<()> {
        if value < min || value > max {
            return Err(ConfigError::invalid(
                field,
                format!("must be between {} and {}", min, max),
            ));
        }
        Ok(())
    }

    /// Validate that a value is in a list of allowed values
    pub fn one_of(value: &str, allowed: &[&str], field: &str) -> Result<()> {
        if !allowed.iter().any(|a| a.eq_ignore_ascii_case(value)) {
            return Err(ConfigError::invalid(
                field,
                format!("must be one of {}", allowed.join(", ")),
            ));
        }
        Ok(())
    }

    /// Validate that a value can serve as a single path segment or file name
    pub fn is_segment(value: &str, field: &str) -> Result<()> {
        Self::not_empty(value, field)?;
        if value.contains(['/', '\\']) {
            return Err(ConfigError::invalid(field, "must not contain path separators"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_empty_validation() {
        assert!(ConfigValidator::not_empty("value", "field").is_ok());
        assert!(ConfigValidator::not_empty("  ", "field").is_err());
    }

    #[test]
    fn test_range_validation() {
        assert!(ConfigValidator::in_range(5, 1, 10, "field").is_ok());
        assert!(ConfigValidator::in_range(0, 1, 10, "field").is_err());
        assert!(ConfigValidator::in_range(11, 1, 10, "field").is_err());
    }

    #[test]
    fn test_one_of_validation() {
        let allowed = ["json", "pretty"];
        assert!(ConfigValidator::one_of("JSON", &allowed, "field").is_ok());
        assert!(ConfigValidator::one_of("xml", &allowed, "field").is_err());
    }

    #[test]
    fn test_segment_validation() {
        assert!(ConfigValidator::is_segment("help", "field").is_ok());
        assert!(ConfigValidator::is_segment("a/b", "field").is_err());
        assert!(ConfigValidator::is_segment("", "field").is_err());
    }
}
