//! Identifier escaping and input validation.
//!
//! Column and file names come straight from user data, so every identifier
//! that ends up in generated SQL goes through [`SqlSecurity::escape_identifier`].

use crate::error::{ProfilerError, Result};

/// SQL identifier validation and escaping utilities.
pub struct SqlSecurity;

impl SqlSecurity {
    /// Validates and escapes a SQL identifier (table name, column name).
    ///
    /// Real-world column headers contain spaces, dashes and keywords such as
    /// `close` or `order`, so the identifier is always quoted and embedded
    /// double quotes are doubled.
    ///
    /// # Examples
    /// ```rust
    /// use term_profiler::security::SqlSecurity;
    ///
    /// assert_eq!(SqlSecurity::escape_identifier("customer_id").unwrap(), "\"customer_id\"");
    /// assert_eq!(SqlSecurity::escape_identifier("unit \"price\"").unwrap(), "\"unit \"\"price\"\"\"");
    /// assert!(SqlSecurity::escape_identifier("").is_err());
    /// ```
    pub fn escape_identifier(identifier: &str) -> Result<String> {
        Self::validate_identifier(identifier)?;
        let escaped = identifier.replace('"', "\"\"");
        Ok(format!("\"{escaped}\""))
    }

    /// Validates a SQL identifier without escaping it.
    pub fn validate_identifier(identifier: &str) -> Result<()> {
        if identifier.trim().is_empty() {
            return Err(ProfilerError::Security(
                "SQL identifier cannot be empty or whitespace-only".to_string(),
            ));
        }

        // Check identifier length (prevent DoS)
        if identifier.len() > 256 {
            return Err(ProfilerError::Security(
                "SQL identifier too long (max 256 characters)".to_string(),
            ));
        }

        InputValidator::validate_no_null_bytes(identifier, "SQL identifier")
    }

    /// Escapes a string literal for use inside single quotes.
    pub fn escape_literal(value: &str) -> Result<String> {
        InputValidator::validate_no_null_bytes(value, "SQL literal")?;
        Ok(format!("'{}'", value.replace('\'', "''")))
    }
}

/// Input validation utilities for configuration values.
pub struct InputValidator;

impl InputValidator {
    /// Validates a numeric threshold value.
    pub fn validate_threshold(value: f64, name: &str) -> Result<()> {
        if !value.is_finite() {
            return Err(ProfilerError::Configuration(format!(
                "Invalid {name} value: must be finite (not NaN or infinite)"
            )));
        }
        Ok(())
    }

    /// Validates a ratio value (0.0 to 1.0).
    pub fn validate_ratio(value: f64, name: &str) -> Result<()> {
        Self::validate_threshold(value, name)?;

        if !(0.0..=1.0).contains(&value) {
            return Err(ProfilerError::Configuration(format!(
                "Invalid {name} value: must be between 0.0 and 1.0, got {value}"
            )));
        }
        Ok(())
    }

    /// Validates that a string doesn't contain null bytes.
    pub fn validate_no_null_bytes(value: &str, name: &str) -> Result<()> {
        if value.contains('\0') {
            return Err(ProfilerError::Security(format!(
                "{name} cannot contain null bytes"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_escaping() {
        assert_eq!(
            SqlSecurity::escape_identifier("customer_id").unwrap(),
            "\"customer_id\""
        );
        assert_eq!(SqlSecurity::escape_identifier("close").unwrap(), "\"close\"");
        assert_eq!(
            SqlSecurity::escape_identifier("col\"q").unwrap(),
            "\"col\"\"q\""
        );
    }

    #[test]
    fn test_invalid_identifiers() {
        assert!(SqlSecurity::validate_identifier("").is_err());
        assert!(SqlSecurity::validate_identifier("   ").is_err());
        assert!(SqlSecurity::validate_identifier(&"a".repeat(300)).is_err());
        assert!(SqlSecurity::validate_identifier("a\0b").is_err());
    }

    #[test]
    fn test_literal_escaping() {
        assert_eq!(SqlSecurity::escape_literal("O'Brien").unwrap(), "'O''Brien'");
    }

    #[test]
    fn test_input_validation() {
        assert!(InputValidator::validate_ratio(0.95, "min_overlap").is_ok());
        assert!(InputValidator::validate_ratio(1.5, "min_overlap").is_err());
        assert!(InputValidator::validate_ratio(-0.1, "min_overlap").is_err());
        assert!(InputValidator::validate_threshold(f64::NAN, "x").is_err());
    }
}
