use crate::{ConfigError, ConfigResult};

/// Trait for configuration validation
pub trait ConfigValidator {
    fn validate(&self) -> ConfigResult<()>;
}

/// General validation utilities
pub struct ValidationUtils;

impl ValidationUtils {
    pub fn validate_not_empty(value: &str, field_name: &str) -> ConfigResult<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "{field_name} cannot be empty"
            )));
        }
        Ok(())
    }

    pub fn validate_port(port: u16, field_name: &str) -> ConfigResult<()> {
        if port == 0 {
            return Err(ConfigError::Validation(format!("{field_name} cannot be 0")));
        }
        Ok(())
    }

    /// Seconds in (0, 3600]
    pub fn validate_timeout_seconds(timeout_seconds: u64, field_name: &str) -> ConfigResult<()> {
        if timeout_seconds == 0 {
            return Err(ConfigError::Validation(format!(
                "{field_name} must be greater than 0"
            )));
        }
        if timeout_seconds > 3600 {
            return Err(ConfigError::Validation(format!(
                "{field_name} must be less than or equal to 3600"
            )));
        }
        Ok(())
    }

    /// Milliseconds, positive and at most `max_ms`
    pub fn validate_interval_ms(value_ms: u64, max_ms: u64, field_name: &str) -> ConfigResult<()> {
        if value_ms == 0 {
            return Err(ConfigError::Validation(format!(
                "{field_name} must be greater than 0"
            )));
        }
        if value_ms > max_ms {
            return Err(ConfigError::Validation(format!(
                "{field_name} must be less than or equal to {max_ms}"
            )));
        }
        Ok(())
    }

    pub fn validate_count(count: usize, field_name: &str) -> ConfigResult<()> {
        if count == 0 {
            return Err(ConfigError::Validation(format!(
                "{field_name} must be greater than 0"
            )));
        }
        if count > 10000 {
            return Err(ConfigError::Validation(format!(
                "{field_name} must be less than or equal to 10000"
            )));
        }
        Ok(())
    }

    pub fn validate_url_scheme(url: &str, schemes: &[&str], field_name: &str) -> ConfigResult<()> {
        Self::validate_not_empty(url, field_name)?;
        if !schemes.iter().any(|scheme| url.starts_with(scheme)) {
            return Err(ConfigError::Validation(format!(
                "{field_name} must start with one of: {}",
                schemes.join(", ")
            )));
        }
        Ok(())
    }

    /// Ids must be positive and unique within one catalog section
    pub fn validate_unique_ids(ids: &[i64], field_name: &str) -> ConfigResult<()> {
        let mut seen = std::collections::HashSet::new();
        for id in ids {
            if *id <= 0 {
                return Err(ConfigError::Validation(format!(
                    "{field_name} ids must be positive, got {id}"
                )));
            }
            if !seen.insert(*id) {
                return Err(ConfigError::Validation(format!(
                    "{field_name} contains duplicate id {id}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_not_empty() {
        assert!(ValidationUtils::validate_not_empty("test", "field").is_ok());
        assert!(ValidationUtils::validate_not_empty("", "field").is_err());
        assert!(ValidationUtils::validate_not_empty("   ", "field").is_err());
    }

    #[test]
    fn test_validate_timeout_seconds() {
        assert!(ValidationUtils::validate_timeout_seconds(30, "t").is_ok());
        assert!(ValidationUtils::validate_timeout_seconds(3600, "t").is_ok());
        assert!(ValidationUtils::validate_timeout_seconds(0, "t").is_err());
        assert!(ValidationUtils::validate_timeout_seconds(3601, "t").is_err());
    }

    #[test]
    fn test_validate_interval_ms() {
        assert!(ValidationUtils::validate_interval_ms(10, 1000, "i").is_ok());
        assert!(ValidationUtils::validate_interval_ms(0, 1000, "i").is_err());
        assert!(ValidationUtils::validate_interval_ms(1001, 1000, "i").is_err());
    }

    #[test]
    fn test_validate_url_scheme() {
        assert!(
            ValidationUtils::validate_url_scheme("redis://localhost", &["redis://"], "url").is_ok()
        );
        assert!(ValidationUtils::validate_url_scheme("localhost", &["redis://"], "url").is_err());
        assert!(ValidationUtils::validate_url_scheme("", &["redis://"], "url").is_err());
    }

    #[test]
    fn test_validate_unique_ids() {
        assert!(ValidationUtils::validate_unique_ids(&[1, 2, 3], "hosts").is_ok());
        assert!(ValidationUtils::validate_unique_ids(&[1, 1], "hosts").is_err());
        assert!(ValidationUtils::validate_unique_ids(&[0], "hosts").is_err());
    }
}
