//! Configuration validation.
//!
//! Checks that required values are present and within range before any
//! upstream call is made.

use thiserror::Error;

use crate::config::{Config, DataConfig, ObservabilityConfig, ProvidersConfig};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Configuration conflict: {reason}")]
    Conflict { reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut errors: Vec<ValidationError> = [
            self.data.validate(),
            self.providers.validate(),
            self.observability.validate(),
        ]
        .into_iter()
        .filter_map(Result::err)
        .collect();

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ValidationError::Multiple(errors)),
        }
    }

    /// Validate, reporting failures as a configuration [`crate::Error`].
    pub fn ensure_valid(&self) -> crate::Result<()> {
        self.validate()
            .map_err(|e| crate::Error::Config(e.to_string()))
    }
}

impl Validate for DataConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.timeout_per_call_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "data.timeout_per_call_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.concurrency == 0 {
            return Err(ValidationError::InvalidValue {
                field: "data.concurrency".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.retry_backoff_max_ms < self.retry_backoff_ms {
            return Err(ValidationError::Conflict {
                reason: format!(
                    "data.retry_backoff_max_ms ({}) is below data.retry_backoff_ms ({})",
                    self.retry_backoff_max_ms, self.retry_backoff_ms
                ),
            });
        }

        Ok(())
    }
}

impl Validate for ProvidersConfig {
    fn validate(&self) -> ValidationResult<()> {
        if !self.eastmoney.enabled && !self.tushare.enabled {
            return Err(ValidationError::Conflict {
                reason: "at least one of providers.eastmoney and providers.tushare must be enabled"
                    .into(),
            });
        }

        if self.eastmoney.enabled && self.eastmoney.requests_per_minute == 0 {
            return Err(ValidationError::InvalidValue {
                field: "providers.eastmoney.requests_per_minute".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.tushare.enabled {
            let has_token = self
                .tushare
                .token
                .as_deref()
                .is_some_and(|t| !t.trim().is_empty());
            if !has_token {
                return Err(ValidationError::MissingField {
                    field: "providers.tushare.token (required when tushare is enabled)".into(),
                });
            }
            if self.tushare.requests_per_minute == 0 {
                return Err(ValidationError::InvalidValue {
                    field: "providers.tushare.requests_per_minute".into(),
                    reason: "must be greater than 0".into(),
                });
            }
        }

        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            });
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            });
        }

        Ok(())
    }
}
