use std::collections::HashSet;

use strata_model::FormatSpecError;
use thiserror::Error;

use crate::models::StrataConfig;

#[derive(Debug, Error)]
pub enum ConfigValidationError {
    #[error("format {0:?} is declared more than once")]
    DuplicateFormat(String),

    #[error("format {name:?} is invalid: {source}")]
    InvalidFormat {
        name: String,
        #[source]
        source: FormatSpecError,
    },

    #[error("worker_threads must be at least 1")]
    NoWorkerThreads,
}

impl StrataConfig {
    /// Reject configurations that would fail at registration time.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.worker_threads == Some(0) {
            return Err(ConfigValidationError::NoWorkerThreads);
        }

        let mut seen = HashSet::new();
        for spec in &self.formats {
            spec.validate()
                .map_err(|source| ConfigValidationError::InvalidFormat {
                    name: spec.name.clone(),
                    source,
                })?;
            if !seen.insert(spec.name.as_str()) {
                return Err(ConfigValidationError::DuplicateFormat(
                    spec.name.clone(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_model::{Dimensions, FormatSpec};

    fn spec(name: &str) -> FormatSpec {
        FormatSpec::new(name, Dimensions::square(64))
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let config = StrataConfig {
            formats: vec![spec("thumb"), spec("poster"), spec("thumb")],
            ..StrataConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::DuplicateFormat(name)) if name == "thumb"
        ));
    }

    #[test]
    fn invalid_specs_name_the_format() {
        let config = StrataConfig {
            formats: vec![spec("thumb").with_compression_quality(1.5)],
            ..StrataConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("thumb"));
    }

    #[test]
    fn zero_worker_threads_is_rejected() {
        let config = StrataConfig {
            worker_threads: Some(0),
            ..StrataConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::NoWorkerThreads)
        ));
    }
}
