//! Configuration for the Strata image cache.
//!
//! Loads a [`StrataConfig`] from a file, inline JSON or defaults, applies
//! environment overrides, validates the declared formats and turns the result
//! into [`strata_core::CacheOptions`].

#![allow(missing_docs)]

pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{
    CACHE_ROOT_VAR, CONFIG_JSON_VAR, CONFIG_PATH_VAR, MEMORY_CAPACITY_VAR,
};
pub use models::{ConfigSource, StoreTuning, StrataConfig};
pub use validation::ConfigValidationError;
