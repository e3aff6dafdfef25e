//! Core data model definitions shared across Strata crates.
//!
//! Everything here is plain data: the policy knobs a format is built from and
//! the units used to express them. Behaviour (resizing, caching, persistence)
//! lives in `strata-core`.
#![allow(missing_docs)]

pub mod bytes;
pub mod dimensions;
pub mod error;
pub mod format;
pub mod policy;

pub use bytes::ByteSize;
pub use dimensions::Dimensions;
pub use error::FormatSpecError;
pub use format::FormatSpec;
pub use policy::{PreloadPolicy, ScaleMode, StorageEncoding};
