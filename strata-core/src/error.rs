use strata_model::FormatSpecError;
use thiserror::Error;

use crate::{codec::CodecError, delivery::DeliveryError, store::StoreError};

/// Type-erased error from a [`Fetcher`](crate::Fetcher).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failures delivered by [`ImageCache`](crate::ImageCache) operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Neither tier holds the key and no producer was consulted.
    #[error("no image for key {key:?} in format {format:?}")]
    ImageNotFound { key: String, format: String },

    #[error("stored data for key {key:?} in format {format:?} cannot be decoded")]
    CannotDecodeStoredData {
        key: String,
        format: String,
        #[source]
        source: CodecError,
    },

    #[error("fetcher for key {key:?} succeeded without returning an image")]
    FetcherMustReturnImage { key: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The producer's own error, unchanged.
    #[error(transparent)]
    Fetcher(BoxError),

    #[error("format {0:?} is not registered")]
    UnknownFormat(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("request was dropped before an answer was delivered")]
    DeliveryInterrupted,

    #[error("invalid format: {0}")]
    InvalidFormat(#[from] FormatSpecError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("failed to start the background runtime: {0}")]
    Startup(#[source] std::io::Error),

    #[error("the shared image cache is already initialized")]
    SharedAlreadyInitialized,
}

impl CacheError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ImageNotFound { .. })
    }

    /// The producer error, when this failure came from a fetcher.
    pub fn fetcher_error(
        &self,
    ) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            Self::Fetcher(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}
