//! Producers that supply original images on a double miss.

mod http;
mod path;

pub use http::HttpFetcher;
pub use path::PathFetcher;

use async_trait::async_trait;
use thiserror::Error;

use crate::{cached_image::CachedImage, codec::CodecError, error::BoxError};

/// Supplies the original image for one key.
///
/// Returning `Ok(None)` is a contract violation that the cache reports as
/// [`CacheError::FetcherMustReturnImage`]. Errors are passed to the caller
/// unchanged.
///
/// [`CacheError::FetcherMustReturnImage`]: crate::CacheError::FetcherMustReturnImage
#[async_trait]
pub trait Fetcher: Send + Sync {
    fn key(&self) -> &str;

    async fn fetch(&self) -> Result<Option<CachedImage>, BoxError>;
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("{url} answered with status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("{url} returned an empty body")]
    EmptyBody { url: String },

    #[error("{url} body size mismatch: got {actual} bytes, expected {expected}")]
    Truncated {
        url: String,
        expected: u64,
        actual: usize,
    },

    #[error(transparent)]
    Decode(#[from] CodecError),

    #[error("decode task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Fetcher for an image that is already in hand.
#[derive(Debug, Clone)]
pub struct StaticFetcher {
    key: String,
    image: Option<CachedImage>,
}

impl StaticFetcher {
    pub fn new(key: impl Into<String>, image: CachedImage) -> Self {
        Self {
            key: key.into(),
            image: Some(image),
        }
    }

    /// A fetcher that succeeds without an image.
    pub fn empty(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            image: None,
        }
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    fn key(&self) -> &str {
        &self.key
    }

    async fn fetch(&self) -> Result<Option<CachedImage>, BoxError> {
        Ok(self.image.clone())
    }
}
