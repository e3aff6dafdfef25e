use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;

use super::{FetchError, Fetcher};
use crate::{
    cached_image::CachedImage,
    codec::{ImageCodec, RasterCodec},
    error::BoxError,
};

/// Reads and decodes an image file. The key defaults to the path.
#[derive(Debug, Clone)]
pub struct PathFetcher {
    key: String,
    path: PathBuf,
    codec: Arc<dyn ImageCodec>,
}

impl PathFetcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            key: path.display().to_string(),
            path,
            codec: Arc::new(RasterCodec::default()),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn ImageCodec>) -> Self {
        self.codec = codec;
        self
    }
}

#[async_trait]
impl Fetcher for PathFetcher {
    fn key(&self) -> &str {
        &self.key
    }

    async fn fetch(&self) -> Result<Option<CachedImage>, BoxError> {
        let bytes =
            tokio::fs::read(&self.path)
                .await
                .map_err(|source| FetchError::Io {
                    path: self.path.display().to_string(),
                    source,
                })?;
        tracing::debug!(
            path = %self.path.display(),
            bytes = bytes.len(),
            "read source image"
        );

        let codec = Arc::clone(&self.codec);
        let image = tokio::task::spawn_blocking(move || codec.decode(&bytes))
            .await
            .map_err(FetchError::from)?
            .map_err(FetchError::from)?;
        Ok(Some(image))
    }
}
