use std::sync::Arc;

use async_trait::async_trait;

use super::{FetchError, Fetcher};
use crate::{
    cached_image::CachedImage,
    codec::{ImageCodec, RasterCodec},
    error::BoxError,
};

/// Downloads and decodes an image. The key defaults to the URL.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    key: String,
    url: String,
    client: reqwest::Client,
    codec: Arc<dyn ImageCodec>,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            key: url.clone(),
            url,
            client,
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

    async fn download(&self) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(&self.url).send().await?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: self.url.clone(),
                status: response.status(),
            });
        }

        let expected_len = response.content_length();
        let bytes = response.bytes().await?;

        if bytes.is_empty() {
            return Err(FetchError::EmptyBody {
                url: self.url.clone(),
            });
        }
        if let Some(content_len) = expected_len
            && bytes.len() as u64 != content_len
        {
            return Err(FetchError::Truncated {
                url: self.url.clone(),
                expected: content_len,
                actual: bytes.len(),
            });
        }

        tracing::debug!(
            url = %self.url,
            bytes = bytes.len(),
            "downloaded source image"
        );
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    fn key(&self) -> &str {
        &self.key
    }

    async fn fetch(&self) -> Result<Option<CachedImage>, BoxError> {
        let bytes = self.download().await?;
        let codec = Arc::clone(&self.codec);
        let image = tokio::task::spawn_blocking(move || codec.decode(&bytes))
            .await
            .map_err(FetchError::from)?
            .map_err(FetchError::from)?;
        Ok(Some(image))
    }
}
