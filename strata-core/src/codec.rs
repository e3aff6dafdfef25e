//! Pixel-level image operations behind a trait seam.
//!
//! The cache never touches pixels directly; it goes through [`ImageCodec`] so
//! hosts with their own image stack can plug it in. [`RasterCodec`] is the
//! default, built on the `image` crate.

use std::{borrow::Cow, fmt, io::Cursor};

use image::{
    DynamicImage, ExtendedColorType, ImageEncoder, ImageError, RgbaImage,
    codecs::{jpeg::JpegEncoder, png::PngEncoder},
    imageops::FilterType,
};
use strata_model::{Dimensions, StorageEncoding};
use thiserror::Error;

use crate::cached_image::CachedImage;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to decode image bytes: {0}")]
    Decode(#[source] ImageError),

    #[error("failed to encode image as {encoding}: {source}")]
    Encode {
        encoding: StorageEncoding,
        #[source]
        source: ImageError,
    },
}

/// Decode, encode, materialize and resample images.
///
/// Every method is CPU-bound and synchronous; the cache only calls them from
/// the blocking pool.
pub trait ImageCodec: Send + Sync + fmt::Debug {
    fn decode(&self, bytes: &[u8]) -> Result<CachedImage, CodecError>;

    /// Encode `image` for the persistent store. `quality` is in `[0, 1]` and
    /// only affects lossy output. [`StorageEncoding::Automatic`] resolves to
    /// PNG when [`ImageCodec::has_alpha`] is true and JPEG otherwise.
    fn encode(
        &self,
        image: &CachedImage,
        quality: f32,
        encoding: StorageEncoding,
    ) -> Result<Vec<u8>, CodecError>;

    /// Force the image into its display-ready pixel layout so later use does
    /// no conversion work. Returns the same handle when nothing needs doing.
    fn materialize(&self, image: CachedImage) -> CachedImage;

    fn has_alpha(&self, image: &CachedImage) -> bool;

    /// Resample to exactly `size`. The result is materialized.
    fn resize(&self, image: &CachedImage, size: Dimensions) -> CachedImage;
}

/// [`ImageCodec`] backed by the `image` crate.
///
/// Materialized images are RGBA8, matching what GPU texture uploads expect:
/// later uploads become a straight memcpy instead of a conversion.
#[derive(Debug, Clone, Copy)]
pub struct RasterCodec {
    filter: FilterType,
}

impl RasterCodec {
    pub fn new(filter: FilterType) -> Self {
        Self { filter }
    }

    fn rgba<'a>(image: &'a CachedImage) -> Cow<'a, RgbaImage> {
        match image.as_dynamic() {
            DynamicImage::ImageRgba8(buf) => Cow::Borrowed(buf),
            other => Cow::Owned(other.to_rgba8()),
        }
    }

    fn resolve_encoding(
        &self,
        image: &CachedImage,
        encoding: StorageEncoding,
    ) -> StorageEncoding {
        match encoding {
            StorageEncoding::Automatic if self.has_alpha(image) => {
                StorageEncoding::Png
            }
            StorageEncoding::Automatic => StorageEncoding::Jpeg,
            explicit => explicit,
        }
    }
}

impl Default for RasterCodec {
    fn default() -> Self {
        Self::new(FilterType::Lanczos3)
    }
}

impl ImageCodec for RasterCodec {
    fn decode(&self, bytes: &[u8]) -> Result<CachedImage, CodecError> {
        image::load_from_memory(bytes)
            .map(CachedImage::new)
            .map_err(CodecError::Decode)
    }

    fn encode(
        &self,
        image: &CachedImage,
        quality: f32,
        encoding: StorageEncoding,
    ) -> Result<Vec<u8>, CodecError> {
        let encoding = self.resolve_encoding(image, encoding);
        let (width, height) = image.dimensions().as_u32_tuple();
        let mut out = Cursor::new(Vec::new());

        let written = match encoding {
            StorageEncoding::Jpeg => {
                // JPEG has no alpha channel.
                let rgb = image.as_dynamic().to_rgb8();
                JpegEncoder::new_with_quality(&mut out, jpeg_quality(quality))
                    .encode(
                        rgb.as_raw(),
                        width,
                        height,
                        ExtendedColorType::Rgb8,
                    )
            }
            StorageEncoding::Png | StorageEncoding::Automatic => {
                let rgba = Self::rgba(image);
                PngEncoder::new(&mut out).write_image(
                    rgba.as_raw(),
                    width,
                    height,
                    ExtendedColorType::Rgba8,
                )
            }
        };

        written.map_err(|source| CodecError::Encode { encoding, source })?;
        Ok(out.into_inner())
    }

    fn materialize(&self, image: CachedImage) -> CachedImage {
        if image.is_materialized() {
            return image;
        }
        CachedImage::from_rgba(image.as_dynamic().to_rgba8())
    }

    fn has_alpha(&self, image: &CachedImage) -> bool {
        if !image.as_dynamic().color().has_alpha() {
            return false;
        }
        // An alpha channel that is fully opaque everywhere carries no
        // transparency; lossy storage is fine for it.
        Self::rgba(image).pixels().any(|px| px.0[3] < u8::MAX)
    }

    fn resize(&self, image: &CachedImage, size: Dimensions) -> CachedImage {
        let rgba = Self::rgba(image);
        CachedImage::from_rgba(image::imageops::resize(
            &*rgba,
            size.width,
            size.height,
            self.filter,
        ))
    }
}

fn jpeg_quality(quality: f32) -> u8 {
    let scaled = (quality.clamp(0.0, 1.0) * 100.0).round() as u8;
    scaled.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba};

    fn opaque(width: u32, height: u32) -> CachedImage {
        CachedImage::new(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            width,
            height,
            Rgb([200, 40, 40]),
        )))
    }

    fn translucent(width: u32, height: u32) -> CachedImage {
        CachedImage::from_rgba(RgbaImage::from_pixel(
            width,
            height,
            Rgba([10, 20, 30, 128]),
        ))
    }

    #[test]
    fn automatic_encoding_follows_transparency() {
        let codec = RasterCodec::default();

        let jpeg = codec
            .encode(&opaque(8, 8), 0.8, StorageEncoding::Automatic)
            .expect("encode opaque");
        assert!(jpeg.starts_with(&[0xFF, 0xD8, 0xFF]), "expected jpeg magic");

        let png = codec
            .encode(&translucent(8, 8), 0.8, StorageEncoding::Automatic)
            .expect("encode translucent");
        assert!(png.starts_with(b"\x89PNG"), "expected png magic");
    }

    #[test]
    fn opaque_alpha_channel_is_not_transparency() {
        let codec = RasterCodec::default();
        let materialized = codec.materialize(opaque(4, 4));
        assert!(materialized.is_materialized());
        assert!(!codec.has_alpha(&materialized));
        assert!(codec.has_alpha(&translucent(4, 4)));
    }

    #[test]
    fn png_round_trip_is_lossless() {
        let codec = RasterCodec::default();
        let original = translucent(5, 3);
        let bytes = codec
            .encode(&original, 1.0, StorageEncoding::Png)
            .expect("encode png");
        let decoded = codec.materialize(codec.decode(&bytes).expect("decode"));

        assert_eq!(decoded.dimensions(), original.dimensions());
        assert_eq!(
            decoded.as_dynamic().as_bytes(),
            original.as_dynamic().as_bytes()
        );
    }

    #[test]
    fn materialize_keeps_handle_when_already_rgba() {
        let codec = RasterCodec::default();
        let image = translucent(2, 2);
        assert!(codec.materialize(image.clone()).ptr_eq(&image));
    }

    #[test]
    fn resize_produces_requested_dimensions() {
        let codec = RasterCodec::default();
        let resized = codec.resize(&opaque(40, 20), Dimensions::new(10, 5));
        assert_eq!(resized.dimensions(), Dimensions::new(10, 5));
        assert!(resized.is_materialized());
    }

    #[test]
    fn decode_rejects_garbage() {
        let codec = RasterCodec::default();
        assert!(matches!(
            codec.decode(b"definitely not an image"),
            Err(CodecError::Decode(_))
        ));
    }

    #[test]
    fn quality_maps_to_jpeg_range() {
        assert_eq!(jpeg_quality(0.0), 1);
        assert_eq!(jpeg_quality(0.7), 70);
        assert_eq!(jpeg_quality(3.0), 100);
    }
}
