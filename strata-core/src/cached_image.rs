use std::{fmt, sync::Arc};

use image::{DynamicImage, GenericImageView, RgbaImage};
use strata_model::Dimensions;

/// Shared, immutable handle to a decoded image.
///
/// Cloning is cheap (an `Arc` bump). Two handles are the *same* image only if
/// they point at the same allocation; see [`CachedImage::ptr_eq`]. The
/// transform pipeline relies on that to detect "nothing changed".
#[derive(Clone)]
pub struct CachedImage(Arc<DynamicImage>);

impl CachedImage {
    pub fn new(image: DynamicImage) -> Self {
        Self(Arc::new(image))
    }

    pub fn from_rgba(image: RgbaImage) -> Self {
        Self::new(DynamicImage::ImageRgba8(image))
    }

    pub fn as_dynamic(&self) -> &DynamicImage {
        &self.0
    }

    pub fn dimensions(&self) -> Dimensions {
        self.0.dimensions().into()
    }

    pub fn width(&self) -> u32 {
        self.0.width()
    }

    pub fn height(&self) -> u32 {
        self.0.height()
    }

    /// Whether the pixels are already stored as tightly packed RGBA8, the
    /// layout [`ImageCodec::materialize`] produces.
    ///
    /// [`ImageCodec::materialize`]: crate::codec::ImageCodec::materialize
    pub fn is_materialized(&self) -> bool {
        matches!(*self.0, DynamicImage::ImageRgba8(_))
    }

    /// Resident pixel bytes, for budgeting and diagnostics.
    pub fn estimated_bytes(&self) -> u64 {
        self.0.as_bytes().len() as u64
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<DynamicImage> for CachedImage {
    fn from(image: DynamicImage) -> Self {
        Self::new(image)
    }
}

impl fmt::Debug for CachedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedImage")
            .field("dimensions", &self.dimensions())
            .field("color", &self.0.color())
            .finish()
    }
}
