//! Formats: named resize/encode/preload policies and their registered state.

mod geometry;

pub use geometry::resized_dimensions;

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use strata_model::{ByteSize, Dimensions, FormatSpec};

use crate::{
    cached_image::CachedImage, codec::ImageCodec, store::PersistentStore,
};

/// Image-to-image step run around the resize.
pub type ImageHook = Arc<dyn Fn(CachedImage) -> CachedImage + Send + Sync>;

/// A format definition: a [`FormatSpec`] plus optional transform hooks.
///
/// Definitions are inert until registered with
/// [`ImageCache::register_format`](crate::ImageCache::register_format).
#[derive(Clone)]
pub struct Format {
    spec: FormatSpec,
    pre_resize: Option<ImageHook>,
    post_resize: Option<ImageHook>,
}

impl Format {
    pub fn new(spec: FormatSpec) -> Self {
        Self {
            spec,
            pre_resize: None,
            post_resize: None,
        }
    }

    /// Shorthand for `Format::new(FormatSpec::new(name, size))`.
    pub fn named(name: impl Into<String>, size: Dimensions) -> Self {
        Self::new(FormatSpec::new(name, size))
    }

    pub fn with_pre_resize<F>(mut self, hook: F) -> Self
    where
        F: Fn(CachedImage) -> CachedImage + Send + Sync + 'static,
    {
        self.pre_resize = Some(Arc::new(hook));
        self
    }

    pub fn with_post_resize<F>(mut self, hook: F) -> Self
    where
        F: Fn(CachedImage) -> CachedImage + Send + Sync + 'static,
    {
        self.post_resize = Some(Arc::new(hook));
        self
    }

    pub fn spec(&self) -> &FormatSpec {
        &self.spec
    }

    pub fn spec_mut(&mut self) -> &mut FormatSpec {
        &mut self.spec
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Turn a producer's original into the image this format caches.
    ///
    /// Runs the pre-resize hook, the resize geometry and the post-resize hook.
    /// When none of them replaced the original, the original is materialized
    /// instead, since it skipped the conversion a resize would have done.
    pub fn transform(
        &self,
        original: CachedImage,
        codec: &dyn ImageCodec,
    ) -> CachedImage {
        let mut image = original.clone();

        if let Some(hook) = &self.pre_resize {
            image = hook(image);
        }

        if let Some(size) = resized_dimensions(
            image.dimensions(),
            self.spec.size,
            self.spec.scale_mode,
            self.spec.allow_upscaling,
        ) {
            image = codec.resize(&image, size);
        }

        if let Some(hook) = &self.post_resize {
            image = hook(image);
        }

        if image.ptr_eq(&original) {
            image = codec.materialize(image);
        }
        image
    }
}

impl From<FormatSpec> for Format {
    fn from(spec: FormatSpec) -> Self {
        Self::new(spec)
    }
}

impl fmt::Debug for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Format")
            .field("spec", &self.spec)
            .field("pre_resize", &self.pre_resize.is_some())
            .field("post_resize", &self.post_resize.is_some())
            .finish()
    }
}

#[derive(Debug)]
struct FormatEntry {
    format: Format,
    store: Arc<dyn PersistentStore>,
    request_count: AtomicU64,
}

/// A registered format: its definition, its persistent store and the request
/// counter the preload pass watches.
#[derive(Clone, Debug)]
pub struct FormatHandle(Arc<FormatEntry>);

impl FormatHandle {
    pub(crate) fn new(format: Format, store: Arc<dyn PersistentStore>) -> Self {
        Self(Arc::new(FormatEntry {
            format,
            store,
            request_count: AtomicU64::new(0),
        }))
    }

    pub fn name(&self) -> &str {
        self.0.format.name()
    }

    pub fn format(&self) -> &Format {
        &self.0.format
    }

    pub fn spec(&self) -> &FormatSpec {
        self.0.format.spec()
    }

    pub fn store(&self) -> &Arc<dyn PersistentStore> {
        &self.0.store
    }

    pub(crate) fn record_request(&self) {
        self.0.request_count.fetch_add(1, Ordering::Release);
    }

    /// Requests issued against this registration so far.
    pub fn request_count(&self) -> u64 {
        self.0.request_count.load(Ordering::Acquire)
    }

    /// Nonzero once any live request has reached the format.
    pub fn has_live_requests(&self) -> bool {
        self.request_count() > 0
    }

    pub fn persistent_capacity(&self) -> ByteSize {
        self.0.store.capacity()
    }

    /// Resize the persistent store. Shrinking evicts least recently used
    /// entries on the store's next write; zero turns the format memory-only.
    pub fn set_persistent_capacity(&self, capacity: ByteSize) {
        self.0.store.set_capacity(capacity);
    }

    pub fn persistent_size(&self) -> ByteSize {
        self.0.store.size()
    }

    pub fn is_memory_only(&self) -> bool {
        self.persistent_capacity().is_zero()
    }

    pub(crate) fn same_registration(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::Format;
    use crate::{cached_image::CachedImage, codec::RasterCodec};
    use image::{DynamicImage, Rgb, RgbImage};
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };
    use strata_model::{Dimensions, ScaleMode};

    fn rgb(width: u32, height: u32) -> CachedImage {
        CachedImage::new(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            width,
            height,
            Rgb([1, 2, 3]),
        )))
    }

    #[test]
    fn untouched_original_is_materialized() {
        let codec = RasterCodec::default();
        let format = Format::named("raw", Dimensions::square(10));
        let mut spec = format.spec().clone();
        spec.scale_mode = ScaleMode::None;
        let format = Format::new(spec);

        let original = rgb(20, 20);
        let out = format.transform(original.clone(), &codec);

        assert!(!out.ptr_eq(&original));
        assert!(out.is_materialized());
        assert_eq!(out.dimensions(), original.dimensions());
    }

    #[test]
    fn hooks_run_around_the_resize() {
        let codec = RasterCodec::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let pre_calls = Arc::clone(&calls);
        let post_calls = Arc::clone(&calls);

        let mut format = Format::named("thumb", Dimensions::square(10))
            .with_pre_resize(move |image| {
                assert_eq!(pre_calls.fetch_add(1, Ordering::SeqCst), 0);
                assert_eq!(image.dimensions(), Dimensions::new(40, 20));
                image
            })
            .with_post_resize(move |image| {
                assert_eq!(post_calls.fetch_add(1, Ordering::SeqCst), 1);
                assert_eq!(image.dimensions(), Dimensions::new(20, 10));
                image
            });
        format.spec_mut().scale_mode = ScaleMode::AspectFill;

        let out = format.transform(rgb(40, 20), &codec);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(out.dimensions(), Dimensions::new(20, 10));
    }

    #[test]
    fn hook_replacing_the_image_skips_forced_materialization() {
        let codec = RasterCodec::default();
        let mut format = Format::named("gray", Dimensions::square(10))
            .with_post_resize(|image| {
                CachedImage::new(image.as_dynamic().grayscale())
            });
        format.spec_mut().scale_mode = ScaleMode::None;

        let out = format.transform(rgb(4, 4), &codec);
        assert!(!out.is_materialized());
    }
}
