use crate::{
    ByteSize, Dimensions, FormatSpecError, PreloadPolicy, ScaleMode,
    StorageEncoding,
};

/// Declarative description of a cache format.
///
/// A spec is pure data so it can come from configuration files; the runtime
/// side (hooks, persistent store, request counter) is attached by
/// `strata-core` when the format is registered.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FormatSpec {
    /// Unique name; also the directory of the format's persistent store.
    pub name: String,
    pub size: Dimensions,
    pub scale_mode: ScaleMode,
    pub allow_upscaling: bool,
    /// Lossy encoder quality in `[0, 1]`.
    pub compression_quality: f32,
    pub storage_encoding: StorageEncoding,
    /// Byte budget of the persistent store. Zero makes the format memory-only.
    pub persistent_capacity: ByteSize,
    pub preload_policy: PreloadPolicy,
}

impl FormatSpec {
    pub const DEFAULT_COMPRESSION_QUALITY: f32 = 0.7;
    pub const DEFAULT_PERSISTENT_CAPACITY: ByteSize = ByteSize::from_mib(32);

    pub fn new(name: impl Into<String>, size: Dimensions) -> Self {
        Self {
            name: name.into(),
            size,
            ..Self::default()
        }
    }

    pub fn with_scale_mode(mut self, scale_mode: ScaleMode) -> Self {
        self.scale_mode = scale_mode;
        self
    }

    pub fn with_upscaling(mut self, allow: bool) -> Self {
        self.allow_upscaling = allow;
        self
    }

    pub fn with_compression_quality(mut self, quality: f32) -> Self {
        self.compression_quality = quality;
        self
    }

    pub fn with_storage_encoding(mut self, encoding: StorageEncoding) -> Self {
        self.storage_encoding = encoding;
        self
    }

    pub fn with_persistent_capacity(mut self, capacity: ByteSize) -> Self {
        self.persistent_capacity = capacity;
        self
    }

    pub fn with_preload_policy(mut self, policy: PreloadPolicy) -> Self {
        self.preload_policy = policy;
        self
    }

    /// A format with zero persistent capacity never touches its store.
    pub fn is_memory_only(&self) -> bool {
        self.persistent_capacity.is_zero()
    }

    pub fn validate(&self) -> Result<(), FormatSpecError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(FormatSpecError::EmptyName);
        }
        if name != self.name
            || name == "."
            || name == ".."
            || name.contains(['/', '\\', '\0'])
        {
            return Err(FormatSpecError::InvalidName(self.name.clone()));
        }
        if !(0.0..=1.0).contains(&self.compression_quality) {
            return Err(FormatSpecError::QualityOutOfRange(
                self.compression_quality,
            ));
        }
        Ok(())
    }
}

impl Default for FormatSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            size: Dimensions::default(),
            scale_mode: ScaleMode::default(),
            allow_upscaling: false,
            compression_quality: Self::DEFAULT_COMPRESSION_QUALITY,
            storage_encoding: StorageEncoding::default(),
            persistent_capacity: Self::DEFAULT_PERSISTENT_CAPACITY,
            preload_policy: PreloadPolicy::default(),
        }
    }
}
