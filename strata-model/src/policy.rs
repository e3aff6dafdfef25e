use std::fmt;

/// How an original image is fitted into a format's target size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ScaleMode {
    /// Keep the original size.
    None,
    /// Stretch to the target size exactly; aspect ratio is not preserved.
    #[default]
    Fill,
    /// Scale so the image covers the target box; the overflow is left for the
    /// caller's layout to crop.
    AspectFill,
    /// Scale so the whole image fits inside the target box.
    AspectFit,
}

/// Encoding used when a formatted image is written to the persistent store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum StorageEncoding {
    /// Lossless when the image carries transparency, lossy otherwise.
    #[default]
    Automatic,
    Png,
    Jpeg,
}

/// What to pull into memory from the persistent store when a format is
/// registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PreloadPolicy {
    #[default]
    None,
    /// Entries accessed within an hour of the most recently used one.
    Recent,
    All,
}

impl fmt::Display for ScaleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScaleMode::None => "none",
            ScaleMode::Fill => "fill",
            ScaleMode::AspectFill => "aspect_fill",
            ScaleMode::AspectFit => "aspect_fit",
        })
    }
}

impl fmt::Display for StorageEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StorageEncoding::Automatic => "automatic",
            StorageEncoding::Png => "png",
            StorageEncoding::Jpeg => "jpeg",
        })
    }
}

impl fmt::Display for PreloadPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PreloadPolicy::None => "none",
            PreloadPolicy::Recent => "recent",
            PreloadPolicy::All => "all",
        })
    }
}
