use strata_model::{Dimensions, ScaleMode};

/// Size an image of `original` dimensions should be resampled to.
///
/// Returns `None` when the original should be kept as is: scale mode `None`,
/// degenerate sizes, a result identical to the original, or an upscale when
/// `allow_upscaling` is false.
pub fn resized_dimensions(
    original: Dimensions,
    target: Dimensions,
    mode: ScaleMode,
    allow_upscaling: bool,
) -> Option<Dimensions> {
    if original.is_empty() || target.is_empty() {
        return None;
    }

    let resized = match mode {
        ScaleMode::None => return None,
        ScaleMode::Fill => target,
        ScaleMode::AspectFill => {
            let scale = (f64::from(target.width) / f64::from(original.width))
                .max(f64::from(target.height) / f64::from(original.height));
            Dimensions::new(
                ceil_px(f64::from(original.width) * scale),
                ceil_px(f64::from(original.height) * scale),
            )
        }
        ScaleMode::AspectFit => {
            let source_aspect = original.aspect_ratio();
            if target.aspect_ratio() > source_aspect {
                Dimensions::new(
                    ceil_px(f64::from(target.height) * source_aspect),
                    target.height,
                )
            } else {
                Dimensions::new(
                    target.width,
                    ceil_px(f64::from(target.width) / source_aspect),
                )
            }
        }
    };

    if resized == original {
        return None;
    }
    if !allow_upscaling && resized.exceeds(original) {
        return None;
    }
    Some(resized)
}

fn ceil_px(value: f64) -> u32 {
    // Multiplying by an exact ratio can land a hair above an integer.
    let snapped = (value * 1e6).round() / 1e6;
    snapped.ceil().clamp(1.0, f64::from(u32::MAX)) as u32
}
