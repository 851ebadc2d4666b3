//! Pixel normalization for the feature extractor.
//!
//! The backbone was trained on BGR images with the ImageNet mean removed and
//! values on a 0-255 scale. Every image entering the network goes through
//! `normalize`, and the canvas leaves through `denormalize`.
//!
//! ### Forward (RGB8 → network input)
//! - channel order reversed: R,G,B → B,G,R
//! - `v = (u / 255 - mean[c]) * 255`
//!
//! ### Inverse (network input → RGB8)
//! - `u = clamp(v / 255 + mean[c], 0, 1)`, quantized with rounding
//! - channel order restored to R,G,B
//!
//! Values pushed outside [0, 1] by optimization are clamped on the way out,
//! so `denormalize(normalize(img)) == img` for every valid 8-bit image.

use super::tensor::{FeatureMap, ShapeError};
use image::{Rgb, RgbImage};

/// ImageNet channel means in B, G, R order on a [0, 1] scale.
pub const BGR_MEAN: [f32; 3] = [0.40760392, 0.45795686, 0.48501961];

/// Scale applied after mean subtraction.
pub const PIXEL_SCALE: f32 = 255.0;

/// Convert one 8-bit sample of RGB channel `rgb_channel` to network space.
pub fn normalize_sample(u: u8, rgb_channel: usize) -> f32 {
    let bgr = 2 - rgb_channel;
    ((u as f32) / 255.0 - BGR_MEAN[bgr]) * PIXEL_SCALE
}

/// Convert one network-space value of BGR channel `bgr_channel` back to [0, 1].
///
/// The result is clamped.
pub fn denormalize_sample(v: f32, bgr_channel: usize) -> f32 {
    (v / PIXEL_SCALE + BGR_MEAN[bgr_channel]).clamp(0.0, 1.0)
}

/// RGB8 image → 1×3×H×W tensor in network space.
pub fn normalize(img: &RgbImage) -> FeatureMap {
    let (w, h) = img.dimensions();
    FeatureMap::from_fn(3, h as usize, w as usize, |c, y, x| {
        let rgb = 2 - c;
        normalize_sample(img.get_pixel(x as u32, y as u32)[rgb], rgb)
    })
}

/// 1×3×H×W tensor in network space → RGB8 image.
pub fn denormalize(map: &FeatureMap) -> Result<RgbImage, ShapeError> {
    map.require_channels(3)?;
    let (w, h) = (map.width(), map.height());
    let mut img = RgbImage::new(w as u32, h as u32);
    for y in 0..h {
        for x in 0..w {
            let mut px = [0u8; 3];
            for (bgr, slot) in [2usize, 1, 0].into_iter().zip(px.iter_mut()) {
                let v = denormalize_sample(map.get(bgr, y, x), bgr);
                *slot = (v * 255.0).round().clamp(0.0, 255.0) as u8;
            }
            img.put_pixel(x as u32, y as u32, Rgb(px));
        }
    }
    Ok(img)
}
