//! Raster image loading, resizing and saving.

use crate::core::{normalize, FeatureMap};
use image::imageops::FilterType;
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("cannot read image {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("cannot write image {path}: {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("image {path} is empty")]
    Empty { path: PathBuf },
}

/// Decode any supported raster file to 8-bit RGB.
pub fn load_rgb(path: &Path) -> Result<RgbImage, ImageError> {
    let img = image::open(path)
        .map_err(|source| ImageError::Open {
            path: path.to_path_buf(),
            source,
        })?
        .to_rgb8();
    if img.width() == 0 || img.height() == 0 {
        return Err(ImageError::Empty {
            path: path.to_path_buf(),
        });
    }
    Ok(img)
}

/// Target dimensions with the shorter side set to `size` (longer side truncated).
pub fn shorter_side_dims(width: u32, height: u32, size: u32) -> (u32, u32) {
    if width <= height {
        let h = (size as u64 * height as u64 / width.max(1) as u64) as u32;
        (size, h.max(1))
    } else {
        let w = (size as u64 * width as u64 / height.max(1) as u64) as u32;
        (w.max(1), size)
    }
}

/// Resize (bilinear) so the shorter side equals `size`.
pub fn resize_shorter_side(img: &RgbImage, size: u32) -> RgbImage {
    let (w, h) = shorter_side_dims(img.width(), img.height(), size);
    if (w, h) == img.dimensions() {
        return img.clone();
    }
    image::imageops::resize(img, w, h, FilterType::Triangle)
}

/// Load, resize and normalize an image for the feature extractor.
pub fn load_normalized(path: &Path, size: u32) -> Result<FeatureMap, ImageError> {
    let img = load_rgb(path)?;
    Ok(normalize(&resize_shorter_side(&img, size)))
}

/// Encode an image; the format follows the file extension.
pub fn save_rgb(img: &RgbImage, path: &Path) -> Result<(), ImageError> {
    img.save(path).map_err(|source| ImageError::Save {
        path: path.to_path_buf(),
        source,
    })
}
