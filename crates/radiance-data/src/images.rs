//! Training image decoding

use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::{DynamicImage, RgbaImage};
use radiance_train::TargetImage;
use std::path::Path;

/// Decode an image file into a square target at `resolution`.
pub fn load_target(path: &Path, resolution: usize) -> Result<TargetImage> {
    let decoded = image::open(path)
        .with_context(|| format!("Failed to decode image {}", path.display()))?;
    target_from_image(&decoded, resolution)
}

/// Resize to `resolution`×`resolution` and normalize channels to [-1, 1].
///
/// Non-square sources are stretched; RGB sources get an opaque alpha channel.
pub fn target_from_image(image: &DynamicImage, resolution: usize) -> Result<TargetImage> {
    let side = u32::try_from(resolution)
        .ok()
        .filter(|&s| s > 0)
        .with_context(|| format!("Invalid target resolution {}", resolution))?;

    let rgba: RgbaImage = if image.width() == side && image.height() == side {
        image.to_rgba8()
    } else {
        image.resize_exact(side, side, FilterType::Triangle).to_rgba8()
    };

    Ok(TargetImage::from_rgba8(resolution, rgba.as_raw())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::{Rgb, RgbImage, Rgba};

    #[test]
    fn test_exact_size_is_untouched() {
        let mut img = RgbaImage::from_pixel(2, 2, Rgba([0, 255, 0, 255]));
        img.put_pixel(1, 0, Rgba([255, 0, 0, 0]));
        let target = target_from_image(&DynamicImage::ImageRgba8(img), 2).unwrap();

        assert_eq!(target.resolution(), 2);
        let data = target.as_slice();
        assert_eq!(&data[0..4], &[-1.0, 1.0, -1.0, 1.0]);
        // pixel (row 0, col 1)
        assert_eq!(&data[4..8], &[1.0, -1.0, -1.0, -1.0]);
    }

    #[test]
    fn test_resize_and_alpha() {
        let img = RgbImage::from_pixel(16, 8, Rgb([51, 102, 153]));
        let target = target_from_image(&DynamicImage::ImageRgb8(img), 4).unwrap();

        assert_eq!(target.as_slice().len(), 4 * 4 * 4);
        for px in target.as_slice().chunks(4) {
            assert_relative_eq!(px[0], 51.0 * 2.0 / 255.0 - 1.0, epsilon = 1e-6);
            assert_relative_eq!(px[2], 153.0 * 2.0 / 255.0 - 1.0, epsilon = 1e-6);
            assert_eq!(px[3], 1.0);
        }
    }

    #[test]
    fn test_zero_resolution_rejected() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(2, 2));
        assert!(target_from_image(&img, 0).is_err());
    }

    #[test]
    fn test_load_png() {
        let dir = std::env::temp_dir().join(format!("radiance_images_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("flat.png");
        RgbaImage::from_pixel(8, 8, Rgba([255, 255, 255, 255]))
            .save(&path)
            .unwrap();

        let target = load_target(&path, 4).unwrap();
        assert!(target.as_slice().iter().all(|&v| v == 1.0));
        assert!(load_target(&dir.join("missing.png"), 4).is_err());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
