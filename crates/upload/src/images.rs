//! Image variant generation.
//!
//! Blocking adapter boundary: decoding and re-encoding run on the
//! blocking pool so they never stall the I/O loop. Three WEBP variants
//! (original, full, preview) share one AES key and one nonce downstream.

use image::{ImageFormat, imageops::FilterType};

use crate::{Result, UploadError};

/// Longest edge of the `full` variant.
const FULL_MAX_EDGE: u32 = 1600;
/// Longest edge of the `preview` variant.
const PREVIEW_MAX_EDGE: u32 = 320;

#[derive(Debug)]
pub struct ImageVariants {
    pub original: Vec<u8>,
    pub full: Vec<u8>,
    pub preview: Vec<u8>,
}

/// Decode the upload and produce the three WEBP variants.
pub async fn generate_variants(bytes: Vec<u8>) -> Result<ImageVariants> {
    tokio::task::spawn_blocking(move || -> Result<ImageVariants> {
        let decoded = image::load_from_memory(&bytes)
            .map_err(|e| UploadError::ImageProcessing(e.to_string()))?;

        let original = encode_webp(&decoded)?;
        let full = encode_webp(&resize_down(&decoded, FULL_MAX_EDGE))?;
        let preview = encode_webp(&resize_down(&decoded, PREVIEW_MAX_EDGE))?;

        Ok(ImageVariants {
            original,
            full,
            preview,
        })
    })
    .await
    .map_err(|e| UploadError::ImageProcessing(e.to_string()))?
}

fn resize_down(img: &image::DynamicImage, max_edge: u32) -> image::DynamicImage {
    if img.width() <= max_edge && img.height() <= max_edge {
        return img.clone();
    }
    img.resize(max_edge, max_edge, FilterType::Lanczos3)
}

fn encode_webp(img: &image::DynamicImage) -> Result<Vec<u8>> {
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::WebP)
        .map_err(|e| UploadError::ImageProcessing(e.to_string()))?;
    Ok(out.into_inner())
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn sample_png(width: u32, height: u32) -> Vec<u8> {
        let img = image::DynamicImage::new_rgb8(width, height);
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[tokio::test]
    async fn produces_three_variants() {
        let variants = generate_variants(sample_png(2000, 1000)).await.unwrap();
        assert!(!variants.original.is_empty());
        assert!(!variants.full.is_empty());
        assert!(!variants.preview.is_empty());

        let full = image::load_from_memory(&variants.full).unwrap();
        assert!(full.width() <= FULL_MAX_EDGE && full.height() <= FULL_MAX_EDGE);
        let preview = image::load_from_memory(&variants.preview).unwrap();
        assert!(preview.width() <= PREVIEW_MAX_EDGE && preview.height() <= PREVIEW_MAX_EDGE);
    }

    #[tokio::test]
    async fn small_images_are_not_upscaled() {
        let variants = generate_variants(sample_png(100, 80)).await.unwrap();
        let full = image::load_from_memory(&variants.full).unwrap();
        assert_eq!((full.width(), full.height()), (100, 80));
    }

    #[tokio::test]
    async fn garbage_input_is_rejected() {
        let result = generate_variants(vec![0xFF; 64]).await;
        assert!(matches!(result, Err(UploadError::ImageProcessing(_))));
    }
}
