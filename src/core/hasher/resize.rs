//! SIMD-accelerated grayscale downscaling.
//!
//! All hashing operates on small grayscale buffers; fast_image_resize is
//! 5-14x faster than the image crate's resize and picks AVX2/NEON
//! automatically.

use fast_image_resize::{images::Image, PixelType, ResizeOptions, Resizer};
use image::{GrayImage, ImageBuffer, Luma};

/// Downscale `gray` to exactly `width` x `height`.
///
/// Errors carry no path; callers attach the file they were processing.
pub fn downscale_gray(gray: &GrayImage, width: u32, height: u32) -> Result<GrayImage, String> {
    let src_width = gray.width();
    let src_height = gray.height();
    if src_width == 0 || src_height == 0 {
        return Err("source image has zero dimension".to_string());
    }
    if width == 0 || height == 0 {
        return Err("target dimensions must be positive".to_string());
    }

    let src = Image::from_vec_u8(src_width, src_height, gray.as_raw().clone(), PixelType::U8)
        .map_err(|e| format!("building resize source failed: {}", e))?;
    let mut dst = Image::new(width, height, PixelType::U8);

    // Bilinear is plenty for hashing input and cheaper than Lanczos
    let options = ResizeOptions::new().resize_alg(fast_image_resize::ResizeAlg::Convolution(
        fast_image_resize::FilterType::Bilinear,
    ));

    Resizer::new()
        .resize(&src, &mut dst, &options)
        .map_err(|e| format!("resize failed: {}", e))?;

    let buffer: ImageBuffer<Luma<u8>, Vec<u8>> =
        ImageBuffer::from_raw(width, height, dst.into_vec())
            .ok_or_else(|| "resize output buffer mismatch".to_string())?;
    Ok(buffer)
}

/// Downscale so the longer side is at most `max_edge`, preserving aspect
/// ratio. Images already small enough are returned unchanged.
pub fn bound_longest_edge(gray: GrayImage, max_edge: u32) -> Result<GrayImage, String> {
    let (w, h) = gray.dimensions();
    let longest = w.max(h);
    if longest <= max_edge {
        return Ok(gray);
    }

    let scale = max_edge as f64 / longest as f64;
    let new_w = ((w as f64 * scale).round() as u32).max(1);
    let new_h = ((h as f64 * scale).round() as u32).max(1);
    downscale_gray(&gray, new_w, new_h)
}
