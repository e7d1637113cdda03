//! Average Hash (aHash): mean-threshold over an 8x8 grid.
//!
//! The fastest of the three hashes and the least robust; its wider
//! default near-dupe threshold accounts for that.

use super::super::resize::downscale_gray;
use image::GrayImage;

const GRID: u32 = 8;

/// 64-bit aHash. Bit i (MSB first, row-major) is set when the pixel is
/// brighter than the grid mean.
pub fn average_hash(gray: &GrayImage) -> Result<u64, String> {
    let grid = downscale_gray(gray, GRID, GRID)?;

    let sum: u64 = grid.pixels().map(|p| p[0] as u64).sum();
    let mean = sum / (GRID as u64 * GRID as u64);

    let mut hash = 0u64;
    for (index, pixel) in grid.pixels().enumerate() {
        if pixel[0] as u64 > mean {
            hash |= 1 << (63 - index);
        }
    }
    Ok(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(value: u8) -> GrayImage {
        GrayImage::from_pixel(64, 64, image::Luma([value]))
    }

    fn half_split() -> GrayImage {
        GrayImage::from_fn(64, 64, |x, _| {
            image::Luma(if x < 32 { [20u8] } else { [220u8] })
        })
    }

    #[test]
    fn solid_image_hashes_to_zero() {
        // No pixel exceeds the mean of a flat image
        assert_eq!(average_hash(&solid(128)).unwrap(), 0);
    }

    #[test]
    fn hash_is_deterministic() {
        let image = half_split();
        assert_eq!(
            average_hash(&image).unwrap(),
            average_hash(&image).unwrap()
        );
    }

    #[test]
    fn split_image_sets_half_the_bits() {
        let hash = average_hash(&half_split()).unwrap();
        assert_eq!(hash.count_ones(), 32);
    }

    #[test]
    fn opposite_splits_differ_maximally() {
        let left_bright = GrayImage::from_fn(64, 64, |x, _| {
            image::Luma(if x < 32 { [220u8] } else { [20u8] })
        });
        let a = average_hash(&half_split()).unwrap();
        let b = average_hash(&left_bright).unwrap();
        assert_eq!((a ^ b).count_ones(), 64);
    }
}
