//! Difference Hash (dHash): horizontal brightness gradients.
//!
//! Resize to 9x8, compare each pixel against its right neighbor. The
//! extra column yields exactly 64 comparisons.

use super::super::resize::downscale_gray;
use image::GrayImage;

const ROWS: u32 = 8;
const COLS: u32 = 9;

/// 64-bit dHash. Bit i (MSB first, row-major) is set when the left pixel
/// is brighter than its right neighbor.
pub fn difference_hash(gray: &GrayImage) -> Result<u64, String> {
    let grid = downscale_gray(gray, COLS, ROWS)?;

    let mut hash = 0u64;
    let mut index = 0;
    for y in 0..ROWS {
        for x in 0..COLS - 1 {
            let left = grid.get_pixel(x, y)[0];
            let right = grid.get_pixel(x + 1, y)[0];
            if left > right {
                hash |= 1 << (63 - index);
            }
            index += 1;
        }
    }
    Ok(hash)
}
