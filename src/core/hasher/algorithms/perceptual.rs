//! Perceptual Hash (pHash): DCT low-frequency signature.
//!
//! Resize to 32x32, run a 2D type-II DCT, keep the top-left 8x8
//! low-frequency block, and threshold each coefficient against the
//! median of the block (the DC term is excluded from the median so a
//! bright image does not drown the structure bits). Robust to scaling,
//! recompression, and mild brightness shifts.

use super::super::resize::downscale_gray;
use image::GrayImage;

const INPUT: usize = 32;
const BLOCK: usize = 8;

/// 64-bit pHash. Bit i (MSB first, row-major over the 8x8 block) is set
/// when the coefficient exceeds the block median.
pub fn perceptual_hash(gray: &GrayImage) -> Result<u64, String> {
    let grid = downscale_gray(gray, INPUT as u32, INPUT as u32)?;

    let mut samples = [0.0f64; INPUT * INPUT];
    for (index, pixel) in grid.pixels().enumerate() {
        samples[index] = pixel[0] as f64;
    }

    let spectrum = dct2d(&samples);

    // Top-left 8x8 block holds the low-frequency structure
    let mut block = [0.0f64; BLOCK * BLOCK];
    for y in 0..BLOCK {
        for x in 0..BLOCK {
            block[y * BLOCK + x] = spectrum[y * INPUT + x];
        }
    }

    // Median over everything except the DC coefficient
    let mut sorted: Vec<f64> = block[1..].to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let median = sorted[sorted.len() / 2];

    let mut hash = 0u64;
    for (index, &coefficient) in block.iter().enumerate() {
        if coefficient > median {
            hash |= 1 << (63 - index);
        }
    }
    Ok(hash)
}

/// Separable orthonormal 2D DCT-II over a 32x32 block.
fn dct2d(input: &[f64; INPUT * INPUT]) -> [f64; INPUT * INPUT] {
    let table = cosine_table();

    // Rows
    let mut rows = [0.0f64; INPUT * INPUT];
    for y in 0..INPUT {
        for k in 0..INPUT {
            let mut sum = 0.0;
            for n in 0..INPUT {
                sum += input[y * INPUT + n] * table[k][n];
            }
            rows[y * INPUT + k] = scale(k) * sum;
        }
    }

    // Columns
    let mut output = [0.0f64; INPUT * INPUT];
    for x in 0..INPUT {
        for k in 0..INPUT {
            let mut sum = 0.0;
            for n in 0..INPUT {
                sum += rows[n * INPUT + x] * table[k][n];
            }
            output[k * INPUT + x] = scale(k) * sum;
        }
    }

    output
}

fn scale(k: usize) -> f64 {
    if k == 0 {
        (1.0 / INPUT as f64).sqrt()
    } else {
        (2.0 / INPUT as f64).sqrt()
    }
}

fn cosine_table() -> [[f64; INPUT]; INPUT] {
    let mut table = [[0.0f64; INPUT]; INPUT];
    for (k, row) in table.iter_mut().enumerate() {
        for (n, cell) in row.iter_mut().enumerate() {
            *cell = (std::f64::consts::PI / INPUT as f64 * (n as f64 + 0.5) * k as f64).cos();
        }
    }
    table
}
