//! # Hasher Module
//!
//! Computes the three 64-bit perceptual hashes used for near-duplicate
//! detection.
//!
//! ## Algorithms
//! - **pHash** - DCT low-frequency signature, most robust to edits
//! - **dHash** - horizontal brightness gradients, speed/accuracy balance
//! - **aHash** - mean threshold, fastest
//!
//! All three are computed from one bounded grayscale decode of the file
//! (see [`decode`]); comparison is Hamming distance over the 64 bits.

mod algorithms;
pub mod decode;
mod resize;

pub use algorithms::{average_hash, difference_hash, perceptual_hash};
pub use decode::{decode_bounded, DecodedImage};
pub use resize::{bound_longest_edge, downscale_gray};

use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Which hash algorithm a value or index belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashKind {
    Perceptual,
    Difference,
    Average,
}

impl HashKind {
    pub const ALL: [HashKind; 3] = [HashKind::Perceptual, HashKind::Difference, HashKind::Average];

    pub fn as_str(&self) -> &'static str {
        match self {
            HashKind::Perceptual => "phash",
            HashKind::Difference => "dhash",
            HashKind::Average => "ahash",
        }
    }
}

impl std::fmt::Display for HashKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The full set of perceptual hashes for one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerceptualHashes {
    pub phash: u64,
    pub dhash: u64,
    pub ahash: u64,
}

impl PerceptualHashes {
    pub fn get(&self, kind: HashKind) -> u64 {
        match kind {
            HashKind::Perceptual => self.phash,
            HashKind::Difference => self.dhash,
            HashKind::Average => self.ahash,
        }
    }
}

/// Compute all three hashes from one decoded grayscale buffer.
pub fn compute_hashes(gray: &GrayImage) -> Result<PerceptualHashes, String> {
    Ok(PerceptualHashes {
        phash: perceptual_hash(gray)?,
        dhash: difference_hash(gray)?,
        ahash: average_hash(gray)?,
    })
}

/// Hamming distance between two 64-bit hashes: popcount of the XOR.
pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hamming_distance_of_equal_hashes_is_zero() {
        assert_eq!(hamming_distance(0xDEAD_BEEF, 0xDEAD_BEEF), 0);
    }

    #[test]
    fn hamming_distance_counts_bits() {
        assert_eq!(hamming_distance(0b1111, 0b0000), 4);
        assert_eq!(hamming_distance(u64::MAX, 0), 64);
    }

    #[test]
    fn hamming_distance_is_symmetric() {
        assert_eq!(
            hamming_distance(0x1234, 0xABCD),
            hamming_distance(0xABCD, 0x1234)
        );
    }

    #[test]
    fn compute_hashes_fills_all_kinds() {
        let gray = GrayImage::from_fn(64, 64, |x, y| image::Luma([((x * y) % 256) as u8]));
        let hashes = compute_hashes(&gray).unwrap();
        for kind in HashKind::ALL {
            // Deterministic per kind
            assert_eq!(hashes.get(kind), compute_hashes(&gray).unwrap().get(kind));
        }
    }
}
