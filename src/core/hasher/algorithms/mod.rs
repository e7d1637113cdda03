//! The three 64-bit perceptual hash algorithms.

mod average;
mod difference;
mod perceptual;

pub use average::average_hash;
pub use difference::difference_hash;
pub use perceptual::perceptual_hash;
