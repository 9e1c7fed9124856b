//! Perceptual image hashing for near-duplicate detection.
//!
//! The hash is the classic 8x8 DCT fingerprint: reduce to 32x32 grayscale,
//! take the 2D DCT, keep the 8x8 low-frequency block (dropping the DC
//! term), and set one bit per coefficient above the block's median energy.

use image::DynamicImage;

use crate::error::{CoreError, Result};

const REDUCED: usize = 32;
const BLOCK: usize = 8;

/// Similarity at or above which two images count as near-duplicates.
pub const NEAR_DUPLICATE_THRESHOLD: f64 = 0.9;

/// Compute the 64-bit perceptual hash of encoded image bytes.
pub fn hash_bytes(bytes: &[u8]) -> Result<u64> {
    let img = image::load_from_memory(bytes)
        .map_err(|err| CoreError::provider_invalid(format!("undecodable image: {err}")))?;
    Ok(hash_image(&img))
}

/// Compute the 64-bit perceptual hash of a decoded image.
pub fn hash_image(img: &DynamicImage) -> u64 {
    let gray = img
        .resize_exact(
            REDUCED as u32,
            REDUCED as u32,
            image::imageops::FilterType::Triangle,
        )
        .to_luma8();

    let mut pixels = [[0f64; REDUCED]; REDUCED];
    for (x, y, pixel) in gray.enumerate_pixels() {
        pixels[y as usize][x as usize] = pixel.0[0] as f64;
    }

    let coefficients = dct_2d(&pixels);

    // Low-frequency 8x8 block, skipping the DC coefficient at (0, 0).
    let mut block = Vec::with_capacity(BLOCK * BLOCK - 1);
    for (y, row) in coefficients.iter().take(BLOCK).enumerate() {
        for (x, value) in row.iter().take(BLOCK).enumerate() {
            if x == 0 && y == 0 {
                continue;
            }
            block.push(*value);
        }
    }

    let median = {
        let mut sorted = block.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        sorted[sorted.len() / 2]
    };

    let mut hash = 0u64;
    for (bit, value) in block.iter().enumerate() {
        if *value > median {
            hash |= 1 << bit;
        }
    }
    hash
}

/// Fraction of matching bits between two hashes, in [0, 1].
pub fn similarity(a: u64, b: u64) -> f64 {
    let matching = 64 - (a ^ b).count_ones();
    matching as f64 / 64.0
}

/// Whether two hashes are close enough to be the same picture.
pub fn is_near_duplicate(a: u64, b: u64) -> bool {
    similarity(a, b) >= NEAR_DUPLICATE_THRESHOLD
}

fn dct_2d(pixels: &[[f64; REDUCED]; REDUCED]) -> [[f64; REDUCED]; REDUCED] {
    let n = REDUCED as f64;
    let mut rows = [[0f64; REDUCED]; REDUCED];
    for y in 0..REDUCED {
        for u in 0..REDUCED {
            let mut sum = 0f64;
            for x in 0..REDUCED {
                sum += pixels[y][x]
                    * ((std::f64::consts::PI / n) * (x as f64 + 0.5) * u as f64).cos();
            }
            rows[y][u] = sum;
        }
    }
    let mut out = [[0f64; REDUCED]; REDUCED];
    for u in 0..REDUCED {
        for v in 0..REDUCED {
            let mut sum = 0f64;
            for y in 0..REDUCED {
                sum += rows[y][u]
                    * ((std::f64::consts::PI / n) * (y as f64 + 0.5) * v as f64).cos();
            }
            out[v][u] = sum;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn gradient_image(seed: u8) -> DynamicImage {
        let mut img = RgbImage::new(64, 64);
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            let v = ((x * 4) as u8).wrapping_add((y * 2) as u8).wrapping_add(seed);
            *pixel = Rgb([v, v / 2, v / 3]);
        }
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn identical_images_hash_identically() {
        let a = hash_image(&gradient_image(0));
        let b = hash_image(&gradient_image(0));
        assert_eq!(a, b);
        assert_eq!(similarity(a, b), 1.0);
        assert!(is_near_duplicate(a, b));
    }

    #[test]
    fn slightly_altered_images_stay_near_duplicates() {
        let original = gradient_image(0);
        let hash_a = hash_image(&original);
        // A mild resize should not change the fingerprint much.
        let resized = original.resize_exact(48, 48, image::imageops::FilterType::Triangle);
        let hash_b = hash_image(&resized);
        assert!(
            is_near_duplicate(hash_a, hash_b),
            "similarity {}",
            similarity(hash_a, hash_b)
        );
    }

    #[test]
    fn unrelated_patterns_diverge() {
        let mut noise = RgbImage::new(64, 64);
        for (x, y, pixel) in noise.enumerate_pixels_mut() {
            let v = ((x * 37 + y * 91) % 251) as u8;
            *pixel = Rgb([v, v.wrapping_mul(3), v.wrapping_add(89)]);
        }
        let a = hash_image(&gradient_image(0));
        let b = hash_image(&DynamicImage::ImageRgb8(noise));
        assert!(similarity(a, b) < NEAR_DUPLICATE_THRESHOLD);
    }

    #[test]
    fn similarity_counts_matching_bits() {
        assert_eq!(similarity(0, 0), 1.0);
        assert_eq!(similarity(0, u64::MAX), 0.0);
        assert_eq!(similarity(0, 1), 63.0 / 64.0);
    }
}
