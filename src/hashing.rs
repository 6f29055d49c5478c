use image::DynamicImage;
use image_hasher::{HashAlg, HasherConfig};

use crate::error::{GuardError, Result};
use crate::fingerprint::Fingerprint;

/// Hash grid edge; 8x8 gives 64-bit fingerprints.
const HASH_SIZE: u32 = 8;

/// The two fingerprints derived from one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHashes {
    pub phash: Fingerprint,
    pub dhash: Fingerprint,
}

/// Derives a DCT hash (phash) and a gradient hash (dhash) from encoded image bytes.
///
/// Pure: no state beyond the fixed configuration, so it is `Copy` and can be moved
/// onto a blocking thread freely.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashComputer;

impl HashComputer {
    pub fn new() -> Self {
        Self
    }

    /// Decode (PNG/JPEG/WebP/GIF, first frame) into RGB and hash.
    pub fn compute(&self, bytes: &[u8]) -> Result<ImageHashes> {
        if bytes.is_empty() {
            return Err(GuardError::Decode("empty input".into()));
        }
        let img = image::load_from_memory(bytes)?;
        let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
        self.compute_decoded(&rgb)
    }

    pub fn compute_decoded(&self, img: &DynamicImage) -> Result<ImageHashes> {
        // DCT on a 16x16 downscale, keep the low 8x8 band, threshold at its median.
        let phasher = HasherConfig::new()
            .hash_alg(HashAlg::Median)
            .preproc_dct()
            .hash_size(HASH_SIZE, HASH_SIZE)
            .to_hasher();
        // Sign of horizontal neighbour differences on a 9x8 downscale.
        let dhasher = HasherConfig::new()
            .hash_alg(HashAlg::Gradient)
            .hash_size(HASH_SIZE, HASH_SIZE)
            .to_hasher();

        let phash = Fingerprint::from_hash_bytes(phasher.hash_image(img).as_bytes())?;
        let dhash = Fingerprint::from_hash_bytes(dhasher.hash_image(img).as_bytes())?;
        Ok(ImageHashes { phash, dhash })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::jpeg::JpegEncoder;
    use image::{ImageBuffer, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn gradient(w: u32, h: u32) -> RgbImage {
        ImageBuffer::from_fn(w, h, |x, y| {
            let r = (x * 255 / w) as u8;
            let g = (y * 255 / h) as u8;
            Rgb([r, g, 128])
        })
    }

    /// Smooth pseudo-random artwork: a 6x5 grid of random colours, bilinearly blended.
    fn painting(seed: u64, w: u32, h: u32) -> RgbImage {
        let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
        let mut nodes = [[0f32; 3]; 30];
        for node in nodes.iter_mut() {
            for c in node.iter_mut() {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                *c = (state >> 56) as f32;
            }
        }
        ImageBuffer::from_fn(w, h, |x, y| {
            let fx = x as f32 * 5.0 / (w - 1) as f32;
            let fy = y as f32 * 4.0 / (h - 1) as f32;
            let (gx, gy) = ((fx as usize).min(4), (fy as usize).min(3));
            let (tx, ty) = (fx - gx as f32, fy - gy as f32);
            let at = |i: usize, j: usize, c: usize| nodes[j * 6 + i][c];
            let mut px = [0u8; 3];
            for (c, p) in px.iter_mut().enumerate() {
                let top = at(gx, gy, c) * (1.0 - tx) + at(gx + 1, gy, c) * tx;
                let bottom = at(gx, gy + 1, c) * (1.0 - tx) + at(gx + 1, gy + 1, c) * tx;
                *p = (top * (1.0 - ty) + bottom * ty).round() as u8;
            }
            Rgb(px)
        })
    }

    fn png(img: &RgbImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn jpeg(img: &RgbImage, quality: u8) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img.clone())
            .write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))
            .unwrap();
        buf.into_inner()
    }

    #[test]
    fn same_bytes_same_hashes() {
        let bytes = png(&gradient(200, 150));
        let hc = HashComputer::new();
        assert_eq!(hc.compute(&bytes).unwrap(), hc.compute(&bytes).unwrap());
    }

    #[test]
    fn stable_across_lossless_reencode() {
        let bytes = png(&gradient(200, 150));
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgb8();

        let hc = HashComputer::new();
        assert_eq!(hc.compute(&bytes).unwrap(), hc.compute(&png(&decoded)).unwrap());
    }

    #[test]
    fn jpeg_copy_stays_close() {
        let art = painting(7, 200, 150);
        let hc = HashComputer::new();
        let a = hc.compute(&png(&art)).unwrap();
        let b = hc.compute(&jpeg(&art, 92)).unwrap();
        assert!(a.phash.distance(b.phash) <= 8, "phash moved {}", a.phash.distance(b.phash));
    }

    #[test]
    fn distinct_artworks_have_distant_phashes() {
        let hc = HashComputer::new();
        let hashes: Vec<ImageHashes> = (1..=6u64).map(|s| hc.compute(&png(&painting(s, 200, 150))).unwrap()).collect();
        for (i, a) in hashes.iter().enumerate() {
            for b in &hashes[i + 1..] {
                let d = a.phash.distance(b.phash);
                assert!(d > 8, "{} vs {} only {d} bits apart", a.phash, b.phash);
            }
        }
    }

    #[test]
    fn phash_uses_the_whole_word() {
        // A median threshold sets roughly half the bits, not just the top byte.
        let h = HashComputer::new().compute(&png(&painting(3, 200, 150))).unwrap();
        let ones = h.phash.bits().count_ones();
        assert!((16..=48).contains(&ones), "{} has {ones} bits set", h.phash);
        assert_ne!(h.phash.bits() & 0x00FF_FFFF_FFFF_FFFF, 0);
    }

    #[test]
    fn mirrored_image_is_far_apart() {
        let img = gradient(256, 256);
        let mirrored = image::imageops::flip_horizontal(&img);
        let hc = HashComputer::new();
        let a = hc.compute(&png(&img)).unwrap();
        let b = hc.compute(&png(&mirrored)).unwrap();
        assert!(a.dhash.distance(b.dhash) > 10);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let hc = HashComputer::new();
        assert!(matches!(hc.compute(b"not an image"), Err(GuardError::Decode(_))));
        assert!(matches!(hc.compute(&[]), Err(GuardError::Decode(_))));
    }
}
