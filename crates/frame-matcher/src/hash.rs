//! Perceptual difference hash (dHash).
//!
//! An image is reduced to a 9x8 grayscale grid; each of the 64 bits records
//! whether a pixel is brighter than its right-hand neighbor, packed in raster
//! order with the top-left comparison as the most significant bit.

use crate::error::{MatchError, Result};
use crate::types::{ExtractedFrame, FramePosition};
use futures::stream::{self, StreamExt, TryStreamExt};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

const GRID_WIDTH: u32 = 9;
const GRID_HEIGHT: u32 = 8;

/// Width of every fingerprint in bits
pub const HASH_BITS: u32 = 64;

/// A 64-bit difference hash, persisted and logged as 16 hex characters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DHash(pub u64);

impl DHash {
    /// Number of differing bits, in `0..=64`
    pub fn distance(&self, other: &DHash) -> u32 {
        bit_distance(*self, *other)
    }

    pub fn to_hex(&self) -> String {
        format!("{:016x}", self.0)
    }

    pub fn from_hex(hex: &str) -> Result<Self> {
        if hex.len() != 16 {
            return Err(MatchError::Hash(format!(
                "expected 16 hex characters, got {}",
                hex.len()
            )));
        }
        u64::from_str_radix(hex, 16)
            .map(DHash)
            .map_err(|e| MatchError::Hash(format!("invalid hash '{}': {}", hex, e)))
    }
}

impl std::fmt::Display for DHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl std::str::FromStr for DHash {
    type Err = MatchError;

    fn from_str(s: &str) -> Result<Self> {
        DHash::from_hex(s)
    }
}

impl Serialize for DHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for DHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        DHash::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}

/// Fingerprint of one frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameHash {
    pub position: FramePosition,
    pub bits: DHash,
}

/// Population count of `a XOR b`
pub fn bit_distance(a: DHash, b: DHash) -> u32 {
    (a.0 ^ b.0).count_ones()
}

/// `1 - distance / 64`
pub fn similarity(a: DHash, b: DHash) -> f64 {
    similarity_from_distance(bit_distance(a, b))
}

pub fn similarity_from_distance(distance: u32) -> f64 {
    1.0 - f64::from(distance.min(HASH_BITS)) / f64::from(HASH_BITS)
}

/// Hash an encoded image (JPEG or PNG)
pub fn dhash(encoded: &[u8]) -> Result<DHash> {
    let image = image::load_from_memory(encoded)
        .map_err(|e| MatchError::Hash(format!("cannot decode image: {}", e)))?;
    dhash_image(&image)
}

/// Hash an already decoded image
pub fn dhash_image(image: &DynamicImage) -> Result<DHash> {
    if image.width() == 0 || image.height() == 0 {
        return Err(MatchError::Hash("cannot resize an empty image".to_string()));
    }

    let gray = image.to_luma8();
    let grid: GrayImage = if gray.dimensions() == (GRID_WIDTH, GRID_HEIGHT) {
        gray
    } else {
        imageops::resize(&gray, GRID_WIDTH, GRID_HEIGHT, FilterType::Triangle)
    };

    let mut bits = 0u64;
    for y in 0..GRID_HEIGHT {
        for x in 0..GRID_WIDTH - 1 {
            let left = grid.get_pixel(x, y)[0];
            let right = grid.get_pixel(x + 1, y)[0];
            bits <<= 1;
            if left > right {
                bits |= 1;
            }
        }
    }

    Ok(DHash(bits))
}

/// Hash one extracted frame, consuming its image buffer
pub fn hash_frame(frame: ExtractedFrame) -> Result<FrameHash> {
    let bits = dhash(&frame.image)?;
    Ok(FrameHash {
        position: frame.position,
        bits,
    })
}

/// Hash frames on the blocking pool, at most `concurrency` at a time.
///
/// Output order matches input order.
pub async fn hash_batch(frames: Vec<ExtractedFrame>, concurrency: usize) -> Result<Vec<FrameHash>> {
    hash_with(frames, concurrency, hash_frame).await
}

async fn hash_with<F>(frames: Vec<ExtractedFrame>, concurrency: usize, hasher: F) -> Result<Vec<FrameHash>>
where
    F: Fn(ExtractedFrame) -> Result<FrameHash> + Copy + Send + 'static,
{
    stream::iter(frames)
        .map(move |frame| async move {
            tokio::task::spawn_blocking(move || hasher(frame))
                .await
                .map_err(|e| MatchError::Hash(format!("hash worker failed: {}", e)))?
        })
        .buffered(concurrency.max(1))
        .try_collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageOutputFormat, Luma};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn gradient_png(width: u32, height: u32, rising: bool) -> Vec<u8> {
        let img = GrayImage::from_fn(width, height, |x, _| {
            let v = (x * 255 / width.max(1)) as u8;
            Luma([if rising { v } else { 255 - v }])
        });
        let mut buf = Vec::new();
        DynamicImage::ImageLuma8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn test_identical_images_have_zero_distance() {
        let png = gradient_png(64, 48, true);
        let a = dhash(&png).unwrap();
        let b = dhash(&png).unwrap();
        assert_eq!(bit_distance(a, b), 0);
        assert_eq!(similarity(a, b), 1.0);
    }

    #[test]
    fn test_gradient_direction_sets_every_bit() {
        // Brightness falling left to right: every left pixel is brighter
        let falling = dhash(&gradient_png(90, 80, false)).unwrap();
        let rising = dhash(&gradient_png(90, 80, true)).unwrap();
        assert_eq!(falling, DHash(u64::MAX));
        assert_eq!(rising, DHash(0));
        assert_eq!(bit_distance(falling, rising), 64);
        assert_eq!(similarity(falling, rising), 0.0);
    }

    #[test]
    fn test_distance_is_symmetric_and_bounded() {
        let samples = [
            DHash(0),
            DHash(u64::MAX),
            DHash(0x0123_4567_89ab_cdef),
            DHash(0xf0f0_f0f0_0f0f_0f0f),
            DHash(1),
        ];
        for a in samples {
            for b in samples {
                let d = bit_distance(a, b);
                assert!(d <= 64);
                assert_eq!(d, bit_distance(b, a));
                assert_eq!(d == 0, a == b);
            }
        }
    }

    #[test]
    fn test_hex_round_trip() {
        let hash = DHash(0x00ab_0000_ffff_0001);
        assert_eq!(hash.to_hex(), "00ab0000ffff0001");
        assert_eq!(DHash::from_hex(&hash.to_hex()).unwrap(), hash);
        assert_eq!("00ab0000ffff0001".parse::<DHash>().unwrap(), hash);

        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, "\"00ab0000ffff0001\"");
        assert_eq!(serde_json::from_str::<DHash>(&json).unwrap(), hash);
    }

    #[test]
    fn test_rejects_malformed_hex() {
        assert!(DHash::from_hex("abc").is_err());
        assert!(DHash::from_hex("zzzzzzzzzzzzzzzz").is_err());
    }

    #[test]
    fn test_undecodable_bytes_are_hash_errors() {
        let err = dhash(b"definitely not an image").unwrap_err();
        assert!(matches!(err, MatchError::Hash(_)));
    }

    #[tokio::test]
    async fn test_batch_preserves_order() {
        let frames = vec![
            ExtractedFrame::at_frame(0, gradient_png(32, 32, true)),
            ExtractedFrame::at_frame(1, gradient_png(32, 32, false)),
            ExtractedFrame::at_frame(2, gradient_png(32, 32, true)),
        ];
        let hashes = hash_batch(frames, 2).await.unwrap();
        let positions: Vec<_> = hashes.iter().map(|h| h.position).collect();
        assert_eq!(
            positions,
            vec![
                FramePosition::Frame(0),
                FramePosition::Frame(1),
                FramePosition::Frame(2)
            ]
        );
        assert_eq!(hashes[0].bits, DHash(0));
        assert_eq!(hashes[1].bits, DHash(u64::MAX));
    }

    static IN_FLIGHT: AtomicUsize = AtomicUsize::new(0);
    static PEAK: AtomicUsize = AtomicUsize::new(0);

    fn slow_hash(frame: ExtractedFrame) -> Result<FrameHash> {
        let now = IN_FLIGHT.fetch_add(1, Ordering::SeqCst) + 1;
        PEAK.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(std::time::Duration::from_millis(5));
        IN_FLIGHT.fetch_sub(1, Ordering::SeqCst);
        Ok(FrameHash {
            position: frame.position,
            bits: DHash(frame.image.len() as u64),
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_batch_never_exceeds_concurrency() {
        let frames: Vec<ExtractedFrame> = (0..40u64)
            .map(|i| ExtractedFrame::at_frame(i, vec![0u8; i as usize]))
            .collect();

        let hashes = hash_with(frames, 3, slow_hash).await.unwrap();
        assert_eq!(hashes.len(), 40);
        for (i, hash) in hashes.iter().enumerate() {
            assert_eq!(hash.position, FramePosition::Frame(i as u64));
            assert_eq!(hash.bits, DHash(i as u64));
        }
        let peak = PEAK.load(Ordering::SeqCst);
        assert!(peak >= 1 && peak <= 3, "peak {}", peak);
    }
}
