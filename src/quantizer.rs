//! Deterministic projection of a vector to a short hex path prefix.
//!
//! Given `v` and the collection's projection matrix `P` (shape `d x 8`), we
//! compute `sign(v . P)` four times, once per quantization segment, each
//! time reading `P` through a different deterministic row offset — not four
//! disjoint column blocks, but the same eight hyperplanes reused against a
//! rotated view of `v`'s components. That gives four 2-hex-char segments
//! from a single `d x 8` matrix. Used as a 4-deep directory hierarchy so no
//! directory holds more than a few hundred files at repo scale, while the
//! record filename stays a fixed 28 characters regardless of how long the
//! caller's id is.

use sha2::{Digest, Sha256};

/// `vector_size x 8`. Generated once per collection and persisted; never
/// regenerated.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionMatrix {
    pub vector_size: usize,
    /// Row-major, shape `vector_size x 8`.
    pub data: Vec<f32>,
}

const SEGMENTS: usize = 4;
const BITS_PER_SEGMENT: usize = 8;
const COLS: usize = BITS_PER_SEGMENT;

impl ProjectionMatrix {
    /// Generate a fresh random matrix for a collection of the given
    /// dimension, seeded deterministically so tests are reproducible; real
    /// collections seed from system entropy via [`ProjectionMatrix::random`].
    pub fn from_seed(vector_size: usize, seed: u64) -> Self {
        use rand::{Rng, SeedableRng};
        use rand_chacha::ChaCha8Rng;

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let data = (0..vector_size * COLS)
            .map(|_| rng.gen_range(-1.0f32..=1.0f32))
            .collect();
        Self { vector_size, data }
    }

    pub fn random(vector_size: usize) -> Self {
        Self::from_seed(vector_size, rand::random())
    }

    fn column(&self, row: usize, col: usize) -> f32 {
        self.data[row * COLS + col]
    }

    /// Four signed-projection segments, one per quantization level. Each
    /// segment reuses the same eight columns of `P` but offsets which row
    /// of `P` pairs with which component of `vector`, so the four segments
    /// come out decorrelated without needing four separate matrices.
    fn segments(&self, vector: &[f32]) -> [u8; SEGMENTS] {
        if self.vector_size == 0 {
            return [0u8; SEGMENTS];
        }
        let row_shift = (self.vector_size / SEGMENTS).max(1);
        let mut out = [0u8; SEGMENTS];
        for (seg_idx, seg) in out.iter_mut().enumerate() {
            let mut bits = 0u8;
            for bit in 0..BITS_PER_SEGMENT {
                let mut dot = 0.0f32;
                for (row, &component) in vector.iter().enumerate() {
                    let shifted_row = (row + seg_idx * row_shift) % self.vector_size;
                    dot += component * self.column(shifted_row, bit);
                }
                if dot >= 0.0 {
                    bits |= 1 << bit;
                }
            }
            *seg = bits;
        }
        out
    }
}

/// Pure, deterministic path computation: `[seg1, seg2, seg3, seg4]` as
/// two-hex-char strings, to be joined as nested directory names.
pub fn quantized_path(matrix: &ProjectionMatrix, vector: &[f32]) -> [String; SEGMENTS] {
    let segments = matrix.segments(vector);
    segments.map(|byte| format!("{byte:02x}"))
}

/// 16 hex chars of SHA-256(id) — the fixed-length filename component that
/// keeps `vector_<idhash>.json` at 28 characters regardless of id length.
pub fn id_hash(id: &str) -> String {
    let digest = Sha256::digest(id.as_bytes());
    hex::encode(&digest[..8])
}

pub fn record_filename(id: &str) -> String {
    format!("vector_{}.json", id_hash(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantization_is_deterministic() {
        let matrix = ProjectionMatrix::from_seed(4, 42);
        let v = vec![1.0, 0.5, -0.2, 0.1];
        let a = quantized_path(&matrix, &v);
        let b = quantized_path(&matrix, &v);
        assert_eq!(a, b);
    }

    #[test]
    fn quantization_depends_only_on_matrix_and_vector() {
        let matrix_a = ProjectionMatrix::from_seed(4, 1);
        let matrix_b = ProjectionMatrix::from_seed(4, 2);
        let v = vec![1.0, 1.0, 1.0, 1.0];
        assert_ne!(quantized_path(&matrix_a, &v), quantized_path(&matrix_b, &v));
    }

    #[test]
    fn filename_is_28_chars() {
        let name = record_filename("some/very/long/id-with-a-commit-hash-1234567890abcdef");
        assert_eq!(name.len(), 28);
    }

    #[test]
    fn id_hash_stable() {
        assert_eq!(id_hash("a"), id_hash("a"));
        assert_ne!(id_hash("a"), id_hash("b"));
    }

    #[test]
    fn segments_are_two_hex_chars_each() {
        let matrix = ProjectionMatrix::from_seed(8, 7);
        let segs = quantized_path(&matrix, &[0.1; 8]);
        for seg in segs {
            assert_eq!(seg.len(), 2);
            assert!(seg.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }
}
