//! Deterministic hash-based embeddings.
//!
//! Each text's SHA-256 digest seeds a small PRNG that expands to the
//! configured dimensions, L2-normalized. The same text always maps to the
//! same vector, which makes pipelines testable offline; similarity scores
//! are meaningless beyond exact matches.

use sha2::{Digest, Sha256};

use crate::error::AppError;

pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let digest = Sha256::digest(text.as_bytes());
        let mut seed = u64::from_le_bytes(digest[..8].try_into().unwrap_or([1; 8]));
        if seed == 0 {
            seed = 0x9e37_79b9_7f4a_7c15;
        }

        let mut vector: Vec<f32> = (0..self.dimensions)
            .map(|_| {
                seed = xorshift(seed);
                // Map the high 32 bits onto [-1, 1].
                ((seed >> 32) as f64 / u32::MAX as f64 * 2.0 - 1.0) as f32
            })
            .collect();

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

fn xorshift(mut x: u64) -> u64 {
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_text_same_vector() {
        let e = HashEmbedder::new(16);
        let a = e.embed(&["hello".to_string()]).await.expect("embed");
        let b = e.embed(&["hello".to_string()]).await.expect("embed");
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn different_texts_differ() {
        let e = HashEmbedder::new(16);
        let out = e
            .embed(&["hello".to_string(), "world".to_string()])
            .await
            .expect("embed");
        assert_ne!(out[0], out[1]);
    }

    #[tokio::test]
    async fn vectors_are_unit_length() {
        let e = HashEmbedder::new(32);
        let out = e.embed(&["some text".to_string()]).await.expect("embed");
        let norm: f32 = out[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_eq!(out[0].len(), 32);
    }
}
