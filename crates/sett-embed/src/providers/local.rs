//! Local embedder for offline semantic search
//!
//! Hashes identifier sub-tokens into a fixed number of buckets. Texts that
//! share vocabulary end up close under cosine similarity; nothing leaves the
//! process.

use async_trait::async_trait;
use sett_core::{EmbedError, Embedder};
use sha2::{Digest, Sha256};

pub struct LocalEmbedder {
    dimensions: usize,
}

impl LocalEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    /// Synchronous core of [`Embedder::embed`].
    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut out = vec![0.0f32; self.dimensions];
        for token in tokens(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let slot = (u64::from_le_bytes(bucket) % self.dimensions as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            out[slot] += sign;
        }
        let norm = out.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut out {
                *x /= norm;
            }
        }
        out
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        Ok(self.vector(text))
    }
}

/// Lowercased words, with `snake_case` and `camelCase` identifiers split
/// into their parts as well.
fn tokens(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for word in text.split(|c: char| !c.is_alphanumeric() && c != '_') {
        if word.is_empty() {
            continue;
        }
        let lower = word.to_lowercase();
        let mut parts = Vec::new();
        for piece in word.split('_').filter(|p| !p.is_empty()) {
            let mut current = String::new();
            let mut prev_lower = false;
            for ch in piece.chars() {
                if ch.is_uppercase() && prev_lower && !current.is_empty() {
                    parts.push(std::mem::take(&mut current).to_lowercase());
                }
                prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
                current.push(ch);
            }
            if !current.is_empty() {
                parts.push(current.to_lowercase());
            }
        }
        if parts.len() > 1 {
            out.extend(parts);
        }
        out.push(lower);
    }
    out
}
