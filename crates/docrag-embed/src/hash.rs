use anyhow::Result;
use async_trait::async_trait;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use twox_hash::XxHash64;

use docrag_core::traits::{Embedder, EmbedderStats};

/// Deterministic bag-of-words embedder for offline runs and tests.
///
/// Each lowercased alphanumeric token is hashed into one dimension, so texts
/// sharing vocabulary land close together under cosine similarity.
pub struct HashEmbedder { dim: usize, requests: AtomicU64, tokens: AtomicU64 }

impl HashEmbedder {
    pub fn new(dim: usize) -> Self { Self { dim: dim.max(1), requests: AtomicU64::new(0), tokens: AtomicU64::new(0) } }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        let words = text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty());
        for (i, word) in words.enumerate() {
            let mut hasher = XxHash64::with_seed(0);
            word.to_lowercase().hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h % self.dim as u64) as usize;
            let val = ((h >> 32) as u32) as f32 / u32::MAX as f32;
            v[idx] += 0.5 + val * 0.5 + (i % 3) as f32 * 0.01;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
        for x in &mut v { *x /= norm; }
        v
    }

    fn count(&self, texts: usize, words: usize) {
        self.requests.fetch_add(texts.min(1) as u64, Ordering::Relaxed);
        self.tokens.fetch_add(words as u64, Ordering::Relaxed);
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dim(&self) -> usize { self.dim }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.count(1, text.split_whitespace().count());
        Ok(self.embed_text(text))
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.count(texts.len(), texts.iter().map(|t| t.split_whitespace().count()).sum());
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn stats(&self) -> EmbedderStats {
        EmbedderStats {
            model: "hash".to_string(),
            total_requests: self.requests.load(Ordering::Relaxed),
            total_tokens_embedded: self.tokens.load(Ordering::Relaxed),
            dimensions: self.dim,
        }
    }
}
