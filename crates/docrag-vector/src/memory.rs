use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;

use docrag_core::traits::{Embedder, VectorStore};
use docrag_core::types::{Chunk, ScoredChunk};

/// Brute-force cosine store kept in process memory. Nothing is persisted.
pub struct MemoryVectorStore {
	name: String,
	embedder: Arc<dyn Embedder>,
	rows: RwLock<Vec<(Chunk, Vec<f32>)>>,
}

impl MemoryVectorStore {
	pub fn new(name: impl Into<String>, embedder: Arc<dyn Embedder>) -> Self {
		Self { name: name.into(), embedder, rows: RwLock::new(Vec::new()) }
	}
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
	let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
	let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
	let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
	if na == 0.0 || nb == 0.0 { 0.0 } else { dot / (na * nb) }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
	fn collection_name(&self) -> &str { &self.name }

	async fn add(&self, chunks: &[Chunk]) -> Result<usize> {
		if chunks.is_empty() {
			return Ok(0);
		}
		let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
		let vectors = self.embedder.embed_documents(&texts).await?;
		if vectors.len() != chunks.len() {
			bail!("embedder returned {} vectors for {} chunks", vectors.len(), chunks.len());
		}
		self.rows.write().extend(chunks.iter().cloned().zip(vectors));
		Ok(chunks.len())
	}

	async fn similarity_search_with_score(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
		if k == 0 || self.rows.read().is_empty() {
			return Ok(Vec::new());
		}
		let q = self.embedder.embed_query(query).await?;
		let rows = self.rows.read();
		let mut scored: Vec<(usize, f32)> = rows.iter().enumerate().map(|(i, (_, v))| (i, cosine(&q, v))).collect();
		scored.sort_by(|a, b| b.1.total_cmp(&a.1));
		scored.truncate(k);
		Ok(scored.into_iter().map(|(i, score)| ScoredChunk::new(rows[i].0.clone(), score)).collect())
	}

	async fn delete_collection(&self) -> Result<()> {
		self.rows.write().clear();
		Ok(())
	}

	async fn count(&self) -> Result<usize> { Ok(self.rows.read().len()) }

	async fn snapshot(&self, limit: usize) -> Result<Vec<Chunk>> {
		Ok(self.rows.read().iter().take(limit).map(|(c, _)| c.clone()).collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn cosine_handles_zero_vectors() {
		assert_eq!(cosine(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
		assert!((cosine(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
		assert!(cosine(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
	}
}
