use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use docrag_core::config::RagConfig;
use docrag_core::traits::VectorStore;
use docrag_core::types::{Chunk, ScoredChunk};
use docrag_text::KeywordIndex;

/// Rank offset of reciprocal rank fusion.
pub const RRF_K: f32 = 60.0;

/// Upper bound on chunks pulled from the store into the keyword index.
pub const KEYWORD_SNAPSHOT_LIMIT: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrieverSettings {
    pub top_k: usize,
    pub semantic_weight: f32,
    pub keyword_weight: f32,
    pub hybrid: bool,
}

impl RetrieverSettings {
    pub fn from_config(cfg: &RagConfig) -> Self {
        Self {
            top_k: cfg.retriever.top_k,
            semantic_weight: cfg.retriever.semantic_weight,
            keyword_weight: cfg.retriever.keyword_weight,
            hybrid: cfg.enable_hybrid_search,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetrieverStats {
    pub total_documents: usize,
    pub keyword_documents: usize,
    pub collection_name: String,
    pub hybrid_search: bool,
}

/// Vector search plus keyword search, fused by reciprocal rank.
pub struct HybridRetriever {
    store: Arc<dyn VectorStore>,
    keyword: KeywordIndex,
    settings: RetrieverSettings,
    writes: Mutex<()>,
}

impl HybridRetriever {
    pub fn new(store: Arc<dyn VectorStore>, settings: RetrieverSettings) -> Self {
        Self { store, keyword: KeywordIndex::new(), settings, writes: Mutex::new(()) }
    }

    pub fn settings(&self) -> &RetrieverSettings { &self.settings }

    /// Top `k` chunks for `query`; `k` falls back to the configured `top_k`
    /// when absent or zero.
    pub async fn retrieve(&self, query: &str, top_k: Option<usize>) -> Result<Vec<ScoredChunk>> {
        let k = top_k.filter(|k| *k > 0).unwrap_or(self.settings.top_k);
        if !self.settings.hybrid {
            return self.store.similarity_search_with_score(query, k).await;
        }

        let (semantic, keyword) =
            tokio::join!(self.store.similarity_search_with_score(query, k), async { self.keyword.search(query, k) });
        let semantic = semantic?;
        debug!(k, semantic = semantic.len(), keyword = keyword.len(), "hybrid candidates");
        Ok(reciprocal_rank_fusion(
            semantic,
            keyword,
            self.settings.semantic_weight,
            self.settings.keyword_weight,
            k,
        ))
    }

    /// Store chunks, then rebuild the keyword index from the store.
    pub async fn add_chunks(&self, chunks: &[Chunk]) -> Result<usize> {
        let _guard = self.writes.lock().await;
        let added = self.store.add(chunks).await?;
        if let Err(e) = self.refresh_keyword_index().await {
            warn!(error = %format!("{e:#}"), "failed to rebuild keyword index");
        }
        info!(added, collection = self.store.collection_name(), "chunks indexed");
        Ok(added)
    }

    pub async fn rebuild_keyword_index(&self) -> Result<usize> {
        let _guard = self.writes.lock().await;
        self.refresh_keyword_index().await
    }

    async fn refresh_keyword_index(&self) -> Result<usize> {
        let chunks = self.store.snapshot(KEYWORD_SNAPSHOT_LIMIT).await?;
        self.keyword.index(&chunks);
        debug!(documents = chunks.len(), "keyword index rebuilt");
        Ok(chunks.len())
    }

    pub async fn clear(&self) -> Result<()> {
        let _guard = self.writes.lock().await;
        self.store.delete_collection().await?;
        self.keyword.clear();
        info!(collection = self.store.collection_name(), "retriever cleared");
        Ok(())
    }

    pub async fn stats(&self) -> Result<RetrieverStats> {
        Ok(RetrieverStats {
            total_documents: self.store.count().await?,
            keyword_documents: self.keyword.len(),
            collection_name: self.store.collection_name().to_string(),
            hybrid_search: self.settings.hybrid,
        })
    }
}

/// Merge two ranked lists: each hit contributes `weight / (RRF_K + rank + 1)`.
///
/// Chunks are identified by [`Chunk::fusion_key`]. The first occurrence is
/// kept, equal fused scores keep first-seen order, and at most `top_k`
/// results are returned.
pub fn reciprocal_rank_fusion(
    semantic: Vec<ScoredChunk>,
    keyword: Vec<ScoredChunk>,
    semantic_weight: f32,
    keyword_weight: f32,
    top_k: usize,
) -> Vec<ScoredChunk> {
    let mut fused: Vec<ScoredChunk> = Vec::with_capacity(semantic.len() + keyword.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for (hits, weight) in [(semantic, semantic_weight), (keyword, keyword_weight)] {
        for (rank, hit) in hits.into_iter().enumerate() {
            #[allow(clippy::cast_precision_loss)]
            let contribution = weight / (RRF_K + rank as f32 + 1.0);
            let key = hit.chunk.fusion_key().to_string();
            match positions.get(&key) {
                Some(&pos) => fused[pos].score += contribution,
                None => {
                    positions.insert(key, fused.len());
                    fused.push(ScoredChunk::new(hit.chunk, contribution));
                }
            }
        }
    }

    fused.sort_by(|a, b| b.score.total_cmp(&a.score));
    fused.truncate(top_k);
    fused
}

#[cfg(test)]
mod tests {
    use super::*;
    use docrag_core::types::ChunkMetadata;

    fn hits(names: &[&str]) -> Vec<ScoredChunk> {
        names.iter().map(|n| ScoredChunk::new(Chunk::new(*n, ChunkMetadata::default()), 1.0)).collect()
    }

    fn order(results: &[ScoredChunk]) -> Vec<&str> { results.iter().map(|r| r.chunk.content.as_str()).collect() }

    #[test]
    fn shared_hits_rank_above_single_list_hits() {
        let fused = reciprocal_rank_fusion(hits(&["A", "B", "C"]), hits(&["B", "A", "D"]), 0.7, 0.3, 10);
        assert_eq!(order(&fused), vec!["A", "B", "C", "D"]);

        let a = 0.7 / 61.0 + 0.3 / 62.0;
        assert!((fused[0].score - a).abs() < 1e-6);
        let d = 0.3 / 63.0;
        assert!((fused[3].score - d).abs() < 1e-6);
    }

    #[test]
    fn ties_keep_first_seen_order_and_truncate() {
        let fused = reciprocal_rank_fusion(hits(&["X"]), hits(&["Y"]), 0.5, 0.5, 10);
        assert_eq!(order(&fused), vec!["X", "Y"]);

        let fused = reciprocal_rank_fusion(hits(&["A", "B", "C"]), hits(&["B", "A", "D"]), 0.7, 0.3, 2);
        assert_eq!(order(&fused), vec!["A", "B"]);
    }

    #[test]
    fn identity_is_content_prefix() {
        let prefix = "p".repeat(200);
        let first = format!("{prefix} first tail");
        let second = format!("{prefix} second tail");
        let fused = reciprocal_rank_fusion(hits(&[first.as_str()]), hits(&[second.as_str()]), 0.7, 0.3, 10);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].chunk.content, first);
    }

    #[test]
    fn empty_lists_fuse_to_nothing() {
        assert!(reciprocal_rank_fusion(Vec::new(), Vec::new(), 0.7, 0.3, 5).is_empty());
    }
}
