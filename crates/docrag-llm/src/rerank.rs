use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info};

use docrag_core::traits::RerankService;
use docrag_core::types::{Outcome, ScoredChunk};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RerankerStats {
    pub model: String,
    pub enabled: bool,
    pub total_reranks: u64,
}

/// Optional cross-encoder stage between retrieval and generation.
///
/// Never fails: without a service the input passes through truncated to
/// `top_n`, and a failing service degrades to the same pass-through.
pub struct Reranker {
    service: Option<Arc<dyn RerankService>>,
    default_top_n: usize,
    reranks: AtomicU64,
}

impl Reranker {
    /// `None` disables reranking.
    pub fn new(service: Option<Arc<dyn RerankService>>, default_top_n: usize) -> Self {
        Self { service, default_top_n, reranks: AtomicU64::new(0) }
    }

    pub fn is_enabled(&self) -> bool { self.service.is_some() }

    pub async fn rerank(&self, query: &str, results: Vec<ScoredChunk>, top_n: Option<usize>) -> Outcome<Vec<ScoredChunk>> {
        let n = top_n.filter(|n| *n > 0).unwrap_or(self.default_top_n);
        let Some(service) = &self.service else {
            debug!("reranking skipped (disabled)");
            return Outcome::Success(results.into_iter().take(n).collect());
        };
        if results.is_empty() {
            return Outcome::Success(results);
        }

        let passages: Vec<String> = results.iter().map(|r| r.chunk.content.clone()).collect();
        match service.rerank(query, &passages).await {
            Ok(rankings) => {
                self.reranks.fetch_add(1, Ordering::Relaxed);
                let reranked = apply_rankings(&results, rankings, n);
                info!(input = results.len(), output = reranked.len(), "reranked");
                Outcome::Success(reranked)
            }
            Err(e) => {
                error!(error = %format!("{e:#}"), "reranking failed, falling back to initial ranking");
                Outcome::Degraded { value: results.into_iter().take(n).collect(), reason: format!("{e:#}") }
            }
        }
    }

    pub fn stats(&self) -> RerankerStats {
        RerankerStats {
            model: self.service.as_ref().map(|s| s.model_id().to_string()).unwrap_or_else(|| "disabled".to_string()),
            enabled: self.is_enabled(),
            total_reranks: self.reranks.load(Ordering::Relaxed),
        }
    }
}

/// Map `(index, score)` pairs back onto the candidates, best first.
/// Out-of-range and repeated indices are ignored.
fn apply_rankings(results: &[ScoredChunk], rankings: Vec<(usize, f32)>, top_n: usize) -> Vec<ScoredChunk> {
    let mut seen = vec![false; results.len()];
    let mut out: Vec<ScoredChunk> = rankings
        .into_iter()
        .filter_map(|(index, score)| {
            let slot = seen.get_mut(index)?;
            if *slot {
                return None;
            }
            *slot = true;
            Some(ScoredChunk::new(results[index].chunk.clone(), score))
        })
        .collect();
    out.sort_by(|a, b| b.score.total_cmp(&a.score));
    out.truncate(top_n);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use docrag_core::types::{Chunk, ChunkMetadata};

    fn scored(text: &str, score: f32) -> ScoredChunk { ScoredChunk::new(Chunk::new(text, ChunkMetadata::default()), score) }

    #[test]
    fn rankings_sorted_and_filtered() {
        let results = vec![scored("a", 0.1), scored("b", 0.2), scored("c", 0.3)];
        let out = apply_rankings(&results, vec![(0, 1.0), (2, 5.0), (9, 9.0), (2, 7.0), (1, -2.0)], 2);
        let order: Vec<&str> = out.iter().map(|s| s.chunk.content.as_str()).collect();
        assert_eq!(order, vec!["c", "a"]);
        assert_eq!(out[0].score, 5.0);
    }

    #[tokio::test]
    async fn disabled_is_pass_through() {
        let reranker = Reranker::new(None, 5);
        let input = vec![scored("d1", 0.9), scored("d2", 0.5), scored("d3", 0.1)];
        let out = reranker.rerank("q", input.clone(), Some(2)).await;
        assert!(!out.is_degraded());
        assert_eq!(out.into_value(), input[..2].to_vec());
        assert_eq!(reranker.stats().model, "disabled");
    }
}
