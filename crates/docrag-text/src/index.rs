use std::collections::HashMap;
use std::sync::Arc;

use docrag_core::types::{Chunk, ScoredChunk};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::analyzer::KeywordAnalyzer;

struct IndexedDoc {
	chunk: Chunk,
	term_freqs: HashMap<String, usize>,
	len: usize,
}

#[derive(Default)]
struct Snapshot {
	docs: Vec<IndexedDoc>,
	idf: HashMap<String, f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeywordIndexStats {
	pub documents: usize,
	pub vocabulary: usize,
}

/// TF-IDF index over a full chunk snapshot.
///
/// `idf = ln((N + 1) / (df + 1)) + 1`; a document scores the sum over query
/// tokens of `tf / doc_len * idf`. Rebuilds happen off to the side and are
/// swapped in whole, so searches see either the old or the new corpus.
pub struct KeywordIndex {
	analyzer: KeywordAnalyzer,
	snapshot: RwLock<Arc<Snapshot>>,
}

impl Default for KeywordIndex {
	fn default() -> Self { Self::new() }
}

impl KeywordIndex {
	pub fn new() -> Self {
		Self { analyzer: KeywordAnalyzer::new(), snapshot: RwLock::new(Arc::new(Snapshot::default())) }
	}

	/// Replace the whole corpus.
	pub fn index(&self, chunks: &[Chunk]) {
		let mut doc_freqs: HashMap<String, usize> = HashMap::new();
		let docs: Vec<IndexedDoc> = chunks
			.iter()
			.map(|chunk| {
				let tokens = self.analyzer.tokens(&chunk.content);
				let mut term_freqs: HashMap<String, usize> = HashMap::new();
				for t in &tokens { *term_freqs.entry(t.clone()).or_insert(0) += 1; }
				for term in term_freqs.keys() { *doc_freqs.entry(term.clone()).or_insert(0) += 1; }
				IndexedDoc { chunk: chunk.clone(), term_freqs, len: tokens.len() }
			})
			.collect();

		let n = docs.len() as f64;
		let idf: HashMap<String, f64> =
			doc_freqs.into_iter().map(|(term, df)| (term, ((n + 1.0) / (df as f64 + 1.0)).ln() + 1.0)).collect();

		let next = Arc::new(Snapshot { docs, idf });
		info!(documents = next.docs.len(), vocabulary = next.idf.len(), "keyword index rebuilt");
		*self.snapshot.write() = next;
	}

	pub fn clear(&self) { *self.snapshot.write() = Arc::new(Snapshot::default()); }

	/// At most `top_k` chunks with a positive score, best first.
	/// Equal scores keep corpus order.
	pub fn search(&self, query: &str, top_k: usize) -> Vec<ScoredChunk> {
		let snapshot = Arc::clone(&self.snapshot.read());
		let query_tokens = self.analyzer.tokens(query);
		if query_tokens.is_empty() || snapshot.docs.is_empty() || top_k == 0 {
			return Vec::new();
		}

		let mut scored: Vec<(usize, f64)> = snapshot
			.docs
			.iter()
			.enumerate()
			.filter_map(|(i, doc)| {
				let score = score_doc(doc, &snapshot.idf, &query_tokens);
				(score > 0.0).then_some((i, score))
			})
			.collect();
		scored.sort_by(|a, b| b.1.total_cmp(&a.1));
		scored.truncate(top_k);
		debug!(query_tokens = query_tokens.len(), hits = scored.len(), "keyword search");

		scored.into_iter().map(|(i, score)| ScoredChunk::new(snapshot.docs[i].chunk.clone(), score as f32)).collect()
	}

	pub fn len(&self) -> usize { self.snapshot.read().docs.len() }

	pub fn is_empty(&self) -> bool { self.len() == 0 }

	pub fn stats(&self) -> KeywordIndexStats {
		let snapshot = self.snapshot.read();
		KeywordIndexStats { documents: snapshot.docs.len(), vocabulary: snapshot.idf.len() }
	}
}

fn score_doc(doc: &IndexedDoc, idf: &HashMap<String, f64>, query_tokens: &[String]) -> f64 {
	if doc.len == 0 {
		return 0.0;
	}
	let len = doc.len as f64;
	query_tokens
		.iter()
		.filter_map(|t| {
			let tf = *doc.term_freqs.get(t)?;
			Some(tf as f64 / len * idf.get(t).copied().unwrap_or(0.0))
		})
		.sum()
}

#[cfg(test)]
mod tests {
	use super::*;
	use docrag_core::types::ChunkMetadata;

	fn chunk(text: &str) -> Chunk { Chunk::new(text, ChunkMetadata::default()) }

	#[test]
	fn idf_and_score_follow_formula() {
		let index = KeywordIndex::new();
		index.index(&[chunk("apple banana"), chunk("apple cherry cherry")]);
		let hits = index.search("cherry", 10);
		assert_eq!(hits.len(), 1);
		// df=1, N=2: idf = ln(3/2) + 1; tf/len = 2/3
		let expected = (2.0f64 / 3.0) * ((3.0f64 / 2.0).ln() + 1.0);
		assert!((f64::from(hits[0].score) - expected).abs() < 1e-5);
	}

	#[test]
	fn repeated_query_tokens_count_twice() {
		let index = KeywordIndex::new();
		index.index(&[chunk("solar wind"), chunk("ocean tide")]);
		let once = index.search("solar", 5)[0].score;
		let twice = index.search("solar solar", 5)[0].score;
		assert!((twice - 2.0 * once).abs() < 1e-6);
	}

	#[test]
	fn ties_keep_corpus_order() {
		let index = KeywordIndex::new();
		index.index(&[chunk("first common"), chunk("second common"), chunk("third common")]);
		let hits = index.search("common", 3);
		let order: Vec<&str> = hits.iter().map(|h| h.chunk.content.as_str()).collect();
		assert_eq!(order, vec!["first common", "second common", "third common"]);
	}

	#[test]
	fn reindex_replaces_corpus() {
		let index = KeywordIndex::new();
		index.index(&[chunk("old content")]);
		index.index(&[chunk("new content"), chunk("more")]);
		assert_eq!(index.len(), 2);
		assert!(index.search("old", 5).is_empty());
		index.clear();
		assert!(index.is_empty());
		assert!(index.search("new", 5).is_empty());
	}
}
