//! Token-budgeted recursive text splitting.
//!
//! Text is split on the highest-priority separator it contains. Pieces under
//! budget are merged greedily into chunks, carrying a tail of up to
//! `chunk_overlap` tokens into the next chunk. Pieces still over budget are
//! split again with the lower-priority separators. Every measurement goes
//! through the one [`TokenCounter`] the chunker was built with.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::ChunkingConfig;
use crate::error::{Error, Result};
use crate::tokens::CharTokenCounter;
use crate::traits::TokenCounter;
use crate::types::{Chunk, ChunkMetadata, ChunkStats, DocumentMetadata, Meta, SourceDocument, RESERVED_KEYS};

/// Paragraph breaks, line breaks, sentence ends, clause breaks, words, characters.
pub const SEPARATORS: &[&str] = &["\n\n\n", "\n\n", "\n", ". ", "? ", "! ", "; ", ", ", " ", ""];

/// Characters kept in a chunk's `preview`.
pub const PREVIEW_CHARS: usize = 150;

pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
    counter: Arc<dyn TokenCounter>,
}

impl Chunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize, counter: Arc<dyn TokenCounter>) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size must be positive".into()));
        }
        if chunk_overlap >= chunk_size {
            return Err(Error::InvalidConfig(format!(
                "chunk_overlap ({chunk_overlap}) must be smaller than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self { chunk_size, chunk_overlap, counter })
    }

    pub fn from_config(cfg: &ChunkingConfig, counter: Arc<dyn TokenCounter>) -> Result<Self> {
        Self::new(cfg.chunk_size, cfg.chunk_overlap, counter)
    }

    /// Chunker measuring with the four-characters-per-token estimate.
    pub fn with_char_estimate(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        Self::new(chunk_size, chunk_overlap, Arc::new(CharTokenCounter))
    }

    pub fn chunk_size(&self) -> usize { self.chunk_size }

    pub fn chunk_overlap(&self) -> usize { self.chunk_overlap }

    pub fn counter_name(&self) -> &str { self.counter.name() }

    pub fn token_length(&self, text: &str) -> usize { self.counter.count(text) }

    /// Split every document and attach chunk metadata.
    ///
    /// Chunk ids run over the whole batch, so `total_chunks` is the batch size.
    pub fn chunk_documents(&self, documents: &[SourceDocument], source_name: &str) -> (Vec<Chunk>, ChunkStats) {
        if documents.is_empty() {
            return (Vec::new(), ChunkStats::default());
        }

        let mut pieces: Vec<(String, &DocumentMetadata)> = Vec::new();
        for doc in documents {
            for text in self.split_text(&doc.content) {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    pieces.push((trimmed.to_string(), &doc.metadata));
                }
            }
        }

        let total = pieces.len();
        let chunks: Vec<Chunk> = pieces
            .into_iter()
            .enumerate()
            .map(|(i, (content, source_meta))| {
                let metadata = ChunkMetadata {
                    chunk_id: i,
                    chunk_index: i,
                    total_chunks: total,
                    chunk_size_tokens: self.token_length(&content),
                    source_name: source_name.to_string(),
                    page: source_meta.page,
                    preview: preview(&content),
                    source: source_meta.source.clone(),
                    extra: inherited_extra(&source_meta.extra),
                };
                Chunk::new(content, metadata)
            })
            .collect();

        let stats = Self::chunk_stats(&chunks);
        info!(
            source = source_name,
            documents = documents.len(),
            chunks = stats.total_chunks,
            avg_tokens = stats.avg_tokens_per_chunk,
            counter = self.counter_name(),
            "chunked documents"
        );
        (chunks, stats)
    }

    /// Chunk a raw string as one synthetic document.
    pub fn chunk_text(
        &self,
        text: &str,
        source_name: &str,
        metadata: Option<DocumentMetadata>,
    ) -> (Vec<Chunk>, ChunkStats) {
        let metadata = metadata
            .unwrap_or_else(|| DocumentMetadata { source: Some(source_name.to_string()), ..Default::default() });
        self.chunk_documents(&[SourceDocument::new(text, metadata)], source_name)
    }

    pub fn chunk_stats(chunks: &[Chunk]) -> ChunkStats {
        if chunks.is_empty() {
            return ChunkStats::default();
        }
        let sizes: Vec<usize> = chunks.iter().map(|c| c.metadata.chunk_size_tokens).collect();
        let total_tokens: usize = sizes.iter().sum();
        let pages: HashSet<u32> = chunks.iter().map(|c| c.metadata.page).collect();
        ChunkStats {
            total_chunks: chunks.len(),
            avg_tokens_per_chunk: total_tokens as f64 / chunks.len() as f64,
            min_tokens: sizes.iter().copied().min().unwrap_or(0),
            max_tokens: sizes.iter().copied().max().unwrap_or(0),
            total_tokens,
            source_pages: pages.len(),
        }
    }

    /// Raw split without metadata. Pieces are untrimmed.
    pub fn split_text(&self, text: &str) -> Vec<String> { self.split_recursive(text, SEPARATORS) }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let pos = separators
            .iter()
            .position(|sep| sep.is_empty() || text.contains(*sep))
            .unwrap_or(separators.len().saturating_sub(1));
        let separator = separators.get(pos).copied().unwrap_or("");
        if separator.is_empty() {
            return self.split_chars(text);
        }
        let remaining = separators.get(pos + 1..).unwrap_or(&[]);

        let mut out = Vec::new();
        let mut fitting: Vec<&str> = Vec::new();
        for piece in split_keeping_separator(text, separator) {
            if self.token_length(piece) < self.chunk_size {
                fitting.push(piece);
                continue;
            }
            if !fitting.is_empty() {
                out.extend(self.merge(&fitting));
                fitting.clear();
            }
            if remaining.is_empty() {
                debug!(tokens = self.token_length(piece), "piece over budget with no separator left");
                out.push(piece.to_string());
            } else {
                out.extend(self.split_recursive(piece, remaining));
            }
        }
        if !fitting.is_empty() {
            out.extend(self.merge(&fitting));
        }
        out
    }

    /// Greedy merge of pieces that each fit the budget.
    ///
    /// Lengths are summed per piece, each non-empty piece counting as at
    /// least one token, so a merge costs one count per piece.
    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut out = Vec::new();
        let mut window: VecDeque<(&str, usize)> = VecDeque::new();
        let mut total = 0;

        for &piece in pieces {
            let len = self.token_length(piece).max(1);
            if !window.is_empty() && total + len > self.chunk_size {
                out.push(join(&window));
                // keep a tail of at most `chunk_overlap` tokens that still leaves room for `piece`
                while total > self.chunk_overlap || (!window.is_empty() && total + len > self.chunk_size) {
                    match window.pop_front() {
                        Some((_, n)) => total -= n,
                        None => break,
                    }
                }
            }
            window.push_back((piece, len));
            total += len;
        }
        if !window.is_empty() {
            out.push(join(&window));
        }
        out
    }

    /// Character-level split for text with no separator left.
    ///
    /// Each chunk is the longest character run within `chunk_size`, found by
    /// galloping then bisecting over run ends. The next chunk starts at the
    /// earliest point whose tail is within `chunk_overlap`. Assumes counts
    /// never shrink as a run grows.
    fn split_chars(&self, text: &str) -> Vec<String> {
        let bounds: Vec<usize> = text.char_indices().map(|(i, _)| i).chain(std::iter::once(text.len())).collect();
        let chars = bounds.len() - 1;
        let span = |from: usize, to: usize| &text[bounds[from]..bounds[to]];

        let mut out = Vec::new();
        let mut start = 0;
        while start < chars {
            // `fits` is within budget, `over` is not (or past the end)
            let mut fits = start + 1;
            let mut over = chars + 1;
            let mut step = 1;
            while fits < chars {
                let next = (fits + step).min(chars);
                if self.token_length(span(start, next)) > self.chunk_size {
                    over = next;
                    break;
                }
                fits = next;
                step *= 2;
            }
            while over - fits > 1 {
                let mid = fits + (over - fits) / 2;
                if self.token_length(span(start, mid)) > self.chunk_size {
                    over = mid;
                } else {
                    fits = mid;
                }
            }
            let end = fits;
            out.push(span(start, end).to_string());
            if end == chars {
                break;
            }

            let mut long = start + 1;
            if self.token_length(span(long, end)) <= self.chunk_overlap {
                start = long;
                continue;
            }
            let mut short = end;
            while short - long > 1 {
                let mid = long + (short - long) / 2;
                if self.token_length(span(mid, end)) > self.chunk_overlap {
                    long = mid;
                } else {
                    short = mid;
                }
            }
            start = short;
        }
        out
    }
}

fn join(window: &VecDeque<(&str, usize)>) -> String { window.iter().map(|(piece, _)| *piece).collect() }

/// Split on `separator`, keeping it at the end of the preceding piece.
/// An empty separator yields single characters.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text.char_indices().map(|(i, c)| &text[i..i + c.len_utf8()]).collect();
    }
    text.split_inclusive(separator).filter(|piece| !piece.is_empty()).collect()
}

fn preview(content: &str) -> String {
    let head: String = content.chars().take(PREVIEW_CHARS).collect();
    head.replace('\n', " ").trim().to_string()
}

fn inherited_extra(extra: &Meta) -> Meta {
    extra
        .iter()
        .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paragraph() -> String {
        "Photosynthesis converts light energy into chemical energy. Chlorophyll absorbs mostly blue and red light. \
         The light reactions happen in the thylakoid membranes."
            .to_string()
    }

    #[test]
    fn rejects_overlap_not_below_size() {
        assert!(matches!(Chunker::with_char_estimate(100, 100), Err(Error::InvalidConfig(_))));
        assert!(matches!(Chunker::with_char_estimate(0, 0), Err(Error::InvalidConfig(_))));
        assert!(Chunker::with_char_estimate(100, 99).is_ok());
    }

    #[test]
    fn empty_input_gives_zeroed_stats() {
        let chunker = Chunker::with_char_estimate(512, 128).expect("chunker");
        let (chunks, stats) = chunker.chunk_documents(&[], "empty");
        assert!(chunks.is_empty());
        assert_eq!(stats, ChunkStats::default());
        assert_eq!(stats.total_chunks, 0);
        assert_eq!(stats.avg_tokens_per_chunk, 0.0);
    }

    #[test]
    fn short_paragraph_is_one_chunk() {
        let chunker = Chunker::with_char_estimate(512, 128).expect("chunker");
        let (chunks, stats) = chunker.chunk_text(&paragraph(), "bio.txt", None);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].metadata.total_chunks, 1);
        assert_eq!(chunks[0].content, paragraph());
        assert_eq!(chunks[0].metadata.source.as_deref(), Some("bio.txt"));
        assert_eq!(stats.total_chunks, 1);
        assert_eq!(stats.source_pages, 1);
    }

    #[test]
    fn small_budget_yields_many_chunks() {
        let chunker = Chunker::with_char_estimate(50, 10).expect("chunker");
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(60);
        let (chunks, stats) = chunker.chunk_text(&text, "fox.txt", None);
        assert!(stats.total_chunks > 1);
        assert!(chunker.chunk_overlap() < chunker.chunk_size());
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.metadata.chunk_id, i);
            assert_eq!(chunk.metadata.chunk_index, i);
            assert_eq!(chunk.metadata.total_chunks, chunks.len());
        }
    }

    #[test]
    fn chunks_stay_within_twice_the_budget() {
        let text = format!(
            "{}\n\n{}\n{}\n\n\n{}",
            paragraph().repeat(5),
            "x".repeat(3000),
            "short line; with, clauses? and! more words ".repeat(40),
            paragraph()
        );
        for (size, overlap) in [(20, 5), (50, 10), (128, 0), (512, 128)] {
            let chunker = Chunker::with_char_estimate(size, overlap).expect("chunker");
            let (chunks, _) = chunker.chunk_text(&text, "mixed.txt", None);
            assert!(!chunks.is_empty());
            for chunk in &chunks {
                assert!(
                    chunk.metadata.chunk_size_tokens <= 2 * size,
                    "chunk of {} tokens exceeds budget {size}",
                    chunk.metadata.chunk_size_tokens
                );
                assert_eq!(chunk.metadata.chunk_size_tokens, chunker.token_length(&chunk.content));
            }
        }
    }

    #[test]
    fn adjacent_chunks_share_overlap() {
        let chunker = Chunker::with_char_estimate(30, 15).expect("chunker");
        let text = (0..40).map(|i| format!("word{i:02}")).collect::<Vec<_>>().join(" ");
        let (chunks, _) = chunker.chunk_text(&text, "words.txt", None);
        assert!(chunks.len() > 1);
        let first_tail = chunks[0].content.rsplit(' ').next().expect("tail word");
        assert!(chunks[1].content.contains(first_tail));
    }

    #[test]
    fn source_metadata_copied_to_every_chunk() {
        let mut extra = Meta::new();
        extra.insert("course".into(), serde_json::json!("BIO-101"));
        extra.insert("chunk_id".into(), serde_json::json!(999));
        let meta = DocumentMetadata { page: 4, source: Some("bio.pdf".into()), extra };
        let doc = SourceDocument::new(paragraph().repeat(10), meta);

        let chunker = Chunker::with_char_estimate(50, 10).expect("chunker");
        let (chunks, stats) = chunker.chunk_documents(&[doc], "bio.pdf");
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert_eq!(chunk.metadata.page, 4);
            assert_eq!(chunk.metadata.source.as_deref(), Some("bio.pdf"));
            assert_eq!(chunk.metadata.source_name, "bio.pdf");
            assert_eq!(chunk.metadata.extra.get("course"), Some(&serde_json::json!("BIO-101")));
            assert!(!chunk.metadata.extra.contains_key("chunk_id"));
        }
        assert_eq!(stats.source_pages, 1);
    }

    #[test]
    fn distinct_pages_counted() {
        let docs: Vec<SourceDocument> = (0..3)
            .map(|page| SourceDocument::new(paragraph(), DocumentMetadata { page, ..Default::default() }))
            .collect();
        let chunker = Chunker::with_char_estimate(512, 128).expect("chunker");
        let (chunks, stats) = chunker.chunk_documents(&docs, "book");
        assert_eq!(chunks.len(), 3);
        assert_eq!(stats.source_pages, 3);
        assert_eq!(stats.total_tokens, chunks.iter().map(|c| c.metadata.chunk_size_tokens).sum::<usize>());
    }

    #[test]
    fn preview_collapses_newlines() {
        let chunker = Chunker::with_char_estimate(512, 0).expect("chunker");
        let (chunks, _) = chunker.chunk_text("line one\nline two", "p.txt", None);
        assert_eq!(chunks[0].metadata.preview, "line one line two");

        let long = "a".repeat(400);
        let (chunks, _) = chunker.chunk_text(&long, "p.txt", None);
        assert_eq!(chunks[0].metadata.preview.chars().count(), PREVIEW_CHARS);
    }

    #[test]
    fn token_length_is_monotone() {
        let chunker = Chunker::with_char_estimate(512, 128).expect("chunker");
        assert_eq!(chunker.token_length(""), 0);
        let mut text = String::new();
        let mut last = 0;
        for word in "alpha beta gamma delta epsilon zeta eta theta".split(' ') {
            text.push_str(word);
            text.push(' ');
            let now = chunker.token_length(&text);
            assert!(now >= last);
            last = now;
        }
    }

    struct CountingCounter {
        counted_chars: std::sync::atomic::AtomicUsize,
    }

    impl TokenCounter for CountingCounter {
        fn name(&self) -> &str { "counting" }

        fn count(&self, text: &str) -> usize {
            let chars = text.chars().count();
            self.counted_chars.fetch_add(chars, std::sync::atomic::Ordering::Relaxed);
            chars / 4
        }
    }

    #[test]
    fn long_run_without_separators_is_counted_near_linearly() {
        let counter = Arc::new(CountingCounter { counted_chars: Default::default() });
        let chunker = Chunker::new(512, 128, counter.clone()).expect("chunker");
        let text = "x".repeat(60_000);
        let pieces = chunker.split_text(&text);

        assert_eq!(pieces[0].chars().count(), 2051);
        assert!(pieces.len() > 1);
        for piece in &pieces {
            assert!(chunker.token_length(piece) <= 512);
        }
        // consecutive pieces share a tail of `chunk_overlap` tokens
        assert!(pieces[1].starts_with(&pieces[0][pieces[0].len() - 515..]));
        assert!(pieces.last().expect("last").len() <= 2051);
        let counted = counter.counted_chars.load(std::sync::atomic::Ordering::Relaxed);
        assert!(counted < 100 * text.len(), "counted {counted} chars for a {} char input", text.len());
    }
}
