//! docrag-text
//!
//! In-memory TF-IDF keyword index. Tokenization reuses tantivy's analyzer
//! chain; scoring and storage are local to this crate.

pub mod analyzer;
pub mod index;

pub use analyzer::KeywordAnalyzer;
pub use index::{KeywordIndex, KeywordIndexStats};
