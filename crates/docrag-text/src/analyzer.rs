use tantivy::tokenizer::{LowerCaser, SimpleTokenizer, TextAnalyzer, TokenStream};

/// Lowercased maximal alphanumeric runs. No stemming, no stop words.
#[derive(Clone)]
pub struct KeywordAnalyzer {
	inner: TextAnalyzer,
}

impl Default for KeywordAnalyzer {
	fn default() -> Self { Self::new() }
}

impl KeywordAnalyzer {
	pub fn new() -> Self {
		let inner = TextAnalyzer::builder(SimpleTokenizer::default()).filter(LowerCaser).build();
		Self { inner }
	}

	pub fn tokens(&self, text: &str) -> Vec<String> {
		// token_stream needs &mut; analyzers are cheap to clone
		let mut analyzer = self.inner.clone();
		let mut stream = analyzer.token_stream(text);
		let mut out = Vec::new();
		while stream.advance() { out.push(stream.token().text.clone()); }
		out
	}
}
