use anyhow::{anyhow, Result};
use std::path::Path;
use std::sync::Arc;

use docrag_core::config::expand_path;
use docrag_core::tokens::CharTokenCounter;
use docrag_core::traits::TokenCounter;
use docrag_core::types::Outcome;
use tokenizers::Tokenizer;
use tracing::{info, warn};

/// Token counts from a HuggingFace `tokenizer.json`, special tokens excluded.
pub struct HfTokenCounter { tokenizer: Tokenizer, name: String }

impl HfTokenCounter {
    pub fn from_file(path: &Path) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", path.display(), e))?;
        Ok(Self { tokenizer, name: format!("hf:{}", path.display()) })
    }
}

impl TokenCounter for HfTokenCounter {
    fn name(&self) -> &str { &self.name }

    fn count(&self, text: &str) -> usize {
        match self.tokenizer.encode(text, false) {
            Ok(enc) => enc.get_ids().len(),
            Err(e) => { warn!(error = %e, "tokenizer failed on input, using char estimate"); CharTokenCounter.count(text) }
        }
    }
}

/// Counter for the configured tokenizer path.
///
/// No path means the char estimate by choice; a path that fails to load
/// degrades to the same estimate.
pub fn load_token_counter(path: Option<&str>) -> Outcome<Arc<dyn TokenCounter>> {
    let fallback: Arc<dyn TokenCounter> = Arc::new(CharTokenCounter);
    let Some(raw) = path.filter(|p| !p.trim().is_empty()) else {
        return Outcome::Success(fallback);
    };
    let path = expand_path(raw);
    match HfTokenCounter::from_file(&path) {
        Ok(counter) => {
            info!(path = %path.display(), "tokenizer loaded");
            let counter: Arc<dyn TokenCounter> = Arc::new(counter);
            Outcome::Success(counter)
        }
        Err(e) => {
            warn!(error = %e, "tokenizer unavailable, falling back to char estimate (~4 chars/token)");
            Outcome::Degraded { value: fallback, reason: e.to_string() }
        }
    }
}
