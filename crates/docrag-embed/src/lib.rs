pub mod hash;
pub mod http;
pub mod rate_limit;
pub mod tokenize;

use std::sync::Arc;

use docrag_core::config::RagConfig;
use docrag_core::traits::Embedder;
use tracing::info;

pub use hash::HashEmbedder;
pub use http::HttpEmbedder;
pub use rate_limit::RateLimiter;
pub use tokenize::{load_token_counter, HfTokenCounter};

/// True when `APP_USE_FAKE_EMBEDDINGS` is `1` or `true`.
pub fn use_fake_embeddings() -> bool {
    std::env::var("APP_USE_FAKE_EMBEDDINGS").ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false)
}

/// Hosted embedder for the configured model, or the hash embedder when
/// `APP_USE_FAKE_EMBEDDINGS` is set.
pub fn get_default_embedder(cfg: &RagConfig) -> docrag_core::Result<Arc<dyn Embedder>> {
    if use_fake_embeddings() {
        let dim = cfg.embedding()?.dimensions.unwrap_or(1024);
        info!(dim, "using hash embedder");
        return Ok(Arc::new(HashEmbedder::new(dim)));
    }
    Ok(Arc::new(HttpEmbedder::new(cfg)?))
}
