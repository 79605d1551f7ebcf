//! Vector stores for chunk embeddings: a LanceDB-backed persistent store and
//! an in-memory store for tests and ephemeral sessions.

pub mod lance;
pub mod memory;
pub mod schema;

use anyhow::Result;
use std::sync::Arc;

use docrag_core::config::RagConfig;
use docrag_core::traits::Embedder;

pub use lance::LanceVectorStore;
pub use memory::MemoryVectorStore;

/// Open the persistent store described by `storage` in the config.
pub async fn open_lance_store(cfg: &RagConfig, embedder: Arc<dyn Embedder>) -> Result<LanceVectorStore> {
	let dir = cfg.storage.persist_path();
	std::fs::create_dir_all(&dir)?;
	LanceVectorStore::open(&dir, &cfg.storage.collection_name, embedder).await
}
