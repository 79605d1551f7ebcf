//! Read-only catalogs of the hosted models the pipeline can be pointed at.

use serde::Serialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelConfig {
    pub model_id: &'static str,
    pub description: &'static str,
    pub max_tokens: usize,
    pub dimensions: Option<usize>,
}

pub const EMBEDDING_MODELS: &[(&str, ModelConfig)] = &[
    (
        "nv-embedqa-1b-v2",
        ModelConfig {
            model_id: "nvidia/llama-3.2-nv-embedqa-1b-v2",
            description: "Multilingual QA retrieval with long context support (1B params)",
            max_tokens: 512,
            dimensions: Some(2048),
        },
    ),
    (
        "nemoretriever-300m-v2",
        ModelConfig {
            model_id: "nvidia/llama-3.2-nemoretriever-300m-embed-v2",
            description: "Multilingual QA retrieval, lightweight (300M params)",
            max_tokens: 512,
            dimensions: Some(1024),
        },
    ),
    (
        "nv-embedcode-7b",
        ModelConfig {
            model_id: "nvidia/nv-embedcode-7b-v1",
            description: "Code retrieval, text+code hybrid (7B params)",
            max_tokens: 8192,
            dimensions: Some(4096),
        },
    ),
    (
        "nv-embedqa-e5-v5",
        ModelConfig {
            model_id: "nvidia/nv-embedqa-e5-v5",
            description: "English text QA embedding (E5-based)",
            max_tokens: 512,
            dimensions: Some(1024),
        },
    ),
    (
        "bge-m3",
        ModelConfig {
            model_id: "baai/bge-m3",
            description: "Dense, multi-vector, and sparse retrieval",
            max_tokens: 8192,
            dimensions: Some(1024),
        },
    ),
];

pub const RERANKING_MODELS: &[(&str, ModelConfig)] = &[
    (
        "nv-rerankqa-1b-v2",
        ModelConfig {
            model_id: "nvidia/llama-3.2-nv-rerankqa-1b-v2",
            description: "Multilingual, cross-lingual QA reranking (1B params)",
            max_tokens: 512,
            dimensions: None,
        },
    ),
    (
        "nemoretriever-500m-rerank-v2",
        ModelConfig {
            model_id: "nvidia/llama-3.2-nemoretriever-500m-rerank-v2",
            description: "GPU-accelerated passage reranking (500M params)",
            max_tokens: 512,
            dimensions: None,
        },
    ),
];

pub const LLM_MODELS: &[(&str, ModelConfig)] = &[(
    "kimi-k2-instruct",
    ModelConfig {
        model_id: "moonshotai/kimi-k2-instruct",
        description: "Kimi K2 Instruct - multi-modal reasoning",
        max_tokens: 4096,
        dimensions: None,
    },
)];

fn lookup(registry: &'static [(&'static str, ModelConfig)], kind: &str, key: &str) -> Result<&'static ModelConfig> {
    registry.iter().find(|(name, _)| *name == key).map(|(_, cfg)| cfg).ok_or_else(|| {
        let available: Vec<&str> = registry.iter().map(|(name, _)| *name).collect();
        Error::InvalidConfig(format!("Unknown {kind} model: {key}. Available: {}", available.join(", ")))
    })
}

pub fn embedding_model(key: &str) -> Result<&'static ModelConfig> { lookup(EMBEDDING_MODELS, "embedding", key) }

pub fn reranking_model(key: &str) -> Result<&'static ModelConfig> { lookup(RERANKING_MODELS, "reranking", key) }

pub fn llm_model(key: &str) -> Result<&'static ModelConfig> { lookup(LLM_MODELS, "LLM", key) }

/// Catalog listing as `(key, config)` pairs, for help output.
pub fn list_available(registry: &'static [(&'static str, ModelConfig)]) -> Vec<(&'static str, &'static ModelConfig)> {
    registry.iter().map(|(name, cfg)| (*name, cfg)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_keys_resolve() {
        assert_eq!(embedding_model("bge-m3").expect("bge").dimensions, Some(1024));
        assert_eq!(reranking_model("nv-rerankqa-1b-v2").expect("rerank").model_id, "nvidia/llama-3.2-nv-rerankqa-1b-v2");
        assert_eq!(llm_model("kimi-k2-instruct").expect("llm").max_tokens, 4096);
    }

    #[test]
    fn unknown_key_lists_alternatives() {
        let err = embedding_model("nope").expect_err("unknown key");
        let msg = err.to_string();
        assert!(msg.contains("Unknown embedding model: nope"));
        assert!(msg.contains("bge-m3"));
    }
}
