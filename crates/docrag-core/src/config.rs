use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::models;

/// Environment variable holding the hosted-model API key.
pub const API_KEY_ENV: &str = "NVIDIA_API_KEY";

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        Ok(Self::load_for_env(&env_name))
    }

    pub fn load_for_env(env_name: &str) -> Self {
        let mut figment = Figment::from(Serialized::defaults(RagConfig::default())).merge(Toml::file("config.toml"));
        match env_name {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));
        Self { figment }
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    /// Typed pipeline configuration; the API key falls back to `NVIDIA_API_KEY`.
    pub fn rag(&self) -> Result<RagConfig> {
        let mut cfg: RagConfig = self.figment.extract().map_err(|e| Error::InvalidConfig(e.to_string()))?;
        if cfg.api_key.is_empty() {
            cfg.api_key = env::var(API_KEY_ENV).unwrap_or_default();
        }
        Ok(cfg)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Tokens per chunk.
    pub chunk_size: usize,
    /// Tokens carried over between adjacent chunks.
    pub chunk_overlap: usize,
    /// Optional HuggingFace `tokenizer.json`; the character estimate is used without it.
    pub tokenizer_path: Option<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { chunk_size: 512, chunk_overlap: 128, tokenizer_path: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrieverConfig {
    /// Candidates before reranking.
    pub top_k: usize,
    /// Results after reranking.
    pub top_n: usize,
    pub semantic_weight: f32,
    pub keyword_weight: f32,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self { top_k: 10, top_n: 5, semantic_weight: 0.7, keyword_weight: 0.3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneratorConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub max_completion_tokens: u32,
    /// Chunks placed into the prompt context.
    pub context_chunks: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self { temperature: 0.6, top_p: 0.9, max_completion_tokens: 4096, context_chunks: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EndpointConfig {
    pub embeddings_url: String,
    pub chat_url: String,
    pub rerank_url: String,
    pub timeout_secs: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            embeddings_url: "https://integrate.api.nvidia.com/v1".to_string(),
            chat_url: "https://integrate.api.nvidia.com/v1".to_string(),
            rerank_url: "https://ai.api.nvidia.com/v1/retrieval".to_string(),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub persist_dir: String,
    pub collection_name: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { persist_dir: "./lancedb".to_string(), collection_name: "study_materials".to_string() }
    }
}

impl StorageConfig {
    /// `persist_dir` with `~` and environment variables expanded.
    pub fn persist_path(&self) -> PathBuf { expand_path(&self.persist_dir) }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagConfig {
    pub api_key: String,
    pub embedding_model: String,
    pub reranking_model: String,
    pub llm_model: String,
    pub chunking: ChunkingConfig,
    pub retriever: RetrieverConfig,
    pub generator: GeneratorConfig,
    pub endpoints: EndpointConfig,
    pub storage: StorageConfig,
    pub enable_reranking: bool,
    pub enable_hybrid_search: bool,
    pub enable_metrics: bool,
    /// Embedding requests allowed per minute.
    pub rate_limit_rpm: u32,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            embedding_model: "nv-embedqa-1b-v2".to_string(),
            reranking_model: "nv-rerankqa-1b-v2".to_string(),
            llm_model: "kimi-k2-instruct".to_string(),
            chunking: ChunkingConfig::default(),
            retriever: RetrieverConfig::default(),
            generator: GeneratorConfig::default(),
            endpoints: EndpointConfig::default(),
            storage: StorageConfig::default(),
            enable_reranking: true,
            enable_hybrid_search: true,
            enable_metrics: true,
            rate_limit_rpm: 40,
        }
    }
}

impl RagConfig {
    /// Load `config.toml` + `config.<RUST_ENV>.toml` + `APP_*` overrides.
    pub fn load() -> anyhow::Result<Self> {
        Ok(Config::load()?.rag()?)
    }

    pub fn embedding(&self) -> Result<&'static models::ModelConfig> { models::embedding_model(&self.embedding_model) }

    pub fn reranking(&self) -> Result<&'static models::ModelConfig> { models::reranking_model(&self.reranking_model) }

    pub fn llm(&self) -> Result<&'static models::ModelConfig> { models::llm_model(&self.llm_model) }

    /// Structural validation: model keys, fusion weights, chunk budget, limits.
    pub fn validate(&self) -> Result<()> {
        self.embedding()?;
        self.reranking()?;
        self.llm()?;

        let r = &self.retriever;
        for (name, w) in [("semantic_weight", r.semantic_weight), ("keyword_weight", r.keyword_weight)] {
            if !w.is_finite() || w < 0.0 {
                return Err(Error::InvalidConfig(format!("{name} must be a finite non-negative number, got {w}")));
            }
        }
        if r.semantic_weight + r.keyword_weight <= 0.0 {
            return Err(Error::InvalidConfig("semantic_weight and keyword_weight cannot both be zero".into()));
        }
        if r.top_k == 0 || r.top_n == 0 {
            return Err(Error::InvalidConfig("top_k and top_n must be positive".into()));
        }

        let c = &self.chunking;
        if c.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size must be positive".into()));
        }
        if c.chunk_overlap >= c.chunk_size {
            return Err(Error::InvalidConfig(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                c.chunk_overlap, c.chunk_size
            )));
        }
        if self.rate_limit_rpm == 0 {
            return Err(Error::InvalidConfig("rate_limit_rpm must be positive".into()));
        }
        Ok(())
    }

    /// Required before any hosted service is constructed.
    pub fn validate_credentials(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(Error::InvalidConfig(format!("{API_KEY_ENV} is required")));
        }
        Ok(())
    }
}

/// `~` and `$VAR` / `${VAR}` expansion; unknown variables are left as written.
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let with_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    PathBuf::from(shellexpand::tilde(&with_env).as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = RagConfig::default();
        cfg.validate().expect("defaults validate");
        assert_eq!(cfg.chunking.chunk_size, 512);
        assert_eq!(cfg.chunking.chunk_overlap, 128);
        assert!((cfg.retriever.semantic_weight - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn rejects_unknown_model_and_bad_weights() {
        let cfg = RagConfig { embedding_model: "missing".into(), ..Default::default() };
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));

        let mut cfg = RagConfig::default();
        cfg.retriever.keyword_weight = -0.1;
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));

        let mut cfg = RagConfig::default();
        cfg.chunking.chunk_overlap = cfg.chunking.chunk_size;
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn credentials_required_for_hosted_services() {
        let cfg = RagConfig::default();
        assert!(cfg.validate_credentials().is_err());
        let cfg = RagConfig { api_key: "nvapi-test".into(), ..Default::default() };
        assert!(cfg.validate_credentials().is_ok());
    }

    #[test]
    fn toml_and_env_layers_merge() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                    enable_reranking = false
                    [retriever]
                    top_k = 20
                "#,
            )?;
            jail.create_file("config.test.toml", "[chunking]\nchunk_size = 256\n")?;
            jail.set_env("APP_RETRIEVER__TOP_N", "3");
            jail.set_env("APP_API_KEY", "from-env");

            let cfg = Config::load_for_env("test").rag().map_err(|e| e.to_string())?;
            assert!(!cfg.enable_reranking);
            assert_eq!(cfg.retriever.top_k, 20);
            assert_eq!(cfg.retriever.top_n, 3);
            assert_eq!(cfg.chunking.chunk_size, 256);
            assert_eq!(cfg.chunking.chunk_overlap, 128);
            assert_eq!(cfg.api_key, "from-env");
            Ok(())
        });
    }

    #[test]
    fn persist_dir_expands_home_and_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("HOME", "/home/reader");
            jail.set_env("DOCRAG_DATA", "/srv/data");
            let storage = StorageConfig { persist_dir: "~/lancedb".into(), ..Default::default() };
            assert_eq!(storage.persist_path(), PathBuf::from("/home/reader/lancedb"));
            let storage = StorageConfig { persist_dir: "${DOCRAG_DATA}/lancedb".into(), ..Default::default() };
            assert_eq!(storage.persist_path(), PathBuf::from("/srv/data/lancedb"));
            Ok(())
        });
    }
}
