use std::fmt;

use thiserror::Error;

/// Pipeline stage that talks to an external collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Loading,
    Embedding,
    VectorStore,
    Retrieval,
    Rerank,
    Generation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Loading => "document loading",
            Stage::Embedding => "embedding",
            Stage::VectorStore => "vector store",
            Stage::Retrieval => "retrieval",
            Stage::Rerank => "reranking",
            Stage::Generation => "generation",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Pipeline not ready: {0}")]
    NotReady(String),

    #[error("Empty input: {0}")]
    EmptyInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("No extractable content: {0}")]
    EmptyContent(String),

    #[error("{stage} failed: {source:#}")]
    External {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },

    #[error("Operation failed: {0}")]
    Operation(String),
}

impl Error {
    /// Wrap a collaborator failure; the display renders the whole context chain.
    pub fn external(stage: Stage, source: anyhow::Error) -> Self { Error::External { stage, source } }

    /// True for errors caused by the caller's input rather than a backend.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Error::EmptyInput(_) | Error::NotFound(_) | Error::UnsupportedType(_) | Error::EmptyContent(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn external_keeps_source_chain() {
        let err: anyhow::Result<()> = Err(anyhow::anyhow!("connection reset")).context("POST /v1/ranking");
        let err = Error::external(Stage::Rerank, err.unwrap_err());
        assert_eq!(err.to_string(), "reranking failed: POST /v1/ranking: connection reset");

        let source = std::error::Error::source(&err).expect("source kept");
        assert_eq!(source.to_string(), "POST /v1/ranking");
        assert!(!err.is_input_error());
    }
}
