//! Error types for the GuideBot core.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering the LLM, storage, index, prompt, configuration, and ingest domains.

/// Top-level error type for the GuideBot core library.
#[derive(Debug, thiserror::Error)]
pub enum GuideBotError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Prompt error: {0}")]
    Prompt(#[from] PromptError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from remote model interactions (chat, captioning, embeddings).
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },
}

/// Errors from the blob store.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to read blob '{key}': {message}")]
    ReadFailed { key: String, message: String },

    #[error("Failed to write blob '{key}': {message}")]
    WriteFailed { key: String, message: String },

    #[error("Blob '{key}' contains invalid JSON: {message}")]
    InvalidJson { key: String, message: String },
}

/// Errors from the flat vector index.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Vector dimension mismatch: index holds {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Corrupt index blob: {message}")]
    Corrupt { message: String },
}

/// Errors from prompt assembly.
#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("Failed to decode truncated context tokens: {message}")]
    TokenizerDecode { message: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },
}

/// Errors from the document ingest pipeline.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("No usable text content in '{file_name}'")]
    NoUsableContent { file_name: String },

    #[error("Embedding service is not configured; cannot learn documents")]
    EmbeddingUnavailable,

    #[error("No chunks of '{file_name}' could be embedded")]
    NoChunksEmbedded { file_name: String },
}

/// A type alias for results using the top-level `GuideBotError`.
pub type Result<T> = std::result::Result<T, GuideBotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_llm() {
        let err = GuideBotError::Llm(LlmError::ApiRequest {
            message: "connection refused".into(),
        });
        assert_eq!(
            err.to_string(),
            "LLM error: API request failed: connection refused"
        );
    }

    #[test]
    fn test_error_display_storage() {
        let err = GuideBotError::Storage(StorageError::ReadFailed {
            key: "vector_db/metadata.json".into(),
            message: "permission denied".into(),
        });
        assert_eq!(
            err.to_string(),
            "Storage error: Failed to read blob 'vector_db/metadata.json': permission denied"
        );
    }

    #[test]
    fn test_error_display_index() {
        let err = GuideBotError::Index(IndexError::DimensionMismatch {
            expected: 1536,
            actual: 768,
        });
        assert_eq!(
            err.to_string(),
            "Index error: Vector dimension mismatch: index holds 1536, got 768"
        );
    }

    #[test]
    fn test_error_display_config() {
        let err = GuideBotError::Config(ConfigError::MissingField {
            field: "llm.api_key_env".into(),
        });
        assert_eq!(
            err.to_string(),
            "Configuration error: Missing required field: llm.api_key_env"
        );
    }

    #[test]
    fn test_error_display_ingest() {
        let err = GuideBotError::Ingest(IngestError::NoUsableContent {
            file_name: "empty.txt".into(),
        });
        assert_eq!(
            err.to_string(),
            "Ingest error: No usable text content in 'empty.txt'"
        );
    }

    #[test]
    fn test_llm_error_variants() {
        let err = LlmError::RateLimited {
            retry_after_secs: 60,
        };
        assert_eq!(err.to_string(), "Rate limited by provider, retry after 60s");

        let err = LlmError::Timeout { timeout_secs: 60 };
        assert_eq!(err.to_string(), "Request timed out after 60s");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: GuideBotError = io_err.into();
        assert!(matches!(err, GuideBotError::Io(_)));
    }

    #[test]
    fn test_error_from_serde() {
        let serde_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: GuideBotError = serde_err.into();
        assert!(matches!(err, GuideBotError::Serialization(_)));
    }
}
