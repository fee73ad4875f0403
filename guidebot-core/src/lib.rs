//! # GuideBot Core
//!
//! Core library for the GuideBot GMP/SOP assistant.
//! Provides retrieval-augmented chat orchestration: a flat vector index with
//! blob-backed persistence, token-budgeted prompt assembly, document ingest,
//! conversation history, and usage accounting.

pub mod blobstore;
pub mod chunk;
pub mod completion;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extract;
pub mod history;
pub mod index;
pub mod ingest;
pub mod logs;
pub mod orchestrator;
pub mod prompt;
pub mod retriever;
pub mod token_counter;
pub mod types;
pub mod vector_store;

// Re-export commonly used types at the crate root.
pub use blobstore::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use completion::{ChatModel, MockChatModel, OpenAiChatModel};
pub use config::{load_config, AppConfig, BudgetConfig, EmbeddingConfig, LlmConfig};
pub use embeddings::{build_embedder, Embedder, HashEmbedder, OpenAiEmbedder};
pub use error::{GuideBotError, LlmError, Result, StorageError};
pub use extract::{DocumentExtractor, PlainTextExtractor};
pub use history::ConversationStore;
pub use index::{FlatIndex, SearchHit};
pub use ingest::{DocumentIngestor, IngestReport};
pub use logs::{UploadLog, UsageLog, UserDirectory};
pub use orchestrator::{ChatEngine, ChatOutcome, ChatRequest, TurnPhase};
pub use prompt::{load_prompt_rules, PromptAssembler};
pub use retriever::{ContextRetriever, RetrievedContext};
pub use token_counter::TokenCounter;
pub use types::{
    Attachment, AttachmentKind, ChatMessage, ContextItem, ConversationRecord, MetadataEntry,
    Role, TokenUsage, UploadLogEntry, UsageLogEntry,
};
pub use vector_store::VectorStore;
