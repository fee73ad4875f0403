//! CLI subcommand handlers.

use crate::Commands;
use crate::HistoryAction;
use guidebot_core::{
    AppConfig, Attachment, BlobStore, ChatEngine, ChatModel, ChatRequest, ContextRetriever,
    ConversationStore, DocumentExtractor, DocumentIngestor, Embedder, FsBlobStore,
    OpenAiChatModel, PlainTextExtractor, PromptAssembler, TokenCounter, UploadLog, UsageLog,
    UserDirectory, VectorStore, build_embedder, load_config, load_prompt_rules,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Ask {
            question,
            attach,
            user,
        } => handle_ask(question, attach, user, workspace).await,
        Commands::Ingest { path, uploader } => handle_ingest(path, uploader, workspace).await,
        Commands::History { action } => handle_history(action, workspace).await,
        Commands::Usage => handle_usage(workspace).await,
        Commands::Status => handle_status(workspace).await,
    }
}

/// The shared pieces every model-facing command wires up from config.
struct EngineParts {
    blobs: Arc<dyn BlobStore>,
    store: Arc<RwLock<VectorStore>>,
    embedder: Option<Arc<dyn Embedder>>,
    chat_model: Arc<dyn ChatModel>,
    extractor: Arc<dyn DocumentExtractor>,
}

async fn wire_parts(config: &AppConfig) -> anyhow::Result<EngineParts> {
    let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(config.storage.resolve_data_dir()));
    let store = Arc::new(RwLock::new(
        VectorStore::load(Arc::clone(&blobs), config.embedding.dimensions).await,
    ));
    // Missing embedding credentials degrade retrieval; missing chat
    // credentials are fatal because nothing can answer without them.
    let embedder = build_embedder(&config.embedding);
    let chat_model: Arc<dyn ChatModel> = Arc::new(
        OpenAiChatModel::new(&config.llm, config.budget.max_output_tokens)
            .map_err(|e| anyhow::anyhow!("Chat model unavailable: {}", e))?,
    );
    let extractor: Arc<dyn DocumentExtractor> = Arc::new(PlainTextExtractor);
    Ok(EngineParts {
        blobs,
        store,
        embedder,
        chat_model,
        extractor,
    })
}

fn load_app_config(workspace: &Path) -> anyhow::Result<AppConfig> {
    load_config(Some(workspace), None).map_err(|e| anyhow::anyhow!("Configuration error: {}", e))
}

/// Read a file into an attachment, named by its final path component.
async fn read_attachment(path: &Path) -> anyhow::Result<Attachment> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| anyhow::anyhow!("Cannot read '{}': {}", path.display(), e))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("attachment")
        .to_string();
    debug!(file = %path.display(), bytes = bytes.len(), "Read attachment");
    Ok(Attachment::new(file_name, bytes))
}

fn parse_conversation_id(id: &str) -> anyhow::Result<Uuid> {
    Uuid::parse_str(id).map_err(|_| anyhow::anyhow!("'{}' is not a valid conversation id", id))
}

async fn handle_ask(
    question: String,
    attach: Option<PathBuf>,
    user: String,
    workspace: &Path,
) -> anyhow::Result<()> {
    let config = load_app_config(workspace)?;
    let parts = wire_parts(&config).await?;

    let counter = Arc::new(TokenCounter::new());
    let rules = load_prompt_rules(config.storage.prompt_rules_path.as_deref());
    let assembler = PromptAssembler::new(Arc::clone(&counter), &rules, &config.budget);
    let retriever = ContextRetriever::new(
        Arc::clone(&parts.store),
        parts.embedder.clone(),
        Arc::clone(&parts.chat_model),
        Arc::clone(&parts.extractor),
        config.retrieval.top_k,
    );
    let engine = ChatEngine::new(
        retriever,
        assembler,
        Arc::clone(&parts.chat_model),
        ConversationStore::new(Arc::clone(&parts.blobs)),
        UsageLog::new(Arc::clone(&parts.blobs)),
    );

    let mut request = ChatRequest::new(user, question);
    if let Some(path) = &attach {
        request.attachment = Some(read_attachment(path).await?);
    }

    let outcome = engine.answer(request).await;
    for warning in &outcome.warnings {
        println!("Note: {}", warning);
    }
    if !outcome.warnings.is_empty() {
        println!();
    }
    println!("{}", outcome.reply);
    Ok(())
}

async fn handle_ingest(path: PathBuf, uploader: String, workspace: &Path) -> anyhow::Result<()> {
    let config = load_app_config(workspace)?;
    let parts = wire_parts(&config).await?;

    let ingestor = DocumentIngestor::new(
        Arc::clone(&parts.store),
        parts.embedder.clone(),
        Arc::clone(&parts.chat_model),
        Arc::clone(&parts.extractor),
        Arc::clone(&parts.blobs),
        UploadLog::new(Arc::clone(&parts.blobs)),
        config.retrieval.chunk_size,
    );

    let attachment = read_attachment(&path).await?;
    let report = ingestor
        .learn(&attachment, &uploader)
        .await
        .map_err(|e| anyhow::anyhow!("Ingest failed: {}", e))?;

    println!(
        "Learned '{}' ({}): {} chunk(s) added",
        report.file_name, report.kind, report.chunks_added
    );
    if report.chunks_skipped > 0 {
        println!("  {} chunk(s) skipped", report.chunks_skipped);
    }
    for warning in &report.warnings {
        println!("  Note: {}", warning);
    }
    Ok(())
}

async fn handle_history(action: HistoryAction, workspace: &Path) -> anyhow::Result<()> {
    let config = load_app_config(workspace)?;
    let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(config.storage.resolve_data_dir()));
    let history = ConversationStore::new(blobs);

    match action {
        HistoryAction::List { user } => {
            let conversations = history.list(&user).await;
            if conversations.is_empty() {
                println!("No conversations stored for user '{}'.", user);
                return Ok(());
            }
            println!("Conversations for '{}' ({}):", user, conversations.len());
            for conversation in &conversations {
                println!(
                    "  {}  {}  {} ({} message(s))",
                    conversation.id,
                    conversation.last_updated,
                    conversation.title,
                    conversation.messages.len()
                );
            }
            Ok(())
        }
        HistoryAction::Show { id, user } => {
            let id = parse_conversation_id(&id)?;
            let Some(conversation) = history.find(&user, id).await else {
                anyhow::bail!("No conversation {} for user '{}'", id, user);
            };
            println!("{} (started {})", conversation.title, conversation.timestamp);
            for message in &conversation.messages {
                println!();
                println!("[{}] {}:", message.time, message.role);
                println!("{}", message.content);
            }
            Ok(())
        }
        HistoryAction::Delete { id, user } => {
            let id = parse_conversation_id(&id)?;
            if history.delete(&user, id).await? {
                println!("Deleted conversation {}.", id);
            } else {
                println!("No conversation {} for user '{}'.", id, user);
            }
            Ok(())
        }
    }
}

async fn handle_usage(workspace: &Path) -> anyhow::Result<()> {
    let config = load_app_config(workspace)?;
    let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(config.storage.resolve_data_dir()));
    let usage = UsageLog::new(blobs);

    let totals = usage.totals().await;
    if totals.requests == 0 {
        println!("No usage recorded yet.");
        return Ok(());
    }
    println!("Usage across {} request(s):", totals.requests);
    println!("  Prompt tokens:     {}", totals.prompt_tokens);
    println!("  Completion tokens: {}", totals.completion_tokens);
    println!("  Total tokens:      {}", totals.total_tokens);
    Ok(())
}

async fn handle_status(workspace: &Path) -> anyhow::Result<()> {
    let config = load_app_config(workspace)?;
    let data_dir = config.storage.resolve_data_dir();
    let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(data_dir.clone()));

    let store = VectorStore::load(Arc::clone(&blobs), config.embedding.dimensions).await;
    let users = UserDirectory::new(Arc::clone(&blobs)).load().await;

    println!("Data directory: {}", data_dir.display());
    println!(
        "Vector store: {} chunk(s), dimension {}",
        store.count(),
        store.dimension()
    );
    println!("Registered users: {}", users.len());
    println!(
        "Chat model: {} ({})",
        config.llm.model,
        key_status(&config.llm.api_key_env)
    );
    let embedding_ready = build_embedder(&config.embedding).is_some();
    println!(
        "Embedding: {} {} dim {} ({})",
        config.embedding.provider,
        config.embedding.model,
        config.embedding.dimensions,
        if embedding_ready {
            "ready"
        } else {
            "not configured; retrieval degraded"
        },
    );
    println!(
        "Token budget: {} input target ({} max input, {} reserved output, {} buffer)",
        config.budget.target_input_tokens(),
        config.budget.max_input_tokens,
        config.budget.max_output_tokens,
        config.budget.buffer_tokens
    );

    let warnings = config.validate();
    if !warnings.is_empty() {
        println!("Config warnings:");
        for warning in &warnings {
            println!("  - {}", warning);
        }
    }
    Ok(())
}

fn key_status(api_key_env: &str) -> String {
    match std::env::var(api_key_env) {
        Ok(v) if !v.is_empty() => format!("API key from {}", api_key_env),
        _ => format!("API key missing: env {} not set", api_key_env),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guidebot_core::ConversationRecord;
    use tempfile::TempDir;

    /// Point the blob store at a directory inside the test workspace.
    fn write_workspace_config(workspace: &Path) -> PathBuf {
        let data_dir = workspace.join("data");
        let config_dir = workspace.join(".guidebot");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join("config.toml"),
            format!("[storage]\ndata_dir = \"{}\"\n", data_dir.display()),
        )
        .unwrap();
        data_dir
    }

    #[tokio::test]
    async fn test_usage_with_empty_log() {
        let dir = TempDir::new().unwrap();
        write_workspace_config(dir.path());

        let result = handle_command(Commands::Usage, dir.path()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_status_without_credentials() {
        let dir = TempDir::new().unwrap();
        write_workspace_config(dir.path());

        let result = handle_command(Commands::Status, dir.path()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_history_list_empty() {
        let dir = TempDir::new().unwrap();
        write_workspace_config(dir.path());

        let command = Commands::History {
            action: HistoryAction::List {
                user: "cli".to_string(),
            },
        };
        assert!(handle_command(command, dir.path()).await.is_ok());
    }

    #[tokio::test]
    async fn test_history_show_rejects_malformed_id() {
        let dir = TempDir::new().unwrap();
        write_workspace_config(dir.path());

        let command = Commands::History {
            action: HistoryAction::Show {
                id: "not-a-uuid".to_string(),
                user: "cli".to_string(),
            },
        };
        let err = handle_command(command, dir.path()).await.unwrap_err();
        assert!(err.to_string().contains("not a valid conversation id"));
    }

    #[tokio::test]
    async fn test_history_show_missing_conversation_fails() {
        let dir = TempDir::new().unwrap();
        write_workspace_config(dir.path());

        let command = Commands::History {
            action: HistoryAction::Show {
                id: Uuid::new_v4().to_string(),
                user: "cli".to_string(),
            },
        };
        let err = handle_command(command, dir.path()).await.unwrap_err();
        assert!(err.to_string().contains("No conversation"));
    }

    #[tokio::test]
    async fn test_history_show_and_delete_seeded_conversation() {
        let dir = TempDir::new().unwrap();
        let data_dir = write_workspace_config(dir.path());

        let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(data_dir));
        let history = ConversationStore::new(Arc::clone(&blobs));
        let record = ConversationRecord::new("Filter integrity");
        let id = record.id;
        history.archive("cli", record).await.unwrap();

        let show = Commands::History {
            action: HistoryAction::Show {
                id: id.to_string(),
                user: "cli".to_string(),
            },
        };
        assert!(handle_command(show, dir.path()).await.is_ok());

        let delete = Commands::History {
            action: HistoryAction::Delete {
                id: id.to_string(),
                user: "cli".to_string(),
            },
        };
        assert!(handle_command(delete, dir.path()).await.is_ok());
        assert!(history.find("cli", id).await.is_none());
    }
}
