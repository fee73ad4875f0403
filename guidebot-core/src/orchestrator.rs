//! Chat turn orchestration.
//!
//! One turn runs retrieval, prompt assembly, and a single completion call in
//! that order, then archives the exchange and records token usage. When the
//! question alone spends the whole input budget the document search is
//! skipped for the turn; an attachment is still captioned or extracted so
//! its warnings reach the user. There is no retry: a failed completion maps
//! to a user-facing fallback reply and the turn ends with that reply in
//! place of an answer. Failures never propagate out of
//! [`ChatEngine::answer`].

use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::completion::ChatModel;
use crate::error::LlmError;
use crate::history::{conversation_title, ConversationStore};
use crate::logs::UsageLog;
use crate::prompt::PromptAssembler;
use crate::retriever::ContextRetriever;
use crate::types::{
    timestamp_now, Attachment, ChatMessage, ConversationRecord, TokenUsage, UsageLogEntry,
};

/// Request type tag written to the usage log for chat turns.
pub const CHAT_REQUEST_TYPE: &str = "chat_completion_with_rag";

/// Phases of one chat turn, in execution order. `Failed` still carries a
/// displayable reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    RetrievingContext,
    AssemblingPrompt,
    AwaitingCompletion,
    Delivered,
    Failed,
}

/// One question for the engine to answer.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub user_id: String,
    pub query: String,
    pub attachment: Option<Attachment>,
    /// Continue this conversation; `None` starts a new one.
    pub conversation_id: Option<Uuid>,
}

impl ChatRequest {
    pub fn new(user_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            query: query.into(),
            attachment: None,
            conversation_id: None,
        }
    }
}

/// What one chat turn produced.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    /// The assistant reply, or a fallback message when the turn failed.
    pub reply: String,
    /// Terminal phase: `Delivered` or `Failed`.
    pub phase: TurnPhase,
    /// Id of the conversation the turn was archived into. `None` when the
    /// turn failed before anything was worth archiving.
    pub conversation_id: Option<Uuid>,
    pub warnings: Vec<String>,
    pub usage: Option<TokenUsage>,
    pub context_items: usize,
    pub final_input_tokens: usize,
}

/// Reply shown in place of an answer, one distinct message per failure kind.
pub fn fallback_reply(error: &LlmError) -> String {
    match error {
        LlmError::Timeout { .. } => {
            "The answer took too long to generate. Please try again shortly.".to_string()
        }
        LlmError::RateLimited { retry_after_secs } => format!(
            "The service is handling too many requests. Please try again in about {retry_after_secs} seconds."
        ),
        LlmError::Connection { .. } => {
            "Could not reach the answer service. Please check the network connection and try again."
                .to_string()
        }
        LlmError::AuthFailed { .. } => {
            "The answer service rejected our credentials. Contact admin.".to_string()
        }
        LlmError::ResponseParse { .. } => {
            "The answer service returned an unexpected response. Please try again shortly."
                .to_string()
        }
        LlmError::ApiRequest { .. } => {
            "Error generating response. Please try again shortly.".to_string()
        }
    }
}

/// Sequences retrieval, assembly, completion, and bookkeeping for chat turns.
pub struct ChatEngine {
    retriever: ContextRetriever,
    assembler: PromptAssembler,
    chat_model: Arc<dyn ChatModel>,
    history: ConversationStore,
    usage_log: UsageLog,
}

impl ChatEngine {
    pub fn new(
        retriever: ContextRetriever,
        assembler: PromptAssembler,
        chat_model: Arc<dyn ChatModel>,
        history: ConversationStore,
        usage_log: UsageLog,
    ) -> Self {
        Self {
            retriever,
            assembler,
            chat_model,
            history,
            usage_log,
        }
    }

    /// Answer one question. Always returns a displayable reply.
    pub async fn answer(&self, request: ChatRequest) -> ChatOutcome {
        let query = request.query.trim();
        if query.is_empty() {
            return ChatOutcome {
                reply: "Please enter a question.".to_string(),
                phase: TurnPhase::Failed,
                conversation_id: None,
                warnings: Vec::new(),
                usage: None,
                context_items: 0,
                final_input_tokens: 0,
            };
        }

        let mut phase = TurnPhase::RetrievingContext;
        debug!(phase = ?phase, user = %request.user_id, "Starting chat turn");
        let context_budget = self.assembler.context_budget(query);
        let retrieved = if context_budget > 0 {
            self.retriever
                .retrieve(query, request.attachment.as_ref())
                .await
        } else {
            debug!(context_budget, "No token budget left for context, skipping document search");
            self.retriever
                .attachment_context(request.attachment.as_ref())
                .await
        };
        let mut warnings = retrieved.warnings;

        phase = TurnPhase::AssemblingPrompt;
        debug!(phase = ?phase, context_items = retrieved.items.len(), "Context retrieved");
        let assembled = self.assembler.assemble(query, &retrieved.items);
        warnings.extend(assembled.warnings.iter().cloned());

        phase = TurnPhase::AwaitingCompletion;
        debug!(phase = ?phase, final_input_tokens = assembled.final_input_tokens, "Prompt assembled");
        match self
            .chat_model
            .complete(&assembled.system_prompt, query)
            .await
        {
            Ok(completion) => {
                let conversation_id = self
                    .archive_turn(&request, query, &completion.text, &mut warnings)
                    .await;
                if let Some(usage) = completion.usage {
                    self.record_usage(&request.user_id, usage).await;
                }
                info!(
                    user = %request.user_id,
                    context_items = retrieved.items.len(),
                    final_input_tokens = assembled.final_input_tokens,
                    "Chat turn delivered"
                );
                ChatOutcome {
                    reply: completion.text,
                    phase: TurnPhase::Delivered,
                    conversation_id: Some(conversation_id),
                    warnings,
                    usage: completion.usage,
                    context_items: retrieved.items.len(),
                    final_input_tokens: assembled.final_input_tokens,
                }
            }
            Err(e) => {
                error!(error = %e, user = %request.user_id, "Chat completion failed");
                ChatOutcome {
                    reply: fallback_reply(&e),
                    phase: TurnPhase::Failed,
                    conversation_id: None,
                    warnings,
                    usage: None,
                    context_items: retrieved.items.len(),
                    final_input_tokens: assembled.final_input_tokens,
                }
            }
        }
    }

    /// Append the user/assistant exchange to its conversation and archive it.
    /// An archive failure downgrades to a warning; the reply is already in
    /// hand and still gets delivered.
    async fn archive_turn(
        &self,
        request: &ChatRequest,
        query: &str,
        reply: &str,
        warnings: &mut Vec<String>,
    ) -> Uuid {
        let mut record = match request.conversation_id {
            Some(id) => match self.history.find(&request.user_id, id).await {
                Some(existing) => existing,
                None => {
                    warn!(conversation_id = %id, "Conversation not found, starting a new one");
                    ConversationRecord::new(conversation_title(query))
                }
            },
            None => ConversationRecord::new(conversation_title(query)),
        };

        let mut user_content = query.to_string();
        if let Some(attachment) = &request.attachment {
            user_content.push_str(&format!("\n(Attached file: {})", attachment.file_name));
        }
        record.messages.push(ChatMessage::user(user_content));
        record.messages.push(ChatMessage::assistant(reply));

        let id = record.id;
        if let Err(e) = self.history.archive(&request.user_id, record).await {
            warn!(error = %e, user = %request.user_id, "Failed to archive conversation");
            warnings.push("Could not save this conversation to history.".to_string());
        }
        id
    }

    async fn record_usage(&self, user_id: &str, usage: TokenUsage) {
        self.usage_log
            .append(UsageLogEntry {
                user_id: user_id.to_string(),
                timestamp: timestamp_now(),
                model_used: self.chat_model.model_name().to_string(),
                request_type: CHAT_REQUEST_TYPE.to_string(),
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            })
            .await;
    }
}
