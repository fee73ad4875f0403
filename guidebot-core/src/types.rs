//! Core data types shared across the GuideBot pipeline.
//!
//! Every record that lands in a blob (metadata entries, conversation records,
//! usage and upload log entries, user records) lives here with its serde shape,
//! alongside the request-scoped types the retrieval pipeline passes around.

use chrono::Local;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Timestamp format used across all persisted records.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current local time formatted for persistence.
pub fn timestamp_now() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Role of a chat message participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single message within a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub time: String,
}

impl ChatMessage {
    /// Create a message stamped with the current time.
    pub fn now(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            time: timestamp_now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::now(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::now(Role::Assistant, content)
    }
}

/// One archived conversation belonging to a user.
///
/// Mutated in place while it is the active conversation; the whole per-user
/// set is persisted as a single blob, last writer wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: Uuid,
    pub title: String,
    pub timestamp: String,
    pub messages: Vec<ChatMessage>,
    pub last_updated: String,
}

impl ConversationRecord {
    /// Create an empty conversation with a fresh id and current timestamps.
    pub fn new(title: impl Into<String>) -> Self {
        let now = timestamp_now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            timestamp: now.clone(),
            messages: Vec::new(),
            last_updated: now,
        }
    }
}

/// Metadata stored alongside each embedded chunk, at the same position as its
/// vector in the flat index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub file_name: String,
    pub content: String,
    pub is_image_description: bool,
    pub original_file_extension: String,
}

/// A candidate context snippet for inclusion in a prompt.
///
/// Request-scoped; built either from an attachment (extracted text or image
/// caption) or from a vector search hit. Never persisted standalone.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextItem {
    pub source: String,
    pub content: String,
    pub is_image_description: bool,
}

impl ContextItem {
    pub fn document(source: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            content: content.into(),
            is_image_description: false,
        }
    }

    pub fn image(source: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            content: content.into(),
            is_image_description: true,
        }
    }
}

impl From<&MetadataEntry> for ContextItem {
    fn from(entry: &MetadataEntry) -> Self {
        Self {
            source: entry.file_name.clone(),
            content: entry.content.clone(),
            is_image_description: entry.is_image_description,
        }
    }
}

/// Token usage reported by a completion call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

impl TokenUsage {
    /// Build a usage record from prompt/completion counts.
    pub fn from_counts(prompt_tokens: usize, completion_tokens: usize) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Result of a chat completion call: the reply text plus its token
/// accounting, when the provider reported any.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatCompletion {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

/// Append-only record of token counts per chat request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageLogEntry {
    pub user_id: String,
    pub timestamp: String,
    pub model_used: String,
    pub request_type: String,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// Classification of an ingested upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadKind {
    Image,
    TextDocument,
}

impl std::fmt::Display for UploadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadKind::Image => write!(f, "image"),
            UploadKind::TextDocument => write!(f, "text_document"),
        }
    }
}

/// Append-only record of a learned document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadLogEntry {
    pub file: String,
    #[serde(rename = "type")]
    pub kind: UploadKind,
    pub time: String,
    pub chunks_added: usize,
    pub uploader: String,
}

/// A registered user, keyed by user id in `app_data/users.json`.
///
/// Authentication is handled outside this crate; the password hash is carried
/// as an opaque string and never computed or verified here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub name: String,
    pub department: String,
    pub password_hash: String,
    pub approved: bool,
    pub role: String,
}

/// File extensions recognized as images for captioning.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Broad classification of an attachment, by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Image,
    Document,
}

/// An uploaded file accompanying a question or an ingest request.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }

    /// Lowercased file extension, without the dot.
    pub fn extension(&self) -> String {
        self.file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default()
    }

    pub fn kind(&self) -> AttachmentKind {
        if IMAGE_EXTENSIONS.contains(&self.extension().as_str()) {
            AttachmentKind::Image
        } else {
            AttachmentKind::Document
        }
    }
}
