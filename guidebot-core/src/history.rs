//! Per-user conversation archive.
//!
//! All of a user's conversations live in one blob,
//! `chat_histories/{user}_history.json`, rewritten as a whole on every
//! archive. Concurrent writers race and the last writer wins. Reads are
//! fail-soft: a missing or corrupt blob loads as an empty archive.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::blobstore::{self, BlobStore};
use crate::error::Result;
use crate::types::{timestamp_now, ConversationRecord};

/// Schema version written to new history blobs.
pub const HISTORY_SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    HISTORY_SCHEMA_VERSION
}

/// On-disk shape of one user's history blob. Blobs written before versioning
/// carry no `schema_version` field and deserialize as version 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryFile {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub conversations: Vec<ConversationRecord>,
}

impl Default for HistoryFile {
    fn default() -> Self {
        Self {
            schema_version: HISTORY_SCHEMA_VERSION,
            conversations: Vec::new(),
        }
    }
}

/// Derive a conversation title from its first user message.
pub fn conversation_title(first_message: &str) -> String {
    let title: String = first_message.trim().chars().take(40).collect();
    if title.is_empty() {
        "New conversation".to_string()
    } else {
        title
    }
}

/// Loads, upserts, and deletes conversations for individual users.
pub struct ConversationStore {
    blobs: Arc<dyn BlobStore>,
}

impl ConversationStore {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    /// Load a user's full archive, empty when missing or unreadable.
    pub async fn load(&self, user_id: &str) -> HistoryFile {
        let key = blobstore::history_key(user_id);
        let file: HistoryFile =
            blobstore::load_json_or_default(self.blobs.as_ref(), &key).await;
        if file.schema_version > HISTORY_SCHEMA_VERSION {
            warn!(
                key,
                schema_version = file.schema_version,
                "History blob was written by a newer version; loading as-is"
            );
        }
        file
    }

    /// Look up one conversation by id.
    pub async fn find(&self, user_id: &str, id: Uuid) -> Option<ConversationRecord> {
        self.load(user_id)
            .await
            .conversations
            .into_iter()
            .find(|c| c.id == id)
    }

    /// Insert or replace a conversation, refreshing its `last_updated` stamp.
    pub async fn archive(&self, user_id: &str, conversation: ConversationRecord) -> Result<()> {
        let mut conversation = conversation;
        conversation.last_updated = timestamp_now();

        let mut file = self.load(user_id).await;
        match file
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation.id)
        {
            Some(slot) => *slot = conversation,
            None => file.conversations.push(conversation),
        }

        let key = blobstore::history_key(user_id);
        blobstore::save_json(self.blobs.as_ref(), &key, &file).await?;
        Ok(())
    }

    /// Remove a conversation. Returns whether anything was deleted.
    pub async fn delete(&self, user_id: &str, id: Uuid) -> Result<bool> {
        let mut file = self.load(user_id).await;
        let before = file.conversations.len();
        file.conversations.retain(|c| c.id != id);
        if file.conversations.len() == before {
            return Ok(false);
        }

        let key = blobstore::history_key(user_id);
        blobstore::save_json(self.blobs.as_ref(), &key, &file).await?;
        Ok(true)
    }

    /// All conversations for a user, most recently updated first.
    pub async fn list(&self, user_id: &str) -> Vec<ConversationRecord> {
        let mut conversations = self.load(user_id).await.conversations;
        conversations.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        conversations
    }
}
