//! Append-only usage and upload logs, plus read-only user records.
//!
//! Both logs are whole-blob JSON arrays: append loads the current array,
//! pushes, and rewrites. A failed append is logged and dropped rather than
//! failing the operation that produced the entry.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::blobstore::{self, BlobStore, UPLOAD_LOG_KEY, USAGE_LOG_KEY, USERS_KEY};
use crate::types::{UploadLogEntry, UsageLogEntry, UserRecord};

/// Sums over the usage log, for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageTotals {
    pub requests: usize,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// Append-only log of token usage per model request.
pub struct UsageLog {
    blobs: Arc<dyn BlobStore>,
}

impl UsageLog {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    /// Append one entry, fail-soft.
    pub async fn append(&self, entry: UsageLogEntry) {
        let mut entries: Vec<UsageLogEntry> =
            blobstore::load_json_or_default(self.blobs.as_ref(), USAGE_LOG_KEY).await;
        entries.push(entry);
        if let Err(e) = blobstore::save_json(self.blobs.as_ref(), USAGE_LOG_KEY, &entries).await {
            warn!(error = %e, "Failed to save usage log entry");
        }
    }

    pub async fn entries(&self) -> Vec<UsageLogEntry> {
        blobstore::load_json_or_default(self.blobs.as_ref(), USAGE_LOG_KEY).await
    }

    /// Token totals across every recorded request.
    pub async fn totals(&self) -> UsageTotals {
        let mut totals = UsageTotals::default();
        for entry in self.entries().await {
            totals.requests += 1;
            totals.prompt_tokens += entry.prompt_tokens;
            totals.completion_tokens += entry.completion_tokens;
            totals.total_tokens += entry.total_tokens;
        }
        totals
    }
}

/// Append-only audit log of learned uploads.
pub struct UploadLog {
    blobs: Arc<dyn BlobStore>,
}

impl UploadLog {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    /// Append one entry, fail-soft.
    pub async fn append(&self, entry: UploadLogEntry) {
        let mut entries: Vec<UploadLogEntry> =
            blobstore::load_json_or_default(self.blobs.as_ref(), UPLOAD_LOG_KEY).await;
        entries.push(entry);
        if let Err(e) = blobstore::save_json(self.blobs.as_ref(), UPLOAD_LOG_KEY, &entries).await {
            warn!(error = %e, "Failed to save upload log entry");
        }
    }

    pub async fn entries(&self) -> Vec<UploadLogEntry> {
        blobstore::load_json_or_default(self.blobs.as_ref(), UPLOAD_LOG_KEY).await
    }
}

/// Read-only view of the registered users blob. Registration and
/// authentication happen elsewhere; this crate only reads the records.
pub struct UserDirectory {
    blobs: Arc<dyn BlobStore>,
}

impl UserDirectory {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    pub async fn load(&self) -> HashMap<String, UserRecord> {
        blobstore::load_json_or_default(self.blobs.as_ref(), USERS_KEY).await
    }

    pub async fn get(&self, user_id: &str) -> Option<UserRecord> {
        self.load().await.remove(user_id)
    }
}
