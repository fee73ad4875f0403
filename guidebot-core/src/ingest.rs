//! Document ingest: turn one uploaded file into searchable chunks.
//!
//! Images are captioned and the caption is learned as a single chunk;
//! documents are text-extracted and chunked. Chunks are embedded in batches,
//! added to the vector store, and persisted, after which an audit copy of the
//! original bytes and an upload-log entry are written. The audit copy and the
//! log entry are fail-soft; everything before them aborts the ingest on
//! failure.

use std::sync::Arc;

use chrono::Local;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::blobstore::{self, BlobStore};
use crate::chunk::chunk_text;
use crate::completion::ChatModel;
use crate::embeddings::Embedder;
use crate::error::{IngestError, Result};
use crate::extract::DocumentExtractor;
use crate::logs::UploadLog;
use crate::types::{
    timestamp_now, Attachment, AttachmentKind, MetadataEntry, UploadKind, UploadLogEntry,
};
use crate::vector_store::VectorStore;

/// Timestamp prefix on audit copies of uploaded originals.
const ORIGINAL_STAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// What one ingest run accomplished.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub file_name: String,
    pub kind: UploadKind,
    pub chunks_added: usize,
    pub chunks_skipped: usize,
    pub warnings: Vec<String>,
}

/// Learns uploaded files into the vector store.
pub struct DocumentIngestor {
    store: Arc<RwLock<VectorStore>>,
    embedder: Option<Arc<dyn Embedder>>,
    chat_model: Arc<dyn ChatModel>,
    extractor: Arc<dyn DocumentExtractor>,
    blobs: Arc<dyn BlobStore>,
    upload_log: UploadLog,
    chunk_size: usize,
}

impl DocumentIngestor {
    pub fn new(
        store: Arc<RwLock<VectorStore>>,
        embedder: Option<Arc<dyn Embedder>>,
        chat_model: Arc<dyn ChatModel>,
        extractor: Arc<dyn DocumentExtractor>,
        blobs: Arc<dyn BlobStore>,
        upload_log: UploadLog,
        chunk_size: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            chat_model,
            extractor,
            blobs,
            upload_log,
            chunk_size,
        }
    }

    /// Learn one uploaded file. Returns what was added, or an error when the
    /// file yielded nothing learnable.
    pub async fn learn(&self, attachment: &Attachment, uploader: &str) -> Result<IngestReport> {
        let Some(embedder) = &self.embedder else {
            return Err(IngestError::EmbeddingUnavailable.into());
        };

        let (chunks, kind, is_image_description) = self.prepare_chunks(attachment).await?;
        let vectors = embedder.embed_batch(&chunks).await;

        let extension = attachment.extension();
        let mut batch = Vec::new();
        let mut skipped = 0usize;
        for (chunk, vector) in chunks.iter().zip(vectors) {
            match vector {
                Some(vector) => batch.push((
                    MetadataEntry {
                        file_name: attachment.file_name.clone(),
                        content: chunk.clone(),
                        is_image_description,
                        original_file_extension: extension.clone(),
                    },
                    vector,
                )),
                None => skipped += 1,
            }
        }

        if batch.is_empty() {
            return Err(IngestError::NoChunksEmbedded {
                file_name: attachment.file_name.clone(),
            }
            .into());
        }

        let mut warnings = Vec::new();
        if skipped > 0 {
            warn!(file = %attachment.file_name, skipped, "Some chunks failed embedding");
            warnings.push(format!(
                "{skipped} chunk(s) of '{}' failed embedding and were skipped.",
                attachment.file_name
            ));
        }

        let chunks_added = batch.len();
        {
            let mut store = self.store.write().await;
            store.add_batch(batch)?;
            store.persist().await?;
        }

        let stamp = Local::now().format(ORIGINAL_STAMP_FORMAT).to_string();
        let key = blobstore::original_key(&stamp, &attachment.file_name);
        if let Err(e) = self.blobs.put(&key, &attachment.bytes).await {
            warn!(key, error = %e, "Failed to save audit copy of upload");
            warnings.push(format!(
                "Failed to save an audit copy of '{}'.",
                attachment.file_name
            ));
        }

        self.upload_log
            .append(UploadLogEntry {
                file: attachment.file_name.clone(),
                kind,
                time: timestamp_now(),
                chunks_added,
                uploader: uploader.to_string(),
            })
            .await;

        info!(
            file = %attachment.file_name,
            chunks_added,
            chunks_skipped = skipped,
            "Document learned"
        );
        Ok(IngestReport {
            file_name: attachment.file_name.clone(),
            kind,
            chunks_added,
            chunks_skipped: skipped,
            warnings,
        })
    }

    /// Caption or extract the attachment into the chunks to embed.
    async fn prepare_chunks(
        &self,
        attachment: &Attachment,
    ) -> Result<(Vec<String>, UploadKind, bool)> {
        match attachment.kind() {
            AttachmentKind::Image => {
                let caption = self
                    .chat_model
                    .caption_image(&attachment.file_name, &attachment.bytes)
                    .await?;
                if caption.trim().is_empty() {
                    return Err(IngestError::NoUsableContent {
                        file_name: attachment.file_name.clone(),
                    }
                    .into());
                }
                Ok((vec![caption], UploadKind::Image, true))
            }
            AttachmentKind::Document => {
                let text = self
                    .extractor
                    .extract(&attachment.file_name, &attachment.bytes)
                    .await
                    .filter(|text| !text.trim().is_empty())
                    .ok_or_else(|| IngestError::NoUsableContent {
                        file_name: attachment.file_name.clone(),
                    })?;
                let chunks = chunk_text(&text, self.chunk_size);
                if chunks.is_empty() {
                    return Err(IngestError::NoUsableContent {
                        file_name: attachment.file_name.clone(),
                    }
                    .into());
                }
                Ok((chunks, UploadKind::TextDocument, false))
            }
        }
    }
}
