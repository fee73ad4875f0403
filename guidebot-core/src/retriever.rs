//! Context retrieval for a chat turn.
//!
//! Gathers the reference material that backs one answer: an optional user
//! attachment (captioned or text-extracted) followed by the nearest stored
//! chunks for the query. Every failure here degrades the context instead of
//! failing the turn, so the caller always gets something to assemble.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::completion::ChatModel;
use crate::embeddings::Embedder;
use crate::extract::DocumentExtractor;
use crate::types::{Attachment, AttachmentKind, ContextItem};
use crate::vector_store::VectorStore;

/// Context gathered for one chat turn.
///
/// `items` are ordered attachment-first, then index hits by ascending
/// distance, deduplicated by trimmed content with the first occurrence
/// winning. `warnings` are user-facing notes about material that could not
/// be included.
#[derive(Debug, Default)]
pub struct RetrievedContext {
    pub items: Vec<ContextItem>,
    pub warnings: Vec<String>,
}

/// Retrieves reference context from the vector store and from per-turn
/// attachments.
pub struct ContextRetriever {
    store: Arc<RwLock<VectorStore>>,
    embedder: Option<Arc<dyn Embedder>>,
    chat_model: Arc<dyn ChatModel>,
    extractor: Arc<dyn DocumentExtractor>,
    top_k: usize,
}

impl ContextRetriever {
    pub fn new(
        store: Arc<RwLock<VectorStore>>,
        embedder: Option<Arc<dyn Embedder>>,
        chat_model: Arc<dyn ChatModel>,
        extractor: Arc<dyn DocumentExtractor>,
        top_k: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            chat_model,
            extractor,
            top_k,
        }
    }

    /// Gather context for `query`, folding in `attachment` when present.
    ///
    /// An attached image is captioned by the chat model and the caption is
    /// appended to the query used for the vector search, so the search sees
    /// what the user is looking at. A caption or extraction failure drops the
    /// attachment with a warning; the rest of the turn proceeds.
    pub async fn retrieve(
        &self,
        query: &str,
        attachment: Option<&Attachment>,
    ) -> RetrievedContext {
        let (mut context, image_caption) = self.attachment_items(attachment).await;

        let search_query = match &image_caption {
            Some(caption) => format!("{query}\n\nImage content: {caption}"),
            None => query.to_string(),
        };

        let hits = self.search_index(&search_query, &mut context.warnings).await;
        context.items.extend(hits);
        dedup_items(&mut context.items);
        context
    }

    /// Attachment-derived context only; the vector search is skipped.
    ///
    /// Used when the token budget is already exhausted: the attachment is
    /// still captioned or extracted so its warnings reach the user.
    pub async fn attachment_context(&self, attachment: Option<&Attachment>) -> RetrievedContext {
        let (mut context, _) = self.attachment_items(attachment).await;
        dedup_items(&mut context.items);
        context
    }

    /// Caption or extract `attachment` into context items. Returns the image
    /// caption separately so `retrieve` can fold it into the search query.
    async fn attachment_items(
        &self,
        attachment: Option<&Attachment>,
    ) -> (RetrievedContext, Option<String>) {
        let mut context = RetrievedContext::default();
        let mut image_caption: Option<String> = None;

        if let Some(attachment) = attachment {
            match attachment.kind() {
                AttachmentKind::Image => {
                    debug!(file = %attachment.file_name, "Captioning attached image");
                    match self
                        .chat_model
                        .caption_image(&attachment.file_name, &attachment.bytes)
                        .await
                    {
                        Ok(caption) if !caption.trim().is_empty() => {
                            context
                                .items
                                .push(ContextItem::image(&attachment.file_name, &caption));
                            image_caption = Some(caption);
                        }
                        Ok(_) => {
                            context.warnings.push(format!(
                                "Failed to generate description for image '{}'. File excluded from context.",
                                attachment.file_name
                            ));
                        }
                        Err(e) => {
                            warn!(file = %attachment.file_name, error = %e, "Image captioning failed");
                            context.warnings.push(format!(
                                "Failed to generate description for image '{}'. File excluded from context.",
                                attachment.file_name
                            ));
                        }
                    }
                }
                AttachmentKind::Document => {
                    debug!(file = %attachment.file_name, "Extracting text from attached file");
                    match self
                        .extractor
                        .extract(&attachment.file_name, &attachment.bytes)
                        .await
                    {
                        Some(text) if !text.trim().is_empty() => {
                            context
                                .items
                                .push(ContextItem::document(&attachment.file_name, text));
                        }
                        Some(_) => {
                            context.warnings.push(format!(
                                "File '{}' is empty or content could not be extracted. Excluded from context.",
                                attachment.file_name
                            ));
                        }
                        None => {
                            context.warnings.push(format!(
                                "File '{}' is not a supported document type. Excluded from context.",
                                attachment.file_name
                            ));
                        }
                    }
                }
            }
        }

        (context, image_caption)
    }

    async fn search_index(
        &self,
        search_query: &str,
        warnings: &mut Vec<String>,
    ) -> Vec<ContextItem> {
        if self.store.read().await.is_empty() {
            debug!("Vector store is empty, skipping search");
            return Vec::new();
        }

        let Some(embedder) = &self.embedder else {
            warnings.push(
                "Document search is not configured. Answering without stored references."
                    .to_string(),
            );
            return Vec::new();
        };

        let vector = match embedder.embed(search_query).await {
            Ok(vector) => vector,
            Err(e) => {
                warn!(error = %e, "Query embedding failed, skipping vector search");
                warnings.push(
                    "Document search failed for this question. Answering without stored references."
                        .to_string(),
                );
                return Vec::new();
            }
        };

        let store = self.store.read().await;
        let mut items = Vec::new();
        for hit in store.search(&vector, self.top_k) {
            match store.entry(hit.id) {
                Some(entry) => items.push(ContextItem::from(entry)),
                None => {
                    warn!(position = hit.id, "Search hit has no metadata entry, skipping");
                }
            }
        }
        items
    }
}

/// Drop whitespace-only items and later repeats of the same trimmed content.
fn dedup_items(items: &mut Vec<ContextItem>) {
    let mut seen: HashSet<String> = HashSet::new();
    items.retain(|item| {
        let trimmed = item.content.trim();
        !trimmed.is_empty() && seen.insert(trimmed.to_string())
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobstore::{BlobStore, MemoryBlobStore};
    use crate::completion::MockChatModel;
    use crate::error::LlmError;
    use crate::extract::PlainTextExtractor;
    use crate::types::MetadataEntry;

    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Embedder that returns a fixed vector and records the queries it saw.
    struct SpyEmbedder {
        vector: Vec<f32>,
        queries: Mutex<Vec<String>>,
        fail: bool,
    }

    impl SpyEmbedder {
        fn returning(vector: Vec<f32>) -> Self {
            Self {
                vector,
                queries: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                vector: Vec::new(),
                queries: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        fn last_query(&self) -> Option<String> {
            self.queries.lock().unwrap().last().cloned()
        }
    }

    #[async_trait]
    impl Embedder for SpyEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
            self.queries.lock().unwrap().push(text.to_string());
            if self.fail {
                return Err(LlmError::ApiRequest {
                    message: "embedding backend down".to_string(),
                });
            }
            Ok(self.vector.clone())
        }

        async fn embed_batch(&self, texts: &[String]) -> Vec<Option<Vec<f32>>> {
            let mut out = Vec::with_capacity(texts.len());
            for text in texts {
                out.push(self.embed(text).await.ok());
            }
            out
        }

        fn dimensions(&self) -> usize {
            self.vector.len()
        }

        fn provider_name(&self) -> &str {
            "spy"
        }
    }

    fn entry(name: &str, content: &str) -> MetadataEntry {
        MetadataEntry {
            file_name: name.to_string(),
            content: content.to_string(),
            is_image_description: false,
            original_file_extension: "txt".to_string(),
        }
    }

    async fn store_with(entries: Vec<(MetadataEntry, Vec<f32>)>) -> Arc<RwLock<VectorStore>> {
        let blobs: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let mut store = VectorStore::load(blobs, 2).await;
        store.add_batch(entries).expect("batch should load");
        Arc::new(RwLock::new(store))
    }

    fn retriever(
        store: Arc<RwLock<VectorStore>>,
        embedder: Option<Arc<dyn Embedder>>,
        model: Arc<MockChatModel>,
    ) -> ContextRetriever {
        ContextRetriever::new(
            store,
            embedder,
            model,
            Arc::new(PlainTextExtractor),
            3,
        )
    }

    #[tokio::test]
    async fn nearest_chunks_come_back_in_distance_order() {
        let store = store_with(vec![
            (entry("far.txt", "far away"), vec![10.0, 10.0]),
            (entry("near.txt", "right here"), vec![0.1, 0.1]),
            (entry("mid.txt", "in between"), vec![1.0, 1.0]),
        ])
        .await;
        let embedder = Arc::new(SpyEmbedder::returning(vec![0.0, 0.0]));
        let retriever = retriever(store, Some(embedder), Arc::new(MockChatModel::new()));

        let context = retriever.retrieve("where is it", None).await;

        let sources: Vec<&str> = context.items.iter().map(|i| i.source.as_str()).collect();
        assert_eq!(sources, vec!["near.txt", "mid.txt", "far.txt"]);
        assert!(context.warnings.is_empty());
    }

    #[tokio::test]
    async fn image_caption_joins_the_search_query() {
        let store = store_with(vec![(entry("sop.txt", "gowning steps"), vec![0.0, 0.0])]).await;
        let embedder = Arc::new(SpyEmbedder::returning(vec![0.0, 0.0]));
        let model = Arc::new(MockChatModel::new());
        model.queue_caption("A gloved hand holding a vial");
        let retriever = retriever(store, Some(embedder.clone()), model);

        let attachment = Attachment::new("photo.png", vec![1, 2, 3]);
        let context = retriever.retrieve("what is this", Some(&attachment)).await;

        assert_eq!(
            embedder.last_query().as_deref(),
            Some("what is this\n\nImage content: A gloved hand holding a vial")
        );
        assert_eq!(context.items[0].source, "photo.png");
        assert!(context.items[0].is_image_description);
        assert_eq!(context.items[1].source, "sop.txt");
    }

    #[tokio::test]
    async fn caption_failure_warns_and_searches_with_plain_query() {
        let store = store_with(vec![(entry("sop.txt", "gowning steps"), vec![0.0, 0.0])]).await;
        let embedder = Arc::new(SpyEmbedder::returning(vec![0.0, 0.0]));
        let model = Arc::new(MockChatModel::new());
        model.queue_caption_error(LlmError::Timeout { timeout_secs: 60 });
        let retriever = retriever(store, Some(embedder.clone()), model);

        let attachment = Attachment::new("photo.jpg", vec![1]);
        let context = retriever.retrieve("what is this", Some(&attachment)).await;

        assert_eq!(embedder.last_query().as_deref(), Some("what is this"));
        assert_eq!(context.items.len(), 1);
        assert_eq!(context.items[0].source, "sop.txt");
        assert_eq!(context.warnings.len(), 1);
        assert!(context.warnings[0].contains("photo.jpg"));
    }

    #[tokio::test]
    async fn blank_caption_is_treated_as_a_failure() {
        let store = store_with(Vec::new()).await;
        let embedder = Arc::new(SpyEmbedder::returning(vec![0.0, 0.0]));
        let model = Arc::new(MockChatModel::new());
        model.queue_caption("   \n ");
        let retriever = retriever(store, Some(embedder), model);

        let attachment = Attachment::new("photo.png", vec![1]);
        let context = retriever.retrieve("question", Some(&attachment)).await;

        assert!(context.items.is_empty());
        assert!(context.warnings[0].contains("Failed to generate description"));
    }

    #[tokio::test]
    async fn text_attachment_lands_ahead_of_index_hits() {
        let store = store_with(vec![(entry("sop.txt", "stored chunk"), vec![0.0, 0.0])]).await;
        let embedder = Arc::new(SpyEmbedder::returning(vec![0.0, 0.0]));
        let retriever = retriever(store, Some(embedder), Arc::new(MockChatModel::new()));

        let attachment = Attachment::new("notes.txt", b"fresh notes".to_vec());
        let context = retriever.retrieve("question", Some(&attachment)).await;

        assert_eq!(context.items.len(), 2);
        assert_eq!(context.items[0].source, "notes.txt");
        assert_eq!(context.items[0].content, "fresh notes");
        assert!(!context.items[0].is_image_description);
        assert_eq!(context.items[1].source, "sop.txt");
    }

    #[tokio::test]
    async fn attachment_content_shadows_an_identical_stored_chunk() {
        let store = store_with(vec![
            (entry("sop.txt", "wear gloves"), vec![0.0, 0.0]),
            (entry("other.txt", "  "), vec![0.2, 0.2]),
        ])
        .await;
        let embedder = Arc::new(SpyEmbedder::returning(vec![0.0, 0.0]));
        let retriever = retriever(store, Some(embedder), Arc::new(MockChatModel::new()));

        let attachment = Attachment::new("notes.txt", b"wear gloves".to_vec());
        let context = retriever.retrieve("question", Some(&attachment)).await;

        assert_eq!(context.items.len(), 1);
        assert_eq!(context.items[0].source, "notes.txt");
    }

    #[tokio::test]
    async fn unsupported_attachment_only_warns() {
        let store = store_with(Vec::new()).await;
        let embedder = Arc::new(SpyEmbedder::returning(vec![0.0, 0.0]));
        let retriever = retriever(store, Some(embedder), Arc::new(MockChatModel::new()));

        let attachment = Attachment::new("report.pdf", vec![0x25, 0x50]);
        let context = retriever.retrieve("question", Some(&attachment)).await;

        assert!(context.items.is_empty());
        assert!(context.warnings[0].contains("report.pdf"));
        assert!(context.warnings[0].contains("not a supported"));
    }

    #[tokio::test]
    async fn empty_attachment_text_warns_instead_of_adding_context() {
        let store = store_with(Vec::new()).await;
        let embedder = Arc::new(SpyEmbedder::returning(vec![0.0, 0.0]));
        let retriever = retriever(store, Some(embedder), Arc::new(MockChatModel::new()));

        let attachment = Attachment::new("blank.txt", b"   ".to_vec());
        let context = retriever.retrieve("question", Some(&attachment)).await;

        assert!(context.items.is_empty());
        assert!(context.warnings[0].contains("empty or content could not be extracted"));
    }

    #[tokio::test]
    async fn missing_embedder_degrades_to_no_search() {
        let store = store_with(vec![(entry("sop.txt", "stored chunk"), vec![0.0, 0.0])]).await;
        let retriever = retriever(store, None, Arc::new(MockChatModel::new()));

        let context = retriever.retrieve("question", None).await;

        assert!(context.items.is_empty());
        assert_eq!(context.warnings.len(), 1);
        assert!(context.warnings[0].contains("not configured"));
    }

    #[tokio::test]
    async fn embedding_failure_degrades_to_no_search() {
        let store = store_with(vec![(entry("sop.txt", "stored chunk"), vec![0.0, 0.0])]).await;
        let embedder = Arc::new(SpyEmbedder::failing());
        let retriever = retriever(store, Some(embedder), Arc::new(MockChatModel::new()));

        let context = retriever.retrieve("question", None).await;

        assert!(context.items.is_empty());
        assert!(context.warnings[0].contains("search failed"));
    }

    #[tokio::test]
    async fn empty_store_never_embeds_the_query() {
        let store = store_with(Vec::new()).await;
        let embedder = Arc::new(SpyEmbedder::returning(vec![0.0, 0.0]));
        let retriever = retriever(store, Some(embedder.clone()), Arc::new(MockChatModel::new()));

        let context = retriever.retrieve("anything on gowning?", None).await;

        assert!(context.items.is_empty());
        assert!(context.warnings.is_empty());
        assert_eq!(embedder.last_query(), None);
    }

    #[tokio::test]
    async fn attachment_context_skips_the_search_but_keeps_the_attachment() {
        let store = store_with(vec![(entry("sop.txt", "stored chunk"), vec![0.0, 0.0])]).await;
        let embedder = Arc::new(SpyEmbedder::returning(vec![0.0, 0.0]));
        let retriever = retriever(store, Some(embedder.clone()), Arc::new(MockChatModel::new()));

        let attachment = Attachment::new("notes.txt", b"fresh notes".to_vec());
        let context = retriever.attachment_context(Some(&attachment)).await;

        assert_eq!(context.items.len(), 1);
        assert_eq!(context.items[0].source, "notes.txt");
        assert_eq!(embedder.last_query(), None);
    }

    #[tokio::test]
    async fn attachment_survives_even_when_search_is_down() {
        let store = store_with(vec![(entry("sop.txt", "stored chunk"), vec![0.0, 0.0])]).await;
        let retriever = retriever(store, None, Arc::new(MockChatModel::new()));

        let attachment = Attachment::new("notes.md", b"key fact".to_vec());
        let context = retriever.retrieve("question", Some(&attachment)).await;

        assert_eq!(context.items.len(), 1);
        assert_eq!(context.items[0].content, "key fact");
        assert_eq!(context.warnings.len(), 1);
    }
}
