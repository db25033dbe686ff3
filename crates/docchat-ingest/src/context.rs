//! Document context: uploaded file → chunks → retriever, with a result cache.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::chunking::{RecursiveChunker, TextChunk};
use crate::embedder::EmbedderBackend;
use crate::file;
use crate::retriever::Retriever;
use docchat_core::{ChunkParams, Error, Result};

const CACHE_CAPACITY: usize = 16;

/// Chunks and retriever built from one uploaded document.
#[derive(Debug, Clone)]
pub struct DocumentContext {
    pub filename: Option<String>,
    pub content_hash: String,
    pub params: ChunkParams,
    pub chunks: Arc<Vec<TextChunk>>,
    pub retriever: Retriever,
}

impl DocumentContext {
    /// All chunk texts in document order.
    pub fn texts(&self) -> Vec<&str> {
        self.chunks.iter().map(|c| c.text.as_str()).collect()
    }
}

/// Extract, chunk and index an uploaded file.
pub async fn get_texts_and_retriever(
    bytes: &[u8],
    filename: Option<&str>,
    params: ChunkParams,
    embedder: Arc<dyn EmbedderBackend>,
) -> Result<DocumentContext> {
    let params = params.clamped();
    let text = file::extract_text(bytes, filename)?;

    let chunks = RecursiveChunker::from_params(&params).chunk(&text);
    if chunks.is_empty() {
        return Err(Error::Ingest("Document produced no chunks".into()));
    }
    let chunks = Arc::new(chunks);

    let retriever = Retriever::build(chunks.clone(), embedder, params.k).await?;

    info!(
        "Indexed {} into {} chunks (size={}, overlap={}, k={})",
        filename.unwrap_or("upload"),
        chunks.len(),
        params.chunk_size,
        params.chunk_overlap,
        params.k
    );

    Ok(DocumentContext {
        filename: filename.map(str::to_string),
        content_hash: content_hash(bytes),
        params,
        chunks,
        retriever,
    })
}

/// Compute SHA-256 content hash.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Small LRU of built document contexts, keyed by content, parameters and
/// embedder identity. The filename belongs to the caller, not the entry.
#[derive(Default)]
pub struct IngestCache {
    entries: Mutex<VecDeque<(String, Arc<DocumentContext>)>>,
}

impl IngestCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(bytes: &[u8], params: &ChunkParams, embedder: &dyn EmbedderBackend) -> String {
        let params = params.clamped();
        format!(
            "{}:{}:{}:{}:{}",
            content_hash(bytes),
            params.chunk_size,
            params.chunk_overlap,
            params.k,
            embedder.identity()
        )
    }

    /// Return the cached context or build and cache a new one.
    pub async fn get_or_build(
        &self,
        bytes: &[u8],
        filename: Option<&str>,
        params: ChunkParams,
        embedder: Arc<dyn EmbedderBackend>,
    ) -> Result<Arc<DocumentContext>> {
        let key = Self::key(bytes, &params, embedder.as_ref());

        let cached = {
            let mut entries = self.entries.lock();
            match entries.iter().position(|(k, _)| *k == key) {
                Some(pos) => entries.remove(pos).map(|entry| {
                    let context = entry.1.clone();
                    entries.push_back(entry);
                    context
                }),
                None => None,
            }
        };
        if let Some(context) = cached {
            debug!("Reusing indexed document {}", &context.content_hash[..12]);
            return Ok(Arc::new(DocumentContext {
                filename: filename.map(str::to_string),
                ..(*context).clone()
            }));
        }

        let context = Arc::new(get_texts_and_retriever(bytes, filename, params, embedder).await?);

        let mut entries = self.entries.lock();
        entries.push_back((key, context.clone()));
        while entries.len() > CACHE_CAPACITY {
            entries.pop_front();
        }
        Ok(context)
    }
}
