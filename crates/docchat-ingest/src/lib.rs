//! docchat ingest — uploaded file → text → chunks → retriever.

pub mod chunking;
pub mod context;
pub mod embedder;
pub mod file;
pub mod retriever;

pub use chunking::{RecursiveChunker, TextChunk};
pub use context::{content_hash, get_texts_and_retriever, DocumentContext, IngestCache};
pub use embedder::{EmbedderBackend, NoopEmbedder, OpenAiEmbedder};
pub use retriever::{RetrievedChunk, Retriever};
