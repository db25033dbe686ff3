//! Top-k chunk retrieval over an uploaded document.
//!
//! Uses embeddings and cosine similarity when an embedder is available,
//! BM25 keyword scoring otherwise.

use std::collections::HashMap;
use std::sync::Arc;

use ndarray::Array1;
use tracing::{debug, warn};

use crate::chunking::TextChunk;
use crate::embedder::{cosine_similarity, EmbedderBackend};
use docchat_core::Result;

const BM25_K1: f64 = 1.5;
const BM25_B: f64 = 0.75;

/// A retrieved chunk with its relevance score.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk_index: usize,
    pub text: String,
    pub score: f64,
}

enum Index {
    Vector(Vec<Array1<f32>>),
    Keyword(Bm25Index),
}

/// Retriever handle over a fixed set of chunks. Clones share the index.
#[derive(Clone)]
pub struct Retriever {
    chunks: Arc<Vec<TextChunk>>,
    index: Arc<Index>,
    embedder: Arc<dyn EmbedderBackend>,
    k: usize,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("chunks", &self.chunks.len())
            .field("vector", &self.is_vector())
            .field("k", &self.k)
            .finish()
    }
}

impl Retriever {
    /// Build the index. Embedding failures are propagated so a bad key is
    /// reported at upload time rather than on the next question.
    pub async fn build(
        chunks: Arc<Vec<TextChunk>>,
        embedder: Arc<dyn EmbedderBackend>,
        k: usize,
    ) -> Result<Self> {
        let index = if embedder.is_available() {
            let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
            let vectors = embedder.embed_batch(&texts).await?;
            debug!("Built vector index over {} chunks", vectors.len());
            Index::Vector(vectors)
        } else {
            debug!("No embedder available, using BM25 over {} chunks", chunks.len());
            Index::Keyword(Bm25Index::new(&chunks))
        };

        Ok(Self {
            chunks,
            index: Arc::new(index),
            embedder,
            k: k.max(1),
        })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn is_vector(&self) -> bool {
        matches!(*self.index, Index::Vector(_))
    }

    /// Return up to `k` chunks most relevant to `query`, best first.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>> {
        let mut scored: Vec<(usize, f64)> = match self.index.as_ref() {
            Index::Vector(vectors) => match self.embedder.embed(query).await {
                Ok(q) => vectors
                    .iter()
                    .enumerate()
                    .map(|(i, v)| (i, cosine_similarity(&q, v) as f64))
                    .collect(),
                Err(e) => {
                    warn!("Query embedding failed, falling back to BM25: {}", e);
                    Bm25Index::new(&self.chunks).score(query)
                }
            },
            Index::Keyword(bm25) => bm25.score(query),
        };

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.k);

        Ok(scored
            .into_iter()
            .filter_map(|(i, score)| {
                self.chunks.get(i).map(|c| RetrievedChunk {
                    chunk_index: c.chunk_index,
                    text: c.text.clone(),
                    score,
                })
            })
            .collect())
    }
}

/// Minimal BM25 index over chunk texts.
struct Bm25Index {
    doc_terms: Vec<HashMap<String, usize>>,
    doc_lens: Vec<usize>,
    doc_freq: HashMap<String, usize>,
    avg_len: f64,
}

impl Bm25Index {
    fn new(chunks: &[TextChunk]) -> Self {
        let mut doc_terms = Vec::with_capacity(chunks.len());
        let mut doc_lens = Vec::with_capacity(chunks.len());
        let mut doc_freq: HashMap<String, usize> = HashMap::new();

        for chunk in chunks {
            let mut terms: HashMap<String, usize> = HashMap::new();
            let tokens = tokenize(&chunk.text);
            doc_lens.push(tokens.len());
            for token in tokens {
                *terms.entry(token).or_default() += 1;
            }
            for term in terms.keys() {
                *doc_freq.entry(term.clone()).or_default() += 1;
            }
            doc_terms.push(terms);
        }

        let avg_len = if doc_lens.is_empty() {
            0.0
        } else {
            doc_lens.iter().sum::<usize>() as f64 / doc_lens.len() as f64
        };

        Self {
            doc_terms,
            doc_lens,
            doc_freq,
            avg_len,
        }
    }

    fn score(&self, query: &str) -> Vec<(usize, f64)> {
        let n = self.doc_terms.len() as f64;
        let query_terms = tokenize(query);

        self.doc_terms
            .iter()
            .enumerate()
            .map(|(i, terms)| {
                let len_norm = if self.avg_len > 0.0 {
                    self.doc_lens[i] as f64 / self.avg_len
                } else {
                    0.0
                };
                let score = query_terms
                    .iter()
                    .filter_map(|t| terms.get(t).map(|tf| (t, *tf as f64)))
                    .map(|(t, tf)| {
                        let df = self.doc_freq.get(t).copied().unwrap_or(0) as f64;
                        let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                        idf * tf * (BM25_K1 + 1.0)
                            / (tf + BM25_K1 * (1.0 - BM25_B + BM25_B * len_norm))
                    })
                    .sum();
                (i, score)
            })
            .collect()
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(|t| t.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::NoopEmbedder;
    use async_trait::async_trait;
    use ndarray::array;

    fn chunks(texts: &[&str]) -> Arc<Vec<TextChunk>> {
        Arc::new(
            texts
                .iter()
                .enumerate()
                .map(|(i, t)| TextChunk {
                    text: t.to_string(),
                    chunk_index: i,
                    total_chunks: texts.len(),
                    start_char: 0,
                    end_char: t.len(),
                })
                .collect(),
        )
    }

    /// Two-dimensional "embedding": mentions of rust vs. python.
    struct TopicEmbedder;

    #[async_trait]
    impl EmbedderBackend for TopicEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Array1<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let t = t.to_lowercase();
                    array![t.matches("rust").count() as f32, t.matches("python").count() as f32]
                })
                .collect())
        }

        fn is_available(&self) -> bool {
            true
        }

        fn identity(&self) -> String {
            "topic".into()
        }
    }

    #[tokio::test]
    async fn test_keyword_retrieval_ranks_matching_chunk_first() {
        let retriever = Retriever::build(
            chunks(&[
                "Gardening tips for spring",
                "Tokio is an async runtime for Rust",
                "Rust ownership rules explained",
            ]),
            Arc::new(NoopEmbedder),
            2,
        )
        .await
        .unwrap();

        assert!(!retriever.is_vector());
        let hits = retriever.retrieve("async runtime in rust").await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_index, 1);
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn test_vector_retrieval() {
        let retriever = Retriever::build(
            chunks(&["python data frames", "rust borrow checker", "more python"]),
            Arc::new(TopicEmbedder),
            1,
        )
        .await
        .unwrap();

        assert!(retriever.is_vector());
        let hits = retriever.retrieve("tell me about Rust").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "rust borrow checker");
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("Hello, World! a b2"), vec!["hello", "world", "b2"]);
    }
}
