//! Recursive text chunking with overlap.
//!
//! Text is split on the coarsest separator that occurs in it (paragraph,
//! line, sentence, word, character). Pieces are then greedily merged back up
//! to `chunk_size` characters, carrying up to `chunk_overlap` characters of
//! trailing pieces into the next chunk. All sizes count `char`s, not bytes.

use std::collections::VecDeque;

use docchat_core::ChunkParams;

const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", " ", ""];

/// A flat text chunk with position metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub text: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    /// Byte offset of the chunk in the source text (best effort).
    pub start_char: usize,
    pub end_char: usize,
}

/// Recursive chunker that respects document structure.
pub struct RecursiveChunker {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    separators: Vec<&'static str>,
}

impl RecursiveChunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
            separators: SEPARATORS.to_vec(),
        }
    }

    pub fn from_params(params: &ChunkParams) -> Self {
        Self::new(params.chunk_size, params.chunk_overlap)
    }

    pub fn chunk(&self, text: &str) -> Vec<TextChunk> {
        let raw_chunks = self.split_text(text, &self.separators);
        let total = raw_chunks.len();
        let mut result = Vec::with_capacity(total);
        let mut search_from = 0;

        for chunk_text in raw_chunks {
            let start = text
                .get(search_from..)
                .and_then(|rest| rest.find(chunk_text.as_str()))
                .map(|offset| search_from + offset)
                .unwrap_or(search_from);
            let end = start + chunk_text.len();
            // Overlapping chunks start before the previous chunk ended.
            search_from = (start + 1).min(text.len());
            while search_from < text.len() && !text.is_char_boundary(search_from) {
                search_from += 1;
            }

            result.push(TextChunk {
                text: chunk_text,
                chunk_index: result.len(),
                total_chunks: total,
                start_char: start,
                end_char: end,
            });
        }
        result
    }

    fn split_text(&self, text: &str, separators: &[&'static str]) -> Vec<String> {
        // Coarsest separator present in the text; "" always matches.
        let position = separators
            .iter()
            .position(|sep| sep.is_empty() || text.contains(sep))
            .unwrap_or(separators.len().saturating_sub(1));
        let separator = separators.get(position).copied().unwrap_or("");
        let remaining = separators.get(position + 1..).unwrap_or(&[]);

        if separator.is_empty() {
            return self.split_chars(text);
        }

        let mut chunks = Vec::new();
        let mut good: Vec<&str> = Vec::new();

        for split in text.split(separator).filter(|s| !s.is_empty()) {
            if char_len(split) <= self.chunk_size {
                good.push(split);
                continue;
            }
            if !good.is_empty() {
                chunks.extend(self.merge_splits(&good, separator));
                good.clear();
            }
            if remaining.is_empty() {
                chunks.push(split.to_string());
            } else {
                chunks.extend(self.split_text(split, remaining));
            }
        }

        if !good.is_empty() {
            chunks.extend(self.merge_splits(&good, separator));
        }

        chunks
    }

    /// Greedy merge of small pieces into chunks, keeping an overlap tail.
    fn merge_splits(&self, splits: &[&str], separator: &str) -> Vec<String> {
        let sep_len = char_len(separator);
        let mut docs = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for &piece in splits {
            let joined_len = |total: usize, current: &VecDeque<&str>| {
                total + char_len(piece) + if current.is_empty() { 0 } else { sep_len }
            };

            if joined_len(total, &current) > self.chunk_size && !current.is_empty() {
                push_joined(&mut docs, &current, separator);

                while total > self.chunk_overlap
                    || (total > 0 && joined_len(total, &current) > self.chunk_size)
                {
                    let Some(first) = current.pop_front() else {
                        break;
                    };
                    let removed = char_len(first) + if current.is_empty() { 0 } else { sep_len };
                    total = total.saturating_sub(removed);
                }
            }

            total = joined_len(total, &current);
            current.push_back(piece);
        }

        push_joined(&mut docs, &current, separator);
        docs
    }

    /// Last resort: fixed windows over characters.
    fn split_chars(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let step = (self.chunk_size - self.chunk_overlap).max(1);
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < chars.len() {
            let end = (start + self.chunk_size).min(chars.len());
            chunks.push(chars[start..end].iter().collect());
            if end == chars.len() {
                break;
            }
            start += step;
        }
        chunks
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn push_joined(docs: &mut Vec<String>, parts: &VecDeque<&str>, separator: &str) {
    let joined = parts.iter().copied().collect::<Vec<_>>().join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        docs.push(trimmed.to_string());
    }
}

impl Default for RecursiveChunker {
    fn default() -> Self {
        Self::from_params(&ChunkParams::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recursive_chunker_short_text() {
        let chunker = RecursiveChunker::new(512, 100);
        let chunks = chunker.chunk("Hello, world!");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].total_chunks, 1);
    }

    #[test]
    fn test_paragraphs_respect_chunk_size() {
        let text = "First paragraph here.\n\nSecond paragraph here.\n\nThird paragraph here.";
        let chunker = RecursiveChunker::new(30, 0);
        let chunks = chunker.chunk(text);

        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.text.len() <= 30));
        assert_eq!(chunks[1].text, "Second paragraph here.");
        assert_eq!(chunks[2].chunk_index, 2);
    }

    #[test]
    fn test_overlap_carries_words() {
        let text = "alpha beta gamma delta epsilon zeta eta theta";
        let chunker = RecursiveChunker::new(16, 6);
        let chunks = chunker.chunk(text);

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["alpha beta gamma", "gamma delta", "delta epsilon", "zeta eta theta"]
        );
        assert_eq!(chunks[1].start_char, 11);
    }

    #[test]
    fn test_char_split_handles_multibyte() {
        let text = "ééééééééééé";
        let chunker = RecursiveChunker::new(4, 1);
        let chunks = chunker.chunk(text);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 4));
    }

    #[test]
    fn test_word_merge_counts_characters() {
        let text = "ééé ééé ééé";
        let chunker = RecursiveChunker::new(7, 0);
        let chunks = chunker.chunk(text);

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["ééé ééé", "ééé"]);
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 7));
        assert_eq!(&text[chunks[1].start_char..chunks[1].end_char], "ééé");
    }

    #[test]
    fn test_empty_text() {
        let chunker = RecursiveChunker::default();
        assert!(chunker.chunk("").is_empty());
    }

    #[test]
    fn test_offsets_point_into_source() {
        let text = "one two\n\nthree four\n\nfive six";
        let chunker = RecursiveChunker::new(10, 0);
        for chunk in chunker.chunk(text) {
            assert_eq!(&text[chunk.start_char..chunk.end_char], chunk.text);
        }
    }
}
