//! Recursive character text splitting.
//!
//! Splits on the largest separator that keeps chunks under `chunk_size`
//! characters, trying `"\n\n"`, `"\n"`, `". "`, `" "`, then hard character
//! cuts. Consecutive chunks overlap by `chunk_overlap` characters so no
//! sentence loses its context at a boundary.

use tracing::debug;

const SEPARATORS: [&str; 4] = ["\n\n", "\n", ". ", " "];

/// Character-based recursive splitter.
#[derive(Debug, Clone)]
pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for TextChunker {
    fn default() -> Self {
        Self::new(512, 128)
    }
}

impl TextChunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size / 2),
        }
    }

    /// Split one text into chunks of at most `chunk_size` characters.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }

        let pieces = self.split_recursive(trimmed, &SEPARATORS);
        let chunks = self.merge_pieces(pieces);
        debug!(chunks = chunks.len(), "text split");
        chunks
    }

    /// Split several documents, concatenating the chunk lists.
    pub fn split_documents(&self, texts: &[String]) -> Vec<String> {
        texts.iter().flat_map(|t| self.split_text(t)).collect()
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        if char_len(text) <= self.chunk_size {
            return vec![text.to_string()];
        }

        let Some((separator, rest)) = separators.split_first() else {
            return self.hard_split(text);
        };
        if !text.contains(separator) {
            return self.split_recursive(text, rest);
        }

        let mut pieces = Vec::new();
        let parts: Vec<&str> = text.split(separator).collect();
        let last = parts.len() - 1;
        for (i, part) in parts.into_iter().enumerate() {
            // Keep the separator attached so merging reproduces the text.
            let piece = if i < last {
                format!("{part}{separator}")
            } else {
                part.to_string()
            };
            if piece.is_empty() {
                continue;
            }
            if char_len(&piece) > self.chunk_size {
                pieces.extend(self.split_recursive(&piece, rest));
            } else {
                pieces.push(piece);
            }
        }
        pieces
    }

    /// Last resort: fixed-width character windows.
    fn hard_split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let mut chunks = Vec::new();
        let step = self.chunk_size.saturating_sub(self.chunk_overlap).max(1);
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

    /// Greedily merge small pieces into chunks, carrying an overlap tail.
    fn merge_pieces(&self, pieces: Vec<String>) -> Vec<String> {
        let mut chunks: Vec<String> = Vec::new();
        let mut current = String::new();

        for piece in pieces {
            if !current.is_empty()
                && char_len(&current) + char_len(&piece) > self.chunk_size
            {
                let finished = current.trim().to_string();
                let tail = overlap_tail(&finished, self.chunk_overlap);
                if !finished.is_empty() {
                    chunks.push(finished);
                }
                // Carry the overlap only when the next piece still fits.
                current = if char_len(&tail) + char_len(&piece) <= self.chunk_size {
                    tail
                } else {
                    String::new()
                };
            }
            current.push_str(&piece);
        }

        let finished = current.trim().to_string();
        if !finished.is_empty() {
            chunks.push(finished);
        }
        chunks
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn overlap_tail(s: &str, overlap: usize) -> String {
    if overlap == 0 {
        return String::new();
    }
    let chars: Vec<char> = s.chars().collect();
    let start = chars.len().saturating_sub(overlap);
    chars[start..].iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        let chunker = TextChunker::new(512, 128);
        let chunks = chunker.split_text("파이썬은 고급 언어입니다.");
        assert_eq!(chunks, vec!["파이썬은 고급 언어입니다.".to_string()]);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        let chunker = TextChunker::default();
        assert!(chunker.split_text("").is_empty());
        assert!(chunker.split_text("   \n  ").is_empty());
    }

    #[test]
    fn paragraphs_split_before_sentences() {
        let chunker = TextChunker::new(30, 0);
        let text = "first paragraph here\n\nsecond paragraph here\n\nthird one";
        let chunks = chunker.split_text(text);
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 30, "oversized chunk: {chunk:?}");
        }
    }

    #[test]
    fn every_chunk_respects_the_size_cap() {
        let chunker = TextChunker::new(50, 10);
        let text = "A sentence. ".repeat(40);
        for chunk in chunker.split_text(&text) {
            assert!(chunk.chars().count() <= 50, "oversized: {}", chunk.len());
        }
    }

    #[test]
    fn unbroken_text_gets_hard_split_with_overlap() {
        let chunker = TextChunker::new(10, 4);
        let text = "abcdefghijklmnopqrstuvwxyz";
        let chunks = chunker.split_text(text);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        // Overlap: each subsequent chunk starts inside the previous one.
        assert!(chunks[1].starts_with(&chunks[0][chunks[0].len() - 4..]));
    }

    #[test]
    fn consecutive_chunks_share_overlap() {
        let chunker = TextChunker::new(20, 8);
        let text = "one two three four five six seven eight nine ten eleven twelve";
        let chunks = chunker.split_text(text);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let tail: String = overlap_tail(&pair[0], 8);
            assert!(
                pair[1].contains(tail.trim()) || tail.trim().is_empty(),
                "no overlap between {:?} and {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn multibyte_text_counts_characters_not_bytes() {
        let chunker = TextChunker::new(10, 0);
        let text = "가나다라마바사아자차카타파하".repeat(3);
        for chunk in chunker.split_text(&text) {
            assert!(chunk.chars().count() <= 10);
        }
    }
}
