//! Recursive character chunker.
//!
//! Splits text on the first separator that occurs in it, keeps pieces that
//! fit, recurses into pieces that don't with the remaining separators, and
//! merges neighbouring pieces back up to `chunk_size` characters with
//! `chunk_overlap` characters carried into the next chunk.

use std::collections::VecDeque;

use tracing::warn;

use hyrag_core::{ChunkConfig, Chunker, Language, RagError, Result};

/// Paragraph, line, sentence, word, character.
const EN_SEPARATORS: &[&str] = &["\n\n", "\n", ". ", " ", ""];

/// Paragraph, line, CJK sentence and clause punctuation, space, character.
const ZH_SEPARATORS: &[&str] = &[
    "\n\n", "\n", "。", "；", "！", "？", "，", "、", "：", " ", "",
];

/// Recursive chunker with language-specific separators.
///
/// Lengths are measured in characters. A separator stays attached to the
/// start of the piece that follows it.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecursiveChunker;

impl RecursiveChunker {
    pub fn new() -> Self {
        Self
    }

    /// Separators tried for a language, coarsest first.
    pub fn separators(language: Language) -> &'static [&'static str] {
        match language {
            Language::En => EN_SEPARATORS,
            Language::Zh => ZH_SEPARATORS,
        }
    }

    fn split_recursive(
        &self,
        text: &str,
        separators: &[&'static str],
        config: &ChunkConfig,
    ) -> Vec<String> {
        let (separator, remaining) = pick_separator(text, separators);

        let mut chunks = Vec::new();
        let mut fitting: Vec<&str> = Vec::new();

        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) < config.chunk_size {
                fitting.push(piece);
                continue;
            }

            if !fitting.is_empty() {
                chunks.extend(merge_splits(&fitting, config));
                fitting.clear();
            }

            if remaining.is_empty() {
                chunks.push(piece.to_string());
            } else {
                chunks.extend(self.split_recursive(piece, remaining, config));
            }
        }

        if !fitting.is_empty() {
            chunks.extend(merge_splits(&fitting, config));
        }

        chunks
    }
}

impl Chunker for RecursiveChunker {
    fn split(&self, text: &str, language: Language, config: &ChunkConfig) -> Result<Vec<String>> {
        if config.chunk_size == 0 {
            return Err(RagError::chunking("chunk_size must be > 0"));
        }
        if config.chunk_overlap > config.chunk_size {
            return Err(RagError::chunking(format!(
                "chunk_overlap ({}) is larger than chunk_size ({})",
                config.chunk_overlap, config.chunk_size
            )));
        }

        Ok(self
            .split_recursive(text, Self::separators(language), config)
            .into_iter()
            .filter(|chunk| !chunk.trim().is_empty())
            .collect())
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// First separator present in `text`, and the finer separators after it.
///
/// The empty separator always matches and ends the list.
fn pick_separator<'a>(
    text: &str,
    separators: &'a [&'static str],
) -> (&'static str, &'a [&'static str]) {
    for (i, &separator) in separators.iter().enumerate() {
        if separator.is_empty() {
            return (separator, &[]);
        }
        if text.contains(separator) {
            return (separator, &separators[i + 1..]);
        }
    }
    (separators.last().copied().unwrap_or(""), &[])
}

/// Split on `separator`, attaching each separator to the following piece.
fn split_keeping_separator<'t>(text: &'t str, separator: &str) -> Vec<&'t str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(separator) {
        if idx > start {
            pieces.push(&text[start..idx]);
        }
        start = idx;
    }
    pieces.push(&text[start..]);
    pieces.retain(|p| !p.is_empty());
    pieces
}

/// Greedily merge pieces into chunks of at most `chunk_size` characters.
///
/// After each emitted chunk, pieces are dropped from the front until at
/// most `chunk_overlap` characters remain and the next piece fits.
fn merge_splits(pieces: &[&str], config: &ChunkConfig) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut window: VecDeque<&str> = VecDeque::new();
    let mut total = 0usize;

    for &piece in pieces {
        let len = char_len(piece);

        if total + len > config.chunk_size {
            if total > config.chunk_size {
                warn!(
                    "Created a chunk of {} characters, longer than the configured {}",
                    total, config.chunk_size
                );
            }

            if !window.is_empty() {
                push_joined(&window, &mut chunks);

                while total > config.chunk_overlap
                    || (total > 0 && total + len > config.chunk_size)
                {
                    match window.pop_front() {
                        Some(front) => total -= char_len(front),
                        None => break,
                    }
                }
            }
        }

        window.push_back(piece);
        total += len;
    }

    push_joined(&window, &mut chunks);
    chunks
}

fn push_joined(window: &VecDeque<&str>, chunks: &mut Vec<String>) {
    let joined: String = window.iter().copied().collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}
