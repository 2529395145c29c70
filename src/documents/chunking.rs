//! Structure-aware chunking of converted documents.
//!
//! Each section is split with `semchunk-rs` against a token budget, so no chunk crosses a
//! heading boundary. When merging is enabled, adjacent chunks under the same heading are joined
//! while the combined text still fits the budget. Token counting prefers `tiktoken-rs` and falls
//! back to a whitespace counter when the model's tokenizer is unavailable (common for Ollama).

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Error as TokenizerError;
use semchunk_rs::Chunker;
use thiserror::Error;
use tiktoken_rs::{
    CoreBPE, cl100k_base, get_bpe_from_model, o200k_base, p50k_base, p50k_edit, r50k_base,
};

use super::convert::StructuredDocument;
use crate::config::EmbeddingProvider;

type TokenCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

/// Errors produced while turning a document into chunks.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Caller configured an impossible token budget.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Tokenizer resources were unavailable for the configured model.
    #[error("failed to initialize tokenizer for model '{model}': {source}")]
    Tokenizer {
        /// Model we attempted to load.
        model: String,
        /// Underlying error raised by the tokenizer library.
        #[source]
        source: TokenizerError,
    },
}

/// One retrieval unit cut from a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Chunk text.
    pub text: String,
    /// Sorted, de-duplicated page numbers the chunk spans.
    pub page_numbers: Vec<u32>,
    /// Heading the chunk sits under.
    pub heading: Option<String>,
    /// Token count under the chunker's tokenizer.
    pub token_count: usize,
}

/// Splits a [`StructuredDocument`] into [`TextChunk`]s.
pub trait DocumentChunker: Send + Sync {
    /// Chunk `document` so that no chunk exceeds `max_tokens`.
    fn chunk(
        &self,
        document: &StructuredDocument,
        max_tokens: usize,
        merge_adjacent: bool,
    ) -> Result<Vec<TextChunk>, ChunkingError>;
}

/// Heading-aware chunker backed by `semchunk-rs`.
#[derive(Clone)]
pub struct HybridChunker {
    token_counter: TokenCounter,
}

impl std::fmt::Debug for HybridChunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridChunker").finish_non_exhaustive()
    }
}

impl HybridChunker {
    /// Build a chunker whose token counts match the given embedding model.
    pub fn for_model(provider: EmbeddingProvider, model: &str) -> Result<Self, ChunkingError> {
        Ok(Self {
            token_counter: build_token_counter(provider, model)?,
        })
    }

    /// Build a chunker that counts whitespace-separated words.
    pub fn whitespace() -> Self {
        Self {
            token_counter: default_token_counter(),
        }
    }

    fn count(&self, text: &str) -> usize {
        self.token_counter.as_ref()(text)
    }

    fn split(&self, text: &str, max_tokens: usize) -> Vec<String> {
        let counter = self.token_counter.clone();
        let chunker = Chunker::new(
            max_tokens,
            Box::new(move |segment: &str| counter.as_ref()(segment)),
        );
        chunker
            .chunk(text)
            .into_iter()
            .filter(|piece| !piece.trim().is_empty())
            .collect()
    }

    fn merge_peers(&self, chunks: Vec<TextChunk>, max_tokens: usize) -> Vec<TextChunk> {
        let mut merged: Vec<TextChunk> = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            if let Some(previous) = merged.last_mut()
                && previous.heading == chunk.heading
                && previous.token_count + chunk.token_count <= max_tokens
            {
                let combined = format!("{}\n{}", previous.text, chunk.text);
                let combined_tokens = self.count(&combined);
                if combined_tokens <= max_tokens {
                    previous.text = combined;
                    previous.token_count = combined_tokens;
                    let pages: BTreeSet<u32> = previous
                        .page_numbers
                        .iter()
                        .chain(chunk.page_numbers.iter())
                        .copied()
                        .collect();
                    previous.page_numbers = pages.into_iter().collect();
                    continue;
                }
            }
            merged.push(chunk);
        }
        merged
    }
}

impl DocumentChunker for HybridChunker {
    fn chunk(
        &self,
        document: &StructuredDocument,
        max_tokens: usize,
        merge_adjacent: bool,
    ) -> Result<Vec<TextChunk>, ChunkingError> {
        if max_tokens == 0 {
            return Err(ChunkingError::InvalidChunkSize);
        }

        let mut chunks = Vec::new();
        for section in &document.sections {
            for piece in self.split(&section.text, max_tokens) {
                let token_count = self.count(&piece);
                chunks.push(TextChunk {
                    text: piece,
                    page_numbers: vec![section.page],
                    heading: section.heading.clone(),
                    token_count,
                });
            }
        }

        if merge_adjacent {
            chunks = self.merge_peers(chunks, max_tokens);
        }

        tracing::debug!(
            sections = document.sections.len(),
            chunks = chunks.len(),
            max_tokens,
            merge_adjacent,
            "Chunked document"
        );
        Ok(chunks)
    }
}

/// Build a token counter for the given provider/model.
///
/// Uses OpenAI encodings when possible and falls back to whitespace tokenization for unknown or
/// locally aliased models. The fallback is logged at `warn` level.
fn build_token_counter(
    provider: EmbeddingProvider,
    model: &str,
) -> Result<TokenCounter, ChunkingError> {
    match provider {
        EmbeddingProvider::OpenAI => build_tiktoken_counter(model),
        EmbeddingProvider::Ollama | EmbeddingProvider::Deterministic => {
            match build_tiktoken_counter(model) {
                Ok(counter) => Ok(counter),
                Err(error) => {
                    tracing::warn!(
                        model,
                        error = %error,
                        "Tokenizer unavailable; falling back to whitespace counter"
                    );
                    Ok(default_token_counter())
                }
            }
        }
    }
}

fn build_tiktoken_counter(model: &str) -> Result<TokenCounter, ChunkingError> {
    let normalized = model.trim();
    let target = if normalized.is_empty() {
        "cl100k_base"
    } else {
        normalized
    };
    let encoding = resolve_encoding(target).map_err(|source| ChunkingError::Tokenizer {
        model: target.to_string(),
        source,
    })?;
    let encoding = Arc::new(encoding);

    Ok(Arc::new(move |segment: &str| {
        encoding.encode_ordinary(segment).len()
    }))
}

fn resolve_encoding(model: &str) -> Result<CoreBPE, TokenizerError> {
    match get_bpe_from_model(model) {
        Ok(encoding) => Ok(encoding),
        Err(model_err) => {
            tracing::debug!(
                model,
                error = %model_err,
                "Tokenizer model lookup failed; trying encoding name"
            );
            if let Some(candidate) = encoding_from_name(model) {
                candidate
            } else {
                tracing::warn!(
                    model,
                    "Falling back to 'cl100k_base' encoding for token counting"
                );
                cl100k_base()
            }
        }
    }
}

fn encoding_from_name(name: &str) -> Option<Result<CoreBPE, TokenizerError>> {
    match name {
        "cl100k_base" => Some(cl100k_base()),
        "o200k_base" => Some(o200k_base()),
        "p50k_base" => Some(p50k_base()),
        "p50k_edit" => Some(p50k_edit()),
        "r50k_base" | "gpt2" => Some(r50k_base()),
        _ => None,
    }
}

fn default_token_counter() -> TokenCounter {
    Arc::new(|segment: &str| {
        let tokens = segment.split_whitespace().count();
        if tokens == 0 && !segment.is_empty() {
            1
        } else {
            tokens
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::convert::DocumentSection;

    fn section(heading: Option<&str>, text: &str, page: u32) -> DocumentSection {
        DocumentSection {
            heading: heading.map(str::to_string),
            text: text.to_string(),
            page,
        }
    }

    fn document(sections: Vec<DocumentSection>) -> StructuredDocument {
        StructuredDocument {
            title: None,
            page_count: sections.iter().map(|s| s.page as usize).max().unwrap_or(1),
            sections,
        }
    }

    #[test]
    fn chunks_respect_token_budget_whitespace_counter() {
        let chunker = HybridChunker::whitespace();
        let doc = document(vec![section(None, "one two three four five", 1)]);
        let chunks = chunker.chunk(&doc, 2, false).expect("chunks");

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["one two", "three four", "five"]);
        assert!(chunks.iter().all(|c| c.token_count <= 2));
    }

    #[test]
    fn chunks_never_cross_headings() {
        let chunker = HybridChunker::whitespace();
        let doc = document(vec![
            section(Some("Terms"), "alpha beta", 1),
            section(Some("Fees"), "gamma", 1),
        ]);
        let chunks = chunker.chunk(&doc, 50, true).expect("chunks");

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].heading.as_deref(), Some("Terms"));
        assert_eq!(chunks[1].heading.as_deref(), Some("Fees"));
    }

    #[test]
    fn merging_joins_peers_and_unions_pages() {
        let chunker = HybridChunker::whitespace();
        let doc = document(vec![
            section(Some("Terms"), "alpha beta", 1),
            section(Some("Terms"), "gamma delta", 2),
        ]);

        let separate = chunker.chunk(&doc, 10, false).expect("chunks");
        assert_eq!(separate.len(), 2);

        let merged = chunker.chunk(&doc, 10, true).expect("chunks");
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].page_numbers, vec![1, 2]);
        assert_eq!(merged[0].token_count, 4);
    }

    #[test]
    fn zero_budget_is_rejected() {
        let chunker = HybridChunker::whitespace();
        let doc = document(vec![section(None, "hello", 1)]);
        let error = chunker.chunk(&doc, 0, true).unwrap_err();
        assert!(matches!(error, ChunkingError::InvalidChunkSize));
    }

    #[test]
    fn tiktoken_budget_is_respected() {
        let chunker = HybridChunker::for_model(EmbeddingProvider::OpenAI, "text-embedding-3-small")
            .expect("tokenizer");
        let text = "The quick brown fox jumps over the lazy dog.";
        let doc = document(vec![section(None, text, 1)]);
        let chunks = chunker.chunk(&doc, 5, false).expect("chunks");

        for chunk in &chunks {
            assert!(chunk.token_count <= 5);
        }
        let words: Vec<&str> = chunks
            .iter()
            .flat_map(|chunk| chunk.text.split_whitespace())
            .collect();
        assert_eq!(words, text.split_whitespace().collect::<Vec<_>>());
    }
}
