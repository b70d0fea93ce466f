//! Splitter selection for the indexing pipeline.
//!
//! Markdown files get the markdown-aware splitter so chunks follow heading
//! and block structure; everything else goes through the recursive character
//! splitter. Both honor the configured chunk size and overlap.

use text_splitter::{Characters, ChunkConfig, MarkdownSplitter, TextSplitter};

use crate::error::AppError;

/// Split `text` into chunks for the file extension `ext` (lowercased, with
/// dot). Never returns an empty list for non-empty input.
pub fn split(ext: &str, text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<String>, AppError> {
    let chunks: Vec<String> = match ext {
        ".md" | ".markdown" => MarkdownSplitter::new(config(chunk_size, overlap)?)
            .chunks(text)
            .map(str::to_string)
            .collect(),
        _ => TextSplitter::new(config(chunk_size, overlap)?)
            .chunks(text)
            .map(str::to_string)
            .collect(),
    };

    if chunks.is_empty() && !text.is_empty() {
        return Ok(vec![text.to_string()]);
    }
    Ok(chunks)
}

fn config(chunk_size: usize, overlap: usize) -> Result<ChunkConfig<Characters>, AppError> {
    ChunkConfig::new(chunk_size)
        .with_overlap(overlap)
        .map_err(|e| AppError::Config(format!("chunk overlap {overlap} with size {chunk_size}: {e}")))
}
