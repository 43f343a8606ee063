// ABOUTME: Outbound reply shaping: fixed-size chunking with a hard chunk cap
// ABOUTME: A completed turn never sends zero messages; empty output becomes a placeholder

use tracing::warn;

/// Substituted when a completed turn produced no text at all.
pub const EMPTY_REPLY_PLACEHOLDER: &str = "(no response)";

/// Default chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 2000;

/// Default cap on chunks per reply.
pub const DEFAULT_MAX_CHUNKS: usize = 5;

/// Splits `text` into chunks of at most `chunk_size` characters, capped at
/// `max_chunks`. Text past the cap is dropped with a warning. Empty input
/// yields exactly one placeholder chunk.
pub fn chunk_reply(text: &str, chunk_size: usize, max_chunks: usize) -> Vec<String> {
    if text.is_empty() {
        return vec![EMPTY_REPLY_PLACEHOLDER.to_string()];
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for ch in text.chars() {
        if current_len == chunk_size {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
            if chunks.len() == max_chunks {
                warn!(limit = max_chunks, "reply exceeds chunk cap, dropping remainder");
                return chunks;
            }
        }
        current.push(ch);
        current_len += 1;
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}
