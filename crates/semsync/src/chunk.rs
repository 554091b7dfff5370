//! Paragraph-boundary text chunker for uploaded files.
//!
//! Text is split on blank lines and paragraphs are packed into chunks of at
//! most `max_tokens` (approximated as characters / 4). A paragraph longer
//! than the limit is hard-split, preferring a newline or space boundary.

/// Approximate characters per token.
const CHARS_PER_TOKEN: usize = 4;

/// One piece of a chunked text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Position within the source, contiguous from 0.
    pub index: usize,
    pub text: String,
}

/// Splits `text` into chunks. Blank input yields no chunks.
pub fn chunk_text(text: &str, max_tokens: usize) -> Vec<TextChunk> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let mut pieces: Vec<String> = Vec::new();
    let mut current = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }
        let para_len = trimmed.chars().count();
        let current_len = current.chars().count();

        let would_be = if current.is_empty() {
            para_len
        } else {
            current_len + 2 + para_len
        };
        if would_be > max_chars && !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
        }

        if para_len > max_chars {
            hard_split(trimmed, max_chars, &mut pieces);
        } else {
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(trimmed);
        }
    }

    if !current.is_empty() {
        pieces.push(current);
    }

    pieces
        .into_iter()
        .enumerate()
        .map(|(index, text)| TextChunk { index, text })
        .collect()
}

fn hard_split(paragraph: &str, max_chars: usize, out: &mut Vec<String>) {
    let mut remaining = paragraph;
    while !remaining.is_empty() {
        // Byte offset of the `max_chars`-th character, if the rest is longer.
        let limit = match remaining.char_indices().nth(max_chars) {
            Some((byte_idx, _)) => byte_idx,
            None => {
                push_trimmed(remaining, out);
                break;
            }
        };
        let window = &remaining[..limit];
        let split = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&pos| pos > 0)
            .map(|pos| pos + 1)
            .unwrap_or(limit);
        push_trimmed(&remaining[..split], out);
        remaining = &remaining[split..];
    }
}

fn push_trimmed(piece: &str, out: &mut Vec<String>) {
    let piece = piece.trim();
    if !piece.is_empty() {
        out.push(piece.to_string());
    }
}
