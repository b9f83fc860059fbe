#[cfg(test)]
mod tests;

use pulldown_cmark::{Event, Parser, Tag};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Configuration for note chunking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk body size in characters
    pub chunk_size: usize,
    /// Characters carried over from the end of the previous chunk
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 6000,
            chunk_overlap: 200,
        }
    }
}

#[derive(Debug)]
struct Block<'a> {
    text: &'a str,
    is_code: bool,
}

/// Split markdown into bodies of at most `chunk_size` characters.
///
/// Top-level markdown blocks (headings, paragraphs, lists, fenced code) are
/// packed greedily; blocks that are too large on their own are broken at
/// lines, sentences, words, and finally characters.
#[inline]
pub fn split_markdown(content: &str, config: &ChunkingConfig) -> Vec<String> {
    let chunk_size = config.chunk_size.max(1);
    let mut pieces = Vec::new();

    for block in top_level_blocks(content) {
        if char_len(block.text) <= chunk_size {
            pieces.push(block.text.to_string());
        } else if block.is_code {
            pieces.extend(split_code(block.text, chunk_size));
        } else {
            pieces.extend(split_oversized(block.text, chunk_size));
        }
    }

    let chunks = pack(pieces, chunk_size, config.chunk_overlap.min(chunk_size / 2));

    debug!(
        "Split {} characters into {} chunks",
        char_len(content),
        chunks.len()
    );

    chunks
}

/// Prefix a chunk body with the note title and metadata header.
///
/// Every chunk after the first of a note is marked as a continuation.
#[inline]
pub fn create_contextual_chunk(
    body: &str,
    note_title: &str,
    metadata_json: &str,
    continued: bool,
) -> String {
    let continuation = if continued { "(cont'd) " } else { "" };
    format!(
        "\n\nNOTE TITLE: [[{}]]\n\nMETADATA:{}\n\nNOTE BLOCK CONTENT:\n\n{}{}",
        note_title, metadata_json, continuation, body
    )
}

/// Stable identifier for a chunk: identical text always maps to the same id
#[inline]
pub fn content_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Source slices of every top-level block, in document order
fn top_level_blocks(content: &str) -> Vec<Block<'_>> {
    let mut blocks = Vec::new();
    let mut depth = 0usize;
    let mut block_start = 0usize;
    let mut is_code = false;

    for (event, range) in Parser::new(content).into_offset_iter() {
        match event {
            Event::Start(tag) => {
                if depth == 0 {
                    block_start = range.start;
                    is_code = matches!(tag, Tag::CodeBlock(_));
                }
                depth += 1;
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    push_block(&mut blocks, &content[block_start..range.end], is_code);
                }
            }
            _ if depth == 0 => push_block(&mut blocks, &content[range], false),
            _ => {}
        }
    }

    blocks
}

fn push_block<'a>(blocks: &mut Vec<Block<'a>>, text: &'a str, is_code: bool) {
    let text = text.trim();
    if !text.is_empty() {
        blocks.push(Block { text, is_code });
    }
}

/// Break prose that exceeds the chunk size on its own
fn split_oversized(text: &str, chunk_size: usize) -> Vec<String> {
    group_parts(text, "\n", chunk_size)
        .into_iter()
        .flat_map(|piece| {
            if char_len(&piece) <= chunk_size {
                vec![piece]
            } else {
                split_by_sentences(&piece, chunk_size)
            }
        })
        .collect()
}

/// Break a fenced code block at line boundaries only
fn split_code(text: &str, chunk_size: usize) -> Vec<String> {
    group_parts(text, "\n", chunk_size)
        .into_iter()
        .flat_map(|piece| {
            if char_len(&piece) <= chunk_size {
                vec![piece]
            } else {
                split_by_characters(&piece, chunk_size)
            }
        })
        .collect()
}

/// Greedily join separator-delimited parts without exceeding the chunk size.
///
/// A single part longer than the chunk size is returned as is.
fn group_parts(text: &str, separator: &str, chunk_size: usize) -> Vec<String> {
    let mut splits = Vec::new();
    let mut current = String::new();

    for part in text.split(separator) {
        let candidate_len = if current.is_empty() {
            char_len(part)
        } else {
            char_len(&current) + char_len(separator) + char_len(part)
        };

        if candidate_len > chunk_size && !current.trim().is_empty() {
            splits.push(std::mem::take(&mut current));
        }

        if !current.is_empty() {
            current.push_str(separator);
        }
        current.push_str(part);
    }

    if !current.trim().is_empty() {
        splits.push(current);
    }

    splits
}

/// Split text at sentence boundaries, falling back to words
fn split_by_sentences(text: &str, chunk_size: usize) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for (index, ch) in text.char_indices() {
        if matches!(ch, '.' | '!' | '?') {
            let end = index + ch.len_utf8();
            sentences.push(&text[start..end]);
            start = end;
        }
    }
    if start < text.len() {
        sentences.push(&text[start..]);
    }

    let mut splits = Vec::new();
    let mut current = String::new();
    for sentence in sentences {
        if char_len(&current) + char_len(sentence) > chunk_size && !current.trim().is_empty() {
            splits.push(current.trim().to_string());
            current.clear();
        }
        if char_len(sentence) > chunk_size {
            splits.extend(split_by_words(sentence.trim(), chunk_size));
            continue;
        }
        current.push_str(sentence);
    }
    if !current.trim().is_empty() {
        splits.push(current.trim().to_string());
    }

    splits
}

fn split_by_words(text: &str, chunk_size: usize) -> Vec<String> {
    group_parts(text, " ", chunk_size)
        .into_iter()
        .flat_map(|piece| {
            if char_len(&piece) <= chunk_size {
                vec![piece]
            } else {
                split_by_characters(&piece, chunk_size)
            }
        })
        .collect()
}

/// Last resort: hard cut on character boundaries
fn split_by_characters(text: &str, chunk_size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(chunk_size)
        .map(|piece| piece.iter().collect::<String>())
        .filter(|piece| !piece.trim().is_empty())
        .collect()
}

/// Pack pieces into chunks, carrying a word-aligned overlap between chunks
fn pack(pieces: Vec<String>, chunk_size: usize, overlap: usize) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();

    for piece in pieces {
        let joined_len = if current.is_empty() {
            char_len(&piece)
        } else {
            char_len(&current) + 2 + char_len(&piece)
        };

        if joined_len > chunk_size && !current.is_empty() {
            let finished = std::mem::take(&mut current);
            let carry = overlap_tail(&finished, overlap);
            chunks.push(finished);

            if !carry.is_empty() && char_len(&carry) + 2 + char_len(&piece) <= chunk_size {
                current = carry;
            }
        }

        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(&piece);
    }

    if !current.trim().is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Trailing whole words of `content` totalling at most `overlap` characters
fn overlap_tail(content: &str, overlap: usize) -> String {
    if overlap == 0 {
        return String::new();
    }

    let mut taken: Vec<&str> = Vec::new();
    let mut length = 0;
    for word in content.split_whitespace().rev() {
        let added = char_len(word) + usize::from(!taken.is_empty());
        if length + added > overlap {
            break;
        }
        length += added;
        taken.push(word);
    }

    taken.reverse();
    taken.join(" ")
}
