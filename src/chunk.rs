//! Recursive character text splitter.
//!
//! Splits article text into pieces of at most `chunk_size` characters,
//! preferring paragraph breaks, then line breaks, then sentence ends.
//! Adjacent pieces share up to `overlap` characters of context so a sentence
//! cut at a boundary is still seen whole by one of the summarization calls.
//!
//! Sizes are counted in `char`s, not bytes, so multi-byte text never splits
//! inside a code point.

use std::collections::VecDeque;

/// Separators tried in order, coarsest first.
pub const SEPARATORS: &[&str] = &["\n\n", "\n", ".", "!", "?"];

/// Split `text` into trimmed, non-empty chunks of at most `chunk_size` chars.
///
/// Blank input yields no chunks. `overlap` must be smaller than
/// `chunk_size`; larger values are clamped.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let overlap = overlap.min(chunk_size.saturating_sub(1));

    if text.trim().is_empty() {
        return Vec::new();
    }

    split_recursive(text, SEPARATORS, chunk_size, overlap)
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn split_recursive(text: &str, separators: &[&str], size: usize, overlap: usize) -> Vec<String> {
    // Use the first separator that occurs; fall back to a hard split.
    let position = separators.iter().position(|sep| text.contains(sep));
    let (separator, rest) = match position {
        Some(i) => (separators[i], &separators[i + 1..]),
        None => return hard_split(text, size),
    };

    let mut chunks = Vec::new();
    let mut fitting: Vec<&str> = Vec::new();

    for piece in text.split_inclusive(separator) {
        if char_len(piece) <= size {
            fitting.push(piece);
            continue;
        }

        if !fitting.is_empty() {
            chunks.extend(merge(&fitting, size, overlap));
            fitting.clear();
        }
        chunks.extend(split_recursive(piece, rest, size, overlap));
    }

    if !fitting.is_empty() {
        chunks.extend(merge(&fitting, size, overlap));
    }
    chunks
}

/// Greedily packs pieces into chunks, carrying a tail of at most `overlap`
/// chars from one chunk into the next.
fn merge(pieces: &[&str], size: usize, overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut window: VecDeque<&str> = VecDeque::new();
    let mut total = 0;

    for piece in pieces {
        let len = char_len(piece);

        if total + len > size && !window.is_empty() {
            chunks.push(window.iter().copied().collect::<String>());

            while total > overlap || (total + len > size && total > 0) {
                match window.pop_front() {
                    Some(front) => total -= char_len(front),
                    None => break,
                }
            }
        }

        window.push_back(piece);
        total += len;
    }

    if !window.is_empty() {
        chunks.push(window.iter().copied().collect::<String>());
    }
    chunks
}

/// Last resort for text with no separator: cut every `size` chars.
fn hard_split(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size)
        .map(|c| c.iter().collect::<String>())
        .collect()
}
