//! Splitting page text into bounded-size chunks for the extraction model.
//!
//! Splits prefer line boundaries so a single listing is less likely to
//! be cut in half; a hard byte split (at a char boundary) is the
//! fallback when no boundary exists within tolerance. A listing split
//! across two chunks is a known risk the deduplicator absorbs by
//! merging partial matches.

use crate::fetcher::floor_char_boundary;
use crate::models::RawChunk;
use tracing::debug;

/// Fraction of the chunk window that must be filled before a line
/// boundary is considered good enough to split on. Boundaries earlier
/// than this would waste most of the window.
const BOUNDARY_TOLERANCE: f64 = 0.6;

/// Split flattened page text into ordered chunks of at most `max_bytes`.
///
/// Boundary preference, within the final `1 - BOUNDARY_TOLERANCE` of the
/// window: blank line, then single newline, then a hard split.
pub fn chunk(source_url: &str, text: &str, max_bytes: usize) -> Vec<RawChunk> {
    let max_bytes = max_bytes.max(1);
    let mut chunks = Vec::new();
    let mut remaining = text.trim();
    let mut sequence_index = 0usize;

    while !remaining.is_empty() {
        if remaining.len() <= max_bytes {
            push_chunk(&mut chunks, source_url, remaining, &mut sequence_index);
            break;
        }

        let window_end = floor_char_boundary(remaining, max_bytes);
        let window = &remaining[..window_end];
        let floor = (max_bytes as f64 * BOUNDARY_TOLERANCE) as usize;

        let split_at = find_boundary(window, floor).unwrap_or(window_end);
        push_chunk(&mut chunks, source_url, &remaining[..split_at], &mut sequence_index);
        remaining = remaining[split_at..].trim_start();
    }

    debug!(
        source_url,
        total_bytes = text.len(),
        chunk_count = chunks.len(),
        "Chunked page text"
    );
    chunks
}

/// Best split point in `window` at or after `floor`: the last blank
/// line, else the last newline. `None` means hard-split.
fn find_boundary(window: &str, floor: usize) -> Option<usize> {
    if let Some(pos) = window.rfind("\n\n") {
        if pos >= floor {
            return Some(pos);
        }
    }
    if let Some(pos) = window.rfind('\n') {
        if pos >= floor {
            return Some(pos);
        }
    }
    None
}

fn push_chunk(chunks: &mut Vec<RawChunk>, source_url: &str, text: &str, sequence_index: &mut usize) {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return;
    }
    chunks.push(RawChunk {
        source_url: source_url.to_string(),
        text: trimmed.to_string(),
        sequence_index: *sequence_index,
    });
    *sequence_index += 1;
}
