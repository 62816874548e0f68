//! Byte-bounded JSON array chunker.
//!
//! Splits an ordered array of conversations into sub-arrays whose
//! serialized size stays under a byte threshold, so each one fits through
//! an intermediary with a request body limit.
//!
//! # Algorithm
//!
//! 1. Start an empty chunk with a running size of 2 (`[` and `]`).
//! 2. For each item, measure its serialized length.
//! 3. If the current chunk is non-empty and adding the item plus a `,`
//!    separator would exceed the threshold, close the chunk.
//! 4. Always place the item in the (possibly new) current chunk.
//!
//! The greedy pass is not an optimal bin-pack. It only guarantees order,
//! atomicity, and the size bound below.
//!
//! # Example
//!
//! ```rust
//! use convo_import_core::chunk::split_json_array_into_chunks;
//! use serde_json::json;
//!
//! let items = vec![json!({"id": 1}), json!({"id": 2})];
//! let chunks = split_json_array_into_chunks(&items, 1024);
//! assert_eq!(chunks, vec![items]);
//! ```

use serde_json::Value;

/// Threshold shared by the "should we chunk" decision and the per-chunk
/// cap: 90 MiB, under a 100 MB proxy body limit with room for multipart
/// overhead.
pub const DEFAULT_CHUNK_THRESHOLD: u64 = 90 * 1024 * 1024;

/// Serialized size of the `[` `]` pair.
const ARRAY_OVERHEAD: u64 = 2;

/// Split `items` into order-preserving chunks of at most `max_bytes_per_chunk`
/// serialized bytes each.
///
/// # Guarantees
///
/// - Concatenating the chunks in order reproduces `items` exactly.
/// - No chunk exceeds the threshold, except a chunk holding a single item
///   that is larger than the threshold on its own.
/// - Empty input yields no chunks.
pub fn split_json_array_into_chunks(items: &[Value], max_bytes_per_chunk: u64) -> Vec<Vec<Value>> {
    let mut chunks = Vec::new();
    let mut current: Vec<Value> = Vec::new();
    let mut current_size = ARRAY_OVERHEAD;

    for item in items {
        let item_size = serialized_len(item);

        if !current.is_empty() && current_size + item_size + 1 > max_bytes_per_chunk {
            chunks.push(std::mem::take(&mut current));
            current_size = ARRAY_OVERHEAD;
        }

        if !current.is_empty() {
            current_size += 1;
        }
        current_size += item_size;
        current.push(item.clone());
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Compact serialized length of one item, in bytes.
pub fn serialized_len(item: &Value) -> u64 {
    serde_json::to_vec(item).map(|v| v.len() as u64).unwrap_or(0)
}

/// Serialized length of an array of items, matching what the chunker counts.
pub fn array_len(items: &[Value]) -> u64 {
    let separators = items.len().saturating_sub(1) as u64;
    ARRAY_OVERHEAD + separators + items.iter().map(serialized_len).sum::<u64>()
}

/// Upload name for chunk `index` (1-based) of `total`.
pub fn chunk_file_name(original: &str, index: usize, total: usize) -> String {
    let base = if original.is_empty() { "File" } else { original };
    format!("{}_part{}of{}.json", base, index, total)
}
