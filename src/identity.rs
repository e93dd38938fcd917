//! Chunk identity and change detection.
//!
//! A chunk's vector ID is a pure function of its structural position
//! (owner IDs, section, category, key or index), never of its text, so an
//! edited value keeps the same ID across resubmissions. The content hash
//! covers the text and its provenance and is only used to decide whether a
//! stored vector is stale.

use sha2::{Digest, Sha256};

use crate::models::{ChunkMetadata, TextChunk};

/// Prefix on every vector ID written by this service.
pub const ID_PREFIX: &str = "mm_";

/// Deterministic vector ID for a chunk position.
///
/// `"mm_" + hex(sha256("{restaurant}|{branch}|{source}|{category}|{item}"))`
/// where `item` is `key:{item_key}` when the key is non-empty and
/// `idx:{item_index}` otherwise. All components are trimmed.
pub fn deterministic_id(meta: &ChunkMetadata) -> String {
    let item_part = if meta.item_key.is_empty() {
        format!("idx:{}", meta.item_index)
    } else {
        format!("key:{}", meta.item_key)
    };
    let key = [
        meta.restaurant_id.trim(),
        meta.branch_id.trim(),
        meta.source.trim(),
        meta.category.as_str(),
        item_part.as_str(),
    ]
    .join("|");
    format!("{}{}", ID_PREFIX, sha256_hex(key.as_bytes()))
}

/// Change-detection hash: `hex(sha256("{text}|{source}|{category}"))`, trimmed.
pub fn content_hash(chunk: &TextChunk) -> String {
    let input = [
        chunk.text.trim(),
        chunk.metadata.source.trim(),
        chunk.metadata.category.as_str(),
    ]
    .join("|");
    sha256_hex(input.as_bytes())
}

/// Stamp owner IDs, deterministic IDs and content hashes onto chunks.
pub fn assign_identity(chunks: &mut [TextChunk], restaurant_id: &str, branch_id: &str) {
    for chunk in chunks.iter_mut() {
        chunk.metadata.restaurant_id = restaurant_id.to_string();
        chunk.metadata.branch_id = branch_id.to_string();
        chunk.id = deterministic_id(&chunk.metadata);
        chunk.content_hash = content_hash(chunk);
    }
}

/// Vector-store namespace for a branch: `"{restaurant_id}_{branch name}"`
/// with every space in the branch name replaced by `_`.
pub fn namespace_for(restaurant_id: &str, branch_name: &str) -> String {
    format!("{}_{}", restaurant_id, branch_name.replace(' ', "_"))
}

/// Hash of a whole knowledge document.
///
/// Serializes with sorted object keys so that key order in the submitted
/// JSON does not change the hash.
pub fn document_hash(content: &serde_json::Value) -> String {
    let mut canonical = String::new();
    write_canonical(content, &mut canonical);
    sha256_hex(canonical.as_bytes())
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
