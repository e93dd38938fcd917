//! Structural JSON chunker.
//!
//! Turns a branch knowledge document (a JSON object) into a flat list of
//! [`TextChunk`]s, one per semantically scoped field. Only one level of
//! nesting is interpreted structurally; anything deeper is JSON-encoded into
//! the chunk text.
//!
//! # Algorithm
//!
//! For each top-level key, in sorted key order:
//!
//! | Value | Chunks | Text | `item_key` | `item_index` |
//! |-------|--------|------|------------|--------------|
//! | string | one, `general` | `"{key}: {value}"` | key | `-1` |
//! | array | one per element, `list` | `"{key} item {i}: {json}"` | `""` | `i` |
//! | object | one per field, `object` | `"{key} - {field}: {json}"` | field | `-1` |
//!
//! Numbers, booleans and `null` at the top level carry no section text and
//! are skipped with a warning. Items that fail to encode are dropped and
//! reported in [`ChunkOutput::warnings`]; they never fail the batch.
//!
//! Chunks leave this module with empty `id`/`content_hash` and no owner
//! IDs; [`crate::identity::assign_identity`] fills those in.
//!
//! # Example
//!
//! ```rust
//! use mindmenu::chunk::chunk_json;
//!
//! let out = chunk_json(r#"{"hours": "9am-5pm", "appetizers": ["Soup", "Salad"]}"#).unwrap();
//! assert_eq!(out.chunks.len(), 3);
//! assert_eq!(out.chunks[2].text, "hours: 9am-5pm");
//! ```

use anyhow::{bail, Context, Result};
use serde::Serialize;
use serde_json::Value;

use crate::models::{ChunkCategory, ChunkMetadata, TextChunk};

/// Sentinel `item_index` for chunks that are not array elements.
pub const NO_INDEX: i64 = -1;

/// Result of a chunking run.
#[derive(Debug, Default)]
pub struct ChunkOutput {
    pub chunks: Vec<TextChunk>,
    /// Items that were skipped, with the reason.
    pub warnings: Vec<ChunkWarning>,
}

/// A field or element that produced no chunk.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChunkWarning {
    /// Location in the document, e.g. `menu`, `menu[3]`, `hours.monday`.
    pub path: String,
    pub reason: String,
}

/// Parse raw JSON text and chunk it.
///
/// Fails only when the text is not valid JSON or the top level is not an
/// object.
pub fn chunk_json(raw: &str) -> Result<ChunkOutput> {
    let value: Value = serde_json::from_str(raw).context("content is not valid JSON")?;
    chunk_content(&value)
}

/// Chunk an already-parsed knowledge document.
pub fn chunk_content(content: &Value) -> Result<ChunkOutput> {
    let map = match content {
        Value::Object(map) => map,
        other => bail!(
            "content must be a JSON object, got {}",
            json_type_name(other)
        ),
    };

    let mut out = ChunkOutput::default();

    for (section, data) in sorted_entries(map) {
        match data {
            Value::String(s) => {
                out.chunks.push(make_chunk(
                    format!("{}: {}", section, s),
                    section,
                    ChunkCategory::General,
                    section,
                    NO_INDEX,
                ));
            }
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    match serde_json::to_string(item) {
                        Ok(encoded) => out.chunks.push(make_chunk(
                            format!("{} item {}: {}", section, i, encoded),
                            section,
                            ChunkCategory::List,
                            "",
                            i as i64,
                        )),
                        Err(e) => out.warnings.push(ChunkWarning {
                            path: format!("{}[{}]", section, i),
                            reason: e.to_string(),
                        }),
                    }
                }
            }
            Value::Object(fields) => {
                for (field, val) in sorted_entries(fields) {
                    match serde_json::to_string(val) {
                        Ok(encoded) => out.chunks.push(make_chunk(
                            format!("{} - {}: {}", section, field, encoded),
                            section,
                            ChunkCategory::Object,
                            field,
                            NO_INDEX,
                        )),
                        Err(e) => out.warnings.push(ChunkWarning {
                            path: format!("{}.{}", section, field),
                            reason: e.to_string(),
                        }),
                    }
                }
            }
            other => out.warnings.push(ChunkWarning {
                path: section.to_string(),
                reason: format!(
                    "unsupported top-level {} value (expected string, array, or object)",
                    json_type_name(other)
                ),
            }),
        }
    }

    Ok(out)
}

/// Object entries in key order, independent of the map's iteration order.
fn sorted_entries(map: &serde_json::Map<String, Value>) -> Vec<(&String, &Value)> {
    let mut entries: Vec<(&String, &Value)> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
}

fn make_chunk(
    text: String,
    source: &str,
    category: ChunkCategory,
    item_key: &str,
    item_index: i64,
) -> TextChunk {
    TextChunk {
        id: String::new(),
        text,
        content_hash: String::new(),
        embedding: None,
        metadata: ChunkMetadata {
            restaurant_id: String::new(),
            branch_id: String::new(),
            source: source.to_string(),
            category,
            item_key: item_key.to_string(),
            item_index,
        },
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn texts(out: &ChunkOutput) -> Vec<&str> {
        out.chunks.iter().map(|c| c.text.as_str()).collect()
    }

    #[test]
    fn test_hours_and_appetizers_scenario() {
        let out = chunk_content(&json!({
            "hours": "9am-5pm",
            "appetizers": ["Soup", "Salad"]
        }))
        .unwrap();

        assert_eq!(out.chunks.len(), 3);
        assert!(out.warnings.is_empty());

        let hours = out
            .chunks
            .iter()
            .find(|c| c.metadata.source == "hours")
            .unwrap();
        assert_eq!(hours.text, "hours: 9am-5pm");
        assert_eq!(hours.metadata.category, ChunkCategory::General);
        assert_eq!(hours.metadata.item_key, "hours");
        assert_eq!(hours.metadata.item_index, NO_INDEX);

        let items: Vec<&TextChunk> = out
            .chunks
            .iter()
            .filter(|c| c.metadata.source == "appetizers")
            .collect();
        assert_eq!(items[0].text, "appetizers item 0: \"Soup\"");
        assert_eq!(items[1].text, "appetizers item 1: \"Salad\"");
        assert_eq!(items[1].metadata.category, ChunkCategory::List);
        assert_eq!(items[1].metadata.item_key, "");
        assert_eq!(items[1].metadata.item_index, 1);
    }

    #[test]
    fn test_nested_object_fields() {
        let out = chunk_content(&json!({
            "menu": {
                "mains": ["Steak", "Pasta"],
                "special": "Fish"
            }
        }))
        .unwrap();

        assert_eq!(
            texts(&out),
            vec![
                "menu - mains: [\"Steak\",\"Pasta\"]",
                "menu - special: \"Fish\"",
            ]
        );
        for c in &out.chunks {
            assert_eq!(c.metadata.category, ChunkCategory::Object);
            assert_eq!(c.metadata.source, "menu");
            assert_eq!(c.metadata.item_index, NO_INDEX);
        }
        assert_eq!(out.chunks[0].metadata.item_key, "mains");
    }

    #[test]
    fn test_list_of_objects_encoded_as_json() {
        let out = chunk_content(&json!({
            "desserts": [{"name": "Flan", "price": 6}]
        }))
        .unwrap();
        assert_eq!(
            out.chunks[0].text,
            "desserts item 0: {\"name\":\"Flan\",\"price\":6}"
        );
    }

    #[test]
    fn test_scalars_skipped_with_warning() {
        let out = chunk_content(&json!({
            "rating": 4.5,
            "open": true,
            "closed_on": null,
            "hours": "noon"
        }))
        .unwrap();

        assert_eq!(texts(&out), vec!["hours: noon"]);
        assert_eq!(out.warnings.len(), 3);
        assert!(out.warnings.iter().any(|w| w.path == "rating"));
    }

    #[test]
    fn test_empty_collections_produce_nothing() {
        let out = chunk_content(&json!({"menu": [], "info": {}})).unwrap();
        assert!(out.chunks.is_empty());
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        assert!(chunk_json("{\"hours\": ").is_err());
    }

    #[test]
    fn test_non_object_top_level_is_an_error() {
        let err = chunk_json("[1, 2, 3]").unwrap_err();
        assert!(err.to_string().contains("must be a JSON object"));
    }

    #[test]
    fn test_deterministic_order() {
        let raw = r#"{"b": "x", "a": ["1"], "c": {"k": 1}}"#;
        let first = chunk_json(raw).unwrap();
        let second = chunk_json(raw).unwrap();
        assert_eq!(texts(&first), texts(&second));
        assert_eq!(first.chunks[0].metadata.source, "a");
    }
}
