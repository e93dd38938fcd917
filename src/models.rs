//! Core data models used throughout MindMenu.
//!
//! Relational records (restaurants, branches, chatbots, snapshots, chat
//! turns) mirror the SQLite schema in [`crate::migrate`]. [`TextChunk`] is
//! the unit that flows through the chunk → identity → embed → sync pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A restaurant owned by a single account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Restaurant {
    pub id: String,
    pub name: String,
    pub description: String,
    pub owner_id: String,
    pub created_at: String,
}

/// A physical branch of a restaurant. Each branch gets its own namespace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Branch {
    pub id: String,
    pub restaurant_id: String,
    pub name: String,
    pub address: String,
    pub has_chatbot: bool,
    pub created_at: String,
}

/// Lifecycle state of a branch chatbot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatbotStatus {
    Idle,
    Building,
    Active,
    Error,
}

impl ChatbotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatbotStatus::Idle => "idle",
            ChatbotStatus::Building => "building",
            ChatbotStatus::Active => "active",
            ChatbotStatus::Error => "error",
        }
    }
}

impl fmt::Display for ChatbotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChatbotStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(ChatbotStatus::Idle),
            "building" => Ok(ChatbotStatus::Building),
            "active" => Ok(ChatbotStatus::Active),
            "error" => Ok(ChatbotStatus::Error),
            other => anyhow::bail!("unknown chatbot status: {}", other),
        }
    }
}

/// One chatbot per branch.
///
/// `content_hash` is the hash of the last successfully indexed document and
/// `version` only moves when a reindex sees that hash change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chatbot {
    pub id: String,
    pub branch_id: String,
    pub status: ChatbotStatus,
    pub content_hash: Option<String>,
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Immutable, append-only copy of a branch's knowledge document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MenuSnapshot {
    pub id: String,
    pub branch_id: String,
    pub content: serde_json::Value,
    pub content_hash: String,
    pub created_by: Option<String>,
    pub notes: Option<String>,
    pub created_at: String,
}

/// One question/answer exchange within a chat session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatTurn {
    pub id: String,
    pub session_id: String,
    pub query: String,
    pub response: String,
    pub language: String,
    pub timestamp: String,
}

/// Structural category of a chunk, derived from the JSON value type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChunkCategory {
    /// Top-level string field.
    General,
    /// Element of a top-level array.
    List,
    /// Field of a top-level nested object.
    Object,
}

impl ChunkCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkCategory::General => "general",
            ChunkCategory::List => "list",
            ChunkCategory::Object => "object",
        }
    }
}

impl fmt::Display for ChunkCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structural provenance of a chunk.
///
/// `(restaurant_id, branch_id, source, category, item_key | item_index)` is
/// the identity key of a chunk; it is unique within one chunking run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkMetadata {
    pub restaurant_id: String,
    pub branch_id: String,
    /// Top-level section name the chunk came from.
    pub source: String,
    pub category: ChunkCategory,
    /// Field name for general/object chunks, empty for list items.
    pub item_key: String,
    /// Array index for list items, `-1` otherwise.
    pub item_index: i64,
}

/// A chunk of knowledge text bound for the vector store.
#[derive(Debug, Clone)]
pub struct TextChunk {
    /// Deterministic vector ID (see [`crate::identity::deterministic_id`]).
    /// Empty until identity is assigned.
    pub id: String,
    pub text: String,
    /// Change-detection hash. Empty until identity is assigned.
    pub content_hash: String,
    pub embedding: Option<Vec<f32>>,
    pub metadata: ChunkMetadata,
}
