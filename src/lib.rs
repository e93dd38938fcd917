//! # MindMenu
//!
//! Backend for per-branch restaurant chatbots. Owners register restaurants
//! and branches, upload a menu/knowledge document, and each branch gets a
//! retrieval-augmented chatbot answering from that document.
//!
//! ## Architecture
//!
//! ```text
//!  knowledge JSON                        question
//!        │                                   │
//!        ▼                                   ▼
//! ┌─────────────┐  ┌──────────┐       ┌─────────────┐  ┌─────────┐
//! │ Chunk +     │─▶│  Sync    │──────▶│  Retrieve   │─▶│ Prompt  │
//! │ Identity    │  │ (diff by │ vector│  (top-K in  │  │ + Gen   │
//! └─────────────┘  │  hash)   │ store │  namespace) │  └────┬────┘
//!                  └──────────┘       └─────────────┘       │
//!                                                      chat history
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`chunk`] | Structural JSON chunking |
//! | [`identity`] | Deterministic chunk IDs, content hashes, namespaces |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`generation`] | Text generation provider abstraction |
//! | [`vector_store`] | Namespaced vector storage (SQLite, Pinecone, memory) |
//! | [`sync`] | Hash-diffed selective upsert |
//! | [`retrieval`] | Top-K context retrieval |
//! | [`prompt`] | Prompt composition and fallback replies |
//! | [`history`] | Conversation store |
//! | [`records`] | Restaurants, branches, chatbots, snapshots |
//! | [`indexing`] | Background index jobs and the per-namespace queue |
//! | [`service`] | Operations behind the API and CLI |
//! | [`server`] | HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod history;
mod http;
pub mod identity;
pub mod indexing;
pub mod migrate;
pub mod models;
pub mod prompt;
pub mod records;
pub mod retrieval;
pub mod server;
pub mod service;
pub mod sync;
pub mod vector_store;
