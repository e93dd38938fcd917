//! Conversation store: append-only chat turns per session.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::db::now_timestamp;
use crate::models::ChatTurn;

pub const DEFAULT_LANGUAGE: &str = "en";

#[derive(Clone)]
pub struct ConversationStore {
    pool: SqlitePool,
}

impl ConversationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// The newest `limit` turns of a session, oldest first.
    pub async fn recent_turns(&self, session_id: &str, limit: usize) -> Result<Vec<ChatTurn>> {
        let rows = sqlx::query(
            r#"
            SELECT id, session_id, query, response, language, timestamp
            FROM chat_history
            WHERE session_id = ?
            ORDER BY timestamp DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(session_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut turns: Vec<ChatTurn> = rows
            .iter()
            .map(|row| ChatTurn {
                id: row.get("id"),
                session_id: row.get("session_id"),
                query: row.get("query"),
                response: row.get("response"),
                language: row.get("language"),
                timestamp: row.get("timestamp"),
            })
            .collect();
        turns.reverse();
        Ok(turns)
    }

    /// Record one exchange. Blank or absent language is stored as `en`.
    pub async fn append_turn(
        &self,
        session_id: &str,
        query: &str,
        response: &str,
        language: Option<&str>,
    ) -> Result<ChatTurn> {
        let language = match language.map(str::trim) {
            Some(l) if !l.is_empty() => l.to_string(),
            _ => DEFAULT_LANGUAGE.to_string(),
        };
        let turn = ChatTurn {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            query: query.to_string(),
            response: response.to_string(),
            language,
            timestamp: now_timestamp(),
        };

        sqlx::query(
            "INSERT INTO chat_history (id, session_id, query, response, language, timestamp) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&turn.id)
        .bind(&turn.session_id)
        .bind(&turn.query)
        .bind(&turn.response)
        .bind(&turn.language)
        .bind(&turn.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(turn)
    }
}
