//! Relational records: restaurants, branches, chatbots and menu snapshots.
//!
//! Thin CRUD over the SQLite pool. Validation of request fields happens in
//! [`crate::service`]; this layer only enforces what the schema does.

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::db::now_timestamp;
use crate::identity::document_hash;
use crate::models::{Branch, Chatbot, ChatbotStatus, MenuSnapshot, Restaurant};

#[derive(Clone)]
pub struct RecordStore {
    pool: SqlitePool,
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn restaurant_from_row(row: &SqliteRow) -> Restaurant {
    Restaurant {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        owner_id: row.get("owner_id"),
        created_at: row.get("created_at"),
    }
}

fn branch_from_row(row: &SqliteRow) -> Branch {
    let has_chatbot: i64 = row.get("has_chatbot");
    Branch {
        id: row.get("id"),
        restaurant_id: row.get("restaurant_id"),
        name: row.get("name"),
        address: row.get("address"),
        has_chatbot: has_chatbot != 0,
        created_at: row.get("created_at"),
    }
}

fn chatbot_from_row(row: &SqliteRow) -> Result<Chatbot> {
    let status: String = row.get("status");
    Ok(Chatbot {
        id: row.get("id"),
        branch_id: row.get("branch_id"),
        status: status.parse()?,
        content_hash: row.get("content_hash"),
        version: row.get("version"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn snapshot_from_row(row: &SqliteRow) -> Result<MenuSnapshot> {
    let content: String = row.get("content");
    Ok(MenuSnapshot {
        id: row.get("id"),
        branch_id: row.get("branch_id"),
        content: serde_json::from_str(&content)?,
        content_hash: row.get("content_hash"),
        created_by: row.get("created_by"),
        notes: row.get("notes"),
        created_at: row.get("created_at"),
    })
}

impl RecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ---- restaurants ----

    pub async fn create_restaurant(
        &self,
        name: &str,
        description: &str,
        owner_id: &str,
    ) -> Result<Restaurant> {
        let restaurant = Restaurant {
            id: new_id(),
            name: name.to_string(),
            description: description.to_string(),
            owner_id: owner_id.to_string(),
            created_at: now_timestamp(),
        };
        sqlx::query(
            "INSERT INTO restaurants (id, name, description, owner_id, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&restaurant.id)
        .bind(&restaurant.name)
        .bind(&restaurant.description)
        .bind(&restaurant.owner_id)
        .bind(&restaurant.created_at)
        .execute(&self.pool)
        .await?;
        Ok(restaurant)
    }

    pub async fn get_restaurant(&self, id: &str) -> Result<Option<Restaurant>> {
        let row = sqlx::query("SELECT * FROM restaurants WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(restaurant_from_row))
    }

    // ---- branches ----

    pub async fn create_branch(
        &self,
        restaurant_id: &str,
        name: &str,
        address: &str,
    ) -> Result<Branch> {
        let branch = Branch {
            id: new_id(),
            restaurant_id: restaurant_id.to_string(),
            name: name.to_string(),
            address: address.to_string(),
            has_chatbot: false,
            created_at: now_timestamp(),
        };
        sqlx::query(
            "INSERT INTO branches (id, restaurant_id, name, address, has_chatbot, created_at) \
             VALUES (?, ?, ?, ?, 0, ?)",
        )
        .bind(&branch.id)
        .bind(&branch.restaurant_id)
        .bind(&branch.name)
        .bind(&branch.address)
        .bind(&branch.created_at)
        .execute(&self.pool)
        .await?;
        Ok(branch)
    }

    pub async fn get_branch(&self, id: &str) -> Result<Option<Branch>> {
        let row = sqlx::query("SELECT * FROM branches WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(branch_from_row))
    }

    /// Branches oldest first, optionally restricted to one restaurant.
    pub async fn list_branches(&self, restaurant_id: Option<&str>) -> Result<Vec<Branch>> {
        let rows = match restaurant_id {
            Some(rid) => {
                sqlx::query(
                    "SELECT * FROM branches WHERE restaurant_id = ? ORDER BY created_at, rowid",
                )
                .bind(rid)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM branches ORDER BY created_at, rowid")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(rows.iter().map(branch_from_row).collect())
    }

    pub async fn set_has_chatbot(&self, branch_id: &str, has_chatbot: bool) -> Result<()> {
        sqlx::query("UPDATE branches SET has_chatbot = ? WHERE id = ?")
            .bind(has_chatbot as i64)
            .bind(branch_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ---- menu snapshots ----

    pub async fn create_snapshot(
        &self,
        branch_id: &str,
        content: &serde_json::Value,
        created_by: Option<&str>,
        notes: Option<&str>,
    ) -> Result<MenuSnapshot> {
        let snapshot = MenuSnapshot {
            id: new_id(),
            branch_id: branch_id.to_string(),
            content: content.clone(),
            content_hash: document_hash(content),
            created_by: created_by.map(str::to_string),
            notes: notes.map(str::to_string),
            created_at: now_timestamp(),
        };
        sqlx::query(
            "INSERT INTO menu_snapshots (id, branch_id, content, content_hash, created_by, notes, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&snapshot.id)
        .bind(&snapshot.branch_id)
        .bind(serde_json::to_string(content)?)
        .bind(&snapshot.content_hash)
        .bind(&snapshot.created_by)
        .bind(&snapshot.notes)
        .bind(&snapshot.created_at)
        .execute(&self.pool)
        .await?;
        Ok(snapshot)
    }

    /// Snapshots newest first.
    pub async fn list_snapshots(&self, branch_id: &str) -> Result<Vec<MenuSnapshot>> {
        let rows = sqlx::query(
            "SELECT * FROM menu_snapshots WHERE branch_id = ? ORDER BY created_at DESC, rowid DESC",
        )
        .bind(branch_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(snapshot_from_row).collect()
    }

    pub async fn latest_snapshot(&self, branch_id: &str) -> Result<Option<MenuSnapshot>> {
        let row = sqlx::query(
            "SELECT * FROM menu_snapshots WHERE branch_id = ? ORDER BY created_at DESC, rowid DESC LIMIT 1",
        )
        .bind(branch_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(snapshot_from_row).transpose()
    }

    // ---- chatbots ----

    /// The branch's chatbot, created idle if it does not exist yet. Safe to
    /// race: concurrent callers all get the same row.
    pub async fn get_or_create_chatbot(&self, branch_id: &str) -> Result<Chatbot> {
        let now = now_timestamp();
        sqlx::query(
            "INSERT INTO chatbots (id, branch_id, status, content_hash, version, created_at, updated_at) \
             VALUES (?, ?, ?, NULL, 0, ?, ?) \
             ON CONFLICT(branch_id) DO NOTHING",
        )
        .bind(new_id())
        .bind(branch_id)
        .bind(ChatbotStatus::Idle.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.chatbot_for_branch(branch_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("chatbot for branch {} missing after insert", branch_id))
    }

    pub async fn get_chatbot(&self, id: &str) -> Result<Option<Chatbot>> {
        let row = sqlx::query("SELECT * FROM chatbots WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(chatbot_from_row).transpose()
    }

    pub async fn chatbot_for_branch(&self, branch_id: &str) -> Result<Option<Chatbot>> {
        let row = sqlx::query("SELECT * FROM chatbots WHERE branch_id = ?")
            .bind(branch_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(chatbot_from_row).transpose()
    }

    pub async fn set_chatbot_status(&self, id: &str, status: ChatbotStatus) -> Result<()> {
        sqlx::query("UPDATE chatbots SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(now_timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Mark a successful index of a document with hash `content_hash`.
    ///
    /// Sets the chatbot active and bumps `version` only when the hash
    /// differs from the previously indexed one.
    pub async fn mark_indexed(&self, id: &str, content_hash: &str) -> Result<Chatbot> {
        sqlx::query(
            r#"
            UPDATE chatbots SET
                status = 'active',
                version = CASE
                    WHEN content_hash IS NULL OR content_hash != ?1 THEN version + 1
                    ELSE version
                END,
                content_hash = ?1,
                updated_at = ?2
            WHERE id = ?3
            "#,
        )
        .bind(content_hash)
        .bind(now_timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.get_chatbot(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("chatbot {} disappeared while indexing", id))
    }
}
