use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::{BlockId, MessageId, RoomId, UserRef};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub message_id: MessageId,
    pub room_id: RoomId,
    pub blocks_json: String,
    pub editor: Option<UserRef>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StoredAssociation {
    pub message_id: MessageId,
    pub block_id: BlockId,
    pub created_at: DateTime<Utc>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn create_message(&self, room_id: &RoomId, blocks_json: &str) -> Result<MessageId> {
        let rec =
            sqlx::query("INSERT INTO messages (room_id, blocks_json) VALUES (?, ?) RETURNING id")
                .bind(room_id.as_str())
                .bind(blocks_json)
                .fetch_one(&self.pool)
                .await?;
        Ok(MessageId(rec.get::<i64, _>(0)))
    }

    /// Replaces the message's block tree and stamps the editor. Returns
    /// false when no message with that id exists.
    pub async fn update_message_blocks(
        &self,
        message_id: MessageId,
        editor: &UserRef,
        blocks_json: &str,
    ) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE messages
             SET blocks_json = ?, editor = ?, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?",
        )
        .bind(blocks_json)
        .bind(editor.as_str())
        .bind(message_id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    pub async fn load_message(&self, message_id: MessageId) -> Result<Option<StoredMessage>> {
        let row = sqlx::query(
            "SELECT id, room_id, blocks_json, editor, updated_at FROM messages WHERE id = ?",
        )
        .bind(message_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| StoredMessage {
            message_id: MessageId(r.get::<i64, _>(0)),
            room_id: RoomId(r.get::<String, _>(1)),
            blocks_json: r.get::<String, _>(2),
            editor: r.get::<Option<String>, _>(3).map(UserRef),
            updated_at: r.get::<DateTime<Utc>, _>(4),
        }))
    }

    pub async fn put_association(&self, message_id: MessageId, block_id: &BlockId) -> Result<i64> {
        let rec = sqlx::query(
            "INSERT INTO block_associations (message_id, block_id) VALUES (?, ?) RETURNING id",
        )
        .bind(message_id.0)
        .bind(block_id.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(rec.get::<i64, _>(0))
    }

    /// The most recently created record wins when more than one row matches
    /// the key.
    pub async fn association_by_block_id(
        &self,
        block_id: &BlockId,
    ) -> Result<Option<StoredAssociation>> {
        let row = sqlx::query(
            "SELECT message_id, block_id, created_at
             FROM block_associations
             WHERE block_id = ?
             ORDER BY id DESC
             LIMIT 1",
        )
        .bind(block_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| StoredAssociation {
            message_id: MessageId(r.get::<i64, _>(0)),
            block_id: BlockId(r.get::<String, _>(1)),
            created_at: r.get::<DateTime<Utc>, _>(2),
        }))
    }

    pub async fn association_by_message_id(
        &self,
        message_id: MessageId,
    ) -> Result<Option<StoredAssociation>> {
        let row = sqlx::query(
            "SELECT message_id, block_id, created_at
             FROM block_associations
             WHERE message_id = ?
             ORDER BY id DESC
             LIMIT 1",
        )
        .bind(message_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| StoredAssociation {
            message_id: MessageId(r.get::<i64, _>(0)),
            block_id: BlockId(r.get::<String, _>(1)),
            created_at: r.get::<DateTime<Utc>, _>(2),
        }))
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
