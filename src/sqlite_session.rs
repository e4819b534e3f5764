//! # SQLite-Based Session Storage
//!
//! [`SqliteSession`] keeps conversation history in a SQLite database through
//! `sqlx`, so it survives restarts. Several sessions can share one database
//! file; rows are keyed by session id and ordered by a per-session sequence
//! number. The schema is created on connect.
//!
//! ```rust,no_run
//! use agents_runtime::items::{MessageItem, RunItem};
//! use agents_runtime::memory::Session;
//! use agents_runtime::sqlite_session::SqliteSession;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let session = SqliteSession::new("user_123", "conversations.db").await?;
//! session
//!     .add_items(vec![RunItem::Message(MessageItem::user("Hello, persistent world!"))])
//!     .await?;
//! let messages = session.get_messages(None).await?;
//! assert_eq!(messages.last().map(|m| m.content.as_str()), Some("Hello, persistent world!"));
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use tracing::debug;

use crate::error::Result;
use crate::items::RunItem;
use crate::memory::Session;

/// A [`Session`] stored in SQLite.
#[derive(Clone)]
pub struct SqliteSession {
    session_id: String,
    pool: Pool<Sqlite>,
}

impl SqliteSession {
    /// Opens (creating if needed) the database at `db_path`.
    pub async fn new(session_id: impl Into<String>, db_path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Self::with_pool(session_id, pool).await
    }

    /// A private in-memory database. Data is lost when the session is dropped.
    pub async fn new_in_memory(session_id: impl Into<String>) -> Result<Self> {
        // Every connection to `:memory:` is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(session_id, pool).await
    }

    /// Uses an existing pool, e.g. to share one database between sessions.
    pub async fn with_pool(session_id: impl Into<String>, pool: Pool<Sqlite>) -> Result<Self> {
        Self::run_migrations(&pool).await?;
        Ok(Self {
            session_id: session_id.into(),
            pool,
        })
    }

    async fn run_migrations(pool: &Pool<Sqlite>) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS session_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                item_type TEXT NOT NULL,
                item_data TEXT NOT NULL,
                created_at TEXT NOT NULL,
                sequence_num INTEGER NOT NULL,
                UNIQUE(session_id, sequence_num)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_session_items_session
            ON session_items(session_id, sequence_num)
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl Session for SqliteSession {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn get_items(&self, limit: Option<usize>) -> Result<Vec<RunItem>> {
        let rows = match limit {
            Some(limit) => {
                sqlx::query(
                    r#"
                    SELECT item_data FROM (
                        SELECT item_data, sequence_num
                        FROM session_items
                        WHERE session_id = ?
                        ORDER BY sequence_num DESC
                        LIMIT ?
                    ) ORDER BY sequence_num ASC
                    "#,
                )
                .bind(&self.session_id)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT item_data
                    FROM session_items
                    WHERE session_id = ?
                    ORDER BY sequence_num ASC
                    "#,
                )
                .bind(&self.session_id)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let data: String = row.try_get("item_data")?;
            items.push(serde_json::from_str(&data)?);
        }
        Ok(items)
    }

    async fn add_items(&self, items: Vec<RunItem>) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        let created_at = Utc::now().to_rfc3339();
        let count = items.len();

        // The sequence number is computed by the insert itself, so the
        // transaction's first statement takes the write lock and concurrent
        // writers to one session queue up instead of reading the same MAX.
        for item in items {
            sqlx::query(
                r#"
                INSERT INTO session_items (session_id, item_type, item_data, created_at, sequence_num)
                SELECT ?, ?, ?, ?, COALESCE(MAX(sequence_num), 0) + 1
                FROM session_items
                WHERE session_id = ?
                "#,
            )
            .bind(&self.session_id)
            .bind(item.kind())
            .bind(serde_json::to_string(&item)?)
            .bind(&created_at)
            .bind(&self.session_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(session_id = %self.session_id, count, "appended session items");
        Ok(())
    }

    async fn pop_item(&self) -> Result<Option<RunItem>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT id, item_data
            FROM session_items
            WHERE session_id = ?
            ORDER BY sequence_num DESC
            LIMIT 1
            "#,
        )
        .bind(&self.session_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let id: i64 = row.try_get("id")?;
        let data: String = row.try_get("item_data")?;

        sqlx::query("DELETE FROM session_items WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Some(serde_json::from_str(&data)?))
    }

    async fn clear_session(&self) -> Result<()> {
        sqlx::query("DELETE FROM session_items WHERE session_id = ?")
            .bind(&self.session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for SqliteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSession")
            .field("session_id", &self.session_id)
            .finish()
    }
}
