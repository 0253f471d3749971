//! SQLite-backed durable store using sqlx.
//!
//! Rows hold the serialized record in a `data` column next to the columns
//! needed for filtering and ordering. Payloads inside `data` are ciphertext
//! either way; the queryable columns are hashes, timestamps, and flags.

use {
    async_trait::async_trait,
    sqlx::{Row, SqlitePool, sqlite::SqlitePoolOptions},
};

use crate::{
    Result, StoreError,
    durable::{ChatSuggestion, DurableStore},
    types::{
        ChatRecord, EmbedKeyWrapper, EmbedRecord, MessageRecord, MonthlySummary, SummaryKind,
        UsageEntry, UserProfile,
    },
};

/// SQLite-backed implementation of [`DurableStore`].
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a store with its own connection pool and run migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Use an existing pool (migrations must already be run).
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Create the schema if it does not exist yet.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::raw_sql(
        "CREATE TABLE IF NOT EXISTS chats (
            chat_id TEXT PRIMARY KEY,
            hashed_user_id TEXT NOT NULL,
            last_edited_overall_timestamp INTEGER NOT NULL,
            data TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_chats_user
            ON chats (hashed_user_id, last_edited_overall_timestamp DESC);

        CREATE TABLE IF NOT EXISTS messages (
            hashed_message_id TEXT PRIMARY KEY,
            hashed_chat_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            data TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_chat
            ON messages (hashed_chat_id, created_at DESC);

        CREATE TABLE IF NOT EXISTS embeds (
            embed_id TEXT PRIMARY KEY,
            hashed_user_id TEXT NOT NULL,
            content_hash TEXT,
            data TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_embeds_hash
            ON embeds (hashed_user_id, content_hash);

        CREATE TABLE IF NOT EXISTS embed_keys (
            rowid_pk INTEGER PRIMARY KEY AUTOINCREMENT,
            hashed_embed_id TEXT NOT NULL,
            data TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_embed_keys_embed
            ON embed_keys (hashed_embed_id);

        CREATE TABLE IF NOT EXISTS usage (
            id TEXT PRIMARY KEY,
            user_id_hash TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            data TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_usage_user_time
            ON usage (user_id_hash, created_at);

        CREATE TABLE IF NOT EXISTS usage_summaries (
            id TEXT PRIMARY KEY,
            user_id_hash TEXT NOT NULL,
            year_month TEXT NOT NULL,
            kind TEXT NOT NULL,
            data TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_summaries_user_month
            ON usage_summaries (user_id_hash, year_month, kind);

        CREATE TABLE IF NOT EXISTS profiles (
            user_id_hash TEXT PRIMARY KEY,
            data TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chat_suggestions (
            suggestion_id TEXT NOT NULL,
            hashed_user_id TEXT NOT NULL,
            data TEXT NOT NULL,
            PRIMARY KEY (suggestion_id, hashed_user_id)
        );",
    )
    .execute(pool)
    .await?;
    Ok(())
}

fn decode<T: serde::de::DeserializeOwned>(data: String) -> Result<T> {
    Ok(serde_json::from_str(&data)?)
}

#[async_trait]
impl DurableStore for SqliteStore {
    async fn upsert_chat(&self, chat: &ChatRecord) -> Result<()> {
        let data = serde_json::to_string(chat)?;
        sqlx::query(
            "INSERT INTO chats (chat_id, hashed_user_id, last_edited_overall_timestamp, data)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(chat_id) DO UPDATE SET
                 hashed_user_id = excluded.hashed_user_id,
                 last_edited_overall_timestamp = excluded.last_edited_overall_timestamp,
                 data = excluded.data",
        )
        .bind(&chat.chat_id)
        .bind(&chat.hashed_user_id)
        .bind(chat.last_edited_overall_timestamp)
        .bind(&data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_chat(&self, chat_id: &str) -> Result<Option<ChatRecord>> {
        let row = sqlx::query("SELECT data FROM chats WHERE chat_id = ?")
            .bind(chat_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| decode(r.get("data"))).transpose()
    }

    async fn delete_chat(&self, chat_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM chats WHERE chat_id = ?")
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_chats(
        &self,
        hashed_user_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ChatRecord>> {
        let rows = sqlx::query(
            "SELECT data FROM chats WHERE hashed_user_id = ?
             ORDER BY last_edited_overall_timestamp DESC
             LIMIT ? OFFSET ?",
        )
        .bind(hashed_user_id)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| decode(r.get("data"))).collect()
    }

    async fn count_chats(&self, hashed_user_id: &str) -> Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM chats WHERE hashed_user_id = ?")
            .bind(hashed_user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n") as usize)
    }

    async fn insert_message(&self, message: &MessageRecord) -> Result<()> {
        let data = serde_json::to_string(message)?;
        sqlx::query(
            "INSERT INTO messages (hashed_message_id, hashed_chat_id, created_at, data)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(hashed_message_id) DO UPDATE SET data = excluded.data",
        )
        .bind(&message.hashed_message_id)
        .bind(&message.hashed_chat_id)
        .bind(message.created_at)
        .bind(&data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_messages(&self, hashed_chat_id: &str) -> Result<Vec<MessageRecord>> {
        let rows = sqlx::query(
            "SELECT data FROM messages WHERE hashed_chat_id = ? ORDER BY created_at DESC",
        )
        .bind(hashed_chat_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(|r| decode(r.get("data"))).collect()
    }

    async fn delete_message(&self, hashed_chat_id: &str, hashed_message_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM messages WHERE hashed_chat_id = ? AND hashed_message_id = ?")
            .bind(hashed_chat_id)
            .bind(hashed_message_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_embed(&self, embed: &EmbedRecord) -> Result<()> {
        let data = serde_json::to_string(embed)?;
        sqlx::query(
            "INSERT INTO embeds (embed_id, hashed_user_id, content_hash, data)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(embed_id) DO UPDATE SET
                 hashed_user_id = excluded.hashed_user_id,
                 content_hash = excluded.content_hash,
                 data = excluded.data",
        )
        .bind(&embed.embed_id)
        .bind(&embed.hashed_user_id)
        .bind(&embed.content_hash)
        .bind(&data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_embed(&self, embed_id: &str) -> Result<Option<EmbedRecord>> {
        let row = sqlx::query("SELECT data FROM embeds WHERE embed_id = ?")
            .bind(embed_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| decode(r.get("data"))).transpose()
    }

    async fn delete_embed(&self, embed_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM embeds WHERE embed_id = ?")
            .bind(embed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_embed_by_content_hash(
        &self,
        hashed_user_id: &str,
        content_hash: &str,
    ) -> Result<Option<EmbedRecord>> {
        let row = sqlx::query(
            "SELECT data FROM embeds WHERE hashed_user_id = ? AND content_hash = ? LIMIT 1",
        )
        .bind(hashed_user_id)
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| decode(r.get("data"))).transpose()
    }

    async fn append_embed_key(&self, wrapper: &EmbedKeyWrapper) -> Result<()> {
        let data = serde_json::to_string(wrapper)?;
        sqlx::query("INSERT INTO embed_keys (hashed_embed_id, data) VALUES (?, ?)")
            .bind(&wrapper.hashed_embed_id)
            .bind(&data)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_embed_keys(&self, hashed_embed_id: &str) -> Result<Vec<EmbedKeyWrapper>> {
        let rows = sqlx::query(
            "SELECT data FROM embed_keys WHERE hashed_embed_id = ? ORDER BY rowid_pk",
        )
        .bind(hashed_embed_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(|r| decode(r.get("data"))).collect()
    }

    async fn insert_usage_entry(&self, entry: &UsageEntry) -> Result<()> {
        let data = serde_json::to_string(entry)?;
        sqlx::query(
            "INSERT INTO usage (id, user_id_hash, created_at, data) VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(&entry.id)
        .bind(&entry.user_id_hash)
        .bind(entry.created_at)
        .bind(&data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn usage_entries_in_window(
        &self,
        user_id_hash: &str,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<Vec<UsageEntry>> {
        let rows = sqlx::query(
            "SELECT data FROM usage
             WHERE user_id_hash = ? AND created_at >= ? AND created_at < ?",
        )
        .bind(user_id_hash)
        .bind(start_ts)
        .bind(end_ts)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(|r| decode(r.get("data"))).collect()
    }

    async fn usage_users_in_window(&self, start_ts: i64, end_ts: i64) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT user_id_hash FROM usage
             WHERE created_at >= ? AND created_at < ? ORDER BY user_id_hash",
        )
        .bind(start_ts)
        .bind(end_ts)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.get("user_id_hash")).collect())
    }

    async fn delete_usage_entry(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM usage WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_summary(&self, summary: &MonthlySummary) -> Result<()> {
        let data = serde_json::to_string(summary)?;
        let kind = serde_json::to_string(&summary.kind)?;
        sqlx::query(
            "INSERT INTO usage_summaries (id, user_id_hash, year_month, kind, data)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET data = excluded.data",
        )
        .bind(&summary.id)
        .bind(&summary.user_id_hash)
        .bind(&summary.year_month)
        .bind(&kind)
        .bind(&data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn summaries_for_month(
        &self,
        user_id_hash: &str,
        year_month: &str,
        kind: SummaryKind,
    ) -> Result<Vec<MonthlySummary>> {
        let kind = serde_json::to_string(&kind)?;
        let rows = sqlx::query(
            "SELECT data FROM usage_summaries
             WHERE user_id_hash = ? AND year_month = ? AND kind = ?",
        )
        .bind(user_id_hash)
        .bind(year_month)
        .bind(&kind)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(|r| decode(r.get("data"))).collect()
    }

    async fn mark_summary_archived(&self, id: &str, archive_s3_key: &str) -> Result<()> {
        let row = sqlx::query("SELECT data FROM usage_summaries WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Err(StoreError::NotFound(format!("summary {id}")));
        };
        let mut summary: MonthlySummary = decode(row.get("data"))?;
        summary.is_archived = true;
        summary.archive_s3_key = Some(archive_s3_key.to_string());
        self.upsert_summary(&summary).await
    }

    async fn upsert_profile(&self, profile: &UserProfile) -> Result<()> {
        let data = serde_json::to_string(profile)?;
        sqlx::query(
            "INSERT INTO profiles (user_id_hash, data) VALUES (?, ?)
             ON CONFLICT(user_id_hash) DO UPDATE SET data = excluded.data",
        )
        .bind(&profile.user_id_hash)
        .bind(&data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_profile(&self, user_id_hash: &str) -> Result<Option<UserProfile>> {
        let row = sqlx::query("SELECT data FROM profiles WHERE user_id_hash = ?")
            .bind(user_id_hash)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| decode(r.get("data"))).transpose()
    }

    async fn insert_chat_suggestion(&self, suggestion: &ChatSuggestion) -> Result<()> {
        let data = serde_json::to_string(suggestion)?;
        sqlx::query(
            "INSERT INTO chat_suggestions (suggestion_id, hashed_user_id, data)
             VALUES (?, ?, ?)
             ON CONFLICT(suggestion_id, hashed_user_id) DO UPDATE SET data = excluded.data",
        )
        .bind(&suggestion.suggestion_id)
        .bind(&suggestion.hashed_user_id)
        .bind(&data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_chat_suggestion(
        &self,
        hashed_user_id: &str,
        suggestion_id: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM chat_suggestions WHERE hashed_user_id = ? AND suggestion_id = ?",
        )
        .bind(hashed_user_id)
        .bind(suggestion_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
