// src/store/sqlite.rs
// SQLite-backed document store. Records are kept as JSON documents with the
// identity and ordering columns indexed alongside.

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use super::{InsertOutcome, PriorTurn, SessionRecord, SessionStore, TurnRecord, TurnStore};
use crate::error::PipelineError;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, PipelineError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), PipelineError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS turns (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                chat_id INTEGER NOT NULL,
                doc TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                data_source TEXT NOT NULL,
                doc TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_turns_session ON turns(user_id, session_id, chat_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn doc_json<T: serde::Serialize>(record: &T) -> Result<String, PipelineError> {
    serde_json::to_string(record)
        .map_err(|e| PipelineError::Other(anyhow::anyhow!("record serialization failed: {}", e)))
}

#[async_trait]
impl TurnStore for SqliteStore {
    async fn insert(&self, record: &TurnRecord) -> Result<InsertOutcome, PipelineError> {
        let doc = doc_json(record)?;
        let result = sqlx::query(
            r#"
            INSERT INTO turns (id, user_id, session_id, chat_id, doc, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&record.id)
        .bind(&record.user_id)
        .bind(&record.session_id)
        .bind(record.chat_id)
        .bind(&doc)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Ok(InsertOutcome::Conflict),
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, id: &str, record: &TurnRecord) -> Result<(), PipelineError> {
        let doc = doc_json(record)?;
        sqlx::query("UPDATE turns SET doc = $1 WHERE id = $2")
            .bind(&doc)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn latest_chat_id(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<i64>, PipelineError> {
        let max: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(chat_id) FROM turns WHERE user_id = $1 AND session_id = $2",
        )
        .bind(user_id)
        .bind(session_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(max)
    }

    async fn recent_turns(
        &self,
        user_id: &str,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<PriorTurn>, PipelineError> {
        let rows = sqlx::query(
            r#"
            SELECT doc FROM turns
            WHERE user_id = $1 AND session_id = $2
            ORDER BY chat_id DESC
            LIMIT $3
            "#,
        )
        .bind(user_id)
        .bind(session_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let doc: String = row.get("doc");
                serde_json::from_str(&doc).ok()
            })
            .collect())
    }

    async fn get_turn(
        &self,
        user_id: &str,
        session_id: &str,
        chat_id: i64,
    ) -> Result<Option<TurnRecord>, PipelineError> {
        let row = sqlx::query(
            "SELECT doc FROM turns WHERE user_id = $1 AND session_id = $2 AND chat_id = $3",
        )
        .bind(user_id)
        .bind(session_id)
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|row| {
            let doc: String = row.get("doc");
            serde_json::from_str(&doc).ok()
        }))
    }

    async fn session_history(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Vec<TurnRecord>, PipelineError> {
        let rows = sqlx::query(
            r#"
            SELECT doc FROM turns
            WHERE user_id = $1 AND session_id = $2
            ORDER BY chat_id ASC
            "#,
        )
        .bind(user_id)
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let doc: String = row.get("doc");
                serde_json::from_str(&doc).ok()
            })
            .collect())
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn insert(&self, record: &SessionRecord) -> Result<InsertOutcome, PipelineError> {
        let doc = doc_json(record)?;
        let result = sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, session_id, data_source, doc, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&record.id)
        .bind(&record.user_id)
        .bind(&record.session_id)
        .bind(&record.data_source)
        .bind(&doc)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Ok(InsertOutcome::Conflict),
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, id: &str, record: &SessionRecord) -> Result<(), PipelineError> {
        let doc = doc_json(record)?;
        sqlx::query("UPDATE sessions SET doc = $1, updated_at = $2 WHERE id = $3")
            .bind(&doc)
            .bind(chrono::Utc::now().timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<SessionRecord>, PipelineError> {
        let row = sqlx::query("SELECT doc FROM sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.and_then(|row| {
            let doc: String = row.get("doc");
            serde_json::from_str(&doc).ok()
        }))
    }

    async fn distinct_datasources(&self, user_id: &str) -> Result<Vec<String>, PipelineError> {
        let rows: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT data_source FROM sessions WHERE user_id = $1")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }

    async fn sessions_for(
        &self,
        user_id: &str,
        data_source: &str,
        limit: usize,
    ) -> Result<Vec<SessionRecord>, PipelineError> {
        let rows = sqlx::query(
            r#"
            SELECT doc FROM sessions
            WHERE user_id = $1 AND data_source = $2
            ORDER BY updated_at DESC
            LIMIT $3
            "#,
        )
        .bind(user_id)
        .bind(data_source)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let doc: String = row.get("doc");
                serde_json::from_str(&doc).ok()
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::response::FinalResponse;

    async fn test_store() -> SqliteStore {
        // A single connection keeps the in-memory database alive and shared
        let store = SqliteStore::connect("sqlite::memory:", 1).await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    fn record(session_id: &str, chat_id: i64, response: &str) -> TurnRecord {
        TurnRecord {
            summary: FinalResponse::empty(),
            chat_id,
            id: TurnRecord::identity(session_id, chat_id),
            inserted_at: chrono::Utc::now().to_rfc3339(),
            user_id: "ada@example.org".into(),
            session_id: session_id.into(),
            show_sql: false,
            show_visualization: false,
            prompt: format!("prompt {}", chat_id),
            rephrased_prompt: String::new(),
            response: response.into(),
            total_input_tokens: 10,
            total_output_tokens: 5,
            modelname: "gpt-4o".into(),
            input_cost: 0.0,
            output_cost: 0.0,
            total_cost: 0.0,
            data_source: "ahrf".into(),
            application_name: "AI Data Explorer".into(),
        }
    }

    #[tokio::test]
    async fn insert_conflict_updates_in_place() {
        let store = test_store().await;

        let first = record("s1", 1, "first");
        assert_eq!(TurnStore::insert(&store, &first).await.unwrap(), InsertOutcome::Inserted);

        let second = record("s1", 1, "second");
        assert_eq!(TurnStore::insert(&store, &second).await.unwrap(), InsertOutcome::Conflict);
        TurnStore::update(&store, &second.id, &second).await.unwrap();

        let stored = store.get_turn("ada@example.org", "s1", 1).await.unwrap().unwrap();
        assert_eq!(stored.response, "second");
        assert_eq!(store.session_history("ada@example.org", "s1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn chat_ids_count_up_from_one() {
        let store = test_store().await;
        assert_eq!(store.latest_chat_id("ada@example.org", "s1").await.unwrap(), None);

        for chat_id in 1..=3 {
            TurnStore::insert(&store, &record("s1", chat_id, "r")).await.unwrap();
        }
        assert_eq!(store.latest_chat_id("ada@example.org", "s1").await.unwrap(), Some(3));

        // Another session does not interfere
        TurnStore::insert(&store, &record("s2", 7, "r")).await.unwrap();
        assert_eq!(store.latest_chat_id("ada@example.org", "s1").await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn recent_turns_come_back_most_recent_first() {
        let store = test_store().await;
        for chat_id in 1..=7 {
            TurnStore::insert(&store, &record("s1", chat_id, "r")).await.unwrap();
        }

        let recent = store.recent_turns("ada@example.org", "s1", 5).await.unwrap();
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0].chat_id, 7);
        assert_eq!(recent[4].chat_id, 3);
    }

    #[tokio::test]
    async fn sessions_round_trip() {
        let store = test_store().await;
        let session = SessionRecord {
            id: SessionRecord::identity("ada@example.org", "s1"),
            user_id: "ada@example.org".into(),
            session_id: "s1".into(),
            session_name: "how many dentists?".into(),
            data_source: "ahrf".into(),
            application_name: "AI Data Explorer".into(),
            inserted_at: chrono::Utc::now().to_rfc3339(),
            last_updated_at: chrono::Utc::now().to_rfc3339(),
            is_favorite: false,
            is_deleted: false,
        };

        assert_eq!(SessionStore::insert(&store, &session).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(SessionStore::insert(&store, &session).await.unwrap(), InsertOutcome::Conflict);

        let datasources = store.distinct_datasources("ada@example.org").await.unwrap();
        assert_eq!(datasources, vec!["ahrf"]);

        let sessions = store.sessions_for("ada@example.org", "ahrf", 10).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session_name, "how many dentists?");
    }
}
