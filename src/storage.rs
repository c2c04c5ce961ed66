//! Relational persistence: documents, query history, and analytics counters.
//! A single SQLite connection pool is shared across the service; schema is
//! created idempotently at startup.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqlitePool, Row};
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub filename: String,
    pub file_path: String,
    pub file_type: String,
    pub processed_path: Option<String>,
    pub status: String,
    pub char_count: i64,
    pub chunks_created: i64,
    pub document_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRecord {
    pub id: i64,
    pub question: String,
    pub answer: Option<String>,
    pub sources_count: i64,
    pub response_time: f64,
    pub llm_used: Option<String>,
    pub context_chunks_count: i64,
    pub success: bool,
    pub similarity_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsCounters {
    pub total_queries: i64,
    pub total_documents: i64,
    pub avg_response_time: f64,
    pub last_updated: DateTime<Utc>,
}

/// Shared connection pool plus schema management.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url).await?;
        let storage = Self { pool };
        storage.migrate().await?;
        Ok(storage)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                filename TEXT NOT NULL,
                file_path TEXT NOT NULL,
                file_type TEXT NOT NULL,
                processed_path TEXT,
                status TEXT NOT NULL,
                char_count INTEGER NOT NULL DEFAULT 0,
                chunks_created INTEGER NOT NULL DEFAULT 0,
                document_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS query_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                question TEXT NOT NULL,
                answer TEXT,
                sources_count INTEGER NOT NULL DEFAULT 0,
                response_time REAL NOT NULL DEFAULT 0.0,
                llm_used TEXT,
                context_chunks_count INTEGER NOT NULL DEFAULT 0,
                success INTEGER NOT NULL,
                similarity_hash TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_query_history_hash ON query_history(similarity_hash)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_query_history_created_at ON query_history(created_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS analytics_stats (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                total_queries INTEGER NOT NULL DEFAULT 0,
                total_documents INTEGER NOT NULL DEFAULT 0,
                avg_response_time REAL NOT NULL DEFAULT 0.0,
                last_updated TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO analytics_stats (id, total_queries, total_documents, avg_response_time, last_updated)
            VALUES (1, 0, 0, 0.0, ?1)
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!("schema migrated");
        Ok(())
    }

    pub async fn upsert_document(&self, doc: &DocumentRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, filename, file_path, file_type, processed_path, status, char_count, chunks_created, document_id, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(id) DO UPDATE SET
                filename = excluded.filename,
                file_path = excluded.file_path,
                file_type = excluded.file_type,
                processed_path = excluded.processed_path,
                status = excluded.status,
                char_count = excluded.char_count,
                chunks_created = excluded.chunks_created,
                document_id = excluded.document_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.filename)
        .bind(&doc.file_path)
        .bind(&doc.file_type)
        .bind(&doc.processed_path)
        .bind(&doc.status)
        .bind(doc.char_count)
        .bind(doc.chunks_created)
        .bind(&doc.document_id)
        .bind(doc.created_at.to_rfc3339())
        .bind(doc.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(document_from_row))
    }

    pub async fn list_documents(&self) -> Result<Vec<DocumentRecord>> {
        let rows = sqlx::query("SELECT * FROM documents ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(document_from_row).collect())
    }

    pub async fn delete_document(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn insert_query_record(&self, record: &QueryRecord) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO query_history (question, answer, sources_count, response_time, llm_used, context_chunks_count, success, similarity_hash, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&record.question)
        .bind(&record.answer)
        .bind(record.sources_count)
        .bind(record.response_time)
        .bind(&record.llm_used)
        .bind(record.context_chunks_count)
        .bind(record.success)
        .bind(&record.similarity_hash)
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn all_query_records(&self) -> Result<Vec<QueryRecord>> {
        let rows = sqlx::query("SELECT * FROM query_history ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(query_record_from_row).collect())
    }

    pub async fn analytics_counters(&self) -> Result<AnalyticsCounters> {
        let row = sqlx::query("SELECT * FROM analytics_stats WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(AnalyticsCounters {
            total_queries: row.get("total_queries"),
            total_documents: row.get("total_documents"),
            avg_response_time: row.get("avg_response_time"),
            last_updated: parse_timestamp(row.get("last_updated")),
        })
    }

    pub async fn save_analytics_counters(&self, counters: &AnalyticsCounters) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE analytics_stats
            SET total_queries = ?1, total_documents = ?2, avg_response_time = ?3, last_updated = ?4
            WHERE id = 1
            "#,
        )
        .bind(counters.total_queries)
        .bind(counters.total_documents)
        .bind(counters.avg_response_time)
        .bind(counters.last_updated.to_rfc3339())
        .execute(&self.pool)
        .await?;
        info!(
            total_queries = counters.total_queries,
            total_documents = counters.total_documents,
            "analytics counters updated"
        );
        Ok(())
    }
}

fn parse_timestamp(raw: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn document_from_row(row: sqlx::sqlite::SqliteRow) -> DocumentRecord {
    DocumentRecord {
        id: row.get("id"),
        filename: row.get("filename"),
        file_path: row.get("file_path"),
        file_type: row.get("file_type"),
        processed_path: row.get("processed_path"),
        status: row.get("status"),
        char_count: row.get("char_count"),
        chunks_created: row.get("chunks_created"),
        document_id: row.get("document_id"),
        created_at: parse_timestamp(row.get("created_at")),
        updated_at: parse_timestamp(row.get("updated_at")),
    }
}

fn query_record_from_row(row: sqlx::sqlite::SqliteRow) -> QueryRecord {
    QueryRecord {
        id: row.get("id"),
        question: row.get("question"),
        answer: row.get("answer"),
        sources_count: row.get("sources_count"),
        response_time: row.get("response_time"),
        llm_used: row.get("llm_used"),
        context_chunks_count: row.get("context_chunks_count"),
        success: row.get("success"),
        similarity_hash: row.get("similarity_hash"),
        created_at: parse_timestamp(row.get("created_at")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_storage() -> Storage {
        Storage::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_migrate_seeds_analytics_row() {
        let storage = memory_storage().await;
        let counters = storage.analytics_counters().await.unwrap();
        assert_eq!(counters.total_queries, 0);
    }

    #[tokio::test]
    async fn test_document_upsert_and_fetch() {
        let storage = memory_storage().await;
        let now = Utc::now();
        let doc = DocumentRecord {
            id: "doc-1".to_string(),
            filename: "a.txt".to_string(),
            file_path: "/tmp/a.txt".to_string(),
            file_type: "txt".to_string(),
            processed_path: None,
            status: "uploaded".to_string(),
            char_count: 0,
            chunks_created: 0,
            document_id: "doc-1".to_string(),
            created_at: now,
            updated_at: now,
        };
        storage.upsert_document(&doc).await.unwrap();
        let fetched = storage.get_document("doc-1").await.unwrap().unwrap();
        assert_eq!(fetched.filename, "a.txt");

        let mut updated = doc.clone();
        updated.status = "processed".to_string();
        storage.upsert_document(&updated).await.unwrap();
        let fetched = storage.get_document("doc-1").await.unwrap().unwrap();
        assert_eq!(fetched.status, "processed");
    }

    #[tokio::test]
    async fn test_query_record_roundtrip_preserves_bool_success() {
        let storage = memory_storage().await;
        let record = QueryRecord {
            id: 0,
            question: "What is Rust?".to_string(),
            answer: Some("A systems language".to_string()),
            sources_count: 1,
            response_time: 0.42,
            llm_used: Some("openai".to_string()),
            context_chunks_count: 1,
            success: true,
            similarity_hash: "abc123".to_string(),
            created_at: Utc::now(),
        };
        storage.insert_query_record(&record).await.unwrap();
        let all = storage.all_query_records().await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].success);
    }
}
