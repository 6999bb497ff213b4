use crate::index::store::{DocumentIdentifier, DocumentRecord, IndexStore, StoreError};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use tracing::debug;

/// SQLite-backed document index with an FTS5 mirror of filename and text.
#[derive(Clone)]
pub struct SqliteIndex {
    pub(crate) pool: SqlitePool,
}

impl SqliteIndex {
    /// Opens (creating if needed) the database at `db_path` and ensures the
    /// schema exists.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        let connection_path = format!("sqlite:{}?mode=rwc", db_path.display());
        let pool = SqlitePool::connect(&connection_path)
            .await
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", db_path.display())))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                path TEXT UNIQUE NOT NULL,
                filename TEXT NOT NULL,
                extension TEXT NOT NULL DEFAULT '',
                hash TEXT NOT NULL DEFAULT '',
                size INTEGER NOT NULL DEFAULT 0,
                last_modified INTEGER NOT NULL DEFAULT 0,
                text TEXT NOT NULL DEFAULT ''
            )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE VIRTUAL TABLE IF NOT EXISTS contents USING fts5(filename, text, content='documents', content_rowid='id')",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TRIGGER IF NOT EXISTS documents_ai AFTER INSERT ON documents BEGIN
             INSERT INTO contents(rowid, filename, text) VALUES (new.id, new.filename, new.text);
            END",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TRIGGER IF NOT EXISTS documents_ad AFTER DELETE ON documents BEGIN
             INSERT INTO contents(contents, rowid, filename, text) VALUES('delete', old.id, old.filename, old.text);
            END",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TRIGGER IF NOT EXISTS documents_au AFTER UPDATE ON documents BEGIN
             INSERT INTO contents(contents, rowid, filename, text) VALUES('delete', old.id, old.filename, old.text);
             INSERT INTO contents(rowid, filename, text) VALUES (new.id, new.filename, new.text);
            END",
        )
        .execute(&pool)
        .await?;

        debug!(path = %db_path.display(), "Opened index store");
        Ok(SqliteIndex { pool })
    }

    /// Number of indexed documents.
    pub async fn count(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    /// Closes the pool. Further calls fail as unavailable.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

pub(crate) fn record_from_row(row: &SqliteRow) -> Result<DocumentRecord, sqlx::Error> {
    Ok(DocumentRecord {
        path: row.try_get("path")?,
        filename: row.try_get("filename")?,
        extension: row.try_get("extension")?,
        hash: row.try_get("hash")?,
        size: row.try_get::<i64, _>("size")? as u64,
        last_modified: row.try_get("last_modified")?,
        text: row.try_get("text")?,
    })
}

#[async_trait]
impl IndexStore for SqliteIndex {
    async fn upsert(&self, record: &DocumentRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO documents (path, filename, extension, hash, size, last_modified, text)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(path) DO UPDATE SET
                filename = excluded.filename,
                extension = excluded.extension,
                hash = excluded.hash,
                size = excluded.size,
                last_modified = excluded.last_modified,
                text = excluded.text",
        )
        .bind(&record.path)
        .bind(&record.filename)
        .bind(&record.extension)
        .bind(&record.hash)
        .bind(record.size as i64)
        .bind(record.last_modified)
        .bind(&record.text)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<bool, StoreError> {
        let res = sqlx::query("DELETE FROM documents WHERE path = ?")
            .bind(path)
            .execute(&self.pool)
            .await?;

        Ok(res.rows_affected() > 0)
    }

    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE path = ?")
            .bind(path)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    async fn get(&self, path: &str) -> Result<Option<DocumentRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT path, filename, extension, hash, size, last_modified, text
             FROM documents WHERE path = ?",
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(record_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_identifiers(&self) -> Result<Vec<DocumentIdentifier>, StoreError> {
        let rows = sqlx::query("SELECT path, hash FROM documents ORDER BY path")
            .fetch_all(&self.pool)
            .await?;

        let mut identifiers = Vec::with_capacity(rows.len());
        for row in rows {
            identifiers.push(DocumentIdentifier {
                path: row.try_get(0)?,
                hash: row.try_get(1)?,
            });
        }
        Ok(identifiers)
    }
}
