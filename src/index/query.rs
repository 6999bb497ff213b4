use crate::index::sqlite::{SqliteIndex, record_from_row};
use crate::index::store::{DocumentRecord, StoreError};
use sqlx::{Row, SqlitePool};

/// Full-text search over an indexed library.
pub struct Query {
    pool: SqlitePool,
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub document: DocumentRecord,
    /// BM25 score; lower is a better match.
    pub rank: f64,
    pub snippet_filename: Option<String>,
    pub snippet_text: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub include_snippets: bool,
    /// Snippet length in tokens.
    pub snippet_length: u32,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: Some(50),
            offset: Some(0),
            include_snippets: true,
            snippet_length: 16,
        }
    }
}

impl Query {
    pub fn new(index: &SqliteIndex) -> Self {
        Self {
            pool: index.pool.clone(),
        }
    }

    pub async fn search(&self, query: &str) -> Result<Vec<SearchResult>, StoreError> {
        self.search_with_options(query, &SearchOptions::default())
            .await
    }

    /// Runs an FTS5 query (`term`, `"phrase"`, `a AND b`, `filename:x`, ...)
    /// and returns documents ordered by rank.
    pub async fn search_with_options(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>, StoreError> {
        let limit = options.limit.unwrap_or(50);
        let offset = options.offset.unwrap_or(0);
        let snippet_length = options.snippet_length.clamp(1, 64);

        let sql = if options.include_snippets {
            format!(
                r#"
                SELECT
                    d.path, d.filename, d.extension, d.hash, d.size, d.last_modified, d.text,
                    bm25(contents) as rank,
                    snippet(contents, 0, '<mark>', '</mark>', '...', {snippet_length}) as filename_snippet,
                    snippet(contents, 1, '<mark>', '</mark>', '...', {snippet_length}) as text_snippet
                FROM contents
                JOIN documents d ON d.id = contents.rowid
                WHERE contents MATCH ?
                ORDER BY rank
                LIMIT ? OFFSET ?
                "#
            )
        } else {
            r#"
            SELECT
                d.path, d.filename, d.extension, d.hash, d.size, d.last_modified, d.text,
                bm25(contents) as rank
            FROM contents
            JOIN documents d ON d.id = contents.rowid
            WHERE contents MATCH ?
            ORDER BY rank
            LIMIT ? OFFSET ?
            "#
            .to_string()
        };

        let rows = sqlx::query(&sql)
            .bind(query)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            let (snippet_filename, snippet_text) = if options.include_snippets {
                (row.try_get("filename_snippet")?, row.try_get("text_snippet")?)
            } else {
                (None, None)
            };

            results.push(SearchResult {
                document: record_from_row(&row)?,
                rank: row.try_get("rank")?,
                snippet_filename,
                snippet_text,
            });
        }

        Ok(results)
    }

    /// Matches against file names only.
    pub async fn search_filename(&self, query: &str) -> Result<Vec<SearchResult>, StoreError> {
        self.search_with_options(&format!("filename:{query}"), &SearchOptions::default())
            .await
    }

    /// Matches against extracted text only.
    pub async fn search_text(&self, query: &str) -> Result<Vec<SearchResult>, StoreError> {
        self.search_with_options(&format!("text:{query}"), &SearchOptions::default())
            .await
    }

    pub async fn count_results(&self, query: &str) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM contents
            WHERE contents MATCH ?
            "#,
        )
        .bind(query)
        .fetch_one(&self.pool)
        .await?;

        Ok(count as u64)
    }

    /// File names starting with `prefix`, for completion.
    pub async fn suggest(&self, prefix: &str, limit: Option<u32>) -> Result<Vec<String>, StoreError> {
        let limit = limit.unwrap_or(10);

        let suggestions: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT filename
            FROM documents
            WHERE filename LIKE ? || '%'
            ORDER BY filename
            LIMIT ?
            "#,
        )
        .bind(prefix)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(suggestions)
    }
}
