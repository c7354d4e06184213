//! Persistent book/recommender/recommendation store.
//!
//! [`Storage`] is the narrow interface the import pipeline and the HTTP
//! layer depend on. [`SqliteStore`] implements it on SQLite; uniqueness
//! is enforced by the schema, so every find-or-create is a single
//! `INSERT ... ON CONFLICT DO NOTHING` followed by a read of the winning
//! row.

use crate::error::{BookrecsError, OptionExt, Result};
use crate::model::{
    normalize_key, Book, BookId, BookKey, RecommenderId, StoredBook,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

/// A book as shown by the read-side views
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookSummary {
    pub title: String,
    pub author: String,
    pub genre: String,
    pub recommenders: Vec<String>,
}

/// A recommender with the number of books they recommend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommenderSummary {
    pub name: String,
    pub book_count: i64,
}

/// Lifecycle of an import request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Failed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Failed => "failed",
        }
    }

    fn parse(value: &str) -> Result<Self> {
        [
            RequestStatus::Pending,
            RequestStatus::Approved,
            RequestStatus::Failed,
        ]
        .into_iter()
        .find(|status| status.as_str() == value)
        .ok_or_parse(&format!("Unknown import request status '{}'", value))
    }
}

/// A queued request to import one source page for one recommender
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportRequest {
    pub id: i64,
    pub recommender_name: String,
    pub source_url: String,
    pub status: RequestStatus,
    pub created_at: String,
}

/// Storage operations consumed by the pipeline and the HTTP layer.
///
/// `find_or_create_*` and `create_link` must be atomic: concurrent
/// callers racing on the same identity observe one row.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn find_book_by_isbn(&self, isbn: &str) -> Result<Option<StoredBook>>;

    /// Match on case- and whitespace-normalized title and author
    async fn find_book_by_title_author(
        &self,
        title: &str,
        author: &str,
    ) -> Result<Option<StoredBook>>;

    /// Insert the book unless its identity key exists. Returns the id and
    /// whether this call created the row.
    async fn find_or_create_book(&self, book: &Book) -> Result<(BookId, bool)>;

    async fn find_recommender_by_name(&self, name: &str) -> Result<Option<RecommenderId>>;

    async fn find_or_create_recommender(&self, name: &str) -> Result<RecommenderId>;

    async fn link_exists(&self, book: BookId, recommender: RecommenderId) -> Result<bool>;

    /// Insert the link if absent. Returns true only when a row was added.
    async fn create_link(&self, book: BookId, recommender: RecommenderId) -> Result<bool>;

    async fn list_books(&self, recommender: Option<&str>) -> Result<Vec<BookSummary>>;

    /// Books recommended by `recommender` and by nobody else
    async fn unique_books(&self, recommender: &str) -> Result<Vec<BookSummary>>;

    async fn list_recommenders(&self) -> Result<Vec<RecommenderSummary>>;

    async fn create_import_request(&self, recommender_name: &str, source_url: &str)
        -> Result<i64>;

    async fn pending_import_request(&self, id: i64) -> Result<Option<ImportRequest>>;

    async fn list_pending_import_requests(&self) -> Result<Vec<ImportRequest>>;

    async fn set_import_request_status(&self, id: i64, status: RequestStatus) -> Result<()>;
}

/// SQLite implementation of [`Storage`]
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to a database URL (e.g. `sqlite://books.db?mode=rwc`) and
    /// create the schema if needed.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        debug!("Connecting to database: {}", database_url);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Private in-memory database on a single connection
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS books (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                author TEXT NOT NULL,
                isbn TEXT NOT NULL DEFAULT '',
                published_date TEXT NOT NULL DEFAULT '',
                genre TEXT NOT NULL DEFAULT 'Unknown',
                title_key TEXT NOT NULL,
                author_key TEXT NOT NULL,
                identity_key TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_books_title_author ON books (title_key, author_key)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_books_isbn ON books (isbn)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS recommenders (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS recommendations (
                book_id INTEGER NOT NULL REFERENCES books(id),
                recommender_id INTEGER NOT NULL REFERENCES recommenders(id),
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (book_id, recommender_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS import_requests (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                recommender_name TEXT NOT NULL,
                source_url TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                processed_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!(
            "Database tables initialized (books, recommenders, recommendations, import_requests)"
        );
        Ok(())
    }

    async fn fetch_summaries(
        &self,
        sql: &str,
        recommender: Option<&str>,
    ) -> Result<Vec<BookSummary>> {
        let mut query = sqlx::query(sql);
        if let Some(name) = recommender {
            query = query.bind(name);
        }

        let rows = query.fetch_all(&self.pool).await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let names: String = row.get("recommenders");
                let mut recommenders: Vec<String> = names
                    .split('\u{1f}')
                    .filter(|n| !n.is_empty())
                    .map(str::to_string)
                    .collect();
                recommenders.sort();
                recommenders.dedup();

                BookSummary {
                    title: row.get("title"),
                    author: row.get("author"),
                    genre: row.get("genre"),
                    recommenders,
                }
            })
            .collect())
    }
}

fn book_from_row(row: &sqlx::sqlite::SqliteRow) -> StoredBook {
    StoredBook {
        id: BookId(row.get("id")),
        book: Book {
            title: row.get("title"),
            author: row.get("author"),
            isbn: row.get("isbn"),
            published_date: row.get("published_date"),
            genre: row.get("genre"),
        },
    }
}

fn request_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ImportRequest> {
    let status: String = row.get("status");
    Ok(ImportRequest {
        id: row.get("id"),
        recommender_name: row.get("recommender_name"),
        source_url: row.get("source_url"),
        status: RequestStatus::parse(&status)?,
        created_at: row.get("created_at"),
    })
}

const BOOK_COLUMNS: &str = "id, title, author, isbn, published_date, genre";

#[async_trait]
impl Storage for SqliteStore {
    async fn find_book_by_isbn(&self, isbn: &str) -> Result<Option<StoredBook>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM books WHERE isbn = ? AND isbn <> '' ORDER BY id LIMIT 1",
            BOOK_COLUMNS
        ))
        .bind(isbn)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(book_from_row))
    }

    async fn find_book_by_title_author(
        &self,
        title: &str,
        author: &str,
    ) -> Result<Option<StoredBook>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM books WHERE title_key = ? AND author_key = ? ORDER BY id LIMIT 1",
            BOOK_COLUMNS
        ))
        .bind(normalize_key(title))
        .bind(normalize_key(author))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(book_from_row))
    }

    async fn find_or_create_book(&self, book: &Book) -> Result<(BookId, bool)> {
        let identity = BookKey::of(book).encode();

        let inserted = sqlx::query(
            r#"
            INSERT INTO books (
                title, author, isbn, published_date, genre,
                title_key, author_key, identity_key
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(identity_key) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&book.title)
        .bind(&book.author)
        .bind(&book.isbn)
        .bind(&book.published_date)
        .bind(&book.genre)
        .bind(normalize_key(&book.title))
        .bind(normalize_key(&book.author))
        .bind(&identity)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok((BookId(row.get("id")), true));
        }

        let id: i64 = sqlx::query_scalar("SELECT id FROM books WHERE identity_key = ?")
            .bind(&identity)
            .fetch_one(&self.pool)
            .await?;

        Ok((BookId(id), false))
    }

    async fn find_recommender_by_name(&self, name: &str) -> Result<Option<RecommenderId>> {
        let id: Option<i64> = sqlx::query_scalar("SELECT id FROM recommenders WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        Ok(id.map(RecommenderId))
    }

    async fn find_or_create_recommender(&self, name: &str) -> Result<RecommenderId> {
        let inserted: Option<i64> = sqlx::query_scalar(
            "INSERT INTO recommenders (name) VALUES (?) ON CONFLICT(name) DO NOTHING RETURNING id",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(id) = inserted {
            debug!(name = name, id = id, "Created recommender");
            return Ok(RecommenderId(id));
        }

        let id: i64 = sqlx::query_scalar("SELECT id FROM recommenders WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;

        Ok(RecommenderId(id))
    }

    async fn link_exists(&self, book: BookId, recommender: RecommenderId) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM recommendations WHERE book_id = ? AND recommender_id = ?",
        )
        .bind(book.0)
        .bind(recommender.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(found.is_some())
    }

    async fn create_link(&self, book: BookId, recommender: RecommenderId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO recommendations (book_id, recommender_id)
            VALUES (?, ?)
            ON CONFLICT(book_id, recommender_id) DO NOTHING
            "#,
        )
        .bind(book.0)
        .bind(recommender.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_books(&self, recommender: Option<&str>) -> Result<Vec<BookSummary>> {
        let filter = if recommender.is_some() {
            "WHERE b.id IN (
                SELECT rec2.book_id FROM recommendations rec2
                JOIN recommenders r2 ON rec2.recommender_id = r2.id
                WHERE r2.name = ?
            )"
        } else {
            ""
        };

        let sql = format!(
            r#"
            SELECT b.title, b.author, b.genre,
                   GROUP_CONCAT(r.name, char(31)) AS recommenders
            FROM books b
            JOIN recommendations rec ON b.id = rec.book_id
            JOIN recommenders r ON rec.recommender_id = r.id
            {}
            GROUP BY b.id, b.title, b.author, b.genre
            ORDER BY b.title, b.author
            "#,
            filter
        );

        self.fetch_summaries(&sql, recommender).await
    }

    async fn unique_books(&self, recommender: &str) -> Result<Vec<BookSummary>> {
        let sql = r#"
            SELECT b.title, b.author, b.genre,
                   GROUP_CONCAT(r.name, char(31)) AS recommenders
            FROM books b
            JOIN recommendations rec ON b.id = rec.book_id
            JOIN recommenders r ON rec.recommender_id = r.id
            WHERE r.name = ?1
            AND b.id NOT IN (
                SELECT rec2.book_id FROM recommendations rec2
                JOIN recommenders r2 ON rec2.recommender_id = r2.id
                WHERE r2.name <> ?1
            )
            GROUP BY b.id, b.title, b.author, b.genre
            ORDER BY b.title, b.author
        "#;

        self.fetch_summaries(sql, Some(recommender)).await
    }

    async fn list_recommenders(&self) -> Result<Vec<RecommenderSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT r.name, COUNT(rec.book_id) AS book_count
            FROM recommenders r
            LEFT JOIN recommendations rec ON rec.recommender_id = r.id
            GROUP BY r.id, r.name
            ORDER BY r.name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| RecommenderSummary {
                name: row.get("name"),
                book_count: row.get("book_count"),
            })
            .collect())
    }

    async fn create_import_request(
        &self,
        recommender_name: &str,
        source_url: &str,
    ) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO import_requests (recommender_name, source_url) VALUES (?, ?) RETURNING id",
        )
        .bind(recommender_name)
        .bind(source_url)
        .fetch_one(&self.pool)
        .await?;

        info!(id = id, recommender = recommender_name, "Stored import request");
        Ok(id)
    }

    async fn pending_import_request(&self, id: i64) -> Result<Option<ImportRequest>> {
        let row = sqlx::query(
            r#"
            SELECT id, recommender_name, source_url, status, created_at
            FROM import_requests
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(request_from_row).transpose()
    }

    async fn list_pending_import_requests(&self) -> Result<Vec<ImportRequest>> {
        let rows = sqlx::query(
            r#"
            SELECT id, recommender_name, source_url, status, created_at
            FROM import_requests
            WHERE status = 'pending'
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(request_from_row).collect()
    }

    async fn set_import_request_status(&self, id: i64, status: RequestStatus) -> Result<()> {
        let result = sqlx::query(
            "UPDATE import_requests SET status = ?, processed_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BookrecsError::NotFound(format!("import request {}", id)));
        }
        Ok(())
    }
}
