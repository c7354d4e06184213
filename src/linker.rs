//! Recommendation linking.
//!
//! Ensures the recommender and the book exist, then records the
//! (book, recommender) pair once. Every step is idempotent, so linking the
//! same arguments repeatedly leaves exactly one recommendation row.

use crate::dedup::{Classification, Deduplicator};
use crate::error::{BookrecsError, Result};
use crate::model::{Book, BookId, RecommenderId};
use crate::store::Storage;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// How the book side of a link was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BookOutcome {
    /// A new book row was created
    Inserted,
    /// An existing book was reused
    Matched,
}

/// Result of one link attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkResult {
    pub book_id: BookId,
    pub recommender_id: RecommenderId,
    pub book: BookOutcome,
    /// False when the recommendation already existed
    pub link_created: bool,
}

/// Links books to recommenders through [`Storage`]
#[derive(Clone)]
pub struct RecommendationLinker {
    storage: Arc<dyn Storage>,
    dedup: Deduplicator,
}

impl RecommendationLinker {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        let dedup = Deduplicator::new(storage.clone());
        Self { storage, dedup }
    }

    /// Link `book` to the recommender called `recommender_name`.
    ///
    /// # Errors
    ///
    /// `Validation` for a blank recommender name, `Persistence` when the
    /// store fails at any step.
    pub async fn link(&self, book: Book, recommender_name: &str) -> Result<LinkResult> {
        if recommender_name.trim().is_empty() {
            return Err(BookrecsError::Validation(
                "Recommender name must not be empty".to_string(),
            ));
        }

        let recommender_id = self
            .storage
            .find_or_create_recommender(recommender_name)
            .await?;

        let (book_id, outcome) = match self.dedup.classify(book).await? {
            Classification::ExistingBook(stored) => (stored.id, BookOutcome::Matched),
            Classification::NewBook(new_book) => {
                let (id, created) = self.storage.find_or_create_book(&new_book).await?;
                // Another run may have created the same identity in between
                let outcome = if created {
                    BookOutcome::Inserted
                } else {
                    BookOutcome::Matched
                };
                (id, outcome)
            }
        };

        let link_created = if self.storage.link_exists(book_id, recommender_id).await? {
            false
        } else {
            self.storage.create_link(book_id, recommender_id).await?
        };

        debug!(
            book_id = book_id.0,
            recommender_id = recommender_id.0,
            outcome = ?outcome,
            link_created = link_created,
            "Linked recommendation"
        );

        Ok(LinkResult {
            book_id,
            recommender_id,
            book: outcome,
            link_created,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RawBook;
    use crate::store::SqliteStore;

    fn book(title: &str, author: &str, isbn: &str) -> Book {
        Book::from_raw(&RawBook {
            title: title.to_string(),
            author: author.to_string(),
            isbn: isbn.to_string(),
            ..Default::default()
        })
    }

    async fn setup() -> (Arc<SqliteStore>, RecommendationLinker) {
        let store = Arc::new(SqliteStore::in_memory().await.expect("store"));
        let linker = RecommendationLinker::new(store.clone());
        (store, linker)
    }

    async fn count(store: &SqliteStore, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(store.pool())
            .await
            .expect("count")
    }

    #[tokio::test]
    async fn test_repeated_link_is_idempotent() {
        let (store, linker) = setup().await;
        let dune = book("Dune", "Frank Herbert", "9780441172719");

        let first = linker.link(dune.clone(), "Alice").await.expect("link");
        assert_eq!(first.book, BookOutcome::Inserted);
        assert!(first.link_created);

        for _ in 0..3 {
            let again = linker.link(dune.clone(), "Alice").await.expect("link again");
            assert_eq!(again.book, BookOutcome::Matched);
            assert_eq!(again.book_id, first.book_id);
            assert!(!again.link_created);
        }

        assert_eq!(count(&store, "books").await, 1);
        assert_eq!(count(&store, "recommenders").await, 1);
        assert_eq!(count(&store, "recommendations").await, 1);
    }

    #[tokio::test]
    async fn test_second_recommender_reuses_book() {
        let (store, linker) = setup().await;

        let alice = linker
            .link(book("Dune", "Frank Herbert", ""), "Alice")
            .await
            .expect("alice");
        let bob = linker
            .link(book("DUNE", "frank herbert", ""), "Bob")
            .await
            .expect("bob");

        assert_eq!(alice.book_id, bob.book_id);
        assert_ne!(alice.recommender_id, bob.recommender_id);
        assert_eq!(bob.book, BookOutcome::Matched);
        assert!(bob.link_created);
        assert_eq!(count(&store, "recommendations").await, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_links_create_one_book() {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("books.db").display());
        let store = Arc::new(SqliteStore::connect(&url).await.expect("store"));
        let linker = RecommendationLinker::new(store.clone());

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let linker = linker.clone();
                let name = if i % 2 == 0 { "Alice" } else { "Bob" };
                tokio::spawn(async move {
                    linker.link(book("Dune", "Frank Herbert", ""), name).await
                })
            })
            .collect();

        let mut inserted = 0;
        let mut links = 0;
        for handle in handles {
            let result = handle.await.expect("join").expect("link");
            if result.book == BookOutcome::Inserted {
                inserted += 1;
            }
            if result.link_created {
                links += 1;
            }
        }

        assert_eq!(inserted, 1);
        assert_eq!(links, 2);
        assert_eq!(count(&store, "books").await, 1);
        assert_eq!(count(&store, "recommenders").await, 2);
        assert_eq!(count(&store, "recommendations").await, 2);
    }

    #[tokio::test]
    async fn test_blank_recommender_rejected() {
        let (store, linker) = setup().await;
        let result = linker.link(book("Dune", "Frank Herbert", ""), "  ").await;
        assert!(matches!(result, Err(BookrecsError::Validation(_))));
        assert_eq!(count(&store, "books").await, 0);
    }
}
