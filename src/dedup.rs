//! Book identity resolution against the persisted set.
//!
//! ISBN is the stronger key and is used whenever the candidate has one;
//! otherwise the case- and whitespace-normalized (title, author) pair is.
//! Two ISBN-less editions of the same title and author therefore collapse
//! into one book.

use crate::error::Result;
use crate::model::{Book, StoredBook};
use crate::store::Storage;
use std::sync::Arc;
use tracing::debug;

/// Result of classifying a candidate book
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// No persisted book shares the identity key; create it as scraped
    NewBook(Book),
    /// A persisted book already has this identity; reuse it unchanged
    ExistingBook(StoredBook),
}

impl Classification {
    pub fn is_existing(&self) -> bool {
        matches!(self, Classification::ExistingBook(_))
    }
}

/// Classifies candidates as new or existing books
#[derive(Clone)]
pub struct Deduplicator {
    storage: Arc<dyn Storage>,
}

impl Deduplicator {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Look the candidate up by ISBN when present, else by title and author.
    ///
    /// The stored record is returned as-is even when the candidate's
    /// fields (genre included) differ.
    pub async fn classify(&self, candidate: Book) -> Result<Classification> {
        let existing = if candidate.isbn.is_empty() {
            self.storage
                .find_book_by_title_author(&candidate.title, &candidate.author)
                .await?
        } else {
            self.storage.find_book_by_isbn(&candidate.isbn).await?
        };

        match existing {
            Some(stored) => {
                debug!(
                    title = %candidate.title,
                    id = stored.id.0,
                    "Matched existing book"
                );
                Ok(Classification::ExistingBook(stored))
            }
            None => Ok(Classification::NewBook(candidate)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RawBook;
    use crate::store::SqliteStore;

    fn book(title: &str, author: &str, isbn: &str, genre: &str) -> Book {
        Book::from_raw(&RawBook {
            title: title.to_string(),
            author: author.to_string(),
            isbn: isbn.to_string(),
            genre: Some(genre.to_string()),
            ..Default::default()
        })
    }

    async fn setup() -> (Arc<SqliteStore>, Deduplicator) {
        let store = Arc::new(SqliteStore::in_memory().await.expect("store"));
        let dedup = Deduplicator::new(store.clone());
        (store, dedup)
    }

    #[tokio::test]
    async fn test_new_book_keeps_scraped_fields() {
        let (_store, dedup) = setup().await;
        let candidate = book("Dune", "Frank Herbert", "", "Science Fiction");

        let result = dedup.classify(candidate.clone()).await.expect("classify");
        assert_eq!(result, Classification::NewBook(candidate));
    }

    #[tokio::test]
    async fn test_isbn_match_reuses_existing() {
        let (store, dedup) = setup().await;
        let (id, _) = store
            .find_or_create_book(&book("Dune", "Frank Herbert", "9780441172719", "Fiction"))
            .await
            .expect("seed");

        let candidate = book("Dune (Deluxe)", "Herbert, Frank", "9780441172719", "Science Fiction");
        match dedup.classify(candidate).await.expect("classify") {
            Classification::ExistingBook(stored) => {
                assert_eq!(stored.id, id);
                assert_eq!(stored.book.genre, "Fiction");
                assert_eq!(stored.book.title, "Dune");
            }
            other => panic!("expected existing book, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_title_author_match_ignores_case_and_spacing() {
        let (store, dedup) = setup().await;
        store
            .find_or_create_book(&book("Dune", "Frank Herbert", "", "Unknown"))
            .await
            .expect("seed");

        let result = dedup
            .classify(book(" dune", "FRANK  herbert ", "", "Unknown"))
            .await
            .expect("classify");
        assert!(result.is_existing());
    }

    #[tokio::test]
    async fn test_isbn_candidate_does_not_fall_back_to_title() {
        let (store, dedup) = setup().await;
        store
            .find_or_create_book(&book("Dune", "Frank Herbert", "0441172717", "Unknown"))
            .await
            .expect("seed");

        let result = dedup
            .classify(book("Dune", "Frank Herbert", "9780441172719", "Unknown"))
            .await
            .expect("classify");
        assert!(!result.is_existing());
    }
}
