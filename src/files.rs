//! Book list files.
//!
//! Import files are JSON arrays of raw records
//! (`title`, `author`, `isbn`, `published_date`, optional `genre`);
//! exports are CSV renderings of the book view.

use crate::error::Result;
use crate::model::RawBook;
use crate::store::BookSummary;
use serde::Serialize;
use std::path::Path;
use tracing::info;

/// CSV row for an exported book
#[derive(Debug, Serialize)]
struct BookRow<'a> {
    title: &'a str,
    author: &'a str,
    genre: &'a str,
    recommenders: String,
}

/// Load raw records from a JSON file.
///
/// Null entries are dropped.
pub fn load_books_json(path: &Path) -> Result<Vec<RawBook>> {
    let content = std::fs::read_to_string(path)?;
    let entries: Vec<Option<RawBook>> = serde_json::from_str(&content)?;
    let books: Vec<RawBook> = entries.into_iter().flatten().collect();

    info!("Loaded {} books from {:?}", books.len(), path);
    Ok(books)
}

/// Write books as CSV with a header row
pub fn save_books_csv(path: &Path, books: &[BookSummary]) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(true)
        .from_path(path)?;

    for book in books {
        wtr.serialize(BookRow {
            title: &book.title,
            author: &book.author,
            genre: &book.genre,
            recommenders: book.recommenders.join(", "),
        })?;
    }

    wtr.flush()?;
    info!("Saved {} books to {:?}", books.len(), path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BookrecsError;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_books_json() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        write!(
            file,
            r#"[
                {{"title": "Dune", "author": "Frank Herbert", "isbn": "", "published_date": "1965", "genre": "Fiction"}},
                null,
                {{"title": "Emma", "author": "Jane Austen"}}
            ]"#
        )?;

        let books = load_books_json(file.path())?;
        assert_eq!(books.len(), 2);
        assert_eq!(books[0].genre.as_deref(), Some("Fiction"));
        assert_eq!(books[1].isbn, "");
        assert!(books[1].genre.is_none());
        Ok(())
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_books_json(Path::new("/nonexistent/books.json"));
        assert!(matches!(result, Err(BookrecsError::Io(_))));
    }

    #[test]
    fn test_save_books_csv() -> Result<()> {
        let temp = NamedTempFile::new()?;
        let books = vec![BookSummary {
            title: "Dune".to_string(),
            author: "Frank Herbert".to_string(),
            genre: "Science Fiction".to_string(),
            recommenders: vec!["Alice".to_string(), "Bob".to_string()],
        }];

        save_books_csv(temp.path(), &books)?;
        let content = std::fs::read_to_string(temp.path())?;
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some("title,author,genre,recommenders"));
        assert_eq!(lines.next(), Some("Dune,Frank Herbert,Science Fiction,\"Alice, Bob\""));
        Ok(())
    }
}
