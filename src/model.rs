//! Book, recommender and recommendation records.
//!
//! Scraped records enter as [`RawBook`], become [`Book`] once normalized,
//! and are persisted under typed ids.

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Genre used whenever the catalog could not supply one
pub const UNKNOWN_GENRE: &str = "Unknown";

/// Row id of a persisted book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BookId(pub i64);

/// Row id of a persisted recommender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecommenderId(pub i64);

/// A record as exposed by a source page or an import file.
///
/// Every field is optional on input; `genre` is only present in
/// pre-enriched files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawBook {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub isbn: String,
    #[serde(default)]
    pub published_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
}

/// A normalized book ready for enrichment and linking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub title: String,
    pub author: String,
    /// Empty means unknown
    pub isbn: String,
    /// `YYYY-MM-DD` when recognizable, otherwise as scraped
    pub published_date: String,
    pub genre: String,
}

impl Book {
    /// Build a book from a raw record, collapsing whitespace and
    /// standardizing the published date.
    pub fn from_raw(raw: &RawBook) -> Self {
        let genre = raw
            .genre
            .as_deref()
            .map(collapse_whitespace)
            .filter(|g| is_known_genre(g))
            .unwrap_or_else(|| UNKNOWN_GENRE.to_string());

        Self {
            title: collapse_whitespace(&raw.title),
            author: collapse_whitespace(&raw.author),
            isbn: clean_isbn(&raw.isbn),
            published_date: standardize_date(&raw.published_date),
            genre,
        }
    }

    /// Whether the record has enough identity to be stored
    pub fn is_usable(&self) -> bool {
        !self.title.is_empty() && !self.author.is_empty()
    }

    pub fn has_known_genre(&self) -> bool {
        is_known_genre(&self.genre)
    }

    /// The identity key of this book
    pub fn key(&self) -> BookKey {
        BookKey::of(self)
    }
}

/// Identity key: ISBN when present, otherwise normalized title and author
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BookKey {
    Isbn(String),
    TitleAuthor { title: String, author: String },
}

impl BookKey {
    pub fn of(book: &Book) -> Self {
        if book.isbn.is_empty() {
            BookKey::TitleAuthor {
                title: normalize_key(&book.title),
                author: normalize_key(&book.author),
            }
        } else {
            BookKey::Isbn(book.isbn.clone())
        }
    }

    /// Stable single-column encoding used by the unique index
    pub fn encode(&self) -> String {
        match self {
            BookKey::Isbn(isbn) => format!("isbn:{}", isbn),
            BookKey::TitleAuthor { title, author } => format!("ta:{}\u{1f}{}", title, author),
        }
    }
}

/// Persisted recommender
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommender {
    pub id: RecommenderId,
    pub name: String,
}

/// Persisted link between a book and a recommender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub book_id: BookId,
    pub recommender_id: RecommenderId,
}

/// Persisted book with its row id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredBook {
    pub id: BookId,
    #[serde(flatten)]
    pub book: Book,
}

/// Collapse runs of whitespace into single spaces and trim
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Case- and whitespace-insensitive form used for title/author matching
pub fn normalize_key(text: &str) -> String {
    collapse_whitespace(text).to_lowercase()
}

/// Trim and lowercase a title for catalog comparison
pub fn normalize_title(title: &str) -> String {
    title.trim().to_lowercase()
}

fn is_known_genre(genre: &str) -> bool {
    let genre = genre.trim();
    !genre.is_empty() && !genre.eq_ignore_ascii_case(UNKNOWN_GENRE)
}

/// ISBN-13 or ISBN-10 once separators are removed
static ISBN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{13}|\d{9}[\dX])").expect("valid ISBN pattern"));

/// Extract an ISBN-10/13 from a scraped cell; anything else is empty
fn clean_isbn(raw: &str) -> String {
    let compact: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect();

    ISBN_PATTERN
        .find(&compact)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

/// Standardize a published date to `YYYY-MM-DD`.
///
/// Partial dates default missing parts to `01`. Years must have four
/// digits. Unrecognized text is returned collapsed but otherwise
/// unchanged; blank input stays blank.
pub fn standardize_date(raw: &str) -> String {
    let text = collapse_whitespace(raw);
    if text.is_empty() {
        return text;
    }

    let full = [
        ("%Y-%m-%d", text.clone()),
        ("%Y-%m-%d", format!("{}-01", text)),
        ("%Y-%m-%d", format!("{}-01-01", text)),
        ("%b %d, %Y", text.clone()),
        ("%B %d, %Y", text.clone()),
        ("%b %d %Y", format!("{} 01 {}", month_part(&text), year_part(&text))),
        ("%B %d %Y", format!("{} 01 {}", month_part(&text), year_part(&text))),
    ];

    for (fmt, candidate) in full.iter() {
        if let Ok(date) = NaiveDate::parse_from_str(candidate, fmt) {
            // Short digit runs parse as tiny years; only four-digit years count
            if (1000..=9999).contains(&date.year()) {
                return date.format("%Y-%m-%d").to_string();
            }
        }
    }

    text
}

fn month_part(text: &str) -> &str {
    text.split(' ').next().unwrap_or_default()
}

fn year_part(text: &str) -> &str {
    let mut parts = text.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(year), None) => year,
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standardize_date() {
        assert_eq!(standardize_date("1965-08-01"), "1965-08-01");
        assert_eq!(standardize_date("1965-08"), "1965-08-01");
        assert_eq!(standardize_date("1965"), "1965-01-01");
        assert_eq!(standardize_date("Aug 01, 1965"), "1965-08-01");
        assert_eq!(standardize_date("  Aug   1965 "), "1965-08-01");
        assert_eq!(standardize_date("August 1965"), "1965-08-01");
        assert_eq!(standardize_date(""), "");
        assert_eq!(standardize_date("unknown"), "unknown");
    }

    #[test]
    fn test_standardize_date_keeps_short_years_as_text() {
        assert_eq!(standardize_date("19"), "19");
        assert_eq!(standardize_date("5"), "5");
        assert_eq!(standardize_date("0"), "0");
        assert_eq!(standardize_date("Aug 19"), "Aug 19");
        assert_eq!(standardize_date("0965-08-01"), "0965-08-01");
    }

    #[test]
    fn test_from_raw_normalizes_fields() {
        let raw = RawBook {
            title: "  Dune \n ".to_string(),
            author: "Herbert,  Frank".to_string(),
            isbn: "isbn".to_string(),
            published_date: "1965".to_string(),
            genre: Some("unknown".to_string()),
        };

        let book = Book::from_raw(&raw);
        assert_eq!(book.title, "Dune");
        assert_eq!(book.author, "Herbert, Frank");
        assert_eq!(book.isbn, "");
        assert_eq!(book.published_date, "1965-01-01");
        assert_eq!(book.genre, UNKNOWN_GENRE);
        assert!(!book.has_known_genre());
    }

    #[test]
    fn test_clean_isbn() {
        assert_eq!(clean_isbn(" 0-441-17271-7 "), "0441172717");
        assert_eq!(clean_isbn("080442957x"), "080442957X");
        assert_eq!(clean_isbn("   "), "");
        assert_eq!(clean_isbn("ISBN: 978-0-441-17271-9"), "9780441172719");
        assert_eq!(clean_isbn("12345"), "");
    }

    #[test]
    fn test_book_key_prefers_isbn() {
        let mut book = Book::from_raw(&RawBook {
            title: "Dune".to_string(),
            author: "Frank Herbert".to_string(),
            ..Default::default()
        });
        assert_eq!(
            book.key(),
            BookKey::TitleAuthor {
                title: "dune".to_string(),
                author: "frank herbert".to_string()
            }
        );

        book.isbn = "9780441172719".to_string();
        assert_eq!(book.key().encode(), "isbn:9780441172719");
    }

    #[test]
    fn test_title_author_key_ignores_case_and_spacing() {
        let a = Book::from_raw(&RawBook {
            title: "The  Left Hand of Darkness".to_string(),
            author: "Ursula K. Le Guin".to_string(),
            ..Default::default()
        });
        let b = Book::from_raw(&RawBook {
            title: "the left hand of DARKNESS ".to_string(),
            author: " ursula k.  le guin".to_string(),
            ..Default::default()
        });
        assert_eq!(a.key(), b.key());
    }
}
