//! Google Books catalog client and genre resolution.
//!
//! [`GenreResolver`] asks a [`Catalog`] for the first volume matching
//! `title + " " + author`, accepts it only when one normalized title
//! contains the other, and takes its first category as the genre.
//! Lookup failures never propagate: the book keeps genre "Unknown".

use crate::error::{BookrecsError, Result};
use crate::model::{normalize_title, standardize_date, Book, UNKNOWN_GENRE};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Google Books volumes endpoint
pub const GOOGLE_BOOKS_API_URL: &str = "https://www.googleapis.com/books/v1/volumes";

/// Minimum spacing between catalog requests required by the usage policy
pub const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(1000);

/// First volume returned for a query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogVolume {
    pub title: String,
    pub authors: Vec<String>,
    pub categories: Vec<String>,
    pub published_date: String,
}

/// External catalog searched by free-text query
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Return the first matching volume, or `None` when nothing matched
    async fn search(&self, query: &str) -> Result<Option<CatalogVolume>>;
}

#[async_trait]
impl<T: Catalog + ?Sized> Catalog for Arc<T> {
    async fn search(&self, query: &str) -> Result<Option<CatalogVolume>> {
        (**self).search(query).await
    }
}

/// Catalog client options
#[derive(Debug, Clone)]
pub struct CatalogOptions {
    /// Volumes endpoint, overridable for mirrors and tests
    pub base_url: String,
    /// Minimum spacing between two requests from this client
    pub min_interval: Duration,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for CatalogOptions {
    fn default() -> Self {
        Self {
            base_url: GOOGLE_BOOKS_API_URL.to_string(),
            min_interval: MIN_REQUEST_INTERVAL,
            timeout: Duration::from_secs(15),
        }
    }
}

/// Google Books API client with request spacing
pub struct GoogleBooksClient {
    client: reqwest::Client,
    base_url: String,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl GoogleBooksClient {
    pub fn new(options: CatalogOptions) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("bookrecs/", env!("CARGO_PKG_VERSION")))
            .timeout(options.timeout)
            .build()
            .map_err(|e| BookrecsError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: options.base_url,
            min_interval: options.min_interval,
            last_request: Mutex::new(None),
        })
    }

    /// Sleep until `min_interval` has passed since the previous request.
    ///
    /// The lock is held across the sleep so concurrent callers queue up.
    async fn wait_for_rate_limit(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!(wait_ms = wait.as_millis() as u64, "Rate limiting catalog request");
                tokio::time::sleep(wait).await;
            }
        }

        *last = Some(Instant::now());
    }
}

#[async_trait]
impl Catalog for GoogleBooksClient {
    async fn search(&self, query: &str) -> Result<Option<CatalogVolume>> {
        self.wait_for_rate_limit().await;

        let response = self
            .client
            .get(&self.base_url)
            .query(&[("q", query), ("maxResults", "1"), ("printType", "books")])
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(BookrecsError::RateLimited(60));
        }

        if !response.status().is_success() {
            return Err(BookrecsError::Api {
                code: response.status().as_u16() as i32,
                message: format!("Google Books API error: {}", response.status()),
            });
        }

        let body = response.text().await?;
        let data: VolumesResponse = serde_json::from_str(&body)?;

        Ok(data
            .items
            .into_iter()
            .next()
            .map(|item| parse_volume(item.volume_info)))
    }
}

// === Google Books API Response Types ===

#[derive(Debug, Deserialize)]
struct VolumesResponse {
    #[serde(default)]
    items: Vec<VolumeItem>,
}

#[derive(Debug, Deserialize)]
struct VolumeItem {
    #[serde(rename = "volumeInfo", default)]
    volume_info: VolumeInfo,
}

#[derive(Debug, Default, Deserialize)]
struct VolumeInfo {
    #[serde(default)]
    title: String,
    #[serde(default)]
    authors: Vec<String>,
    #[serde(default)]
    categories: Vec<String>,
    #[serde(rename = "publishedDate", default)]
    published_date: String,
}

fn parse_volume(info: VolumeInfo) -> CatalogVolume {
    CatalogVolume {
        title: info.title,
        authors: info.authors,
        categories: info.categories,
        published_date: info.published_date,
    }
}

/// Loose title match: either normalized title contains the other
pub fn is_matching_title(requested: &str, retrieved: &str) -> bool {
    let req = normalize_title(requested);
    let ret = normalize_title(retrieved);
    req.contains(&ret) || ret.contains(&req)
}

/// Why a book left enrichment without a catalog genre
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum EnrichmentMiss {
    /// Network, status or decode failure
    LookupFailed(String),
    /// The catalog returned no volume
    NoResult,
    /// The first volume's title did not match
    TitleMismatch { retrieved: String },
    /// The volume matched but lists no categories
    NoCategories,
}

/// Outcome of resolving one book
#[derive(Debug, Clone)]
pub struct Resolution {
    pub book: Book,
    /// Set when the genre was left "Unknown" by this lookup
    pub miss: Option<EnrichmentMiss>,
}

/// Populates a book's genre from a [`Catalog`]
pub struct GenreResolver<C> {
    catalog: C,
}

impl<C: Catalog> GenreResolver<C> {
    pub fn new(catalog: C) -> Self {
        Self { catalog }
    }

    /// Resolve the genre of `book`, returning the same book with the genre
    /// populated or left "Unknown". Never fails.
    pub async fn resolve(&self, book: Book) -> Book {
        self.resolve_detailed(book).await.book
    }

    /// Like [`resolve`](Self::resolve), also reporting why no genre was set.
    ///
    /// Books that already carry a known genre are returned untouched
    /// without a catalog call.
    pub async fn resolve_detailed(&self, mut book: Book) -> Resolution {
        if book.has_known_genre() {
            debug!(title = %book.title, genre = %book.genre, "Genre already known");
            return Resolution { book, miss: None };
        }

        book.genre = UNKNOWN_GENRE.to_string();
        let query = format!("{} {}", book.title, book.author);

        let volume = match self.catalog.search(&query).await {
            Ok(Some(volume)) => volume,
            Ok(None) => {
                info!(title = %book.title, "No matching books found");
                return Resolution { book, miss: Some(EnrichmentMiss::NoResult) };
            }
            Err(e) => {
                warn!(title = %book.title, error = %e, "Catalog lookup failed");
                return Resolution {
                    book,
                    miss: Some(EnrichmentMiss::LookupFailed(e.to_string())),
                };
            }
        };

        if !is_matching_title(&book.title, &volume.title) {
            info!(requested = %book.title, retrieved = %volume.title, "Title mismatch");
            return Resolution {
                book,
                miss: Some(EnrichmentMiss::TitleMismatch { retrieved: volume.title }),
            };
        }

        if book.published_date.is_empty() && !volume.published_date.trim().is_empty() {
            book.published_date = standardize_date(&volume.published_date);
        }

        let genre = volume
            .categories
            .into_iter()
            .map(|c| c.trim().to_string())
            .find(|c| !c.is_empty());

        match genre {
            Some(genre) => {
                info!(title = %book.title, genre = %genre, "Updated genre");
                book.genre = genre;
                Resolution { book, miss: None }
            }
            None => Resolution {
                book,
                miss: Some(EnrichmentMiss::NoCategories),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RawBook;
    use std::collections::HashMap;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Catalog answering from a fixed table, failing for unknown queries
    struct FixedCatalog {
        volumes: HashMap<String, CatalogVolume>,
    }

    #[async_trait]
    impl Catalog for FixedCatalog {
        async fn search(&self, query: &str) -> Result<Option<CatalogVolume>> {
            match self.volumes.get(query) {
                Some(volume) => Ok(Some(volume.clone())),
                None if query.starts_with("Broken") => {
                    Err(BookrecsError::Parse("bad json".to_string()))
                }
                None => Ok(None),
            }
        }
    }

    fn volume(title: &str, categories: &[&str]) -> CatalogVolume {
        CatalogVolume {
            title: title.to_string(),
            categories: categories.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        }
    }

    fn resolver(entries: &[(&str, CatalogVolume)]) -> GenreResolver<FixedCatalog> {
        GenreResolver::new(FixedCatalog {
            volumes: entries
                .iter()
                .map(|(q, v)| (q.to_string(), v.clone()))
                .collect(),
        })
    }

    fn book(title: &str, author: &str) -> Book {
        Book::from_raw(&RawBook {
            title: title.to_string(),
            author: author.to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn test_is_matching_title() {
        assert!(is_matching_title("Dune", "dune "));
        assert!(is_matching_title("Dune: Deluxe Edition", "Dune"));
        assert!(is_matching_title("Dune", "Dune: Deluxe Edition"));
        assert!(!is_matching_title("Dune Messiah", "Children of Dune"));
        // Short titles contained in longer ones are accepted
        assert!(is_matching_title("Dune", "Dune Messiah"));
        // A volume without a title is contained in every requested title
        assert!(is_matching_title("Dune", ""));
    }

    #[tokio::test]
    async fn test_resolve_takes_first_category() {
        let resolver = resolver(&[(
            "Dune Frank Herbert",
            volume("Dune", &["Science Fiction", "Fiction"]),
        )]);

        let resolved = resolver.resolve(book("Dune", "Frank Herbert")).await;
        assert_eq!(resolved.genre, "Science Fiction");
    }

    #[tokio::test]
    async fn test_resolve_title_mismatch_stays_unknown() {
        let resolver = resolver(&[(
            "Dune by Frank Herbert Frank Herbert",
            volume("Dune Messiah", &["Science Fiction"]),
        )]);

        let resolution = resolver
            .resolve_detailed(book("Dune by Frank Herbert", "Frank Herbert"))
            .await;
        assert_eq!(resolution.book.genre, UNKNOWN_GENRE);
        assert_eq!(
            resolution.miss,
            Some(EnrichmentMiss::TitleMismatch { retrieved: "Dune Messiah".to_string() })
        );
    }

    #[tokio::test]
    async fn test_resolve_failures_are_not_fatal() {
        let resolver = resolver(&[("Emma Jane Austen", volume("Emma", &[]))]);

        let broken = resolver.resolve_detailed(book("Broken", "Nobody")).await;
        assert_eq!(broken.book.genre, UNKNOWN_GENRE);
        assert!(matches!(broken.miss, Some(EnrichmentMiss::LookupFailed(_))));

        let missing = resolver.resolve_detailed(book("Nothing", "Nobody")).await;
        assert_eq!(missing.miss, Some(EnrichmentMiss::NoResult));

        let uncategorized = resolver.resolve_detailed(book("Emma", "Jane Austen")).await;
        assert_eq!(uncategorized.book.genre, UNKNOWN_GENRE);
        assert_eq!(uncategorized.miss, Some(EnrichmentMiss::NoCategories));
    }

    #[tokio::test]
    async fn test_resolve_backfills_published_date() {
        let mut dune = volume("Dune", &["Fiction"]);
        dune.published_date = "1990-09".to_string();
        let resolver = resolver(&[("Dune Frank Herbert", dune)]);

        let resolved = resolver.resolve(book("Dune", "Frank Herbert")).await;
        assert_eq!(resolved.published_date, "1990-09-01");
        assert_eq!(resolved.isbn, "");
    }

    #[tokio::test]
    async fn test_known_genre_skips_lookup() {
        let resolver = resolver(&[]);
        let mut known = book("Broken Earth", "N. K. Jemisin");
        known.genre = "Fantasy".to_string();

        let resolution = resolver.resolve_detailed(known).await;
        assert_eq!(resolution.book.genre, "Fantasy");
        assert!(resolution.miss.is_none());
    }

    fn test_client(server: &MockServer) -> GoogleBooksClient {
        GoogleBooksClient::new(CatalogOptions {
            base_url: format!("{}/books/v1/volumes", server.uri()),
            min_interval: Duration::ZERO,
            timeout: Duration::from_secs(5),
        })
        .expect("Failed to build client")
    }

    #[tokio::test]
    async fn test_google_books_search_first_item() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/books/v1/volumes"))
            .and(query_param("q", "Dune Frank Herbert"))
            .and(query_param("maxResults", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "kind": "books#volumes",
                "items": [
                    {"volumeInfo": {"title": "Dune", "authors": ["Frank Herbert"],
                                    "categories": ["Fiction"], "publishedDate": "1990"}},
                    {"volumeInfo": {"title": "Dune Messiah", "categories": ["Fiction"]}}
                ]
            })))
            .mount(&server)
            .await;

        let volume = test_client(&server)
            .search("Dune Frank Herbert")
            .await
            .expect("search")
            .expect("volume");
        assert_eq!(volume.title, "Dune");
        assert_eq!(volume.authors, vec!["Frank Herbert"]);
        assert_eq!(volume.categories, vec!["Fiction"]);
    }

    #[tokio::test]
    async fn test_google_books_no_items() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"totalItems": 0})),
            )
            .mount(&server)
            .await;

        let result = test_client(&server).search("zzz").await.expect("search");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_google_books_errors() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(query_param("q", "limited"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let client = test_client(&server);
        assert!(matches!(
            client.search("limited").await,
            Err(BookrecsError::RateLimited(_))
        ));
        assert!(matches!(
            client.search("garbage").await,
            Err(BookrecsError::Json(_))
        ));

        // Malformed responses still leave the book resolvable
        let resolved = GenreResolver::new(client)
            .resolve(book("garbage", ""))
            .await;
        assert_eq!(resolved.genre, UNKNOWN_GENRE);
    }

    #[tokio::test]
    async fn test_rate_limit_spacing() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let client = GoogleBooksClient::new(CatalogOptions {
            base_url: server.uri(),
            min_interval: Duration::from_millis(200),
            timeout: Duration::from_secs(5),
        })
        .expect("client");

        let started = Instant::now();
        client.search("a").await.expect("first");
        client.search("b").await.expect("second");
        assert!(started.elapsed() >= Duration::from_millis(200));
    }
}
