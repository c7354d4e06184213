//! Goodreads shelf scraping.
//!
//! Fetches a user's shelf listing and turns each five-star row into a
//! [`RawBook`]. Rows rated below "it was amazing" are dropped silently.

use crate::error::{BookrecsError, Result};
use crate::model::{collapse_whitespace, RawBook};
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// User agent string for requests
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Rating label Goodreads shows for five stars
const MAX_RATING_LABEL: &str = "it was amazing";

/// Produces raw book records from one source page URL.
///
/// One call is one pass over the source; records come back in page order.
#[async_trait]
pub trait SourcePage: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<RawBook>>;
}

/// Scrape options for Goodreads shelves
#[derive(Debug, Clone)]
pub struct ScrapeOptions {
    /// Proxy URL (e.g., "http://127.0.0.1:7890")
    pub proxy: Option<String>,
    /// Number of shelf pages to walk, starting at the given URL
    pub max_pages: u32,
    /// Base delay before each page after the first; a random jitter of up
    /// to 1.5s is added
    pub page_delay: Duration,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        Self {
            proxy: None,
            max_pages: 1,
            page_delay: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Parsed content of one shelf page
#[derive(Debug, Default)]
pub struct ShelfPage {
    /// Whether the page contained the shelf table at all
    pub has_shelf: bool,
    /// Review rows seen, before the rating filter
    pub rows: usize,
    /// Rows that passed the rating filter
    pub books: Vec<RawBook>,
}

/// Goodreads shelf scraper
pub struct GoodreadsScraper {
    client: reqwest::Client,
    options: ScrapeOptions,
}

impl GoodreadsScraper {
    pub fn new(options: ScrapeOptions) -> Result<Self> {
        let client = build_http_client(options.proxy.as_deref(), options.timeout)?;
        Ok(Self { client, options })
    }

    /// Walk shelf pages from `start`.
    ///
    /// A failure on the first page is fatal; later failures end the walk
    /// and keep what was already parsed.
    async fn walk_shelf(&self, start: &Url) -> Result<Vec<RawBook>> {
        let max_pages = self.options.max_pages.max(1);
        let mut books = Vec::new();

        for page_num in 1..=max_pages {
            let url = page_url(start, page_num);

            if page_num > 1 {
                let jitter = rand::random::<u64>() % 1500;
                tokio::time::sleep(self.options.page_delay + Duration::from_millis(jitter)).await;
            }

            debug!(page = page_num, url = %url, "Fetching shelf page");

            let fetched = fetch_page(&self.client, &url)
                .await
                .and_then(|html| parse_shelf_page(&html));

            let page = match fetched {
                Ok(page) => page,
                Err(e) if page_num == 1 => {
                    return Err(BookrecsError::SourceUnavailable(format!("{}: {}", url, e)));
                }
                Err(e) => {
                    warn!(
                        page = page_num,
                        error = %e,
                        "Failed to fetch shelf page, keeping earlier pages"
                    );
                    break;
                }
            };

            if page_num == 1 && !page.has_shelf && page.rows == 0 {
                return Err(BookrecsError::SourceUnavailable(format!(
                    "{}: no shelf listing found",
                    url
                )));
            }

            info!(
                page = page_num,
                rows = page.rows,
                kept = page.books.len(),
                "Parsed shelf page"
            );

            if page.rows == 0 {
                break;
            }
            books.extend(page.books);
        }

        info!(total = books.len(), "Shelf scrape complete");
        Ok(books)
    }
}

#[async_trait]
impl SourcePage for GoodreadsScraper {
    async fn fetch(&self, url: &str) -> Result<Vec<RawBook>> {
        let start = validate_source_url(url)?;
        self.walk_shelf(&start).await
    }
}

/// Check that `url` parses and points at goodreads.com
pub fn validate_source_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url.trim())
        .map_err(|e| BookrecsError::Validation(format!("Invalid source URL '{}': {}", url, e)))?;

    let host = parsed
        .host_str()
        .ok_or_else(|| BookrecsError::Validation(format!("Source URL '{}' has no host", url)))?
        .to_ascii_lowercase();

    if host == "goodreads.com" || host.ends_with(".goodreads.com") {
        Ok(parsed)
    } else {
        Err(BookrecsError::Validation(
            "Request URL must be from goodreads".to_string(),
        ))
    }
}

/// Build HTTP client with optional proxy
fn build_http_client(proxy: Option<&str>, timeout: Duration) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout);

    if let Some(proxy_url) = proxy {
        let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| {
            BookrecsError::Config(format!("Invalid proxy URL '{}': {}", proxy_url, e))
        })?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| BookrecsError::Config(format!("Failed to build HTTP client: {}", e)))
}

/// URL of page `page_num`; page 1 is the URL as given
fn page_url(start: &Url, page_num: u32) -> Url {
    if page_num <= 1 {
        return start.clone();
    }

    let kept: Vec<(String, String)> = start
        .query_pairs()
        .filter(|(k, _)| k != "page")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut url = start.clone();
    {
        let mut params = url.query_pairs_mut();
        params.clear();
        for (k, v) in &kept {
            params.append_pair(k, v);
        }
        params.append_pair("page", &page_num.to_string());
    }
    url
}

/// Fetch page content
async fn fetch_page(client: &reqwest::Client, url: &Url) -> Result<String> {
    let response = client
        .get(url.as_str())
        .header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
        .header("Accept-Language", "en-US,en;q=0.9")
        .send()
        .await?;

    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(BookrecsError::RateLimited(60));
    }

    if !status.is_success() {
        return Err(BookrecsError::Api {
            code: status.as_u16() as i32,
            message: format!("HTTP error: {}", status),
        });
    }

    Ok(response.text().await?)
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| BookrecsError::Parse(e.to_string()))
}

/// Text of the first element matching `sel` inside `item`, whitespace collapsed
fn child_text(item: &ElementRef, sel: &Selector) -> String {
    item.select(sel)
        .next()
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .unwrap_or_default()
}

/// Whether the rating cell carries the five-star label, either as text or
/// as the star widget's `title`
fn is_max_rating(cell: &ElementRef) -> bool {
    let text = cell.text().collect::<String>().to_lowercase();
    if text.contains(MAX_RATING_LABEL) {
        return true;
    }

    cell.descendants()
        .filter_map(ElementRef::wrap)
        .filter_map(|el| el.value().attr("title"))
        .any(|title| title.to_lowercase().contains(MAX_RATING_LABEL))
}

/// Parse a Goodreads shelf listing.
///
/// # Arguments
///
/// * `html` - Raw HTML of one shelf page
pub fn parse_shelf_page(html: &str) -> Result<ShelfPage> {
    let document = Html::parse_document(html);

    let shelf_selector = selector("table#books")?;
    let row_selector = selector("tr.bookalike.review")?;
    let title_selector = selector("td.field.title a")?;
    let author_selector = selector("td.field.author a")?;
    let isbn_selector = selector("td.field.isbn div.value")?;
    let date_selector = selector("td.field.date_pub div.value")?;
    let rating_selector = selector("td.field.rating")?;

    let mut page = ShelfPage {
        has_shelf: document.select(&shelf_selector).next().is_some(),
        ..Default::default()
    };

    for row in document.select(&row_selector) {
        page.rows += 1;

        let rated_max = row
            .select(&rating_selector)
            .next()
            .map(|cell| is_max_rating(&cell))
            .unwrap_or(false);
        if !rated_max {
            continue;
        }

        let book = RawBook {
            title: child_text(&row, &title_selector),
            author: child_text(&row, &author_selector),
            isbn: child_text(&row, &isbn_selector),
            published_date: child_text(&row, &date_selector),
            genre: None,
        };

        if book.title.is_empty() {
            debug!(row = page.rows, "Skipping shelf row without title");
            continue;
        }
        page.books.push(book);
    }

    Ok(page)
}
