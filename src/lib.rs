//! # bookrecs
//!
//! Book recommendation import-and-merge service.
//!
//! Scrapes five-star books from a Goodreads shelf, fills in missing genres
//! from the Google Books catalog, and merges them into a shared store so each
//! book appears once no matter how many people recommend it.
//!
//! ## Modules
//!
//! - [`goodreads`] - Shelf scraping
//! - [`catalog`] - Google Books genre lookup
//! - [`dedup`] - Book identity resolution
//! - [`linker`] - Book/recommender linking
//! - [`pipeline`] - The import run and its report
//! - [`store`] - SQLite persistence
//! - [`server`] - HTTP API
//! - [`files`] - JSON import and CSV export
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bookrecs::catalog::{CatalogOptions, GoogleBooksClient};
//! use bookrecs::goodreads::{GoodreadsScraper, ScrapeOptions};
//! use bookrecs::pipeline::{ImportPipeline, PipelineOptions};
//! use bookrecs::store::SqliteStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(SqliteStore::connect("sqlite://bookrecs.db?mode=rwc").await?);
//!     let pipeline = ImportPipeline::new(
//!         Arc::new(GoodreadsScraper::new(ScrapeOptions::default())?),
//!         Arc::new(GoogleBooksClient::new(CatalogOptions::default())?),
//!         store,
//!         PipelineOptions::default(),
//!     );
//!     let report = pipeline
//!         .run("https://www.goodreads.com/review/list/1?shelf=read", "Alice")
//!         .await;
//!     println!("Inserted {} books", report.inserted);
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod dedup;
pub mod error;
pub mod files;
pub mod goodreads;
pub mod linker;
pub mod model;
pub mod pipeline;
pub mod server;
pub mod store;

pub use error::{BookrecsError, Result};
