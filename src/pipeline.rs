//! Import-and-merge pipeline.
//!
//! Fetch → normalize → genre-enrich → deduplicate-and-link, one record at
//! a time. Records are processed sequentially because every genre lookup
//! is an external call bound by the catalog's request spacing. Only a
//! total fetch failure aborts a run; everything else is itemized in the
//! [`ImportReport`].

use crate::catalog::{Catalog, EnrichmentMiss, GenreResolver};
use crate::error::BookrecsError;
use crate::goodreads::SourcePage;
use crate::linker::{BookOutcome, RecommendationLinker};
use crate::model::{Book, RawBook};
use crate::store::Storage;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Pipeline behaviour switches
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Query the catalog for books without a known genre
    pub enrich_genres: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self { enrich_genres: true }
    }
}

/// Per-record, non-fatal failure
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail")]
pub enum RecordFailure {
    /// Genre lookup failed; the record continued with genre "Unknown"
    EnrichmentFailed(String),
    /// The record could not be persisted or linked
    PersistenceError(String),
}

impl std::fmt::Display for RecordFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordFailure::EnrichmentFailed(msg) => write!(f, "enrichment failed: {}", msg),
            RecordFailure::PersistenceError(msg) => write!(f, "persistence error: {}", msg),
        }
    }
}

/// A record paired with what went wrong for it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedRecord {
    pub record: RawBook,
    pub reason: RecordFailure,
}

/// Summary of one import run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportReport {
    pub source: String,
    pub recommender: String,
    /// Records produced by the fetch step
    pub fetched: usize,
    /// Records that created a new book
    pub inserted: usize,
    /// Records resolved to an existing book
    pub matched: usize,
    /// Records without a title or author
    pub skipped: usize,
    /// Recommendation rows actually added
    pub links_created: usize,
    /// Records left with genre "Unknown"
    pub unknown_genres: usize,
    pub enrichment_failures: Vec<FailedRecord>,
    pub failed: Vec<FailedRecord>,
    /// Set only when the whole run was aborted
    pub error: Option<String>,
}

impl ImportReport {
    fn new(source: &str, recommender: &str) -> Self {
        Self {
            source: source.to_string(),
            recommender: recommender.to_string(),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Orchestrates one import per call
pub struct ImportPipeline {
    source: Arc<dyn SourcePage>,
    resolver: GenreResolver<Arc<dyn Catalog>>,
    linker: RecommendationLinker,
    options: PipelineOptions,
}

impl ImportPipeline {
    pub fn new(
        source: Arc<dyn SourcePage>,
        catalog: Arc<dyn Catalog>,
        storage: Arc<dyn Storage>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            source,
            resolver: GenreResolver::new(catalog),
            linker: RecommendationLinker::new(storage),
            options,
        }
    }

    /// Import every record of `source_url` for `recommender`.
    ///
    /// Always returns a report; a fetch that yields nothing at all is the
    /// only failure reported through [`ImportReport::error`].
    pub async fn run(&self, source_url: &str, recommender: &str) -> ImportReport {
        info!(source = source_url, recommender = recommender, "Starting import");

        if let Err(e) = validate_recommender(recommender) {
            let mut report = ImportReport::new(source_url, recommender);
            report.error = Some(e.to_string());
            return report;
        }

        match self.source.fetch(source_url).await {
            Ok(records) => self.run_batch(source_url, records, recommender).await,
            Err(e) => {
                warn!(source = source_url, error = %e, "Fetch failed, aborting import");
                let mut report = ImportReport::new(source_url, recommender);
                report.error = Some(e.to_string());
                report
            }
        }
    }

    /// Import already-fetched records, e.g. from a file.
    pub async fn run_batch(
        &self,
        source: &str,
        records: Vec<RawBook>,
        recommender: &str,
    ) -> ImportReport {
        let mut report = ImportReport::new(source, recommender);
        report.fetched = records.len();

        if let Err(e) = validate_recommender(recommender) {
            report.error = Some(e.to_string());
            return report;
        }

        for (idx, record) in records.into_iter().enumerate() {
            let book = Book::from_raw(&record);
            if !book.is_usable() {
                info!(index = idx, title = %book.title, "Skipping record without title or author");
                report.skipped += 1;
                continue;
            }

            let book = self.enrich(book, &record, &mut report).await;

            match self.linker.link(book, recommender).await {
                Ok(result) => {
                    match result.book {
                        BookOutcome::Inserted => report.inserted += 1,
                        BookOutcome::Matched => report.matched += 1,
                    }
                    if result.link_created {
                        report.links_created += 1;
                    }
                }
                Err(e) => {
                    warn!(index = idx, title = %record.title, error = %e, "Failed to link record");
                    report.failed.push(FailedRecord {
                        record,
                        reason: RecordFailure::PersistenceError(e.to_string()),
                    });
                }
            }
        }

        info!(
            source = source,
            recommender = recommender,
            fetched = report.fetched,
            inserted = report.inserted,
            matched = report.matched,
            skipped = report.skipped,
            failed = report.failed.len(),
            "Import complete"
        );

        report
    }

    async fn enrich(&self, book: Book, record: &RawBook, report: &mut ImportReport) -> Book {
        if !self.options.enrich_genres || book.has_known_genre() {
            return book;
        }

        let resolution = self.resolver.resolve_detailed(book).await;
        match resolution.miss {
            Some(EnrichmentMiss::LookupFailed(msg)) => {
                report.unknown_genres += 1;
                report.enrichment_failures.push(FailedRecord {
                    record: record.clone(),
                    reason: RecordFailure::EnrichmentFailed(msg),
                });
            }
            Some(_) => report.unknown_genres += 1,
            None => {}
        }
        resolution.book
    }
}

fn validate_recommender(name: &str) -> Result<(), BookrecsError> {
    if name.trim().is_empty() {
        return Err(BookrecsError::Validation(
            "Recommender name must not be empty".to_string(),
        ));
    }
    Ok(())
}
