//! bookrecs - Book Recommendation Import Service
//!
//! Imports five-star books from Goodreads shelves, enriches their genres
//! from Google Books, and serves the merged catalog over HTTP.
//!
//! ## Usage
//!
//! ### CLI Mode
//! ```bash
//! bookrecs import "https://www.goodreads.com/review/list/1?shelf=read" --recommender Alice
//! ```
//!
//! ### HTTP Server Mode
//! ```bash
//! bookrecs serve --port 3000
//! ```

use anyhow::{Context, Result};
use bookrecs::catalog::{
    CatalogOptions, GoogleBooksClient, GOOGLE_BOOKS_API_URL, MIN_REQUEST_INTERVAL,
};
use bookrecs::files::{load_books_json, save_books_csv};
use bookrecs::goodreads::{GoodreadsScraper, ScrapeOptions};
use bookrecs::pipeline::{ImportPipeline, ImportReport, PipelineOptions};
use bookrecs::server::{build_router, AppState, DEFAULT_ALLOWED_ORIGINS};
use bookrecs::store::{SqliteStore, Storage};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// Book recommendation import-and-merge service
#[derive(Parser)]
#[command(name = "bookrecs")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// SQLite database URL (default: ~/.bookrecs/bookrecs.db)
    #[arg(long, global = true, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Google Books volumes endpoint
    #[arg(long, global = true, env = "BOOKRECS_CATALOG_URL", default_value = GOOGLE_BOOKS_API_URL)]
    catalog_url: String,

    /// Minimum spacing between catalog requests in milliseconds (at least 1000)
    #[arg(long, global = true, env = "BOOKRECS_CATALOG_INTERVAL_MS", default_value = "1000")]
    catalog_interval_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run as HTTP server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Comma-separated CORS origins
        #[arg(long, env = "BOOKRECS_ALLOWED_ORIGINS", value_delimiter = ',')]
        allowed_origins: Vec<String>,

        /// Proxy URL for shelf scraping (e.g., http://127.0.0.1:7890)
        #[arg(long)]
        proxy: Option<String>,

        /// Shelf pages to walk per import
        #[arg(long, default_value = "1")]
        max_pages: u32,
    },

    /// Import a Goodreads shelf for one recommender
    Import {
        /// Goodreads shelf URL
        url: String,

        /// Recommender name
        #[arg(short, long)]
        recommender: String,

        /// Shelf pages to walk
        #[arg(long, default_value = "1")]
        max_pages: u32,

        /// Proxy URL (e.g., http://127.0.0.1:7890)
        #[arg(long)]
        proxy: Option<String>,

        /// Skip Google Books genre lookup
        #[arg(long)]
        no_genres: bool,
    },

    /// Import books from a JSON file
    ImportFile {
        /// JSON array of book records
        path: PathBuf,

        /// Recommender name
        #[arg(short, long)]
        recommender: String,

        /// Skip Google Books genre lookup
        #[arg(long)]
        no_genres: bool,
    },

    /// Export books to CSV
    Export {
        /// Output CSV path
        output: PathBuf,

        /// Only books this recommender recommends
        #[arg(short, long)]
        recommender: Option<String>,
    },
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    if cli.json_logs {
        fmt().json().with_env_filter(filter).with_target(true).init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .init();
    }

    let database_url = match cli.database_url.clone() {
        Some(url) => url,
        None => default_database_url()?,
    };
    let store = Arc::new(
        SqliteStore::connect(&database_url)
            .await
            .with_context(|| format!("Failed to open database {}", database_url))?,
    );

    let catalog_options = catalog_options(&cli);

    match cli.command {
        Commands::Serve {
            port,
            host,
            allowed_origins,
            proxy,
            max_pages,
        } => {
            let scrape = ScrapeOptions {
                proxy,
                max_pages,
                ..Default::default()
            };
            let pipeline = build_pipeline(store.clone(), scrape, catalog_options, true)?;
            run_server(host, port, allowed_origins, store, pipeline).await
        }
        Commands::Import {
            url,
            recommender,
            max_pages,
            proxy,
            no_genres,
        } => {
            let scrape = ScrapeOptions {
                proxy,
                max_pages,
                ..Default::default()
            };
            let pipeline = build_pipeline(store, scrape, catalog_options, !no_genres)?;
            let report = pipeline.run(&url, &recommender).await;
            finish_import(&report)
        }
        Commands::ImportFile {
            path,
            recommender,
            no_genres,
        } => {
            let records = load_books_json(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let pipeline =
                build_pipeline(store, ScrapeOptions::default(), catalog_options, !no_genres)?;
            let source = path.display().to_string();
            let report = pipeline.run_batch(&source, records, &recommender).await;
            finish_import(&report)
        }
        Commands::Export {
            output,
            recommender,
        } => {
            let books = store.list_books(recommender.as_deref()).await?;
            save_books_csv(&output, &books)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!("Exported {} books to {}", books.len(), output.display());
            Ok(())
        }
    }
}

/// `sqlite://~/.bookrecs/bookrecs.db?mode=rwc`, creating the directory
fn default_database_url() -> Result<String> {
    let dir = dirs::home_dir()
        .context("Could not determine home directory")?
        .join(".bookrecs");
    std::fs::create_dir_all(&dir).context("Failed to create data directory")?;
    Ok(format!("sqlite://{}?mode=rwc", dir.join("bookrecs.db").display()))
}

fn catalog_options(cli: &Cli) -> CatalogOptions {
    let requested = Duration::from_millis(cli.catalog_interval_ms);
    if requested < MIN_REQUEST_INTERVAL {
        warn!(
            requested_ms = cli.catalog_interval_ms,
            "Catalog interval below 1000ms, using 1000ms"
        );
    }

    CatalogOptions {
        base_url: cli.catalog_url.clone(),
        min_interval: requested.max(MIN_REQUEST_INTERVAL),
        ..Default::default()
    }
}

fn build_pipeline(
    store: Arc<SqliteStore>,
    scrape: ScrapeOptions,
    catalog: CatalogOptions,
    enrich_genres: bool,
) -> Result<Arc<ImportPipeline>> {
    let scraper = GoodreadsScraper::new(scrape).context("Failed to build shelf scraper")?;
    let catalog = GoogleBooksClient::new(catalog).context("Failed to build catalog client")?;

    Ok(Arc::new(ImportPipeline::new(
        Arc::new(scraper),
        Arc::new(catalog),
        store,
        PipelineOptions { enrich_genres },
    )))
}

/// Print the report and fail when the run was aborted
fn finish_import(report: &ImportReport) -> Result<()> {
    println!("\n--- Import: {} ({}) ---", report.recommender, report.source);
    println!("Fetched:        {}", report.fetched);
    println!("Inserted:       {}", report.inserted);
    println!("Matched:        {}", report.matched);
    println!("Skipped:        {}", report.skipped);
    println!("Links created:  {}", report.links_created);
    println!("Unknown genre:  {}", report.unknown_genres);

    for failure in &report.enrichment_failures {
        println!("  ! {}: {}", failure.record.title, failure.reason);
    }
    for failure in &report.failed {
        println!("  x {}: {}", failure.record.title, failure.reason);
    }

    match &report.error {
        Some(e) => anyhow::bail!("Import aborted: {}", e),
        None => {
            println!("\n✓ Import complete.");
            Ok(())
        }
    }
}

// ============================================================================
// HTTP Server
// ============================================================================

async fn run_server(
    host: String,
    port: u16,
    allowed_origins: Vec<String>,
    store: Arc<SqliteStore>,
    pipeline: Arc<ImportPipeline>,
) -> Result<()> {
    info!(host = %host, port = port, "Starting HTTP server");

    let origins: Vec<String> = if allowed_origins.is_empty() {
        DEFAULT_ALLOWED_ORIGINS.iter().map(|o| o.to_string()).collect()
    } else {
        allowed_origins
    };

    let app = build_router(AppState::new(store, pipeline), &origins);

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .context("Invalid host:port")?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}
