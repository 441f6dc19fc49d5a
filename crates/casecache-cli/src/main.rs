//! casecache - command-line collaborator for the offline case cache.
//!
//! Fetches case data through the cache-aware dispatcher, queues documents
//! and photos for upload, and drains the queues against the API.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use casecache_core::models::paginate;
use casecache_core::{
    Config, ConnectivityMonitor, NewDocument, NewPhoto, OfflineClient, RequestOptions,
};

/// File name prefix of the daily rolling log in the data directory
const LOG_FILE_PREFIX: &str = "casecache.log";

#[derive(Parser)]
#[command(name = "casecache")]
#[command(about = "Offline cache and upload queue for case data", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// API base URL (overrides config and CASECACHE_BASE_URL)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Directory holding the local store (overrides config and CASECACHE_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Start with connectivity marked offline
    #[arg(long, global = true)]
    offline: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// GET a URL, falling back to cached data when the network fails
    Fetch {
        url: String,
        /// Serve cached reference data younger than the configured max age
        #[arg(long)]
        reference: bool,
        /// Page of an array response to print (1-based)
        #[arg(long)]
        page: Option<usize>,
        /// Items per page
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// List pending uploads of a victim
    Pending { victim_id: i64 },
    /// Queue a document for upload
    EnqueueDoc {
        victim_id: i64,
        label: String,
        path: PathBuf,
        /// Content type; guessed from the extension when omitted
        #[arg(long)]
        mime: Option<String>,
    },
    /// Queue a victim photo for upload
    EnqueuePhoto { victim_id: i64, path: PathBuf },
    /// Remove a queued document
    CancelDoc { id: u64 },
    /// Remove a queued photo
    CancelPhoto { id: u64 },
    /// Upload everything queued
    Sync,
    /// Show cache ages and queue sizes
    Status,
}

/// Initialize the tracing subscriber: stderr plus a daily log file in the
/// data directory when it is writable.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir.filter(|dir| std::fs::create_dir_all(dir).is_ok()) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(url) = cli.base_url.clone() {
        config.base_url = url;
    }
    if let Some(dir) = cli.data_dir.clone() {
        config.data_dir = Some(dir);
    }

    let log_dir = config.data_dir().ok().map(|dir| dir.join("logs"));
    let _guard = init_tracing(log_dir.as_deref());
    info!(base_url = %config.base_url, "casecache starting");

    let monitor = ConnectivityMonitor::new(!cli.offline);
    let client = OfflineClient::new(&config, monitor)
        .await
        .context("Failed to create API client")?;
    if !client.has_storage() {
        eprintln!("Warning: local storage unavailable, running network-only");
    }

    let result = run(&client, &config, cli.command).await;
    client.shutdown().await;
    result
}

async fn run(client: &OfflineClient, config: &Config, command: Commands) -> Result<()> {
    match command {
        Commands::Fetch {
            url,
            reference,
            page,
            limit,
        } => {
            let outcome = if reference {
                client.fetch_reference(&url, config.reference_max_age()).await?
            } else {
                client.fetch_with_fallback(&url, RequestOptions::get()).await?
            };

            if let Some(cached_at) = outcome.cached_at.filter(|_| outcome.from_cache) {
                if outcome.degraded {
                    eprintln!(
                        "Network unavailable, showing cached copy (stored {})",
                        cached_at.to_rfc3339()
                    );
                } else {
                    eprintln!("Served from cache (stored {})", cached_at.to_rfc3339());
                }
            }

            match (page, &outcome.data) {
                (Some(page), Value::Array(items)) => {
                    print_json(&paginate(items, page, limit))?;
                }
                _ => print_json(&outcome.data)?,
            }
        }
        Commands::Pending { victim_id } => {
            let documents = client.list_pending_documents(victim_id).await?;
            let photo = client.latest_pending_photo(victim_id).await?;
            print_json(&serde_json::json!({
                "documents": documents,
                "latestPhoto": photo.map(|p| serde_json::json!({
                    "capturedAt": p.captured_at,
                    "bytes": p.photo_data_url.len(),
                })),
            }))?;
        }
        Commands::EnqueueDoc {
            victim_id,
            label,
            path,
            mime,
        } => {
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .ok_or_else(|| anyhow::anyhow!("{} has no file name", path.display()))?;
            let mime_type = mime.or_else(|| guess_mime(&path).map(str::to_string));

            let id = client
                .enqueue_document(NewDocument {
                    victim_id,
                    label,
                    file_name,
                    bytes,
                    mime_type,
                })
                .await?;
            println!("Queued document {}", id);
        }
        Commands::EnqueuePhoto { victim_id, path } => {
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let mime = guess_mime(&path).unwrap_or("image/jpeg");

            let id = client
                .enqueue_photo(NewPhoto::from_image_bytes(victim_id, mime, &bytes))
                .await?;
            println!("Queued photo {}", id);
        }
        Commands::CancelDoc { id } => {
            client.delete_pending_document(id).await?;
            println!("Removed document {}", id);
        }
        Commands::CancelPhoto { id } => {
            client.delete_pending_photo(id).await?;
            println!("Removed photo {}", id);
        }
        Commands::Sync => {
            if !client.check_connectivity().await {
                anyhow::bail!("API unreachable at {}; queued uploads kept", config.base_url);
            }
            let report = client.sync_now().await;
            println!("{}", report.summary());
            for failure in report.documents.failures.iter().chain(&report.photos.failures) {
                eprintln!("  #{}: {}", failure.local_id, failure.message);
            }
        }
        Commands::Status => {
            let (documents, photos) = client.pending_counts().await?;
            println!("Pending documents: {}", documents);
            println!("Pending photos:    {}", photos);
            match client.cache() {
                Some(cache) => {
                    let ages = cache.get_cache_ages().await;
                    println!("Victims cached:    {}", ages.victims_age());
                    println!("Last update:       {}", ages.last_updated());
                    if cache.any_stale().await {
                        println!("Some cached data is stale; fetch again when online.");
                    }
                }
                None => println!("Cache:             unavailable"),
            }
        }
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn guess_mime(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "pdf" => "application/pdf",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "txt" => "text/plain",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => return None,
    };
    Some(mime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess_mime() {
        assert_eq!(guess_mime(Path::new("scan.PDF")), Some("application/pdf"));
        assert_eq!(guess_mime(Path::new("photo.jpeg")), Some("image/jpeg"));
        assert_eq!(guess_mime(Path::new("notes")), None);
        assert_eq!(guess_mime(Path::new("archive.zip")), None);
    }

    #[test]
    fn test_cli_parses_commands() {
        let cli = Cli::parse_from(["casecache", "--offline", "enqueue-doc", "3", "Plainte", "a.pdf"]);
        assert!(cli.offline);
        match cli.command {
            Commands::EnqueueDoc {
                victim_id, label, ..
            } => {
                assert_eq!(victim_id, 3);
                assert_eq!(label, "Plainte");
            }
            _ => panic!("expected enqueue-doc"),
        }
    }
}
