use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use corpus_migrator::blobs::HttpBlobFetcher;
use corpus_migrator::config::Config;
use corpus_migrator::crawl::{CrawlMode, CrawlPlanner, CrawlSummary, Crawler, FieldSchema};
use corpus_migrator::publish::{HttpDestination, Publisher};
use corpus_migrator::source::raw::{decode_item, RawSearchHit};
use corpus_migrator::source::{HttpSource, PageCursor, PageRequest, SourceApi};
use corpus_migrator::store::{list_record_ids, SyncStore};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(
        collection = %config.source_collection_id,
        "Starting corpus-migrator"
    );

    // Ensure data directories exist
    if let Some(parent) = config.database_path.parent() {
        tokio::fs::create_dir_all(parent).await.with_context(|| {
            format!("Failed to create database directory: {}", parent.display())
        })?;
    }

    let store = SyncStore::new(&config.database_path, &config.media_dir)
        .await
        .context("Failed to initialize sync store")?;

    let source = HttpSource::new(
        &config.source_base_url,
        &config.source_api_version,
        &config.source_access_token,
        config.request_timeout,
        config.retry_policy(),
    )
    .context("Failed to build source client")?;

    let blobs =
        HttpBlobFetcher::new(config.request_timeout).context("Failed to build blob fetcher")?;
    let planner = CrawlPlanner::new(config.schema_cutoff);
    let crawler = Crawler::new(
        &source,
        &store,
        &blobs,
        planner,
        config.source_collection_id.as_str(),
    );

    let mode = std::env::args().nth(1).unwrap_or_else(|| "sync".to_string());
    match mode.as_str() {
        "initial" => report(&crawler.run(CrawlMode::Initial).await?),
        "sync" => report(&crawler.run(CrawlMode::Forward).await?),
        "resync" => report(&crawler.run(CrawlMode::Overwrite).await?),
        "root" => {
            let id = std::env::args()
                .nth(2)
                .context("usage: corpus-migrator root <node-id>")?;
            crawler.capture_root(&id, FieldSchema::Full).await?;
            info!(node_id = %id, "Root captured");
        }
        "search" => {
            let query = std::env::args()
                .nth(2)
                .context("usage: corpus-migrator search <query>")?;
            run_search(&source, &query).await?;
        }
        "publish" => run_publish(&config, &store).await?,
        other => anyhow::bail!(
            "unknown mode {other:?} (expected initial|sync|resync|root|search|publish)"
        ),
    }

    Ok(())
}

fn report(summary: &CrawlSummary) {
    if summary.failed_ids.is_empty() {
        return;
    }
    // Give the operator something to re-run against.
    for id in &summary.failed_ids {
        error!(node_id = %id, "Root failed; re-run with: corpus-migrator root {id}");
    }
}

async fn run_search(source: &HttpSource, query: &str) -> Result<()> {
    let first = source
        .fetch_page(&PageRequest::search(query, "group"))
        .await
        .context("Search request failed")?;
    let mut cursor = PageCursor::new(source, first);
    while let Some(item) = cursor.try_next().await? {
        let hit: RawSearchHit = decode_item(&item)?;
        info!(id = %hit.id, name = %hit.name, "Search hit");
    }
    Ok(())
}

async fn run_publish(config: &Config, store: &SyncStore) -> Result<()> {
    let base_url = config
        .dest_base_url
        .as_deref()
        .context("DEST_BASE_URL is required for publish")?;
    let access_token = config
        .dest_access_token
        .as_deref()
        .context("DEST_ACCESS_TOKEN is required for publish")?;
    let dest = HttpDestination::new(base_url, access_token, config.request_timeout)
        .context("Failed to build destination client")?;
    let publisher = Publisher::new(&dest, config.upload_media);

    let mut created = 0;
    let mut conflicts = 0;
    for id in list_record_ids(store.pool()).await? {
        let Some(tree) = store.load_tree(&id).await? else {
            continue;
        };
        match publisher.publish_tree(&tree).await {
            Ok(summary) => {
                created += summary.created;
                conflicts += summary.conflicts;
            }
            Err(e) => error!(node_id = %id, "Failed to publish tree: {e:#}"),
        }
    }

    info!(created, conflicts, "Publish complete");
    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,corpus_migrator=debug"));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        // Structured JSON logging for production
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        // Pretty-printed logging for development
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}
