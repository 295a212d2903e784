use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use sift_client::{ChromeBrowser, DomPruner, ExtractionClient, MetaTagParser};
use sift_core::config::{DEFAULT_SCRAPE_QUEUE, PipelineConfig};
use sift_core::ledger::sweep;
use sift_core::traits::ProductStore;
use sift_core::{
    ArticleBatch, Broker, ConsumerGroup, Disposition, ExtractionHandler, ProductValidator,
    QueueConsumer, ScrapeHandler, ScrapeOrchestrator, SystemClock, TracingConsumerReporter,
    WorkItem, WorkProducer,
};
use sift_db::{
    Database, DatabaseConfig, FailedRepository, InvalidRepository, PgBroker, ProductRepository,
};

type Scraping = ScrapeHandler<ChromeBrowser, DomPruner, PgBroker, FailedRepository, InvalidRepository>;
type Extraction =
    ExtractionHandler<ExtractionClient, MetaTagParser, ProductRepository, FailedRepository>;

#[derive(Parser)]
#[command(name = "sift", version, about = "E-commerce product acquisition pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum QueueSelection {
    Scrape,
    Extraction,
    All,
}

impl QueueSelection {
    fn scrape(self) -> bool {
        matches!(self, Self::Scrape | Self::All)
    }

    fn extraction(self) -> bool {
        matches!(self, Self::Extraction | Self::All)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the queue consumers until Ctrl-C
    Consume {
        /// Which queue loops to run
        #[arg(long, value_enum, default_value_t = QueueSelection::All)]
        queue: QueueSelection,

        /// Stable consumer tag; deliveries left over by a previous run with
        /// the same tag are recovered at startup
        #[arg(long, env = "CONSUMER_TAG")]
        consumer_tag: Option<String>,

        /// DevTools websocket of a running browser (launches one if unset)
        #[arg(long, env = "BROWSER_WS_ENDPOINT")]
        browser_ws: Option<String>,
    },

    /// Publish work items onto the scrape queue
    Enqueue {
        /// Product page URL
        #[arg(short, long, requires_all = ["key", "offer_id"], conflicts_with = "file")]
        url: Option<String>,

        /// Natural key of the product
        #[arg(short, long)]
        key: Option<String>,

        /// Offer the product belongs to
        #[arg(short, long)]
        offer_id: Option<i64>,

        /// JSON file of the form {"articles": [{"url", "key", "offerid"}]}
        #[arg(short, long, required_unless_present = "url")]
        file: Option<PathBuf>,

        /// Scrape queue name
        #[arg(long, env = "SCRAPE_QUEUE_NAME", default_value = DEFAULT_SCRAPE_QUEUE)]
        queue: String,
    },

    /// Scrape, extract and persist one product without going through the queues
    ScrapeOne {
        #[arg(short, long)]
        url: String,

        #[arg(short, long)]
        key: String,

        #[arg(short, long)]
        offer_id: i64,

        #[arg(long, env = "BROWSER_WS_ENDPOINT")]
        browser_ws: Option<String>,
    },

    /// Reconcile the failure ledger with stored products, then apply the ignore policy
    Sweep,

    /// Re-enqueue retry candidates from the failure ledger
    Retry {
        /// Maximum number of candidates to enqueue
        #[arg(short, long, default_value_t = 1000)]
        limit: usize,
    },

    /// Return unacknowledged deliveries of a dead consumer to the queue
    Recover {
        /// Consumer tag the deliveries are held by
        #[arg(short, long)]
        consumer: String,

        #[arg(long, value_enum, default_value_t = QueueSelection::All)]
        queue: QueueSelection,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("sift=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Consume {
            queue,
            consumer_tag,
            browser_ws,
        } => {
            let config = load_pipeline_config()?;
            let db = connect_db().await?;
            cmd_consume(&config, &db, queue, consumer_tag, browser_ws.as_deref()).await?;
        }
        Commands::Enqueue {
            url,
            key,
            offer_id,
            file,
            queue,
        } => {
            let db = connect_db().await?;
            let items = match (file, url, key, offer_id) {
                (Some(path), ..) => read_articles(&path)?,
                (None, Some(url), Some(key), Some(offer_id)) => {
                    vec![WorkItem::new(url, key, offer_id)]
                }
                _ => anyhow::bail!("either --file or --url, --key and --offer-id are required"),
            };
            let count = WorkProducer::new(db.broker(), queue)
                .enqueue_all(&items)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            println!("Enqueued {count} work items");
        }
        Commands::ScrapeOne {
            url,
            key,
            offer_id,
            browser_ws,
        } => {
            let config = load_pipeline_config()?;
            let db = connect_db().await?;
            let item = WorkItem::new(url, key, offer_id);
            cmd_scrape_one(&config, &db, &item, browser_ws.as_deref()).await?;
        }
        Commands::Sweep => {
            let db = connect_db().await?;
            let report = sweep(&db.failed_repo())
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            println!(
                "Resolved {} failed records, ignored {}",
                report.resolved, report.ignored
            );
        }
        Commands::Retry { limit } => {
            let config = load_pipeline_config()?;
            let db = connect_db().await?;
            let count = WorkProducer::new(db.broker(), config.scrape_queue.name.clone())
                .requeue_failed(&db.failed_repo(), &config.deny_list.ids(), limit)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            println!("Re-enqueued {count} failed items");
        }
        Commands::Recover { consumer, queue } => {
            let config = load_pipeline_config()?;
            let db = connect_db().await?;
            let broker = db.broker();
            let mut recovered = 0;
            for name in selected_queues(&config, queue) {
                recovered += broker
                    .recover(name, &consumer)
                    .await
                    .map_err(|e| anyhow::anyhow!(e))?;
            }
            println!("Recovered {recovered} deliveries held by {consumer}");
        }
    }

    Ok(())
}

fn load_pipeline_config() -> Result<PipelineConfig> {
    PipelineConfig::from_env()
        .map_err(|e| anyhow::anyhow!(e))
        .context("Invalid pipeline configuration")
}

/// Connect to PostgreSQL using DATABASE_URL and apply pending migrations.
async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    let db = Database::connect(&config)
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to connect to database")?;
    db.migrate().await.map_err(|e| anyhow::anyhow!(e))?;
    Ok(db)
}

async fn connect_browser(ws_url: Option<&str>) -> Result<ChromeBrowser> {
    let browser = match ws_url {
        Some(ws) => ChromeBrowser::connect(ws).await,
        None => ChromeBrowser::launch().await,
    };
    browser
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to start browser")
}

fn read_articles(path: &Path) -> Result<Vec<WorkItem>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read articles file: {}", path.display()))?;
    let batch: ArticleBatch =
        serde_json::from_str(&raw).context("Invalid JSON in articles file")?;
    Ok(batch.work_items())
}

fn selected_queues(config: &PipelineConfig, selection: QueueSelection) -> Vec<&str> {
    let mut queues = Vec::new();
    if selection.scrape() {
        queues.push(config.scrape_queue.name.as_str());
    }
    if selection.extraction() {
        queues.push(config.extraction_queue.name.as_str());
    }
    queues
}

fn build_handlers(
    config: &PipelineConfig,
    db: &Database,
    browser: ChromeBrowser,
) -> Result<(Scraping, Extraction)> {
    let orchestrator = ScrapeOrchestrator::new(
        browser,
        DomPruner::new(),
        config.scraper.clone(),
        config.deny_list.clone(),
    )
    .with_native_offer(config.native_offer);
    let scraping = ScrapeHandler::new(
        orchestrator,
        db.broker(),
        db.failed_repo(),
        db.invalid_repo(),
        config.extraction_queue.name.clone(),
        config.extraction.model.clone(),
    );

    let extractor = ExtractionClient::new(&config.extraction).map_err(|e| anyhow::anyhow!(e))?;
    let validator =
        ProductValidator::new(config.native_offer).map_err(|e| anyhow::anyhow!(e))?;
    let extraction = ExtractionHandler::new(
        extractor,
        MetaTagParser::new(),
        db.product_repo(),
        db.failed_repo(),
        validator,
    )
    .with_fallback_api_key(config.credentials.first().cloned());

    Ok((scraping, extraction))
}

async fn cmd_consume(
    config: &PipelineConfig,
    db: &Database,
    selection: QueueSelection,
    consumer_tag: Option<String>,
    browser_ws: Option<&str>,
) -> Result<()> {
    let browser = connect_browser(browser_ws).await?;
    let (scraping, extraction) = build_handlers(config, db, browser)?;
    let broker = db.broker();

    if let Some(tag) = &consumer_tag {
        for queue in selected_queues(config, selection) {
            let recovered = broker
                .recover(queue, tag)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            if recovered > 0 {
                tracing::info!(%queue, %tag, recovered, "Reclaimed deliveries from a previous run");
            }
        }
    }

    let cancel_token = CancellationToken::new();
    let reporter = Arc::new(TracingConsumerReporter);
    let mut group = ConsumerGroup::new(cancel_token.clone());

    if selection.scrape() {
        let mut consumer = QueueConsumer::new(
            broker.clone(),
            scraping,
            SystemClock,
            config.scrape_queue.clone(),
        );
        if let Some(tag) = &consumer_tag {
            consumer = consumer.with_consumer_tag(tag.clone());
        }
        tracing::info!(queue = %consumer.queue(), tag = %consumer.consumer_tag(), "Starting scrape consumer");
        group.spawn(consumer, Arc::clone(&reporter));
    }

    if selection.extraction() {
        let mut consumer = QueueConsumer::new(
            broker.clone(),
            extraction,
            SystemClock,
            config.extraction_queue.clone(),
        )
        .with_credentials(config.credentials.clone());
        if let Some(tag) = &consumer_tag {
            consumer = consumer.with_consumer_tag(tag.clone());
        }
        tracing::info!(queue = %consumer.queue(), tag = %consumer.consumer_tag(), "Starting extraction consumer");
        group.spawn(consumer, Arc::clone(&reporter));
    }

    tokio::spawn({
        let cancel_token = cancel_token.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown signal received");
            }
            cancel_token.cancel();
        }
    });

    group.join().await.map_err(|e| anyhow::anyhow!(e))?;
    tracing::info!("All consumers stopped");
    Ok(())
}

async fn cmd_scrape_one(
    config: &PipelineConfig,
    db: &Database,
    item: &WorkItem,
    browser_ws: Option<&str>,
) -> Result<()> {
    let api_key = config
        .credentials
        .first()
        .cloned()
        .context("LLM_API_KEYS must contain at least one key")?;

    let browser = connect_browser(browser_ws).await?;
    let (scraping, extraction) = build_handlers(config, db, browser)?;

    tracing::info!(url = %item.url, key = %item.natural_key, "Scraping single item");
    let disposition = scraping
        .process_inline(item, &extraction, &api_key)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    match disposition {
        Disposition::Persisted | Disposition::AlreadyPersisted => {
            let product = db
                .product_repo()
                .get_by_natural_key(&item.natural_key)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            println!("{}", serde_json::to_string_pretty(&product)?);
        }
        Disposition::Invalid(reason) => println!("Invalid: {}", reason.message()),
        Disposition::Failed { message } => println!("Failed: {message}"),
        Disposition::Forwarded { final_url } => println!("Forwarded: {final_url}"),
    }

    Ok(())
}
