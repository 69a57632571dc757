use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use signals_pipeline::catalog::{HttpCatalogCrawler, run_crawler};
use signals_pipeline::cli::params::validate_load_args;
use signals_pipeline::cli::{Cli, Commands};
use signals_pipeline::config::PipelineConfig;
use signals_pipeline::credentials::Credentials;
use signals_pipeline::errors::{Error, Result};
use signals_pipeline::fetch::{ChartClient, RandomUserAgent};
use signals_pipeline::ingest::{IngestRequest, run_ingest};
use signals_pipeline::logging;
use signals_pipeline::query::{HttpQueryService, reload_raw_table};
use signals_pipeline::storage::{LocalObjectStore, ObjectStore};
use signals_pipeline::transform::{TransformRequest, run_transform};
use signals_pipeline::universe::TickerUniverse;
use tracing::{error, info};

async fn load(
    config: &PipelineConfig,
    start: &str,
    end: &str,
    ticker: Option<&str>,
    ntickers: Option<usize>,
) -> Result<()> {
    let args = validate_load_args(start, end, ticker, ntickers)?;
    info!(start = %args.start, end = %args.end, "Crawler date range");

    let universe = TickerUniverse::load(
        &config.universe.ticker_map,
        config.universe.corrections.as_deref(),
    )?;
    let tickers = universe.select(args.ticker.as_deref(), args.ntickers)?;

    let identity = Arc::new(RandomUserAgent::new(config.fetch.user_agents.clone())?);
    let client = Arc::new(ChartClient::new(&config.fetch, identity)?);
    let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(config.storage.data_bucket_path()));

    let report = run_ingest(
        config,
        client,
        store,
        IngestRequest {
            tickers,
            start: args.start,
            end: args.end,
        },
    )
    .await?;
    info!(
        requested = report.requested,
        failed = report.failed_fetches,
        rows = report.rows,
        "Load summary"
    );
    Ok(())
}

async fn run(cli: &Cli, config: &PipelineConfig) -> Result<()> {
    let credentials = Arc::new(Credentials::resolve(cli.local)?);
    info!(mode = credentials.mode(), "Credentials resolved");

    match &cli.command {
        Commands::Load {
            start,
            end,
            ticker,
            ntickers,
        } => load(config, start, end, ticker.as_deref(), *ntickers).await,

        Commands::Transform {
            family,
            lags,
            reload,
        } => {
            if *reload {
                let endpoint = config
                    .query
                    .endpoint
                    .as_deref()
                    .ok_or_else(|| Error::Config("query.endpoint is required for --reload".into()))?;
                let service = HttpQueryService::new(endpoint, Arc::clone(&credentials))?;
                let query_store = LocalObjectStore::new(config.storage.query_bucket_path());
                info!("Running query");
                reload_raw_table(config, &service, &query_store).await?;
            }

            let store: Arc<dyn ObjectStore> =
                Arc::new(LocalObjectStore::new(config.storage.data_bucket_path()));
            let report = run_transform(
                config,
                store,
                TransformRequest {
                    family: *family,
                    lags: *lags,
                    today: chrono::Local::now().date_naive(),
                },
            )
            .await?;
            info!(
                tickers = report.tickers,
                failed = report.failed_tickers,
                rows = report.rows,
                "Transform summary"
            );
            Ok(())
        }

        Commands::Crawl => {
            let endpoint = config
                .catalog
                .endpoint
                .as_deref()
                .ok_or_else(|| Error::Config("catalog.endpoint is required for crawl".into()))?;
            let crawler = HttpCatalogCrawler::new(endpoint, credentials)?;
            run_crawler(
                &crawler,
                &config.catalog.crawler,
                Duration::from_millis(config.catalog.poll_interval_ms),
            )
            .await?;
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; the environment may already be set.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = PipelineConfig::from_file(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;
    logging::init(&cli.log_level, config.logging.file.as_deref())?;

    let started = Instant::now();
    info!(command = ?cli.command, "Begin");

    let outcome = match config.run.deadline_secs {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), run(&cli, &config))
            .await
            .unwrap_or_else(|_| Err(Error::Validation(format!("run exceeded its {secs}s deadline")))),
        None => run(&cli, &config).await,
    };

    let elapsed = started.elapsed().as_secs_f64();
    match outcome {
        Ok(()) => {
            info!(elapsed_secs = elapsed, elapsed_min = elapsed / 60.0, "Time taken");
            Ok(())
        }
        Err(err) => {
            let err = anyhow::Error::from(err);
            error!(elapsed_secs = elapsed, "Run failed: {err:#}");
            Err(err)
        }
    }
}
