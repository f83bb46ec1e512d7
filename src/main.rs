//! Tiergate integration gateway.
//!
//! Main entry point for the tiergate server. Initializes all subsystems
//! and coordinates graceful startup and shutdown.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tiergate_api::{AppState, Config, Gateway};
use tiergate_core::{Clock, RealClock, TierName};
use tiergate_pipeline::{HttpCommitter, PostgresDeadLetterStore};
use tiergate_router::HttpTierClient;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    info!("Starting tiergate integration gateway");

    let config = Config::load()?;
    let addr = config.parse_server_addr()?;
    info!(
        server_addr = %addr,
        tiers = config.tiers.len(),
        queue_capacity = config.queue_capacity,
        worker_count = config.worker_pool_size,
        database_url = config.database_url_masked().as_deref().unwrap_or("<in-memory>"),
        "Configuration loaded"
    );

    let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
    let gateway = Arc::new(build_gateway(&config, clock).await?);
    gateway.start().await.context("Failed to start worker pool")?;

    let state = AppState::new(gateway.clone(), config.operator_token());
    if state.operator_token_digest.is_none() {
        warn!("No operator token configured; operator routes will refuse every request");
    }

    info!(addr = %addr, "tiergate is ready to receive webhooks");

    // Returns once the shutdown signal has drained in-flight requests.
    if let Err(e) = tiergate_api::start_server(state, addr, config.request_timeout()).await {
        error!(error = %e, "Server failed");
    }

    // Bounded by the pipeline's own shutdown timeout; the outer limit only
    // guards against a wedged dead-letter store.
    let grace = config.shutdown_timeout() + Duration::from_secs(5);
    match tokio::time::timeout(grace, gateway.shutdown()).await {
        Ok(Ok(())) => info!("Gateway drained"),
        Ok(Err(e)) => error!(error = %e, "Gateway shutdown failed"),
        Err(_) => warn!(grace_secs = grace.as_secs(), "Gateway shutdown grace period expired"),
    }

    info!("tiergate shutdown complete");
    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing() -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,tiergate=debug,tower_http=debug"))
        .context("Invalid RUST_LOG environment variable")?;

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
    Ok(())
}

/// Wires configured tiers, the committer and dead-letter storage into a gateway.
async fn build_gateway(config: &Config, clock: Arc<dyn Clock>) -> Result<Gateway> {
    let commit_url = config
        .commit_url()
        .context("COMMIT_URL must be set: accepted webhooks need a downstream to commit to")?;
    let committer = HttpCommitter::new(commit_url, &config.to_committer_config())
        .context("Failed to build commit client")?;

    let mut builder =
        Gateway::builder(config.clone(), clock.clone()).committer(Arc::new(committer));

    for tier in &config.tiers {
        let client = HttpTierClient::new(
            TierName::from(tier.name.as_str()),
            tier.url.clone(),
            config.to_tier_client_config(),
        )
        .with_context(|| format!("Failed to build client for tier {}", tier.name))?;
        info!(tier = %tier.name, priority = tier.priority, url = %tier.url, "Tier registered");
        builder = builder.tier(tier.descriptor(), Arc::new(client));
    }

    if let Some(database_url) = config.database_url() {
        let pool = create_database_pool(database_url, config.database_max_connections).await?;
        info!("Database connection pool established");

        let store = PostgresDeadLetterStore::new(pool, clock);
        store.ensure_schema().await.context("Failed to prepare dead-letter schema")?;
        builder = builder.dead_letters(Arc::new(store));
    } else {
        warn!("DATABASE_URL not set; dead letters are kept in memory and lost on restart");
    }

    builder.build()
}

/// Creates the database connection pool with retry logic.
async fn create_database_pool(database_url: &str, max_connections: u32) -> Result<sqlx::PgPool> {
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);
    let mut retries = 0;

    loop {
        match PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(database_url)
            .await
        {
            Ok(pool) => {
                sqlx::query("SELECT 1")
                    .execute(&pool)
                    .await
                    .context("Failed to verify database connection")?;
                return Ok(pool);
            },
            Err(e) if retries < MAX_RETRIES => {
                retries += 1;
                warn!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    error = %e,
                    "Database connection failed, retrying..."
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("Failed to create database connection pool after retries");
            },
        }
    }
}
