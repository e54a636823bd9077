//! maildrip bulk email scheduling service.
//!
//! Main entry point: initializes tracing, loads configuration, connects to
//! PostgreSQL, bootstraps the schema, and runs the delivery engine and HTTP
//! server until a shutdown signal arrives.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use maildrip_api::{AppState, BatchScheduler, Config};
use maildrip_core::{PgMessageStore, SystemClock};
use maildrip_delivery::{DeliveryEngine, HttpApiTransport};
use maildrip_queue::PgDelayQueue;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("starting maildrip");

    let config = Config::load()?;
    info!(
        database_url = %config.database_url_masked(),
        host = %config.host,
        port = config.port,
        worker_count = config.worker_count,
        max_sends_per_hour = config.max_sends_per_hour,
        "configuration loaded"
    );

    let pool = create_database_pool(&config).await?;
    info!("database connection pool established");

    bootstrap_schema(&pool).await?;
    info!("database schema ready");

    let clock: Arc<dyn maildrip_core::Clock> = Arc::new(SystemClock::new());
    let store = Arc::new(PgMessageStore::new(pool.clone()));
    let queue = Arc::new(PgDelayQueue::new(
        pool.clone(),
        config.lease_duration(),
        config.retry_policy(),
    ));
    let transport = Arc::new(
        HttpApiTransport::new(config.transport_config())
            .map_err(|e| anyhow::anyhow!("transport setup failed: {e}"))?,
    );

    let mut engine = DeliveryEngine::new(
        store.clone(),
        queue.clone(),
        transport,
        config.delivery_config(),
        clock.clone(),
    );
    engine.start().await;

    let state = AppState {
        scheduler: Arc::new(BatchScheduler::new(store.clone(), queue, clock)),
        store,
    };
    let addr = config.bind_addr()?;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = maildrip_api::server::start_server(state, addr).await {
            error!(error = %e, "HTTP server failed");
        }
    });

    info!(%addr, "maildrip is ready to schedule email");

    shutdown_signal().await;
    info!("shutdown signal received, starting graceful shutdown");

    server_handle.abort();
    if let Err(e) = engine.shutdown().await {
        error!(error = %e, "delivery engine shutdown incomplete");
    }

    pool.close().await;
    info!("maildrip shutdown complete");
    Ok(())
}

/// Initializes tracing with environment-based filtering.
fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,maildrip=debug"))
        .expect("invalid RUST_LOG environment variable");

    let fmt_layer = fmt::layer().with_target(true).with_file(true).with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Creates the database connection pool, retrying briefly on startup races.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    let mut retries = 0;
    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => {
                sqlx::query("SELECT 1")
                    .fetch_one(&pool)
                    .await
                    .context("failed to verify database connection")?;
                return Ok(pool);
            },
            Err(_) if retries < MAX_RETRIES => {
                retries += 1;
                info!(attempt = retries, max_retries = MAX_RETRIES, "database not ready, retrying");
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("failed to create database connection pool");
            },
        }
    }
}

/// Ensures the tables and indexes the service needs exist.
async fn bootstrap_schema(pool: &sqlx::PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id UUID PRIMARY KEY,
            owner_id TEXT NOT NULL,
            recipient TEXT NOT NULL,
            subject TEXT NOT NULL,
            body TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'scheduled',
            scheduled_time TIMESTAMPTZ NOT NULL,
            sent_time TIMESTAMPTZ,
            error TEXT,
            batch_start TIMESTAMPTZ NOT NULL,
            batch_delay_seconds INTEGER NOT NULL,
            batch_hourly_limit INTEGER NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create messages table")?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_messages_owner
        ON messages(owner_id, scheduled_time DESC)
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create messages owner index")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS delivery_tasks (
            id BIGSERIAL PRIMARY KEY,
            dedupe_key TEXT NOT NULL,
            payload JSONB NOT NULL,
            ready_at TIMESTAMPTZ NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            leased_until TIMESTAMPTZ,
            leased_by TEXT,
            enqueued_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create delivery_tasks table")?;

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_delivery_tasks_dedupe
        ON delivery_tasks(dedupe_key)
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create delivery_tasks dedupe index")?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_delivery_tasks_ready
        ON delivery_tasks(ready_at)
        WHERE leased_until IS NULL
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create delivery_tasks ready index")?;

    Ok(())
}

/// Waits for CTRL+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received CTRL+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
