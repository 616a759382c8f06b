//! Application entry point for the `powermeter-rollup` service.
//!
//! Startup sequence:
//! - Load configuration from environment variables or `.env`
//! - Initialize structured logging/tracing
//! - Connect the PostgreSQL pool and create the schema if needed
//! - Build the [`EnergyPipeline`] over a [`PgStore`]
//! - Start the flush timer, the rollup cadences and the MQTT listener
//! - Serve the HTTP API until Ctrl-C
//!
//! On Ctrl-C the HTTP server drains, background tasks are signalled through
//! one `watch` channel, and the flush task performs the final flush (or
//! discard) configured by `FLUSH_ON_SHUTDOWN` before the process exits.
//!
//! # Environment Variables
//! See [`powermeter_rollup::config::load_from_env`]. Logging is controlled by
//! `RUST_LOG` / `AXUM_LOG_LEVEL`, `AXUM_SPAN_EVENTS` and `FORCE_COLOR`.
use std::{env, io::IsTerminal, net::SocketAddr, sync::Arc};

use anyhow::Result;
use axum::Router;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use powermeter_rollup::flush::ShutdownPolicy;
use powermeter_rollup::pipeline::BackgroundOptions;
use powermeter_rollup::store::PgStore;
use powermeter_rollup::{config, mqtt, routes, schema, EnergyPipeline};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    tracing::info!("Attempting to connect to database: {}", cfg.masked_db_url());

    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .connect(&cfg.db_url)
        .await
        .map_err(|e| {
            anyhow::anyhow!(
                "Failed to connect to database '{}': {}",
                cfg.masked_db_url(),
                e
            )
        })?;

    tracing::info!("Successfully connected to database");

    schema::create_schema(&pool).await?;

    let store = Arc::new(PgStore::new(pool));
    let pipeline = Arc::new(EnergyPipeline::new(
        store,
        cfg.flush_interval(),
        cfg.alert_config(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let policy = if cfg.flush_on_shutdown {
        ShutdownPolicy::Flush
    } else {
        ShutdownPolicy::Discard
    };
    let mut tasks = pipeline.spawn_background(
        shutdown_rx.clone(),
        BackgroundOptions {
            shutdown_policy: policy,
            rollup_schedule: cfg.rollup_schedule_enabled,
        },
    );

    if cfg.mqtt_enabled {
        tasks.push(mqtt::spawn(
            cfg.mqtt_settings(),
            pipeline.clone(),
            shutdown_rx.clone(),
        )?);
    } else {
        tracing::info!("MQTT disabled; ingestion via POST /power/ingest only");
    }

    let app: Router = routes::router(pipeline);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.http_port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("HTTP server stopped, stopping background tasks");
    // Receivers may already be gone if a task exited early.
    let _ = shutdown_tx.send(true);
    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!("Background task failed: {}", e);
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    // ---
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Ctrl-C received, shutting down");
}

// ---

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `AXUM_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by the `AXUM_LOG_LEVEL` env var, with
///   `sqlx::query` capped at warn and `rumqttc` at info
///
/// Call once at startup, before any logging macros run.
fn init_tracing() {
    // ---
    let span_events = match env::var("AXUM_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to AXUM_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("AXUM_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn,rumqttc=info"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
