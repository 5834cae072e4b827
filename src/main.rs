use std::{net::SocketAddr, sync::Arc};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use passforge::api::{self, AppState};
use passforge::config::Config;
use passforge::db;
use passforge::jobs::{
    outbox_store::PgOutboxStore,
    pass_update_processor::{LoggingArtifactSink, PassUpdateProcessor},
    scheduler,
};
use passforge::services::{
    apple_pass::ApplePassBuilder, card_source::PgCardSource, credentials::StaticCredentials,
    google_pass::GooglePassBuilder, pass_assets::PassAssets, pass_pipeline::PassPipeline,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "passforge=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting passforge...");

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded successfully");

    // Create database pool
    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    // Run migrations
    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    // Pass builders; a platform without settings reports itself unavailable
    let apple = config
        .apple_settings()
        .map(|settings| ApplePassBuilder::new(settings, PassAssets::new(&config.pass_assets_dir)));
    let google = config.google_settings().map(GooglePassBuilder::new);
    if apple.is_none() {
        tracing::warn!("Apple pass type or team identifier missing, Apple passes disabled");
    }
    if google.is_none() {
        tracing::warn!("Google issuer id missing, Google passes disabled");
    }

    let credentials = Arc::new(StaticCredentials::from_config(&config));
    let pipeline = Arc::new(PassPipeline::new(apple, google, credentials));
    let cards = Arc::new(PgCardSource::new(pool.clone()));
    let processor = Arc::new(PassUpdateProcessor::new(
        Arc::new(PgOutboxStore::new(pool.clone())),
        cards.clone(),
        pipeline.clone(),
        Arc::new(LoggingArtifactSink),
    ));

    // Periodic outbox drain
    let mut jobs = scheduler::start_outbox_drain(
        processor.clone(),
        &config.outbox_cron,
        config.outbox_batch_size,
    )
    .await?;

    // Build application state
    let state = AppState {
        pipeline,
        cards,
        processor,
        outbox_batch_size: config.outbox_batch_size,
    };

    let app = api::router(state);

    let host: std::net::IpAddr = config.host.parse()?;
    let addr = SocketAddr::from((host, config.port));
    tracing::info!("Listening on {}", addr);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    jobs.shutdown().await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received, cleaning up...");
}
