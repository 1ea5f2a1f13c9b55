//! nubcheck-pl (Prediction Lifecycle) - paid scan intake, review and settlement
//!
//! Serves the upload/poll API, the payment and bot webhooks and the admin
//! endpoints, and runs the outbox job dispatcher in the background.

use anyhow::{Context, Result};
use clap::Parser;
use nubcheck_common::config::AppConfig;
use nubcheck_common::db::init_database;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use nubcheck_pl::classifier::GeminiClassifier;
use nubcheck_pl::images::LocalImageStore;
use nubcheck_pl::notify::{ResendClient, TelegramBot};
use nubcheck_pl::payments::StripeClient;
use nubcheck_pl::store::Store;
use nubcheck_pl::{build_router, AppState, Collaborators};

/// Command-line arguments (highest configuration priority)
#[derive(Debug, Parser)]
#[command(name = "nubcheck-pl", version, about = "Prediction lifecycle service")]
struct Args {
    /// TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, e.g. 127.0.0.1:5780
    #[arg(long)]
    listen: Option<String>,

    /// SQLite database file
    #[arg(long)]
    database: Option<PathBuf>,
}

fn init_tracing(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config comes first so its log level can seed the filter
    let mut config = AppConfig::load(args.config.as_deref(), |key| std::env::var(key).ok())
        .context("Failed to load configuration")?;
    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }
    if let Some(database) = args.database {
        config.database.path = Some(database);
    }

    init_tracing(&config.logging.level);

    // Build identification immediately after tracing init
    info!(
        "Starting nubcheck Prediction Lifecycle (nubcheck-pl) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    for warning in config.validate() {
        warn!("Config: {}", warning);
    }

    let db_path = config.database_path();
    info!("Database path: {}", db_path.display());
    let pool = match init_database(&db_path).await {
        Ok(pool) => {
            info!("✓ Database ready");
            pool
        }
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            return Err(e.into());
        }
    };
    let store = Store::new(pool, config.database.max_lock_wait_ms);

    // Signed image URLs stop working across restarts without a configured secret
    let image_secret = config
        .images
        .signing_secret
        .clone()
        .unwrap_or_else(|| format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple()));
    let images_dir = config.images_dir();
    info!("Image directory: {}", images_dir.display());

    let collaborators = Collaborators {
        classifier: Arc::new(GeminiClassifier::new(&config.classifier)?),
        payments: Arc::new(StripeClient::new(&config.payments)?),
        email: Arc::new(ResendClient::new(&config.email)?),
        review: Arc::new(TelegramBot::new(&config.review)?),
        images: Arc::new(LocalImageStore::new(
            images_dir,
            &config.server.public_base_url,
            image_secret,
            config.images.url_ttl_secs,
            config.images.max_bytes,
        )),
    };

    let listen: SocketAddr = config
        .server
        .listen
        .parse()
        .with_context(|| format!("Invalid listen address: {}", config.server.listen))?;

    let state = AppState::new(Arc::new(config), store, collaborators);

    let cancel = CancellationToken::new();
    let dispatcher = state.dispatcher();
    let dispatcher_task = tokio::spawn(dispatcher.run(cancel.clone()));

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!("nubcheck-pl listening on http://{}", listen);
    info!("Health check: http://{}/health", listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel.cancel();
    if let Err(e) = dispatcher_task.await {
        error!("Job dispatcher task panicked: {}", e);
    }

    info!("nubcheck-pl stopped");
    Ok(())
}
