//! Vestry Sync agent.
//!
//! Keeps a durable local mirror of the configured entity types, queues
//! changes while the Postgres backend is unreachable, and replays them when
//! it comes back.

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vestry_engine::Schema;
use vestry_sync::connectivity::{self, ConnectivitySignal};
use vestry_sync::remote::{create_pool, run_migrations};
use vestry_sync::{Config, FileStorage, PgRemoteStore, SyncContext, SyncSession, SyncSettings};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vestry_sync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!(data_dir = %config.data_dir.display(), "Starting Vestry sync agent");

    let storage = Arc::new(FileStorage::open(config.data_dir.clone()).await?);

    // Create database pool
    let pool = create_pool(&config.database_url).await?;

    tracing::info!("Running database migrations...");
    run_migrations(&pool).await?;

    let remote = Arc::new(PgRemoteStore::new(pool));
    let initial = connectivity::detect(remote.as_ref()).await;
    tracing::info!(state = %initial, "Initial connectivity");
    let signal = ConnectivitySignal::new(initial);

    let ctx = SyncContext::new(storage, remote.clone(), signal.clone()).with_settings(
        SyncSettings {
            retry: config.retry,
            schema: Schema::parish(),
        },
    );
    let session = SyncSession::open(ctx);

    let mut notices = session.subscribe();
    tokio::spawn(async move {
        while let Ok(notice) = notices.recv().await {
            tracing::info!("{notice}");
        }
    });

    let watcher = session.spawn_connectivity_watcher();
    let prober = tokio::spawn(connectivity::probe(
        remote,
        signal.clone(),
        config.probe_interval,
    ));

    if signal.is_online() && session.pending_count().await > 0 {
        session.reconcile().await;
    }

    for entity_type in &config.entity_types {
        match session.refresh(entity_type).await {
            Ok(records) => {
                tracing::info!(entity_type = %entity_type, records = records.len(), "Mirror ready");
            }
            Err(e) => {
                tracing::error!(entity_type = %entity_type, error = %e, "Failed to refresh mirror");
            }
        }
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!(
        pending = session.pending_count().await,
        "Shutting down"
    );

    prober.abort();
    watcher.abort();

    Ok(())
}
