//! Provisioning API
//!
//! HTTP front end for the site allocator:
//! - Allocates subnet, VLAN, VCIDs and VSI id for single sites and bulk imports
//! - Releases assignments when sites are deleted
//! - Reports range utilization per region
//!
//! Assignments live in PostgreSQL; ranges come from the database or a YAML file.

mod config;
mod error;
mod routes;
#[cfg(test)]
mod routes_test;

use allocation_store::{postgres, PgAssignmentStore, PgRangeRegistry, RangeRegistry, StaticRangeRegistry};
use config::ServiceConfig;
use site_allocator::{Allocator, NoopClassifier, SiteClassifier};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Provisioning API");

    let config = ServiceConfig::from_env()?;

    info!("Configuration:");
    info!("  Listen address: {}", config.listen_addr);
    info!("  Max DB connections: {}", config.database_max_connections);
    info!(
        "  Ranges: {}",
        config
            .ranges_file
            .as_ref()
            .map_or_else(|| "database".to_string(), |p| p.display().to_string())
    );
    info!(
        "  Lock timeout: {:?}, attempts: {}, backoff: {:?}..{:?}",
        config.allocator.lock_timeout,
        config.allocator.max_attempts,
        config.allocator.backoff_min,
        config.allocator.backoff_max
    );

    info!("Connecting to database...");
    let pool = postgres::connect(&config.database_url, config.database_max_connections).await?;

    info!("Running database migrations...");
    postgres::migrate(&pool).await?;

    let registry: Arc<dyn RangeRegistry> = match &config.ranges_file {
        Some(path) => Arc::new(StaticRangeRegistry::from_file(path)?),
        None => Arc::new(PgRangeRegistry::new(pool.clone())),
    };
    let classifier: Arc<dyn SiteClassifier> = match config.vendor_rules {
        Some(rules) => {
            info!("Vendor inference enabled with {} rules", rules.len());
            Arc::new(rules)
        }
        None => Arc::new(NoopClassifier),
    };

    let allocator = Allocator::new(registry, Arc::new(PgAssignmentStore::new(pool)), config.allocator)
        .with_classifier(classifier);
    let app = routes::create_router(Arc::new(allocator));

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!("Listening on {}", config.listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Provisioning API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
