//! Volume Metadata Syncer
//!
//! Runs periodic full-sync passes between the cluster's volume objects and
//! the backend volume catalog, gated by the feature-states ConfigMap.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use volume_metadata_syncer::domain::ports::{
    ClusterCacheRef, FeatureGateRef, MigrationStoreRef, VolumeManagerRef,
    VolumeMigrationServiceRef,
};
use volume_metadata_syncer::{
    CatalogClient, ClusterSnapshot, Error, FeatureStateCell, FeatureStateOrchestrator, FullSync,
    InformerManager, KubeMigrationStore, MemoryMigrationStore, MigrationServiceCell, Result,
    SyncMetrics, SyncerConfig,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Volume Metadata Syncer - cluster to backend volume catalog reconciliation
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(long, env = "SYNCER_CONFIG")]
    config: Option<PathBuf>,

    /// Name of the feature-states ConfigMap
    #[arg(long, env = "FEATURE_STATES_NAME")]
    feature_states_name: Option<String>,

    /// Namespace of the feature-states ConfigMap
    #[arg(long, env = "FEATURE_STATES_NAMESPACE")]
    feature_states_namespace: Option<String>,

    /// Cluster ID used to scope catalog queries
    #[arg(long, env = "CLUSTER_ID")]
    cluster_id: Option<String>,

    /// Full sync interval in seconds
    #[arg(long, env = "FULL_SYNC_INTERVAL")]
    full_sync_interval_secs: Option<u64>,

    /// Catalog query page size
    #[arg(long, env = "QUERY_LIMIT")]
    query_limit: Option<u64>,

    /// Full sync pass timeout in seconds
    #[arg(long, env = "QUERY_TIMEOUT")]
    query_timeout_secs: Option<u64>,

    /// Backend catalog endpoint
    #[arg(long, env = "CATALOG_ENDPOINT")]
    catalog_endpoint: Option<String>,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Run in standalone mode (no Kubernetes)
    #[arg(long, env = "STANDALONE")]
    standalone: bool,
}

impl Args {
    /// Overlay command-line values on the file configuration
    fn apply(&self, config: &mut SyncerConfig) {
        if let Some(name) = &self.feature_states_name {
            config.feature_states.name = name.clone();
        }
        if let Some(namespace) = &self.feature_states_namespace {
            config.feature_states.namespace = namespace.clone();
        }
        if let Some(cluster_id) = &self.cluster_id {
            config.cluster_id = Some(cluster_id.clone());
        }
        if let Some(interval) = self.full_sync_interval_secs {
            config.full_sync_interval_secs = interval;
        }
        if let Some(limit) = self.query_limit {
            config.query_limit = limit;
        }
        if let Some(timeout) = self.query_timeout_secs {
            config.query_timeout_secs = timeout;
        }
        if let Some(endpoint) = &self.catalog_endpoint {
            config.catalog.endpoint = endpoint.clone();
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    let mut config = match &args.config {
        Some(path) => SyncerConfig::from_file(path)?,
        None => SyncerConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;

    info!("Starting Volume Metadata Syncer");
    info!("  Version: {}", volume_metadata_syncer::VERSION);
    info!("  Catalog: {}", config.catalog.endpoint);
    info!(
        "  Feature states: {}/{}",
        config.feature_states.namespace, config.feature_states.name
    );
    info!("  Full sync interval: {}s", config.full_sync_interval_secs);
    info!("  Standalone mode: {}", args.standalone);

    let metrics = SyncMetrics::register(prometheus::default_registry())?;
    let ready = Arc::new(AtomicBool::new(false));
    let shutdown = CancellationToken::new();

    // Start health server
    let health_addr = args.health_addr.clone();
    let health_ready = ready.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr, health_ready).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr).await {
            error!("Metrics server error: {}", e);
        }
    });

    let catalog: VolumeManagerRef = Arc::new(CatalogClient::new(&config.catalog)?);

    let mut informers = None;
    let cache: ClusterCacheRef;
    let features: FeatureGateRef;
    let store: MigrationStoreRef;
    if args.standalone {
        warn!("Standalone mode: no cluster objects, all features disabled");
        cache = Arc::new(ClusterSnapshot::new());
        features = Arc::new(FeatureStateOrchestrator::new(&config.feature_states));
        store = Arc::new(MemoryMigrationStore::new());
    } else {
        let client = kube::Client::try_default().await?;
        let manager = InformerManager::new(
            client.clone(),
            Some(config.feature_states.namespace.clone()),
        );

        // Listeners must be registered before the watchers deliver their first list
        let feature_cell = FeatureStateCell::new();
        features = feature_cell
            .initialize(&config.feature_states, &client, manager.as_ref())
            .await?;
        manager.listen();
        manager.wait_for_cache_sync().await?;

        store = Arc::new(KubeMigrationStore::new(client));
        cache = manager.clone();
        informers = Some(manager);
    }

    let migration_cell = MigrationServiceCell::new();
    let migration: Option<VolumeMigrationServiceRef> = match migration_cell
        .initialize(catalog.clone(), store, config.migration.clone())
        .await
    {
        Ok(service) => Some(service as VolumeMigrationServiceRef),
        Err(e) => {
            warn!(error = %e, "Volume migration service unavailable, legacy volumes will be skipped");
            None
        }
    };

    let full_sync = Arc::new(FullSync::new(
        config.full_sync(),
        cache,
        features,
        migration,
        catalog,
        metrics,
    ));
    ready.store(true, Ordering::SeqCst);

    let sync_task = tokio::spawn(full_sync.run_periodic(shutdown.clone()));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    shutdown.cancel();
    if let Some(manager) = informers {
        manager.shutdown();
    }
    if let Err(e) = sync_task.await {
        error!("Full sync task failed: {}", e);
    }

    info!("Syncer shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "kube=info", "reqwest=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Health Server
// =============================================================================

fn respond(status: hyper::StatusCode, body: impl Into<hyper::Body>) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(body.into());
    *response.status_mut() = status;
    response
}

async fn run_health_server(addr: &str, ready: Arc<AtomicBool>) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let ready = ready.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let ready = ready.clone();
                async move {
                    let response = match req.uri().path() {
                        "/healthz" | "/livez" => respond(StatusCode::OK, "ok"),
                        "/readyz" if ready.load(Ordering::SeqCst) => respond(StatusCode::OK, "ok"),
                        "/readyz" => respond(StatusCode::SERVICE_UNAVAILABLE, "initializing"),
                        _ => respond(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid health server address: {}", e))
    })?;

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/metrics" => {
                    let encoder = TextEncoder::new();
                    let metric_families = prometheus::gather();
                    let mut buffer = Vec::new();
                    match encoder.encode(&metric_families, &mut buffer) {
                        Ok(()) => {
                            let mut response = respond(StatusCode::OK, buffer);
                            if let Ok(value) = encoder.format_type().parse() {
                                response
                                    .headers_mut()
                                    .insert(hyper::header::CONTENT_TYPE, value);
                            }
                            response
                        }
                        Err(e) => respond(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
                    }
                }
                _ => respond(StatusCode::NOT_FOUND, "not found"),
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid metrics server address: {}", e))
    })?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
