//! Array Volume Operator
//!
//! Runs the volume lifecycle service against one or more storage arrays:
//! loads backend definitions, wires the lifecycle managers over the chosen
//! array adapter, starts the liveness monitor, and serves health and
//! metrics endpoints until interrupted.

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use array_volume_operator::{
    ActiveBackend, ArrayClientRef, ArrayMonitor, BackendDefinition, Error, HostAttachRef,
    InProcessArray, MemoryRepository, MonitorState, NameLocks, ProbeSettings, ReachabilityProbeRef,
    Result, ServiceConfig, SimulatedHostAttach, SnapshotLifecycleManager, VolumeLifecycleManager,
    VolumeService, WsapiClient, WsapiProbe,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Array Volume Operator - SAN volume lifecycle service
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the backend configuration file (YAML)
    #[arg(long, env = "CONFIG_PATH", default_value = "/etc/array-volume-operator/config.yaml")]
    config: String,

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

    /// Run with the in-process array instead of a real one
    #[arg(long, env = "STANDALONE")]
    standalone: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting Array Volume Operator");
    info!("  Version: {}", array_volume_operator::VERSION);
    info!("  Config: {}", args.config);
    info!("  Standalone mode: {}", args.standalone);

    let config = if args.standalone {
        standalone_config()
    } else {
        ServiceConfig::from_yaml_file(&args.config)?
    };
    config.validate()?;

    let backend = ActiveBackend::from_config(&config);
    info!(
        "  Active backend: {} ({} standby)",
        backend.load().name,
        backend.standby_count()
    );

    let (array, probe): (ArrayClientRef, ReachabilityProbeRef) = if args.standalone {
        (Arc::new(InProcessArray::new()), Arc::new(AlwaysReachable))
    } else {
        let timeout = Duration::from_secs(backend.load().request_timeout_secs);
        (
            Arc::new(WsapiClient::new(backend.clone())?),
            Arc::new(WsapiProbe::new(timeout)?),
        )
    };

    let repo = Arc::new(MemoryRepository::new());
    let host: HostAttachRef = Arc::new(SimulatedHostAttach::new());
    let locks = Arc::new(NameLocks::new());

    let volumes = VolumeLifecycleManager::new(
        array.clone(),
        repo.clone(),
        host,
        backend.clone(),
        locks.clone(),
    );
    let snapshots = SnapshotLifecycleManager::new(array, repo, locks);

    let monitor = Arc::new(ArrayMonitor::new(probe, backend.clone(), &config.probe));
    let monitor_task = {
        let m = monitor.clone();
        tokio::spawn(async move { m.run().await })
    };

    let service = Arc::new(VolumeService::new(
        volumes,
        snapshots,
        backend.clone(),
        monitor.clone(),
    ));
    info!("Volume service ready");

    // Health server
    let health_addr = args.health_addr.clone();
    let health_monitor = monitor.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr, health_monitor).await {
            error!("Health server error: {}", e);
        }
    });

    // Metrics server
    let metrics_addr = args.metrics_addr.clone();
    let metrics_service = service.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, metrics_service).await {
            error!("Metrics server error: {}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| Error::Internal(format!("signal handler: {}", e)))?;
    info!("Interrupt received, shutting down");

    monitor.stop();
    let _ = monitor_task.await;

    info!("Shutdown complete");
    Ok(())
}

/// Single in-process backend for standalone runs
fn standalone_config() -> ServiceConfig {
    ServiceConfig {
        backends: vec![BackendDefinition {
            name: "standalone".into(),
            api_url: "inprocess://standalone".into(),
            username: String::new(),
            password: String::new(),
            cpg: "CPG_default".into(),
            snap_cpg: None,
            iscsi_ips: vec![],
            request_timeout_secs: 5,
        }],
        default_backend: "standalone".into(),
        probe: ProbeSettings::default(),
    }
}

/// The in-process array cannot lose connectivity
struct AlwaysReachable;

#[async_trait::async_trait]
impl array_volume_operator::ReachabilityProbe for AlwaysReachable {
    async fn probe(&self, _backend: &BackendDefinition) -> Result<()> {
        Ok(())
    }
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

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse().unwrap())
        .add_directive("reqwest=warn".parse().unwrap());

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

async fn run_health_server(addr: &str, monitor: Arc<ArrayMonitor>) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let monitor = monitor.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let monitor = monitor.clone();
                async move {
                    let response = match req.uri().path() {
                        "/healthz" | "/livez" => Response::builder()
                            .status(StatusCode::OK)
                            .body(Body::from("ok"))
                            .unwrap(),
                        "/readyz" => {
                            // Not ready while the active backend is down
                            let (status, body) = match monitor.state() {
                                MonitorState::Unreachable => {
                                    (StatusCode::SERVICE_UNAVAILABLE, "backend unreachable")
                                }
                                _ => (StatusCode::OK, "ok"),
                            };
                            Response::builder()
                                .status(status)
                                .body(Body::from(body))
                                .unwrap()
                        }
                        _ => Response::builder()
                            .status(StatusCode::NOT_FOUND)
                            .body(Body::from("not found"))
                            .unwrap(),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Internal(format!("Invalid health server address: {}", e)))?;

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

async fn run_metrics_server(addr: &str, service: Arc<VolumeService>) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let volumes_gauge = prometheus::register_gauge!(
        "array_volume_operator_volumes",
        "Managed volume records"
    )
    .map_err(|e| Error::Internal(format!("metrics registry: {}", e)))?;
    let snapshots_gauge = prometheus::register_gauge!(
        "array_volume_operator_snapshots",
        "Snapshot sub-records across all volumes"
    )
    .map_err(|e| Error::Internal(format!("metrics registry: {}", e)))?;
    let failovers_gauge = prometheus::register_gauge!(
        "array_volume_operator_failovers_total",
        "Completed backend failovers since start"
    )
    .map_err(|e| Error::Internal(format!("metrics registry: {}", e)))?;

    let make_svc = make_service_fn(move |_conn| {
        let service = service.clone();
        let volumes_gauge = volumes_gauge.clone();
        let snapshots_gauge = snapshots_gauge.clone();
        let failovers_gauge = failovers_gauge.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let service = service.clone();
                let volumes_gauge = volumes_gauge.clone();
                let snapshots_gauge = snapshots_gauge.clone();
                let failovers_gauge = failovers_gauge.clone();
                async move {
                    let response = match req.uri().path() {
                        "/metrics" => {
                            if let Ok(status) = service.status().await {
                                volumes_gauge.set(status.volumes as f64);
                                snapshots_gauge.set(status.snapshots as f64);
                                failovers_gauge.set(status.failovers as f64);
                            }

                            let encoder = TextEncoder::new();
                            let metric_families = prometheus::gather();
                            let mut buffer = Vec::new();
                            if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
                                error!("metrics encoding failed: {}", e);
                            }

                            Response::builder()
                                .status(StatusCode::OK)
                                .header("Content-Type", encoder.format_type())
                                .body(Body::from(buffer))
                                .unwrap()
                        }
                        _ => Response::builder()
                            .status(StatusCode::NOT_FOUND)
                            .body(Body::from("not found"))
                            .unwrap(),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Internal(format!("Invalid metrics server address: {}", e)))?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
