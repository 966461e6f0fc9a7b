//! Local PV Provisioner
//!
//! `webhook` runs the admission server assigning nodes to new local claims;
//! `executor` runs on every storage node, allocating directories and keeping
//! the node's advertised capacity current.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use kube::api::Api;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, ResourceExt};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use local_pv_provisioner::admission::server::{load_tls, router, serve};
use local_pv_provisioner::config::{
    DEFAULT_FSTAB_FILE, DEFAULT_PROJECTS_FILE, DEFAULT_PROJID_FILE, DEFAULT_SELECTOR_CONFIG,
};
use local_pv_provisioner::domain::ports::ClusterClient;
use local_pv_provisioner::provisioner::available_bytes;
use local_pv_provisioner::{
    spawn_controller, AdmissionMutator, BindMounter, CapacityTracker, DefaultSelectors,
    ExecutorConfig, KubeClusterClient, Metrics, SelectionMethod, VolumeAllocator, WebhookConfig,
    XfsQuota,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Dynamic local persistent volume provisioner
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,

    /// Path to a kubeconfig; in-cluster configuration otherwise
    #[arg(long, env = "KUBECONFIG", global = true)]
    kubeconfig: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the mutating admission webhook
    Webhook(WebhookArgs),
    /// Run the per-node storage executor
    Executor(ExecutorArgs),
}

#[derive(Args, Debug)]
struct WebhookArgs {
    /// PEM certificate chain served by the webhook
    #[arg(long, env = "TLS_CERT_BUNDLE")]
    tls_cert_bundle: PathBuf,

    /// PEM private key of the certificate
    #[arg(long, env = "TLS_PRIVATE_KEY_FILE")]
    tls_private_key_file: PathBuf,

    /// HTTPS bind address
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:443")]
    listen_addr: SocketAddr,

    /// Label (`key=value`) every candidate node must carry
    #[arg(long, env = "NODE_LABEL_FOR_DYNAMIC")]
    node_label_for_dynamic: Option<String>,

    /// Node selection method: "round robin" or "capacity"
    #[arg(long, env = "NODE_SELECTOR_METHOD", default_value = "round robin")]
    node_selector_method: String,

    /// YAML file with per storage class default node selectors
    #[arg(long, env = "DEFAULT_SELECTOR_CONFIG", default_value = DEFAULT_SELECTOR_CONFIG)]
    default_selector_config: PathBuf,

    /// Per request timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "5")]
    request_timeout_secs: u64,
}

#[derive(Args, Debug)]
struct ExecutorArgs {
    /// Mount point of the quota-enabled storage filesystem
    #[arg(long, env = "STORAGE_PATH")]
    storagepath: PathBuf,

    /// Name of the node this executor runs on
    #[arg(long, env = "NODE_NAME")]
    node_name: String,

    /// Quota project id ledger
    #[arg(long, env = "PROJECTS_FILE", default_value = DEFAULT_PROJECTS_FILE)]
    projects_file: PathBuf,

    /// Quota project name ledger
    #[arg(long, env = "PROJID_FILE", default_value = DEFAULT_PROJID_FILE)]
    projid_file: PathBuf,

    /// Host mount table receiving bind mounts
    #[arg(long, env = "FSTAB_FILE", default_value = DEFAULT_FSTAB_FILE)]
    fstab_file: PathBuf,

    /// Full resync interval in seconds
    #[arg(long, env = "RESYNC_SECS", default_value = "30")]
    resync_secs: u64,

    /// Health and metrics bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: SocketAddr,
}

impl WebhookArgs {
    fn into_config(self) -> anyhow::Result<WebhookConfig> {
        let selection_method: SelectionMethod = self.node_selector_method.parse()?;
        Ok(WebhookConfig {
            listen_addr: self.listen_addr,
            tls_cert: self.tls_cert_bundle,
            tls_key: self.tls_private_key_file,
            node_label: self.node_label_for_dynamic.filter(|l| !l.trim().is_empty()),
            selection_method,
            default_selector_config: self.default_selector_config,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        })
    }
}

impl ExecutorArgs {
    fn into_config(self) -> ExecutorConfig {
        ExecutorConfig {
            node_name: self.node_name,
            storage_path: self.storagepath,
            projects_file: self.projects_file,
            projid_file: self.projid_file,
            fstab_file: self.fstab_file,
            resync: Duration::from_secs(self.resync_secs),
            metrics_addr: self.metrics_addr,
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level, cli.log_json);

    info!("Starting Local PV Provisioner");
    info!("  Version: {}", local_pv_provisioner::VERSION);

    let client = kube_client(cli.kubeconfig.as_ref()).await?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        signal_token.cancel();
    });

    match cli.command {
        Command::Webhook(args) => run_webhook(client, args.into_config()?, shutdown).await?,
        Command::Executor(args) => run_executor(client, args.into_config(), shutdown).await?,
    }

    info!("Shutdown complete");
    Ok(())
}

async fn kube_client(kubeconfig: Option<&PathBuf>) -> anyhow::Result<Client> {
    let Some(path) = kubeconfig else {
        return Client::try_default()
            .await
            .context("Cannot build in-cluster Kubernetes client");
    };
    let kubeconfig = Kubeconfig::read_from(path)
        .with_context(|| format!("Cannot read kubeconfig {}", path.display()))?;
    let config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .context("Invalid kubeconfig")?;
    Client::try_from(config).context("Cannot build Kubernetes client")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

// =============================================================================
// Webhook
// =============================================================================

async fn run_webhook(
    client: Client,
    config: WebhookConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    info!("  Listen: {}", config.listen_addr);
    info!("  Selection method: {}", config.selection_method);
    info!("  Node label: {:?}", config.node_label);

    let cluster = Arc::new(KubeClusterClient::new(client));

    let snapshot = match config.selection_method {
        SelectionMethod::RoundRobin => cluster
            .list_nodes("")
            .await
            .context("Cannot get list of all nodes")?
            .iter()
            .map(|n| n.name_any())
            .collect(),
        SelectionMethod::Capacity => Vec::new(),
    };
    info!("  Node snapshot: {} nodes", snapshot.len());
    let strategy = config.selection_method.build(snapshot);
    let defaults = DefaultSelectors::load_or_empty(&config.default_selector_config);
    let metrics = Arc::new(Metrics::new()?);

    let mutator = AdmissionMutator::new(cluster, strategy, config.node_label, defaults, metrics);
    let app = router(Arc::new(mutator), config.request_timeout);
    let tls = load_tls(&config.tls_cert, &config.tls_key).await?;

    serve(config.listen_addr, tls, app, shutdown).await?;
    Ok(())
}

// =============================================================================
// Executor
// =============================================================================

async fn run_executor(
    client: Client,
    config: ExecutorConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    info!("  Node: {}", config.node_name);
    info!("  Storage path: {}", config.storage_path.display());
    info!("  Resync: {}s", config.resync.as_secs());

    let cluster = Arc::new(KubeClusterClient::new(client.clone()));
    let metrics = Arc::new(Metrics::new()?);

    let tracker = Arc::new(CapacityTracker::new(
        cluster.clone(),
        config.node_name.clone(),
        metrics.clone(),
    ));
    let available = available_bytes(&config.storage_path)?;
    tracker
        .initialize(available)
        .await
        .with_context(|| format!("Cannot publish capacity of node {}", config.node_name))?;

    let allocator = Arc::new(VolumeAllocator::new(
        cluster,
        Arc::new(
            XfsQuota::new(&config.storage_path)
                .with_ledgers(&config.projects_file, &config.projid_file),
        ),
        Arc::new(BindMounter),
        config.node_name.clone(),
        &config.storage_path,
        config.ledgers(),
        metrics.clone(),
    ));

    let metrics_addr = config.metrics_addr;
    let metrics_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(metrics_addr, metrics, metrics_token).await {
            error!("Metrics server error: {}", e);
        }
    });

    let volumes = spawn_controller(
        "PersistentVolume",
        Api::<PersistentVolume>::all(client.clone()),
        config.resync,
        tracker,
        shutdown.clone(),
    );
    let claims = spawn_controller(
        "PersistentVolumeClaim",
        Api::<PersistentVolumeClaim>::all(client),
        config.resync,
        allocator,
        shutdown.clone(),
    );
    info!("Storage executor initialized");

    let (mut volumes, mut claims) = (volumes, claims);
    tokio::select! {
        _ = shutdown.cancelled() => {
            // Let in-flight handlers finish
            let _ = tokio::join!(volumes, claims);
        }
        result = &mut volumes => {
            warn!("Volume watch exited: {:?}", result);
            shutdown.cancel();
            let _ = claims.await;
        }
        result = &mut claims => {
            warn!("Claim watch exited: {:?}", result);
            shutdown.cancel();
            let _ = volumes.await;
        }
    }
    Ok(())
}

// =============================================================================
// Health and Metrics Server
// =============================================================================

async fn run_metrics_server(
    addr: SocketAddr,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
) -> local_pv_provisioner::Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let metrics = metrics.clone();
                async move {
                    let mut response = Response::new(Body::empty());
                    match req.uri().path() {
                        "/healthz" | "/livez" | "/readyz" => {
                            *response.body_mut() = Body::from("ok");
                        }
                        "/metrics" => match metrics.render() {
                            Ok((content_type, buffer)) => {
                                if let Ok(value) = HeaderValue::from_str(&content_type) {
                                    response.headers_mut().insert(CONTENT_TYPE, value);
                                }
                                *response.body_mut() = Body::from(buffer);
                            }
                            Err(e) => {
                                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                                *response.body_mut() = Body::from(e.to_string());
                            }
                        },
                        _ => {
                            *response.status_mut() = StatusCode::NOT_FOUND;
                            *response.body_mut() = Body::from("not found");
                        }
                    }
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    info!("Metrics server listening on {}", addr);
    Server::try_bind(&addr)
        .map_err(|e| local_pv_provisioner::Error::Internal(format!("Cannot bind metrics server: {}", e)))?
        .serve(make_svc)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| local_pv_provisioner::Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(log_level: &str, log_json: bool) {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "kube=info", "tower=warn", "axum=info", "rustls=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if log_json {
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
