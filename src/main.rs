//! mirrorvol
//!
//! Runs one of the two services on the control port:
//! - `replica`: exports a file-backed target over iSCSI
//! - `controller`: assembles a RAID1 mirror from two replicas

use clap::{Args, Parser, Subcommand};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mirrorvol::{
    api::metrics, replica::parse_size, resolve_node_address, ApiServer, ApiServerConfig,
    ChapCredentials, ControllerConfig, ControllerFactory, ControllerRouter, ControllerStack,
    CreateTargetRequest, DeviceWaitConfig, Error, FabricFactory, InitiatorConfig,
    MetadataConfig, RaidConfig, ReplicaClientConfig, ReplicaConfig, ReplicaRouter,
    ReplicaService, Result, CONTROL_PORT,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// mirrorvol - replicated iSCSI volumes on md RAID1
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Address to serve the control API on; looked up from metadata when unset
    #[arg(long, env = "BIND_ADDR", global = true)]
    bind_addr: Option<IpAddr>,

    /// Control API port
    #[arg(long, env = "CONTROL_PORT", default_value_t = CONTROL_PORT, global = true)]
    port: u16,

    /// Metadata URL returning the node's primary IP
    #[arg(
        long,
        env = "METADATA_URL",
        default_value = "http://rancher-metadata/2015-07-25/self/container/primary_ip",
        global = true
    )]
    metadata_url: String,

    /// Metrics and health server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:9140", global = true)]
    metrics_addr: String,

    /// CHAP userid presented on every replica session
    #[arg(long, env = "CHAP_USERID", default_value = "convoy", global = true)]
    chap_userid: String,

    /// CHAP password presented on every replica session
    #[arg(long, env = "CHAP_PASSWORD", default_value = "shorthorn", global = true)]
    chap_password: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Export a file-backed iSCSI target and serve the replica API
    Replica(ReplicaArgs),
    /// Assemble a mirror from two replicas and serve the controller API
    Controller(ControllerArgs),
}

#[derive(Args, Debug)]
struct ReplicaArgs {
    /// Target WWN created at startup
    #[arg(long, env = "TARGET")]
    target: Option<String>,

    /// Storage object id created at startup
    #[arg(long, env = "FILE")]
    file: Option<String>,

    /// Directory holding backing images
    #[arg(long, env = "DIR")]
    dir: Option<PathBuf>,

    /// Backing image size (bytes or a Ki/Mi/Gi/Ti suffixed value)
    #[arg(long, env = "SIZE")]
    size: Option<String>,

    /// Initiator granted access at startup
    #[arg(long, env = "INITIATOR")]
    initiator: Option<String>,

    /// Target fabric: configfs or memory
    #[arg(long, env = "FABRIC", default_value = "configfs")]
    fabric: String,

    /// configfs target root
    #[arg(long, env = "CONFIGFS_ROOT", default_value = mirrorvol::DEFAULT_CONFIGFS_ROOT)]
    configfs_root: PathBuf,

    /// Only serve the API; skip startup target creation
    #[arg(long)]
    daemon: bool,
}

#[derive(Args, Debug)]
struct ControllerArgs {
    /// Replica peers joined at startup, comma-separated
    #[arg(long, env = "PEERS", value_delimiter = ',')]
    peers: Vec<String>,

    /// Array device created at startup (name under /dev/md or full path)
    #[arg(long, env = "DEVICE")]
    device: Option<String>,

    /// iscsiadm command line, including any namespace wrapper
    #[arg(long, env = "ISCSIADM", default_value = "iscsiadm")]
    iscsiadm: String,

    /// mdadm command line, including any namespace wrapper
    #[arg(long, env = "MDADM", default_value = "mdadm")]
    mdadm: String,

    /// File holding this host's initiator name
    #[arg(long, env = "INITIATOR_NAME_FILE", default_value = "/etc/iscsi/initiatorname.iscsi")]
    initiator_name_file: PathBuf,

    /// Directory array devices are created in
    #[arg(long, env = "MD_DIR", default_value = "/dev/md")]
    md_dir: PathBuf,

    /// Maximum wait for a LUN device after login, in milliseconds
    #[arg(long, env = "DEVICE_TIMEOUT_MS", default_value_t = 2000)]
    device_timeout_ms: u64,

    /// Replica request timeout, in seconds
    #[arg(long, env = "PEER_TIMEOUT", default_value_t = 15)]
    peer_timeout_secs: u64,

    /// Only serve the API; skip startup setup
    #[arg(long)]
    daemon: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli);

    info!("Starting {} {}", mirrorvol::NAME, mirrorvol::VERSION);

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    let metrics_addr = cli.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr).await {
            error!("Metrics server error: {}", e);
        }
    });

    let node_ip = match cli.bind_addr {
        Some(ip) => ip,
        None => {
            let metadata = MetadataConfig {
                url: cli.metadata_url.clone(),
                ..Default::default()
            };
            resolve_node_address(&metadata).await?
        }
    };
    let api = ApiServer::new(
        ApiServerConfig {
            bind_addr: SocketAddr::new(node_ip, cli.port),
        },
        shutdown.clone(),
    );
    let chap = ChapCredentials {
        userid: cli.chap_userid.clone(),
        password: cli.chap_password.clone(),
    };

    match cli.command {
        Command::Replica(args) => run_replica(args, node_ip, chap, api).await?,
        Command::Controller(args) => run_controller(args, chap, api, shutdown).await?,
    }

    info!("Shutdown complete");
    Ok(())
}

async fn run_replica(
    args: ReplicaArgs,
    node_ip: IpAddr,
    chap: ChapCredentials,
    api: ApiServer,
) -> Result<()> {
    let fabric = FabricFactory::create(&args.fabric, args.configfs_root.clone())?;
    info!("Replica on {} using {} fabric", node_ip, fabric.name());

    let service = ReplicaService::new(
        ReplicaConfig {
            portal_ip: node_ip,
            chap,
            ..Default::default()
        },
        fabric,
    );

    if !args.daemon {
        let request = CreateTargetRequest {
            target: args.target,
            file: args.file,
            dir: args.dir,
            size: args.size.as_deref().map(parse_size).transpose()?,
            initiator: args.initiator,
        };
        let wwn = service.create_target(&request).map_err(|e| {
            error!("Startup target creation failed: {}", e);
            e
        })?;
        info!("Startup target {} exported", wwn);
    }

    api.run(ReplicaRouter::new(service).build()).await
}

async fn run_controller(
    args: ControllerArgs,
    chap: ChapCredentials,
    api: ApiServer,
    shutdown: CancellationToken,
) -> Result<()> {
    let stack = ControllerStack {
        controller: ControllerConfig {
            md_dir: args.md_dir,
            chap,
            device_wait: DeviceWaitConfig {
                timeout: Duration::from_millis(args.device_timeout_ms),
                ..Default::default()
            },
        },
        initiator: InitiatorConfig {
            command: args.iscsiadm,
            initiator_name_file: args.initiator_name_file,
            ..Default::default()
        },
        raid: RaidConfig {
            command: args.mdadm,
        },
        client: ReplicaClientConfig {
            request_timeout: Duration::from_secs(args.peer_timeout_secs),
            ..Default::default()
        },
    };
    let orchestrator = ControllerFactory::create(stack, shutdown)?;

    if !args.daemon {
        let device = args.device.as_deref().ok_or_else(|| {
            Error::Configuration("--device is required unless --daemon is set".into())
        })?;
        let path = orchestrator.setup(&args.peers, device).await.map_err(|e| {
            error!("Startup setup failed: {}", e);
            e
        })?;
        metrics::set_mirrored(true);
        info!("Startup mirror {} assembled", path.display());
    }

    api.run(ControllerRouter::new(orchestrator).build()).await
}

// =============================================================================
// Signals
// =============================================================================

async fn watch_signals(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                error!("Cannot watch SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("Shutdown requested");
    shutdown.cancel();
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(cli: &Cli) {
    let level = match cli.log_level.to_lowercase().as_str() {
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
        .add_directive("reqwest=info".parse().unwrap())
        .add_directive("tower=warn".parse().unwrap())
        .add_directive("tower_http=info".parse().unwrap());

    if cli.log_json {
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
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    // Register before the first scrape
    let _ = metrics::metrics();

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let (status, body) = match req.uri().path() {
                "/metrics" => (StatusCode::OK, Body::from(metrics::render())),
                "/healthz" | "/livez" => (StatusCode::OK, Body::from("ok")),
                _ => (StatusCode::NOT_FOUND, Body::from("not found")),
            };
            let mut response = Response::new(body);
            *response.status_mut() = status;
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Configuration(format!("Invalid metrics server address: {}", e)))?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
