use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rover_dash::config::{ConfigStore, SignalingBackend, VideoSourceKind};
use rover_dash::control::{ControlRelay, LoggingActuator};
use rover_dash::events::EventBus;
use rover_dash::signaling;
use rover_dash::state::AppState;
use rover_dash::web;
use rover_dash::webrtc::WebRtcPeerFactory;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// Signaling store selection
#[derive(Debug, Clone, Copy, ValueEnum)]
enum SignalingArg {
    Memory,
    Firestore,
}

impl From<SignalingArg> for SignalingBackend {
    fn from(arg: SignalingArg) -> Self {
        match arg {
            SignalingArg::Memory => SignalingBackend::Memory,
            SignalingArg::Firestore => SignalingBackend::Firestore,
        }
    }
}

/// rover-dash command line arguments
#[derive(Parser, Debug)]
#[command(name = "rover-dash")]
#[command(version, about = "Camera rover dashboard with WebRTC video", long_about = None)]
struct CliArgs {
    /// Listen address (overrides database config)
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// HTTP port (overrides database config)
    #[arg(short = 'p', long, value_name = "PORT")]
    http_port: Option<u16>,

    /// Data directory path (default: /etc/rover-dash)
    #[arg(short = 'd', long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Do not run the camera sender in this process
    #[arg(long)]
    no_sender: bool,

    /// Use the synthetic test pattern instead of the camera
    #[arg(long)]
    test_mode: bool,

    /// Signaling store backend (overrides database config)
    #[arg(long, value_name = "BACKEND")]
    signaling: Option<SignalingArg>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting rover-dash v{}", env!("CARGO_PKG_VERSION"));

    let data_dir = args.data_dir.clone().unwrap_or_else(get_data_dir);
    tracing::info!("Data directory: {}", data_dir.display());
    tokio::fs::create_dir_all(&data_dir).await?;

    let config_store = ConfigStore::new(&data_dir.join("rover-dash.db")).await?;

    // Command line overrides last for this run only
    config_store.override_runtime(|config| {
        if let Some(ref address) = args.address {
            config.web.bind_address = address.clone();
        }
        if let Some(port) = args.http_port {
            config.web.http_port = port;
        }
        if args.no_sender {
            config.sender.enabled = false;
        }
        if args.test_mode {
            config.video.source = VideoSourceKind::Test;
        }
        if let Some(backend) = args.signaling {
            config.signaling.backend = backend.into();
        }
    });
    let config = config_store.get();

    let signaling = Arc::new(signaling::open_client(&config.signaling).await?);
    tracing::info!(
        "Signaling backend: {} (collection {})",
        signaling.backend(),
        config.signaling.collection
    );

    let events = Arc::new(EventBus::new());
    let control = Arc::new(ControlRelay::new(
        Arc::new(LoggingActuator::new()),
        events.clone(),
    ));
    tracing::info!("Actuator: {}", control.actuator_name());

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let state = AppState::new(
        config_store,
        signaling,
        control,
        events,
        shutdown_tx.clone(),
    );

    if config.sender.enabled {
        let factory = Arc::new(WebRtcPeerFactory::new(
            config.webrtc.ice_servers.clone(),
            config.video.clone(),
            state.time_base,
        ));
        state.start_sender(factory).await;
        tracing::info!(
            "Camera sender started (room {}, source {:?})",
            config.webrtc.room_id,
            config.video.source
        );
    } else {
        tracing::info!("Camera sender disabled");
    }

    let app = web::create_router(state.clone());

    let addr: SocketAddr = format!("{}:{}", config.web.bind_address, config.web.http_port)
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid bind address: {}", config.web.bind_address))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Starting HTTP server on {}", listener.local_addr()?);

    let server = axum::serve(listener, app);

    tokio::select! {
        _ = shutdown_signal() => {
            // Err only means no client is connected
            let _ = shutdown_tx.send(());
            cleanup(&state).await;
        }
        result = server => {
            if let Err(e) = result {
                tracing::error!("HTTP server error: {}", e);
            }
            cleanup(&state).await;
        }
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "rover_dash=error,tower_http=error",
        LogLevel::Warn => "rover_dash=warn,tower_http=warn",
        LogLevel::Info => "rover_dash=info,tower_http=info",
        LogLevel::Verbose => "rover_dash=debug,tower_http=info",
        LogLevel::Debug => "rover_dash=debug,tower_http=debug",
        LogLevel::Trace => "rover_dash=trace,tower_http=debug",
    };

    // RUST_LOG wins over the CLI level
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Get the application data directory
fn get_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var("ROVER_DASH_DATA_DIR") {
        return PathBuf::from(path);
    }

    PathBuf::from("/etc/rover-dash")
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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
    tracing::info!("Shutdown signal received");
}

/// Stop the sender (cleaning up its room) and release the actuator
async fn cleanup(state: &Arc<AppState>) {
    state.stop_sender().await;
    tracing::info!("Camera sender stopped");

    if let Err(e) = state.control.shutdown().await {
        tracing::warn!("Failed to shut down actuator: {}", e);
    } else {
        tracing::info!("Actuator stopped");
    }
}
