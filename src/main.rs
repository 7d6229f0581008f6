use mimalloc::MiMalloc;
use std::{net::SocketAddr, sync::Arc};
use stratus::config::{CONFIG, CloudProviderKind};
use stratus::context::EngineSettings;
use stratus::registry::ModuleRegistry;
use stratus::server::{StratusState, stratus_router};
use stratus::service::{self, EngineArgs};
use stratus::utils::logging;
use stratus_cloud::{CloudConnector, SimulatedCloud};
use tokio::{net::TcpListener, signal};
use tracing::{error, info};
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = &*CONFIG;
    if cfg.basic.api_key.trim().is_empty() {
        return Err("basic.api_key must be set and non-empty".into());
    }

    logging::init(&cfg.basic.loglevel);

    info!(
        listen_addr = %cfg.basic.listen_addr,
        listen_port = cfg.basic.listen_port,
        data_dir = %cfg.basic.data_dir.display(),
        loglevel = %cfg.basic.loglevel,
        provider = ?cfg.cloud.provider,
        default_regions = ?cfg.cloud.default_regions,
        requests_per_second = cfg.cloud.requests_per_second,
    );

    let connector: Arc<dyn CloudConnector> = match cfg.cloud.provider {
        CloudProviderKind::Simulated => Arc::new(SimulatedCloud::default()),
    };

    let engine = service::spawn(EngineArgs {
        registry: ModuleRegistry::builtin()?,
        data_dir: cfg.basic.data_dir.clone(),
        connector,
        settings: EngineSettings::from_config(cfg),
        default_regions: cfg.cloud.default_regions.clone(),
    })
    .await?;

    let state = StratusState::new(engine.clone(), Arc::from(cfg.basic.api_key.as_str()));
    let app = stratus_router(state);

    let addr = SocketAddr::from((cfg.basic.listen_addr, cfg.basic.listen_port));
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    engine.stop();
    info!("Server has shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
