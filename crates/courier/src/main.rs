use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use courier::config::Config;
use courier::driver::{Driver, SubprocessDriver};
use courier::gateway::CommandGateway;
use courier::render::QrRenderer;
use courier::server::{AppState, ServerOptions, build_app};
use courier::session::SessionMachine;

/// Driver events buffered between the driver reader and the session loop.
const EVENT_BUFFER: usize = 64;

#[derive(Debug, Parser)]
#[command(name = "courier", version, about = "Single-session messaging bridge")]
struct Args {
    /// Path to the YAML config file. Missing file means defaults.
    #[arg(short, long, default_value = "courier.yaml")]
    config: PathBuf,

    /// Override the listen port.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("courier=info,tower_http=info")),
        )
        .init();

    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .await
        .with_context(|| format!("loading {}", args.config.display()))?;
    config.apply_env(|key| std::env::var(key).ok())?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    let options = ServerOptions::from_config(&config)?;

    let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
    let driver: Arc<dyn Driver> = Arc::new(SubprocessDriver::new(
        &config.driver,
        config.session.client_id.clone(),
        event_tx,
    ));
    let session = SessionMachine::new(driver, QrRenderer::default());

    let shutdown = CancellationToken::new();
    let event_loop = session.spawn_event_loop(event_rx, shutdown.clone());
    session.spawn_initialize(Duration::ZERO);

    let gateway = CommandGateway::new(session, config.session.send_timeout());
    let app = build_app(AppState { gateway }, &options);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(
        address = %addr,
        session = %config.session.client_id,
        driver = %config.driver.command,
        "Courier listening"
    );

    tokio::spawn(cancel_on_signal(shutdown.clone()));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await
        .context("http server failed")?;

    shutdown.cancel();
    if let Err(e) = event_loop.await {
        warn!(error = %e, "Session event loop ended abnormally");
    }
    info!("Courier stopped");
    Ok(())
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
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
                warn!(error = %e, "Failed to listen for SIGTERM");
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
    info!("Shutdown signal received");
    shutdown.cancel();
}
