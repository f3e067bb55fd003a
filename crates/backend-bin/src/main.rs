use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use backend_lib::{
    config::{Settings, DEFAULT_CONFIG_FILE},
    orchestrator::ShutdownOutcome,
    resume::resume_watches,
    router,
    sink::LogSink,
    AppState,
};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How long watch processes get to post their final notice
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(name = "meetwatch", about = "Relay meeting presence into chat channels", version)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Development mode: debug logging, no peer
    #[arg(long)]
    dev: bool,
}

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    if settings.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().with_target(false)).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "could not listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "could not listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load_from(&cli.config)?;
    if cli.dev {
        settings = settings.dev();
    }
    init_tracing(&settings);

    let state = AppState::from_settings(settings, Arc::new(LogSink))?;
    let resumed = resume_watches(&state.commands).await;
    info!(resumed, persistence = state.orchestrator.persistence_enabled(), "watch state ready");

    let listener = TcpListener::bind(state.settings.bind_addr).await?;
    info!(addr = %state.settings.bind_addr, base_url = %state.settings.base_url, "listening");

    let app = router::create_router(state.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutdown requested");
    match state.orchestrator.shutdown().await {
        ShutdownOutcome::PeerTookOver => info!("peer is serving, exiting quietly"),
        ShutdownOutcome::Notified(count) => {
            let stopped = state.commands.wait_for_watches(SHUTDOWN_GRACE).await;
            info!(count, stopped, "watch processes notified");
        },
    }
    Ok(())
}
