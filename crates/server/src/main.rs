use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use bravo_engine::persistence::{MemoryPersistence, Persistence};
use bravo_server::config::{self, Backend, Config};
use bravo_server::dashboard;
use bravo_server::net::listener;
use bravo_server::persistence::RegionPersistence;
use bravo_server::server::ServerCore;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let config_path: PathBuf = config::flag(&args, "--config")
        .unwrap_or_else(|| "bravo.toml".into())
        .into();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut config = Config::load(&config_path)?;
    config.apply_args(&args);

    tracing::info!("bravo -- Beta 1.x server (protocol {})", bravo_server::protocol::PROTOCOL_VERSION);

    // ── World storage ────────────────────────────────────────────────────
    let persistence: Arc<dyn Persistence> = match config.world.backend {
        Backend::Region => {
            let store = RegionPersistence::open(&config.world.path)
                .with_context(|| format!("opening world at {}", config.world.path.display()))?;
            tracing::info!("World directory: {}", config.world.path.display());
            Arc::new(store)
        }
        Backend::Memory => {
            tracing::warn!("Using in-memory world; nothing will be saved to disk");
            Arc::new(MemoryPersistence::new())
        }
    };

    let core = ServerCore::open(&config, persistence).await?;
    let socket = TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("binding {}", config.server.bind))?;
    let ticker = core.spawn_ticker();

    if let Some(port) = config.server.dashboard_port {
        tokio::spawn(dashboard::server::start(Arc::clone(&core), port));
    }

    // ── Periodic autosave ────────────────────────────────────────────────
    let autosave_core = Arc::clone(&core);
    let autosave_every = config.autosave();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(autosave_every);
        interval.tick().await; // first tick is immediate
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = autosave_core.shutdown_token().cancelled() => break,
            }
            tracing::info!("Autosaving...");
            match autosave_core.save_world().await {
                Ok(n) => tracing::info!("Autosave complete: {} chunks", n),
                Err(e) => tracing::error!("Autosave failed: {:#}", e),
            }
        }
    });

    // ── Start listener with graceful shutdown ────────────────────────────
    tracing::info!("Listening on {}", config.server.bind);
    tokio::select! {
        result = listener::serve(socket, Arc::clone(&core)) => {
            if let Err(e) = result {
                tracing::error!("Server error: {:#}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Ctrl+C received, shutting down...");
        }
    }

    // ── Save on shutdown ─────────────────────────────────────────────────
    tracing::info!("Saving world before exit...");
    match core.shutdown().await {
        Ok(n) => tracing::info!("Shutdown save complete: {} chunks written", n),
        Err(e) => tracing::error!("Shutdown save failed: {:#}", e),
    }
    if let Err(e) = ticker.await {
        tracing::warn!("Ticker ended abnormally: {}", e);
    }
    Ok(())
}
