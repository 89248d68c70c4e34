use std::sync::Arc;

use tokio::net::TcpListener;

use crate::server::ServerCore;

/// Accept Beta clients on a bound listener until shutdown.
pub async fn serve(listener: TcpListener, core: Arc<ServerCore>) -> anyhow::Result<()> {
    let shutdown = core.shutdown_token().clone();
    loop {
        let (stream, addr) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = shutdown.cancelled() => return Ok(()),
        };
        tracing::info!("Connection from {}", addr);
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Cannot disable Nagle for {}: {}", addr, e);
        }

        let core = Arc::clone(&core);
        tokio::spawn(async move {
            if let Err(e) = super::connection::handle(stream, addr, core).await {
                tracing::warn!("Connection from {} closed: {}", addr, e);
            }
        });
    }
}
