//! MCP HTTP Server - Binary Entry Point
//!
//! Serves the bundled processor over the streamable HTTP transport.

use mcp_http_transport::protocol::McpResult;
use mcp_http_transport::server::McpServer;
use mcp_http_transport::tools::register_builtin_tools;
use mcp_http_transport::{HttpTransport, TransportConfig};
use tokio::sync::watch;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> McpResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = TransportConfig::from_env();
    let addr = config.bind_address();
    let (transport, inbound) = HttpTransport::new(config);

    let mut server = McpServer::new();
    register_builtin_tools(&mut server, transport.clone());
    let processor = tokio::spawn(server.run(inbound, transport.clone()));
    let sweeper = transport.spawn_sweeper();

    let (stop_tx, mut stop_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(true);
    })?;

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(
        address = %addr,
        development = transport.config().development,
        "MCP HTTP transport listening"
    );

    // open SSE streams hold their connections, so they are closed before
    // graceful shutdown waits on in-flight connections
    let on_stop = transport.clone();
    axum::serve(listener, transport.router())
        .with_graceful_shutdown(async move {
            let _ = stop_rx.wait_for(|stop| *stop).await;
            info!("shutdown requested");
            on_stop.shutdown();
        })
        .await?;

    sweeper.abort();
    processor.abort();
    if !transport.is_shutting_down() {
        warn!("server stopped without a shutdown request");
        transport.shutdown();
    }
    Ok(())
}
