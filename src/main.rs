#![deny(clippy::unwrap_used)]

use std::sync::Arc;

use dotenv::dotenv;
use poem::{EndpointExt, Route, Server, listener::TcpListener, middleware::Tracing};
use poem_mcpserver::{McpServer, streamable_http};
use ssh_pool_mcp::mcp::SshTools;
use ssh_pool_mcp::ssh::SessionPool;
use tokio::sync::Mutex;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    // Initialize logging with proper tracing default
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().expect("valid directive")),
        )
        .init();

    let mcp_port: u16 = std::env::var("MCP_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000);
    let mcp_addr = format!("0.0.0.0:{}", mcp_port);
    info!("Starting MCP server on {}", mcp_addr);

    let pool = Arc::new(Mutex::new(SessionPool::from_env()));
    info!(
        "Session pool ready (max {} connections)",
        pool.lock().await.max_connections()
    );

    let tools = SshTools::new(Arc::clone(&pool));
    let app = Route::new()
        .at(
            "/",
            streamable_http::endpoint(move |_| McpServer::new().tools(tools.clone())),
        )
        .with(Tracing);

    info!("Use the ssh_connect tool to open pooled SSH connections");

    Server::new(TcpListener::bind(mcp_addr))
        .name("SSH Pool MCP Server")
        .run_with_graceful_shutdown(
            app,
            async {
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutdown requested");
            },
            None,
        )
        .await?;

    pool.lock().await.shutdown().await;
    Ok(())
}
