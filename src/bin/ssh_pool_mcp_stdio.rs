#![deny(clippy::unwrap_used)]

use std::sync::Arc;

use dotenv::dotenv;
use poem_mcpserver::McpServer;
use ssh_pool_mcp::mcp::SshTools;
use ssh_pool_mcp::ssh::SessionPool;
use tokio::sync::Mutex;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    // stdout carries the MCP protocol; logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().expect("valid directive")),
        )
        .init();

    let pool = Arc::new(Mutex::new(SessionPool::from_env()));
    poem_mcpserver::stdio::stdio(McpServer::new().tools(SshTools::new(Arc::clone(&pool)))).await?;

    pool.lock().await.shutdown().await;
    Ok(())
}
