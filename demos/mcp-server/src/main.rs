//! Jules tool server over stdio.
//!
//! Run with: JULES_API_KEY=... cargo run -p jules-mcp-server
//!
//! Reads JSON-RPC frames from stdin and writes responses to stdout. Logs go
//! to stderr; set `RUST_LOG` to adjust.

use anyhow::Context;
use jules_client::RestClient;
use jules_core::ClientConfig;
use jules_session::SessionManager;
use jules_transport::{Server, ToolRegistry};
use tokio::io::{BufReader, stdin, stdout};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = ClientConfig::from_env();
    if config.api_key.is_none() {
        tracing::warn!("JULES_API_KEY is not set; every tool call will fail until it is");
    }
    tracing::info!(base_url = %config.base_url, "Starting Jules tool server");

    let client = RestClient::new(config.clone()).context("Failed to build HTTP client")?;
    let manager = SessionManager::new(client, config);
    let server = Server::new(
        ToolRegistry::new(manager),
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
    );

    server
        .serve(BufReader::new(stdin()), stdout())
        .await
        .context("Server loop failed")?;

    tracing::info!("Input closed, shutting down");
    Ok(())
}
