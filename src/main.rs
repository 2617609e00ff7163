//! Chat Server - Entry Point
//!
//! Parses the listening port, binds the listener and serves connections.

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use session_chat::{ChatServer, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=session_chat=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("session_chat=info")),
        )
        .init();

    let config = ServerConfig::parse();

    let server = ChatServer::bind(config.bind_addr(), config.limits()).await?;
    info!("Chat Server listening on ws://{}", server.local_addr()?);

    server.run().await;

    Ok(())
}
