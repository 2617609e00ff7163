//! Listener loop
//!
//! Accepts TCP connections and spawns one handler task per connection,
//! each sharing the same session directory.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, ToSocketAddrs};
use tracing::{error, info};

use crate::directory::{DirectoryLimits, SessionDirectory};
use crate::handler::handle_connection;

/// The chat server: a bound listener plus the directory it serves
pub struct ChatServer {
    listener: TcpListener,
    directory: Arc<SessionDirectory>,
}

impl ChatServer {
    /// Bind the listener and create an empty directory with `limits`
    pub async fn bind(addr: impl ToSocketAddrs, limits: DirectoryLimits) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            directory: Arc::new(SessionDirectory::new(limits)),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Shared handle to the directory, for inspection
    pub fn directory(&self) -> Arc<SessionDirectory> {
        Arc::clone(&self.directory)
    }

    /// Accept connections forever
    ///
    /// A failed accept or a failed connection is logged and does not
    /// affect other connections.
    pub async fn run(self) {
        let limits = self.directory.limits();
        info!(
            "ChatServer started (max users {}, queue capacity {})",
            limits.max_users, limits.queue_capacity
        );

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    info!("New connection from {}", addr);
                    let directory = Arc::clone(&self.directory);

                    // Spawn handler task for each connection
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, directory).await {
                            error!("Connection handler error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}
