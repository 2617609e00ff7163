//! Directed-Text Chat Service Library
//!
//! A WebSocket chat service built with tokio-tungstenite where clients
//! register, log in, send text to one another by user name, and log off.
//!
//! # Features
//! - User registration and login/logoff
//! - Bounded number of concurrently logged-in users
//! - FIFO login queue with automatic promotion when a slot frees up
//! - Directed text delivery between logged-in users
//! - Interactive client with blocking request/reply commands
//! - Disconnection handling
//!
//! # Architecture
//! - `SessionDirectory` is the shared registry behind an `RwLock`,
//!   constructed once and handed to every connection as an `Arc`
//! - Each connection has a `handler` task that decodes requests and a
//!   writer task that owns the socket's sending half
//! - The client pairs a foreground command loop with a background
//!   receiver through a reusable `Correlator`
//!
//! # Example
//! ```ignore
//! use session_chat::{ChatServer, DirectoryLimits};
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = ChatServer::bind("127.0.0.1:8080", DirectoryLimits::new(10))
//!         .await
//!         .unwrap();
//!     server.run().await;
//! }
//! ```

pub mod client;
pub mod config;
pub mod directory;
pub mod error;
pub mod handler;
pub mod message;
pub mod server;
pub mod session;
pub mod types;

// Re-export main types for convenience
pub use client::{ChatClient, ClientEvent, Command};
pub use config::{ClientConfig, ServerConfig};
pub use directory::{Admission, DirectoryLimits, SessionDirectory};
pub use error::{AppError, ClientError, CodecError, CommandError, DirectoryError, SendError};
pub use handler::handle_connection;
pub use message::{Message, MessageType, Status};
pub use server::ChatServer;
pub use session::{Outbound, Session, WaitingEntry};
pub use types::{ConnectionId, UserId};
