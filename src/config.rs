//! Command line configuration for the server and client binaries

use std::time::Duration;

use clap::Parser;

use crate::directory::{DirectoryLimits, DEFAULT_MAX_USERS};

/// Default time the client waits for a reply
pub const DEFAULT_RESPONSE_TIMEOUT_SECS: u64 = 10;

/// Chat server
#[derive(Parser, Debug, Clone)]
#[command(name = "session_chat")]
#[command(about = "Directed-text chat server with bounded logins")]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Maximum number of concurrently logged-in users
    #[arg(long, env = "CHAT_MAX_USERS", default_value_t = DEFAULT_MAX_USERS)]
    pub max_users: usize,

    /// Maximum number of queued logins (defaults to --max-users)
    #[arg(long, env = "CHAT_QUEUE_CAPACITY")]
    pub queue_capacity: Option<usize>,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn limits(&self) -> DirectoryLimits {
        DirectoryLimits {
            max_users: self.max_users,
            queue_capacity: self.queue_capacity.unwrap_or(self.max_users),
        }
    }
}

/// Interactive chat client
#[derive(Parser, Debug, Clone)]
#[command(name = "session_chat_client")]
#[command(about = "Interactive client for the session_chat server")]
pub struct ClientConfig {
    /// Server host name
    pub hostname: String,

    /// Server port
    pub port: u16,

    /// Seconds to wait for the server's reply to a command
    #[arg(long, env = "CHAT_RESPONSE_TIMEOUT_SECS", default_value_t = DEFAULT_RESPONSE_TIMEOUT_SECS)]
    pub timeout_secs: u64,
}

impl ClientConfig {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            timeout_secs: DEFAULT_RESPONSE_TIMEOUT_SECS,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.hostname, self.port)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
