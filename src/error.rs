//! Error types for the chat service
//!
//! Connection-fatal errors, application rejections that travel back to the
//! client as typed responses, and the client-side failure modes.
//! Uses thiserror for ergonomic error definitions.

use std::time::Duration;

use thiserror::Error;

use crate::message::{MessageType, Status};
use crate::types::UserId;

/// Server connection errors
///
/// Every variant is fatal for the connection it occurred on.
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

}

/// Message send errors
///
/// Occurs when attempting to write to a connection whose writer has stopped.
#[derive(Debug, Error)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,

    /// The connection's outbound buffer is full
    #[error("Channel full")]
    ChannelFull,
}

/// Message record encode/decode errors
#[derive(Debug, Error)]
pub enum CodecError {
    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame did not carry a text record
    #[error("Expected a text frame")]
    NonTextFrame,
}

/// Application-level rejections
///
/// Never terminate a connection; each one is reported to the requester as
/// an INVALID_REQUEST response whose text is the Display output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    #[error("User Id '{0}' is not a valid user name")]
    InvalidUserId(UserId),

    #[error("User {0} has already been registered")]
    AlreadyRegistered(UserId),

    #[error("User Id {0} is not registered")]
    NotRegistered(UserId),

    #[error("An user with username {0} is already logged in")]
    AlreadyLoggedIn(UserId),

    #[error("User {0} is already waiting in the login queue")]
    AlreadyQueued(UserId),

    #[error("User Id {0} is currently not logged in")]
    NotLoggedIn(UserId),

    #[error("Server is presently full and its login queue is full. The request for login of {0} has been rejected.")]
    QueueFull(UserId),

    #[error("Text could not be delivered to {0}")]
    DeliveryFailed(UserId),

    #[error("User {0} does not belong to this connection")]
    NotBound(UserId),

    #[error("Request is missing its {0}")]
    MissingField(&'static str),

    #[error("Invalid request: {0}")]
    Malformed(String),
}

impl DirectoryError {
    pub fn status(&self) -> Status {
        Status::InvalidRequest
    }
}

/// Local command validation failures
///
/// Produced by the client before anything reaches the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Invalid arguments: The correct format is register <username>")]
    InvalidRegisterArgs,

    #[error("Invalid arguments: The correct format is login <username>")]
    InvalidLoginArgs,

    #[error("Invalid arguments: The correct format is logoff")]
    InvalidLogoffArgs,

    #[error("Invalid arguments: The correct format is @<username> <text>")]
    InvalidSendArgs,

    #[error("Error: Invalid input '{0}'")]
    UnknownCommand(String),

    #[error("You are not logged into the server: Run login")]
    NotLoggedIn,

    #[error("You are already logged into the server!")]
    AlreadyLoggedIn,

    #[error("Server is currently filled. Waiting for your turn to get logged in")]
    InLoginQueue,
}

/// Client-side errors
#[derive(Debug, Error)]
pub enum ClientError {
    /// WebSocket protocol error (fatal)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Command(#[from] CommandError),

    /// The server did not answer within the configured timeout
    #[error("No response from server within {0:?}")]
    NoResponse(Duration),

    /// The connection closed while a request was waiting for its reply
    #[error("Connection closed before the server replied")]
    Aborted,

    /// Another request is still waiting for its reply
    #[error("A request is already waiting for its reply")]
    Busy,

    #[error("Not connected to server")]
    Disconnected,

    /// Only request kinds can be sent and waited on
    #[error("{0:?} is not a request")]
    NotARequest(MessageType),
}
