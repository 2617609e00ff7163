//! WebSocket connection handler
//!
//! Handles individual client connections: WebSocket handshake, request
//! decoding and dispatch into the session directory, and the writer task
//! that owns the socket's sending half.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tracing::{debug, error, info, warn};

use crate::directory::{login_queued_text, login_successful_text, Admission, SessionDirectory};
use crate::error::{AppError, CodecError, DirectoryError};
use crate::message::{Message, MessageType, Status};
use crate::session::Outbound;
use crate::types::{ConnectionId, UserId};

/// Buffer size of a connection's outbound channel
const OUTBOUND_BUFFER_SIZE: usize = 32;

/// How long the writer may keep flushing after the connection closed
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Lifecycle of a server connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake in progress
    Connecting,
    /// Serving requests
    Open,
    /// Terminal; bound users have been released
    Closed,
}

type Outcome = Result<(Status, String), DirectoryError>;

/// Per-connection protocol state
pub struct Connection {
    id: ConnectionId,
    state: ConnectionState,
    directory: Arc<SessionDirectory>,
    outbound: Outbound,
    /// Users registered or logged in through this connection
    bound: HashSet<UserId>,
}

impl Connection {
    pub fn new(id: ConnectionId, directory: Arc<SessionDirectory>, outbound: Outbound) -> Self {
        Self {
            id,
            state: ConnectionState::Connecting,
            directory,
            outbound,
            bound: HashSet::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn open(&mut self) {
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Open;
        }
    }

    /// Serve requests until the peer goes away or the transport fails
    pub async fn serve<S>(&mut self, frames: &mut S) -> Result<(), AppError>
    where
        S: Stream<Item = Result<WsMessage, tungstenite::Error>> + Unpin,
    {
        while let Some(frame) = frames.next().await {
            let response = match frame? {
                WsMessage::Text(text) => self.handle_record(&text).await,
                WsMessage::Binary(_) => {
                    warn!("Binary frame from connection {}", self.id);
                    invalid_record(&CodecError::NonTextFrame)
                }
                WsMessage::Close(_) => {
                    debug!("Connection {} sent close frame", self.id);
                    break;
                }
                _ => continue,
            };

            if self.outbound.send(response).await.is_err() {
                debug!("Writer closed, ending read loop for {}", self.id);
                break;
            }
        }
        Ok(())
    }

    /// Decode one record and produce its single response
    pub async fn handle_record(&mut self, record: &str) -> Message {
        match Message::decode(record) {
            Ok(msg) => self.dispatch(msg).await,
            Err(e) => {
                warn!("Invalid record from connection {}: {}", self.id, e);
                invalid_record(&e)
            }
        }
    }

    /// Route a decoded request to the directory
    pub async fn dispatch(&mut self, msg: Message) -> Message {
        let request_id = msg.request_id;
        let Some(reply_type) = msg.message_type.response_type() else {
            warn!(
                "Connection {} sent non-request {:?}",
                self.id, msg.message_type
            );
            return Message::response(
                MessageType::ErrorResponse,
                msg.sender_id,
                Status::InvalidRequest,
                format!("Unexpected message type {:?}", msg.message_type),
            )
            .with_request_id(request_id);
        };

        let requester = msg.sender_id.clone();
        let outcome = match msg.message_type {
            MessageType::RegisterRequest => self.register(msg).await,
            MessageType::LoginRequest => self.login(msg).await,
            MessageType::LogoffRequest => self.logoff(msg).await,
            MessageType::SendTextRequest => self.send_text(msg).await,
            other => Err(DirectoryError::Malformed(format!("{:?}", other))),
        };

        let response = match outcome {
            Ok((status, text)) => Message::response(reply_type, requester, status, text),
            Err(e) => {
                debug!("Rejected {:?} on {}: {}", reply_type, self.id, e);
                Message::rejection(reply_type, requester, &e)
            }
        };
        response.with_request_id(request_id)
    }

    async fn register(&mut self, msg: Message) -> Outcome {
        let user_id = msg.sender_id.ok_or(DirectoryError::MissingField("sender id"))?;
        self.directory
            .register(user_id.clone(), self.outbound.clone())
            .await?;

        let text = format!("User {} has been successfully registered", user_id);
        self.bound.insert(user_id);
        Ok((Status::Ok, text))
    }

    async fn login(&mut self, msg: Message) -> Outcome {
        let user_id = msg.sender_id.ok_or(DirectoryError::MissingField("sender id"))?;
        let admission = self
            .directory
            .login(user_id.clone(), self.outbound.clone())
            .await?;

        let outcome = match admission {
            Admission::LoggedIn => (Status::Ok, login_successful_text(&user_id)),
            Admission::Queued => (Status::RequestQueued, login_queued_text(&user_id)),
        };
        self.bound.insert(user_id);
        Ok(outcome)
    }

    async fn logoff(&mut self, msg: Message) -> Outcome {
        let user_id = msg.sender_id.ok_or(DirectoryError::MissingField("sender id"))?;
        self.require_bound(&user_id)?;
        let result = self.directory.logoff_from(&user_id, self.id).await;
        self.forget_if_rebound(&user_id, &result);
        result?;
        Ok((
            Status::Ok,
            format!("User {} has been successfully logged off", user_id),
        ))
    }

    async fn send_text(&mut self, msg: Message) -> Outcome {
        let sender = msg.sender_id.ok_or(DirectoryError::MissingField("sender id"))?;
        let receiver = msg
            .receiver_id
            .ok_or(DirectoryError::MissingField("receiver id"))?;
        let text = msg.text.ok_or(DirectoryError::MissingField("text"))?;
        self.require_bound(&sender)?;

        let result = self
            .directory
            .route_text_from(&sender, self.id, &receiver, text)
            .await;
        self.forget_if_rebound(&sender, &result);
        result?;
        Ok((
            Status::Ok,
            format!("Text has been delivered successfully to {} :)", receiver),
        ))
    }

    fn require_bound(&self, user_id: &UserId) -> Result<(), DirectoryError> {
        if self.bound.contains(user_id) {
            Ok(())
        } else {
            Err(DirectoryError::NotBound(user_id.clone()))
        }
    }

    /// Drop a user another connection has taken over
    fn forget_if_rebound(&mut self, user_id: &UserId, result: &Result<(), DirectoryError>) {
        if matches!(result, Err(DirectoryError::NotBound(_))) {
            debug!("User {} re-bound elsewhere, unbinding from {}", user_id, self.id);
            self.bound.remove(user_id);
        }
    }

    /// Enter the Closed state, releasing every bound user exactly once
    pub async fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.state = ConnectionState::Closed;

        for user_id in self.bound.drain() {
            self.directory.release(&user_id, self.id).await;
        }
    }
}

/// Response to a frame that did not decode into a request
fn invalid_record(err: &CodecError) -> Message {
    Message::response(
        MessageType::ErrorResponse,
        None,
        Status::InvalidRequest,
        format!("Invalid message format: {}", err),
    )
}

/// Handle a new TCP connection
///
/// Performs the WebSocket handshake, serves requests until the peer
/// disconnects or the transport fails, then releases the connection's
/// users from the directory.
pub async fn handle_connection(
    stream: TcpStream,
    directory: Arc<SessionDirectory>,
) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);

    let connection_id = ConnectionId::new();
    let (msg_tx, mut msg_rx) = mpsc::channel::<Message>(OUTBOUND_BUFFER_SIZE);
    let mut connection = Connection::new(
        connection_id,
        directory,
        Outbound::new(connection_id, msg_tx),
    );

    // WebSocket handshake
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    connection.open();
    info!("Connection {} open from {}", connection_id, peer_addr);

    // Spawn write task (Message -> WebSocket)
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            match msg.encode() {
                Ok(json) => {
                    if ws_sender.send(WsMessage::Text(json.into())).await.is_err() {
                        debug!("WebSocket send failed, ending write task");
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                }
            }
        }
        debug!("Write task ended for connection");

        // Send close frame when done
        let _ = ws_sender.close().await;
    });

    let mut writer_finished = false;
    let result = tokio::select! {
        result = connection.serve(&mut ws_receiver) => result,
        _ = &mut write_task => {
            writer_finished = true;
            debug!("Write task completed for {}", connection_id);
            Ok(())
        }
    };

    if let Err(e) = &result {
        warn!("Connection {} failed: {}", connection_id, e);
    }

    connection.close().await;
    drop(connection);

    if !writer_finished && tokio::time::timeout(WRITER_DRAIN_TIMEOUT, write_task).await.is_err() {
        debug!("Writer for {} did not drain in time", connection_id);
    }

    info!("Connection {} closed", connection_id);

    result
}
