//! Interactive chat client
//!
//! A foreground side that sends one request at a time and blocks for its
//! reply, and a background receiver task that reads everything the server
//! sends. The two meet in the [`Correlator`].

pub mod command;
pub mod correlator;
pub mod receiver;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::error::{ClientError, CommandError};
use crate::message::Message;
use crate::types::UserId;

pub use command::{run_command_loop, spawn_stdin_reader, Command};
pub use correlator::{Correlator, PendingReply};
pub use receiver::{run_receiver, ClientEvent};
pub use state::{ClientSnapshot, ClientState, LoginState};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// A connected client session
pub struct ChatClient {
    sink: WsSink,
    state: Arc<ClientState>,
    correlator: Arc<Correlator>,
    receiver: JoinHandle<()>,
    timeout: Duration,
}

impl ChatClient {
    /// Connect and start the background receiver
    ///
    /// Returns the client and the stream of unsolicited events.
    pub async fn connect(
        config: &ClientConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ClientEvent>), ClientError> {
        let url = config.url();
        debug!("Connecting to {}", url);
        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        let (sink, stream) = ws_stream.split();

        let state = Arc::new(ClientState::new());
        let correlator = Arc::new(Correlator::new());
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        state.mark_connected();
        let receiver = tokio::spawn(run_receiver(
            stream,
            Arc::clone(&state),
            Arc::clone(&correlator),
            events_tx,
        ));
        info!("Connected to {}", url);

        let client = Self {
            sink,
            state,
            correlator,
            receiver,
            timeout: config.response_timeout(),
        };
        Ok((client, events_rx))
    }

    pub fn state(&self) -> &Arc<ClientState> {
        &self.state
    }

    pub fn snapshot(&self) -> ClientSnapshot {
        ClientSnapshot {
            awaiting_response: self.correlator.is_awaiting(),
            ..self.state.snapshot()
        }
    }

    /// Send a request and block until its reply, a timeout, or disconnect
    pub async fn request(&mut self, msg: Message) -> Result<Message, ClientError> {
        let Some(expected) = msg.message_type.response_type() else {
            return Err(ClientError::NotARequest(msg.message_type));
        };
        if !self.state.is_connected() {
            return Err(ClientError::Disconnected);
        }

        let pending = self.correlator.begin(expected)?;
        let record = match msg.with_request_id(Some(pending.request_id())).encode() {
            Ok(record) => record,
            Err(e) => {
                self.correlator.abandon();
                return Err(e.into());
            }
        };
        if let Err(e) = self.sink.send(WsMessage::Text(record.into())).await {
            self.correlator.abandon();
            return Err(e.into());
        }

        self.correlator.wait(pending, self.timeout).await
    }

    /// Check a command against the local state, then run it
    pub async fn execute(&mut self, command: Command) -> Result<Message, ClientError> {
        let snapshot = self.state.snapshot();
        let msg = match command {
            Command::Register(user_id) => Message::register(user_id),
            Command::Login(user_id) => {
                match snapshot.login {
                    LoginState::LoggedIn => return Err(CommandError::AlreadyLoggedIn.into()),
                    LoginState::Queued => return Err(CommandError::InLoginQueue.into()),
                    LoginState::LoggedOut => {}
                }
                Message::login(user_id)
            }
            Command::Logoff => Message::logoff(Self::current_user(&snapshot)?),
            Command::Send { to, text } => {
                Message::send_text(Self::current_user(&snapshot)?, to, text)
            }
        };
        self.request(msg).await
    }

    fn current_user(snapshot: &ClientSnapshot) -> Result<UserId, CommandError> {
        match &snapshot.user_id {
            Some(user_id) if snapshot.logged_in() => Ok(user_id.clone()),
            _ => Err(CommandError::NotLoggedIn),
        }
    }

    /// Close the socket and stop the receiver
    ///
    /// Any waiter still registered with the correlator is aborted.
    pub async fn shutdown(mut self) {
        let _ = self.sink.close().await;
        self.correlator.close();
        self.state.mark_disconnected();
        self.receiver.abort();
        let _ = self.receiver.await;
        info!("Client shut down");
    }
}
