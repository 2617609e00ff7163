//! Background receiver
//!
//! Reads the inbound stream, applies replies to the client state, releases
//! the correlator for the reply the command loop waits on, and forwards
//! everything unsolicited as a [`ClientEvent`].

use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tracing::{debug, info, warn};

use crate::client::correlator::Correlator;
use crate::client::state::ClientState;
use crate::message::{Message, MessageType};
use crate::types::UserId;

/// Inbound traffic nobody is waiting for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Chat text from another user
    Text { from: UserId, text: String },
    /// Login granted after waiting in the queue
    Promoted { text: String },
    /// Any other reply that arrived with no request waiting for it
    Notice { text: String },
    /// The connection is gone
    Disconnected,
}

/// Run until the server closes the stream or the transport fails
///
/// On exit the client is marked disconnected and the correlator closed,
/// which releases a command loop blocked on a reply.
pub async fn run_receiver<S>(
    mut frames: S,
    state: Arc<ClientState>,
    correlator: Arc<Correlator>,
    events: mpsc::UnboundedSender<ClientEvent>,
) where
    S: Stream<Item = Result<WsMessage, tungstenite::Error>> + Unpin,
{
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => match Message::decode(&text) {
                Ok(msg) => handle_inbound(msg, &state, &correlator, &events),
                Err(e) => warn!("Failed to understand server message: {}", e),
            },
            Ok(WsMessage::Close(_)) => {
                debug!("Server sent close frame");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Connection to server failed: {}", e);
                break;
            }
        }
    }

    info!("Receiver stopped");
    state.mark_disconnected();
    correlator.close();
    let _ = events.send(ClientEvent::Disconnected);
}

fn handle_inbound(
    msg: Message,
    state: &ClientState,
    correlator: &Correlator,
    events: &mpsc::UnboundedSender<ClientEvent>,
) {
    // State first, so the command loop sees it once it resumes
    state.apply(&msg);

    let Err(msg) = correlator.complete(msg) else {
        return;
    };

    let event = match msg.message_type {
        MessageType::ReceiveText => ClientEvent::Text {
            from: msg.sender_id.unwrap_or_else(|| UserId::from("unknown")),
            text: msg.text.unwrap_or_default(),
        },
        MessageType::LoginResponse if msg.is_ok() => {
            info!("Promoted from login queue");
            ClientEvent::Promoted {
                text: msg.text.unwrap_or_default(),
            }
        }
        other => {
            debug!("Unsolicited {:?}", other);
            ClientEvent::Notice {
                text: msg.text.unwrap_or_default(),
            }
        }
    };
    let _ = events.send(event);
}
