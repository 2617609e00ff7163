//! Client session state
//!
//! Connection and login flags shared by the command loop and the
//! background receiver. All flags live behind one lock so a reader never
//! observes, say, logged in and queued at the same time.

use std::sync::{Mutex, MutexGuard};

use tokio::sync::watch;

use crate::message::{Message, MessageType, Status};
use crate::types::UserId;

/// Login progress of this client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    LoggedOut,
    /// Server was full; waiting for an unsolicited promotion
    Queued,
    LoggedIn,
}

/// Point-in-time copy of the client flags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSnapshot {
    pub connected: bool,
    pub login: LoginState,
    pub user_id: Option<UserId>,
    pub awaiting_response: bool,
}

impl ClientSnapshot {
    pub fn logged_in(&self) -> bool {
        self.login == LoginState::LoggedIn
    }

    pub fn queued_for_login(&self) -> bool {
        self.login == LoginState::Queued
    }
}

#[derive(Debug)]
struct Flags {
    login: LoginState,
    user_id: Option<UserId>,
}

/// Lock-guarded client flags
#[derive(Debug)]
pub struct ClientState {
    flags: Mutex<Flags>,
    connected: watch::Sender<bool>,
}

impl ClientState {
    pub fn new() -> Self {
        Self {
            flags: Mutex::new(Flags {
                login: LoginState::LoggedOut,
                user_id: None,
            }),
            connected: watch::Sender::new(false),
        }
    }

    fn flags(&self) -> MutexGuard<'_, Flags> {
        self.flags.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn mark_connected(&self) {
        self.connected.send_replace(true);
    }

    pub fn mark_disconnected(&self) {
        self.connected.send_replace(false);
        let mut flags = self.flags();
        flags.login = LoginState::LoggedOut;
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Resolves once the connection is marked as dropped
    pub async fn wait_disconnected(&self) {
        let mut rx = self.connected.subscribe();
        let _ = rx.wait_for(|connected| !*connected).await;
    }

    /// Snapshot without the correlator's awaiting flag
    pub fn snapshot(&self) -> ClientSnapshot {
        let flags = self.flags();
        ClientSnapshot {
            connected: self.is_connected(),
            login: flags.login,
            user_id: flags.user_id.clone(),
            awaiting_response: false,
        }
    }

    /// Apply a server reply to the login state
    ///
    /// Handles both correlated replies and unsolicited promotions.
    pub fn apply(&self, msg: &Message) {
        let mut flags = self.flags();
        match (msg.message_type, msg.status) {
            (MessageType::LoginResponse, Some(Status::Ok)) => {
                flags.login = LoginState::LoggedIn;
                if msg.receiver_id.is_some() {
                    flags.user_id = msg.receiver_id.clone();
                }
            }
            (MessageType::LoginResponse, Some(Status::RequestQueued)) => {
                flags.login = LoginState::Queued;
                if msg.receiver_id.is_some() {
                    flags.user_id = msg.receiver_id.clone();
                }
            }
            (MessageType::LogoffResponse, Some(Status::Ok)) => {
                flags.login = LoginState::LoggedOut;
            }
            _ => {}
        }
    }
}

impl Default for ClientState {
    fn default() -> Self {
        Self::new()
    }
}
