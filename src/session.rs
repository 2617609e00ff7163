//! Session and waiting-entry definitions
//!
//! A session is a registered user's server-side record: identity, the
//! outbound handle of its connection, and its login state.

use tokio::sync::mpsc;

use crate::error::SendError;
use crate::message::Message;
use crate::types::{ConnectionId, UserId};

/// Write handle of one connection
///
/// All writes to a connection go through its single writer task, so
/// clones of this handle held by different sessions or handlers never
/// interleave partial records.
#[derive(Debug, Clone)]
pub struct Outbound {
    /// Connection this handle writes to
    pub connection: ConnectionId,
    sender: mpsc::Sender<Message>,
}

impl Outbound {
    pub fn new(connection: ConnectionId, sender: mpsc::Sender<Message>) -> Self {
        Self { connection, sender }
    }

    /// Queue a message for this connection's writer
    ///
    /// Returns an error if the writer has stopped (connection closing).
    pub async fn send(&self, msg: Message) -> Result<(), SendError> {
        self.sender
            .send(msg)
            .await
            .map_err(|_| SendError::ChannelClosed)
    }

    /// Queue a message without waiting for buffer space
    ///
    /// Used while the directory lock is held, so a peer that stopped
    /// reading never stalls other connections.
    pub fn try_send(&self, msg: Message) -> Result<(), SendError> {
        self.sender.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::ChannelFull,
            mpsc::error::TrySendError::Closed(_) => SendError::ChannelClosed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Login state of a directory entry
///
/// Queued users are not represented here: while queued, a user lives in
/// the waiting queue and has no directory entry at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Registered,
    LoggedIn,
}

/// Registered user record
#[derive(Debug)]
pub struct Session {
    pub user_id: UserId,
    pub outbound: Outbound,
    state: SessionState,
}

impl Session {
    /// Create a registered, logged-off session
    pub fn new(user_id: UserId, outbound: Outbound) -> Self {
        Self {
            user_id,
            outbound,
            state: SessionState::Registered,
        }
    }

    /// Create a session that enters directly as logged in (promotion)
    pub fn logged_in(user_id: UserId, outbound: Outbound) -> Self {
        Self {
            user_id,
            outbound,
            state: SessionState::LoggedIn,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_logged_in(&self) -> bool {
        self.state == SessionState::LoggedIn
    }

    /// Registered -> LoggedIn
    ///
    /// Returns false if the session was already logged in.
    pub fn log_in(&mut self) -> bool {
        if self.is_logged_in() {
            return false;
        }
        self.state = SessionState::LoggedIn;
        true
    }

    /// LoggedIn -> Registered
    ///
    /// Returns false if the session was not logged in.
    pub fn log_off(&mut self) -> bool {
        if !self.is_logged_in() {
            return false;
        }
        self.state = SessionState::Registered;
        true
    }

    /// Queue a message on this session's connection without waiting
    pub fn try_send(&self, msg: Message) -> Result<(), SendError> {
        self.outbound.try_send(msg)
    }

    /// Turn this session into a waiting entry, keeping the given handle
    pub fn into_waiting(self, outbound: Outbound) -> WaitingEntry {
        WaitingEntry {
            user_id: self.user_id,
            outbound,
        }
    }
}

/// Login attempt held back because the server is at capacity
#[derive(Debug)]
pub struct WaitingEntry {
    pub user_id: UserId,
    pub outbound: Outbound,
}

impl WaitingEntry {
    /// Promote into a logged-in session
    pub fn into_session(self) -> Session {
        Session::logged_in(self.user_id, self.outbound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outbound() -> (Outbound, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(32);
        (Outbound::new(ConnectionId::new(), tx), rx)
    }

    #[tokio::test]
    async fn test_session_creation() {
        let (out, _rx) = outbound();
        let session = Session::new(UserId::from("alice"), out);

        assert_eq!(session.state(), SessionState::Registered);
        assert!(!session.is_logged_in());
    }

    #[tokio::test]
    async fn test_session_login_transitions() {
        let (out, _rx) = outbound();
        let mut session = Session::new(UserId::from("alice"), out);

        assert!(!session.log_off());
        assert!(session.log_in());
        assert!(!session.log_in());
        assert!(session.is_logged_in());
        assert!(session.log_off());
        assert_eq!(session.state(), SessionState::Registered);
    }

    #[tokio::test]
    async fn test_session_send_and_closed_handle() {
        let (out, mut rx) = outbound();
        let session = Session::new(UserId::from("alice"), out);

        session.try_send(Message::login(UserId::from("alice"))).unwrap();
        assert!(rx.recv().await.is_some());

        drop(rx);
        assert!(session.outbound.is_closed());
        assert!(matches!(
            session.try_send(Message::login(UserId::from("alice"))),
            Err(SendError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_try_send_reports_full_buffer() {
        let (tx, _rx) = mpsc::channel(1);
        let out = Outbound::new(ConnectionId::new(), tx);

        out.try_send(Message::login(UserId::from("alice"))).unwrap();
        assert!(matches!(
            out.try_send(Message::login(UserId::from("alice"))),
            Err(SendError::ChannelFull)
        ));
    }

    #[tokio::test]
    async fn test_waiting_entry_promotes_logged_in() {
        let (out, _rx) = outbound();
        let connection = out.connection;
        let entry = Session::new(UserId::from("bob"), out.clone()).into_waiting(out);
        let session = entry.into_session();

        assert!(session.is_logged_in());
        assert_eq!(session.outbound.connection, connection);
    }
}
