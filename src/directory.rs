//! Session directory
//!
//! Shared registry of registered users, their login state, and the FIFO
//! queue of login attempts made while the server was at capacity. One
//! instance is constructed at startup and shared by every connection
//! handler through an `Arc`.
//!
//! # Locking
//! The directory state sits behind a single `RwLock`. Register, login,
//! logoff, promotion and release take it exclusively; text routing only
//! reads. Writes to a connection go through that connection's
//! [`Outbound`] handle, which has its own serialization, and are always
//! issued while the directory lock is already held (directory lock first,
//! handle second). Those writes never wait for buffer space: a full
//! handle fails the delivery instead of holding the lock.

use std::collections::{HashMap, VecDeque};

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::DirectoryError;
use crate::message::{Message, MessageType, Status};
use crate::session::{Outbound, Session, WaitingEntry};
use crate::types::{ConnectionId, UserId};

/// Default maximum number of concurrently logged-in users
pub const DEFAULT_MAX_USERS: usize = 10;

/// Admission control limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryLimits {
    /// Maximum number of concurrently logged-in users
    pub max_users: usize,
    /// Maximum number of queued login attempts
    pub queue_capacity: usize,
}

impl DirectoryLimits {
    /// Limits with a waiting queue as large as the login limit
    pub fn new(max_users: usize) -> Self {
        Self {
            max_users,
            queue_capacity: max_users,
        }
    }
}

impl Default for DirectoryLimits {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_USERS)
    }
}

/// Result of an accepted login request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The user is logged in
    LoggedIn,
    /// The server is full; the user waits in the login queue
    Queued,
}

pub(crate) fn login_successful_text(user_id: &UserId) -> String {
    format!("User {} has been successfully logged in :)", user_id)
}

pub(crate) fn login_queued_text(user_id: &UserId) -> String {
    format!(
        "Server is presently full. The request for login of {} has been queued.",
        user_id
    )
}

#[derive(Debug, Default)]
struct DirectoryState {
    /// Registered users that are not waiting: UserId -> Session
    sessions: HashMap<UserId, Session>,
    /// Login attempts made at capacity, oldest first
    waiting: VecDeque<WaitingEntry>,
    /// Number of sessions in the LoggedIn state
    active_logins: usize,
}

impl DirectoryState {
    fn is_waiting(&self, user_id: &UserId) -> bool {
        self.waiting.iter().any(|e| &e.user_id == user_id)
    }

    fn contains(&self, user_id: &UserId) -> bool {
        self.sessions.contains_key(user_id) || self.is_waiting(user_id)
    }

    /// Connection currently bound to `user_id`, wherever it lives
    fn owner(&self, user_id: &UserId) -> Option<ConnectionId> {
        if let Some(session) = self.sessions.get(user_id) {
            return Some(session.outbound.connection);
        }
        self.waiting
            .iter()
            .find(|e| &e.user_id == user_id)
            .map(|e| e.outbound.connection)
    }

    /// Fail unless `user_id` is bound to `connection`
    fn check_owner(&self, user_id: &UserId, connection: Option<ConnectionId>) -> Result<(), DirectoryError> {
        match connection {
            Some(connection) if self.owner(user_id) != Some(connection) => {
                Err(DirectoryError::NotBound(user_id.clone()))
            }
            _ => Ok(()),
        }
    }

    /// Remove a waiting entry still bound to `connection`
    fn remove_waiting(&mut self, user_id: &UserId, connection: ConnectionId) -> Option<WaitingEntry> {
        let pos = self
            .waiting
            .iter()
            .position(|e| &e.user_id == user_id && e.outbound.connection == connection)?;
        self.waiting.remove(pos)
    }
}

/// Registry of sessions with bounded admission control
#[derive(Debug)]
pub struct SessionDirectory {
    limits: DirectoryLimits,
    state: RwLock<DirectoryState>,
}

impl SessionDirectory {
    pub fn new(limits: DirectoryLimits) -> Self {
        Self {
            limits,
            state: RwLock::new(DirectoryState::default()),
        }
    }

    pub fn limits(&self) -> DirectoryLimits {
        self.limits
    }

    /// Register a new user bound to `outbound`
    ///
    /// Fails if the id is already registered or waiting for login.
    pub async fn register(&self, user_id: UserId, outbound: Outbound) -> Result<(), DirectoryError> {
        if !user_id.is_valid() {
            return Err(DirectoryError::InvalidUserId(user_id));
        }

        let mut state = self.state.write().await;
        if state.contains(&user_id) {
            return Err(DirectoryError::AlreadyRegistered(user_id));
        }

        info!("User {} registered on connection {}", user_id, outbound.connection);
        state
            .sessions
            .insert(user_id.clone(), Session::new(user_id, outbound));
        Ok(())
    }

    /// Log a registered user in, or queue the attempt when at capacity
    ///
    /// The session is re-bound to `outbound`, the connection the request
    /// arrived on. A queued user leaves the session map and lives only in
    /// the waiting queue until promoted.
    pub async fn login(&self, user_id: UserId, outbound: Outbound) -> Result<Admission, DirectoryError> {
        let mut state = self.state.write().await;

        if state.is_waiting(&user_id) {
            return Err(DirectoryError::AlreadyQueued(user_id));
        }

        let at_capacity = state.active_logins >= self.limits.max_users;
        let queue_full = state.waiting.len() >= self.limits.queue_capacity;

        let state = &mut *state;
        let Some(session) = state.sessions.get_mut(&user_id) else {
            return Err(DirectoryError::NotRegistered(user_id));
        };
        if session.is_logged_in() {
            return Err(DirectoryError::AlreadyLoggedIn(user_id));
        }

        if !at_capacity {
            session.outbound = outbound;
            session.log_in();
            state.active_logins += 1;
            info!(
                "User {} logged in ({}/{})",
                user_id, state.active_logins, self.limits.max_users
            );
            return Ok(Admission::LoggedIn);
        }

        if queue_full {
            warn!("Login queue full, rejecting login of {}", user_id);
            return Err(DirectoryError::QueueFull(user_id));
        }

        if let Some(session) = state.sessions.remove(&user_id) {
            state.waiting.push_back(session.into_waiting(outbound));
        }
        info!(
            "Server full, user {} queued for login (position {})",
            user_id,
            state.waiting.len()
        );
        Ok(Admission::Queued)
    }

    /// Log a user off and hand the freed slot to the oldest waiting user
    pub async fn logoff(&self, user_id: &UserId) -> Result<(), DirectoryError> {
        self.logoff_checked(user_id, None).await
    }

    /// Log off on behalf of `connection`
    ///
    /// Fails with `NotBound` if the session has since been re-bound to
    /// another connection.
    pub async fn logoff_from(&self, user_id: &UserId, connection: ConnectionId) -> Result<(), DirectoryError> {
        self.logoff_checked(user_id, Some(connection)).await
    }

    async fn logoff_checked(&self, user_id: &UserId, connection: Option<ConnectionId>) -> Result<(), DirectoryError> {
        let mut state = self.state.write().await;

        if !state.contains(user_id) {
            return Err(DirectoryError::NotRegistered(user_id.clone()));
        }
        state.check_owner(user_id, connection)?;
        if state.is_waiting(user_id) {
            return Err(DirectoryError::NotLoggedIn(user_id.clone()));
        }
        let Some(session) = state.sessions.get_mut(user_id) else {
            return Err(DirectoryError::NotRegistered(user_id.clone()));
        };
        if !session.log_off() {
            return Err(DirectoryError::NotLoggedIn(user_id.clone()));
        }
        state.active_logins -= 1;
        info!("User {} logged off", user_id);

        self.promote_locked(&mut state);
        Ok(())
    }

    /// Promote waiting users while there is capacity for them
    pub async fn promote_waiting(&self) {
        let mut state = self.state.write().await;
        self.promote_locked(&mut state);
    }

    /// Promotion body; the caller holds the exclusive lock
    ///
    /// Each promoted user is told with an unsolicited LoginResponse(OK) on
    /// its own connection. Entries whose connection already closed are
    /// dropped instead of promoted. The session is in place before the
    /// notice is queued, and queuing never waits.
    fn promote_locked(&self, state: &mut DirectoryState) {
        while state.active_logins < self.limits.max_users {
            let Some(entry) = state.waiting.pop_front() else {
                break;
            };

            if entry.outbound.is_closed() {
                debug!("Dropping waiting user {}: connection closed", entry.user_id);
                continue;
            }

            let user_id = entry.user_id.clone();
            let outbound = entry.outbound.clone();
            state.sessions.insert(user_id.clone(), entry.into_session());
            state.active_logins += 1;
            info!(
                "User {} promoted from login queue ({}/{})",
                user_id, state.active_logins, self.limits.max_users
            );

            let notice = Message::response(
                MessageType::LoginResponse,
                Some(user_id.clone()),
                Status::Ok,
                login_successful_text(&user_id),
            );
            if let Err(e) = outbound.try_send(notice) {
                warn!("Failed to notify promoted user {}: {}", user_id, e);
            }
        }
    }

    /// Deliver text to a logged-in receiver as ReceiveText
    ///
    /// Fails with `DeliveryFailed` if the receiver's connection is closing
    /// or its outbound buffer is full.
    pub async fn route_text(
        &self,
        sender: &UserId,
        receiver: &UserId,
        text: String,
    ) -> Result<(), DirectoryError> {
        self.route_text_checked(sender, None, receiver, text).await
    }

    /// Route text on behalf of `connection`, which must own `sender`
    pub async fn route_text_from(
        &self,
        sender: &UserId,
        connection: ConnectionId,
        receiver: &UserId,
        text: String,
    ) -> Result<(), DirectoryError> {
        self.route_text_checked(sender, Some(connection), receiver, text).await
    }

    async fn route_text_checked(
        &self,
        sender: &UserId,
        connection: Option<ConnectionId>,
        receiver: &UserId,
        text: String,
    ) -> Result<(), DirectoryError> {
        let state = self.state.read().await;
        state.check_owner(sender, connection)?;

        let session = match state.sessions.get(receiver) {
            Some(session) if session.is_logged_in() => session,
            Some(_) => return Err(DirectoryError::NotLoggedIn(receiver.clone())),
            None if state.is_waiting(receiver) => {
                return Err(DirectoryError::NotLoggedIn(receiver.clone()))
            }
            None => return Err(DirectoryError::NotRegistered(receiver.clone())),
        };

        if let Err(e) = session.try_send(Message::receive_text(sender.clone(), receiver.clone(), text)) {
            warn!("Text from {} to {} not delivered: {}", sender, receiver, e);
            return Err(DirectoryError::DeliveryFailed(receiver.clone()));
        }

        debug!("Text from {} delivered to {}", sender, receiver);
        Ok(())
    }

    /// Remove a user bound to a closing connection
    ///
    /// Looks in both the session map and the waiting queue, since the
    /// caller does not know where the user currently is. Entries that
    /// were re-bound to another connection are left alone. Removing a
    /// logged-in session frees a slot and triggers promotion.
    ///
    /// Returns true if an entry was removed.
    pub async fn release(&self, user_id: &UserId, connection: ConnectionId) -> bool {
        let mut state = self.state.write().await;

        if state.remove_waiting(user_id, connection).is_some() {
            info!("Released waiting user {}", user_id);
            return true;
        }

        let owned = state
            .sessions
            .get(user_id)
            .is_some_and(|s| s.outbound.connection == connection);
        if !owned {
            return false;
        }

        let Some(session) = state.sessions.remove(user_id) else {
            return false;
        };
        info!("Released user {}", user_id);

        if session.is_logged_in() {
            state.active_logins -= 1;
            self.promote_locked(&mut state);
        }
        true
    }

    /// Number of logged-in users
    pub async fn active_logins(&self) -> usize {
        self.state.read().await.active_logins
    }

    /// Number of queued login attempts
    pub async fn waiting_len(&self) -> usize {
        self.state.read().await.waiting.len()
    }

    /// Queued users, oldest first
    pub async fn waiting_users(&self) -> Vec<UserId> {
        let state = self.state.read().await;
        state.waiting.iter().map(|e| e.user_id.clone()).collect()
    }

    pub async fn is_registered(&self, user_id: &UserId) -> bool {
        self.state.read().await.contains(user_id)
    }

    pub async fn is_logged_in(&self, user_id: &UserId) -> bool {
        let state = self.state.read().await;
        state
            .sessions
            .get(user_id)
            .is_some_and(|s| s.is_logged_in())
    }

    pub async fn is_waiting(&self, user_id: &UserId) -> bool {
        self.state.read().await.is_waiting(user_id)
    }
}
