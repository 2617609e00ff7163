//! Response correlator
//!
//! Two-party rendezvous between the command loop, which sends a request
//! and waits, and the background receiver, which hands over the matching
//! reply. Each round trip gets a fresh single-slot channel, so the
//! correlator can be reused for any number of requests. At most one
//! request is outstanding at a time.
//!
//! Every round trip also gets a request id that the server echoes back,
//! so a late reply to a request that already timed out can never
//! complete the next request of the same kind. Replies without an id
//! are matched by kind alone.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;

use crate::error::ClientError;
use crate::message::{Message, MessageType};

#[derive(Debug)]
enum Slot {
    Idle,
    Waiting {
        expected: MessageType,
        request_id: u64,
        reply: oneshot::Sender<Message>,
    },
    /// Deregistered; no further round trips
    Closed,
}

#[derive(Debug)]
struct Inner {
    slot: Slot,
    next_id: u64,
}

/// A request that has been registered and is waiting for its reply
#[derive(Debug)]
pub struct PendingReply {
    request_id: u64,
    rx: oneshot::Receiver<Message>,
}

impl PendingReply {
    /// Id to stamp on the outgoing request
    pub fn request_id(&self) -> u64 {
        self.request_id
    }
}

#[derive(Debug)]
pub struct Correlator {
    inner: Mutex<Inner>,
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                slot: Slot::Idle,
                next_id: 1,
            }),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register the foreground party for a reply of kind `expected`
    ///
    /// Call before the request is written so the reply cannot race ahead.
    pub fn begin(&self, expected: MessageType) -> Result<PendingReply, ClientError> {
        let mut inner = self.inner();
        match inner.slot {
            Slot::Idle => {}
            Slot::Waiting { .. } => return Err(ClientError::Busy),
            Slot::Closed => return Err(ClientError::Disconnected),
        }

        let request_id = inner.next_id;
        inner.next_id = inner.next_id.wrapping_add(1);
        let (tx, rx) = oneshot::channel();
        inner.slot = Slot::Waiting {
            expected,
            request_id,
            reply: tx,
        };
        Ok(PendingReply { request_id, rx })
    }

    /// Hand a reply to the waiting party if it is the one it expects
    ///
    /// An `ErrorResponse` completes any outstanding request. A reply that
    /// carries a request id must also carry the outstanding one. Anything
    /// else that does not match is given back as unsolicited.
    pub fn complete(&self, reply: Message) -> Result<(), Message> {
        let mut inner = self.inner();
        let matches = match &inner.slot {
            Slot::Waiting {
                expected,
                request_id,
                ..
            } => {
                let kind_matches = reply.message_type == *expected
                    || reply.message_type == MessageType::ErrorResponse;
                kind_matches && reply.request_id.map_or(true, |id| id == *request_id)
            }
            _ => false,
        };
        if !matches {
            return Err(reply);
        }

        if let Slot::Waiting { reply: tx, .. } = std::mem::replace(&mut inner.slot, Slot::Idle) {
            if let Err(reply) = tx.send(reply) {
                debug!("Waiter gone before {:?} arrived", reply.message_type);
            }
        }
        Ok(())
    }

    /// Wait for the reply registered by [`Correlator::begin`]
    ///
    /// Times out with `NoResponse`, freeing the slot so a late reply is
    /// treated as unsolicited. Returns `Aborted` if the correlator is
    /// closed while waiting.
    pub async fn wait(&self, pending: PendingReply, timeout: Duration) -> Result<Message, ClientError> {
        match tokio::time::timeout(timeout, pending.rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(ClientError::Aborted),
            Err(_) => {
                self.abandon();
                Err(ClientError::NoResponse(timeout))
            }
        }
    }

    /// Give up on the outstanding request, if any
    pub fn abandon(&self) {
        let mut inner = self.inner();
        if matches!(inner.slot, Slot::Waiting { .. }) {
            inner.slot = Slot::Idle;
        }
    }

    /// Deregister both parties; a blocked waiter is released with `Aborted`
    pub fn close(&self) {
        self.inner().slot = Slot::Closed;
    }

    pub fn is_awaiting(&self) -> bool {
        matches!(self.inner().slot, Slot::Waiting { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.inner().slot, Slot::Closed)
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::message::Status;
    use crate::types::UserId;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn reply(message_type: MessageType, status: Status) -> Message {
        Message::response(message_type, Some(UserId::from("alice")), status, "")
    }

    #[tokio::test]
    async fn test_round_trips_are_reusable() {
        let correlator = Arc::new(Correlator::new());

        for _ in 0..3 {
            let pending = correlator.begin(MessageType::LoginResponse).unwrap();
            assert!(correlator.is_awaiting());

            let background = Arc::clone(&correlator);
            tokio::spawn(async move {
                background
                    .complete(reply(MessageType::LoginResponse, Status::Ok))
                    .unwrap();
            });

            let got = correlator.wait(pending, TIMEOUT).await.unwrap();
            assert!(got.is_ok());
            assert!(!correlator.is_awaiting());
        }
    }

    #[tokio::test]
    async fn test_single_outstanding_request() {
        let correlator = Correlator::new();
        let _pending = correlator.begin(MessageType::LogoffResponse).unwrap();
        assert!(matches!(
            correlator.begin(MessageType::LoginResponse),
            Err(ClientError::Busy)
        ));
    }

    #[tokio::test]
    async fn test_unsolicited_messages_do_not_complete() {
        let correlator = Correlator::new();
        let pending = correlator.begin(MessageType::SendTextResponse).unwrap();

        let text = Message::receive_text(UserId::from("bob"), UserId::from("alice"), "hi");
        assert!(correlator.complete(text).is_err());
        let promotion = reply(MessageType::LoginResponse, Status::Ok);
        assert!(correlator.complete(promotion).is_err());
        assert!(correlator.is_awaiting());

        correlator
            .complete(reply(MessageType::SendTextResponse, Status::Ok))
            .unwrap();
        let got = correlator.wait(pending, TIMEOUT).await.unwrap();
        assert_eq!(got.message_type, MessageType::SendTextResponse);
    }

    #[tokio::test]
    async fn test_nothing_to_complete_when_idle() {
        let correlator = Correlator::new();
        assert!(correlator
            .complete(reply(MessageType::LoginResponse, Status::Ok))
            .is_err());
    }

    #[tokio::test]
    async fn test_error_response_completes_any_request() {
        let correlator = Correlator::new();
        let pending = correlator.begin(MessageType::RegistrationResponse).unwrap();
        correlator
            .complete(reply(MessageType::ErrorResponse, Status::InvalidRequest))
            .unwrap();
        let got = correlator.wait(pending, TIMEOUT).await.unwrap();
        assert_eq!(got.status, Some(Status::InvalidRequest));
    }

    #[tokio::test]
    async fn test_timeout_frees_the_slot() {
        let correlator = Correlator::new();
        let pending = correlator.begin(MessageType::LoginResponse).unwrap();

        let err = correlator
            .wait(pending, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NoResponse(_)));
        assert!(!correlator.is_awaiting());

        // Late reply is unsolicited now
        assert!(correlator
            .complete(reply(MessageType::LoginResponse, Status::Ok))
            .is_err());
        assert!(correlator.begin(MessageType::LoginResponse).is_ok());
    }

    #[tokio::test]
    async fn test_late_reply_does_not_complete_next_request() {
        let correlator = Correlator::new();
        let first = correlator.begin(MessageType::SendTextResponse).unwrap();
        let first_id = first.request_id();
        let err = correlator
            .wait(first, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NoResponse(_)));

        let second = correlator.begin(MessageType::SendTextResponse).unwrap();
        assert_ne!(second.request_id(), first_id);

        let late = reply(MessageType::SendTextResponse, Status::Ok).with_request_id(Some(first_id));
        assert!(correlator.complete(late).is_err());
        assert!(correlator.is_awaiting());

        let own = reply(MessageType::SendTextResponse, Status::InvalidRequest)
            .with_request_id(Some(second.request_id()));
        correlator.complete(own).unwrap();
        let got = correlator.wait(second, TIMEOUT).await.unwrap();
        assert_eq!(got.status, Some(Status::InvalidRequest));
    }

    #[tokio::test]
    async fn test_close_aborts_waiter() {
        let correlator = Arc::new(Correlator::new());
        let pending = correlator.begin(MessageType::LoginResponse).unwrap();

        let background = Arc::clone(&correlator);
        tokio::spawn(async move { background.close() });

        let err = correlator.wait(pending, TIMEOUT).await.unwrap_err();
        assert!(matches!(err, ClientError::Aborted));
        assert!(correlator.is_closed());
        assert!(matches!(
            correlator.begin(MessageType::LoginResponse),
            Err(ClientError::Disconnected)
        ));
    }
}
