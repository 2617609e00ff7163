//! Message protocol definitions
//!
//! One self-describing JSON record per WebSocket text frame. Requests and
//! responses share the same record shape; `message_type` tells them apart.

use serde::{Deserialize, Serialize};

use crate::error::{CodecError, DirectoryError};
use crate::types::UserId;

/// Kind of a message record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    RegisterRequest,
    RegistrationResponse,
    LoginRequest,
    LoginResponse,
    LogoffRequest,
    LogoffResponse,
    SendTextRequest,
    SendTextResponse,
    /// Text relayed to its receiver
    ReceiveText,
    /// Reply to a frame that was not a decodable request
    ErrorResponse,
}

impl MessageType {
    /// The reply kind a request of this kind is answered with
    ///
    /// Returns None for kinds that are not requests.
    pub fn response_type(self) -> Option<MessageType> {
        match self {
            MessageType::RegisterRequest => Some(MessageType::RegistrationResponse),
            MessageType::LoginRequest => Some(MessageType::LoginResponse),
            MessageType::LogoffRequest => Some(MessageType::LogoffResponse),
            MessageType::SendTextRequest => Some(MessageType::SendTextResponse),
            _ => None,
        }
    }

    pub fn is_request(self) -> bool {
        self.response_type().is_some()
    }
}

/// Outcome carried by every response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Ok,
    InvalidRequest,
    RequestQueued,
}

/// A single protocol record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    /// Set by the client on a request and echoed on its response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
}

impl Message {
    fn bare(message_type: MessageType) -> Self {
        Self {
            message_type,
            sender_id: None,
            receiver_id: None,
            text: None,
            status: None,
            request_id: None,
        }
    }

    fn request(message_type: MessageType, sender: UserId) -> Self {
        Self {
            sender_id: Some(sender),
            ..Self::bare(message_type)
        }
    }

    pub fn register(user_id: UserId) -> Self {
        Self::request(MessageType::RegisterRequest, user_id)
    }

    pub fn login(user_id: UserId) -> Self {
        Self::request(MessageType::LoginRequest, user_id)
    }

    pub fn logoff(user_id: UserId) -> Self {
        Self::request(MessageType::LogoffRequest, user_id)
    }

    pub fn send_text(sender: UserId, receiver: UserId, text: impl Into<String>) -> Self {
        Self {
            receiver_id: Some(receiver),
            text: Some(text.into()),
            ..Self::request(MessageType::SendTextRequest, sender)
        }
    }

    /// Text as delivered to its receiver
    pub fn receive_text(sender: UserId, receiver: UserId, text: impl Into<String>) -> Self {
        Self {
            sender_id: Some(sender),
            receiver_id: Some(receiver),
            text: Some(text.into()),
            ..Self::bare(MessageType::ReceiveText)
        }
    }

    /// Server response addressed to `receiver`
    pub fn response(
        message_type: MessageType,
        receiver: Option<UserId>,
        status: Status,
        text: impl Into<String>,
    ) -> Self {
        Self {
            receiver_id: receiver,
            text: Some(text.into()),
            status: Some(status),
            ..Self::bare(message_type)
        }
    }

    /// Response reporting a directory rejection
    pub fn rejection(message_type: MessageType, receiver: Option<UserId>, err: &DirectoryError) -> Self {
        Self::response(message_type, receiver, err.status(), err.to_string())
    }

    /// Tag this record with a request id
    pub fn with_request_id(mut self, request_id: Option<u64>) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == Some(Status::Ok)
    }

    pub fn text_or_empty(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    /// Encode as one wire record
    pub fn encode(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode one wire record
    pub fn decode(record: &str) -> Result<Self, CodecError> {
        Ok(serde_json::from_str(record)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_TYPES: [MessageType; 10] = [
        MessageType::RegisterRequest,
        MessageType::RegistrationResponse,
        MessageType::LoginRequest,
        MessageType::LoginResponse,
        MessageType::LogoffRequest,
        MessageType::LogoffResponse,
        MessageType::SendTextRequest,
        MessageType::SendTextResponse,
        MessageType::ReceiveText,
        MessageType::ErrorResponse,
    ];

    #[test]
    fn test_round_trip_preserves_every_field() {
        let statuses = [None, Some(Status::Ok), Some(Status::InvalidRequest), Some(Status::RequestQueued)];
        for message_type in ALL_TYPES {
            for status in statuses {
                let msg = Message {
                    message_type,
                    sender_id: Some(UserId::from("alice")),
                    receiver_id: Some(UserId::from("bob")),
                    text: Some("hi there".to_string()),
                    status,
                    request_id: Some(7),
                };
                let decoded = Message::decode(&msg.encode().unwrap()).unwrap();
                assert_eq!(decoded, msg);
            }
        }
    }

    #[test]
    fn test_round_trip_with_absent_fields() {
        let msg = Message::login(UserId::from("alice"));
        let decoded = Message::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
        assert!(decoded.receiver_id.is_none());
        assert!(decoded.status.is_none());
    }

    #[test]
    fn test_wire_format() {
        let msg = Message::response(
            MessageType::LoginResponse,
            Some(UserId::from("alice")),
            Status::RequestQueued,
            "queued",
        );
        let json = msg.encode().unwrap();
        assert!(json.contains("\"message_type\":\"login_response\""));
        assert!(json.contains("\"status\":\"REQUEST_QUEUED\""));
        assert!(!json.contains("sender_id"));
        assert!(!json.contains("request_id"));
    }

    #[test]
    fn test_unknown_kind_fails_to_decode() {
        let json = r#"{"message_type": "shout", "sender_id": "alice"}"#;
        assert!(Message::decode(json).is_err());
        assert!(Message::decode("not json").is_err());
    }

    #[test]
    fn test_response_types() {
        assert_eq!(
            MessageType::SendTextRequest.response_type(),
            Some(MessageType::SendTextResponse)
        );
        assert!(MessageType::RegisterRequest.is_request());
        assert!(!MessageType::ReceiveText.is_request());
        assert!(!MessageType::LoginResponse.is_request());
    }
}
