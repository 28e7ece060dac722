//! JSON frames exchanged over the chat socket and returned by the chat
//! query endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::MAX_FRAME_SIZE;
use crate::error::ProtocolError;
use crate::identity::Identity;
use crate::types::{MessageId, UserId};

/// A message a client asks the server to deliver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InboundFrame {
    /// Addressee, as a UUID string. Validated by [`InboundFrame::receiver`].
    pub receiver_id: String,
    pub message: String,
}

impl InboundFrame {
    /// Decode a text or binary socket payload.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: payload.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        Ok(serde_json::from_slice(payload)?)
    }

    pub fn receiver(&self) -> Result<UserId, ProtocolError> {
        UserId::parse(&self.receiver_id)
    }
}

/// A persisted direct message. Never mutated after the store assigns its id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// The participant of this message that is not `me`.
    pub fn counterpart_of(&self, me: UserId) -> UserId {
        if self.sender_id == me {
            self.receiver_id
        } else {
            self.sender_id
        }
    }

    pub fn involves(&self, user: UserId) -> bool {
        self.sender_id == user || self.receiver_id == user
    }
}

/// One row of a chat list: the other participant and the newest message
/// exchanged with them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatSummary {
    pub counterpart: Identity,
    pub latest_message: ChatMessage,
}

/// Why a socket upgrade was refused.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthFailureKind {
    Expired,
    Invalid,
    Revoked,
    Unavailable,
}

impl AuthFailureKind {
    pub fn status(&self) -> u16 {
        match self {
            AuthFailureKind::Unavailable => 503,
            _ => 401,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            AuthFailureKind::Expired => "token expired",
            AuthFailureKind::Invalid => "invalid token",
            AuthFailureKind::Revoked => "token revoked",
            AuthFailureKind::Unavailable => "authentication unavailable",
        }
    }
}

/// The single frame sent on a socket whose credential was rejected, right
/// before it is closed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthFailureFrame {
    pub status: u16,
    pub error: String,
    pub kind: AuthFailureKind,
}

impl From<AuthFailureKind> for AuthFailureFrame {
    fn from(kind: AuthFailureKind) -> Self {
        Self {
            status: kind.status(),
            error: kind.message().to_string(),
            kind,
        }
    }
}
