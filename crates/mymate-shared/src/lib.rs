//! # mymate-shared
//!
//! Types shared by the chat store and the chat server: user and message
//! identifiers, the display identity of a user, and the JSON frames
//! exchanged over the chat socket.

pub mod constants;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
pub use identity::Identity;
pub use protocol::{AuthFailureFrame, ChatMessage, ChatSummary, InboundFrame};
pub use types::{MessageId, UserId};
