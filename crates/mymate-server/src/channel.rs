//! Outbound half of a chat connection.
//!
//! A [`Channel`] is the handle the rest of the server uses to talk to one
//! connected device: it enqueues frames for the socket writer task and
//! carries the close signal shared by the reader and the writer. Clones
//! refer to the same connection.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use mymate_shared::ChatMessage;

/// Unique id of one open connection. A user with two devices owns two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(Uuid);

impl ChannelId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the writer task puts on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Protocol-level ping with no payload.
    Ping,
    Message(Arc<ChatMessage>),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("channel closed")]
    Closed,

    #[error("outbound queue full")]
    Full,
}

#[derive(Clone)]
pub struct Channel {
    id: ChannelId,
    outbound: mpsc::Sender<Frame>,
    closed: CancellationToken,
}

impl Channel {
    /// Open a channel whose outbound queue holds `capacity` frames. The
    /// receiver goes to the task that owns the socket sink.
    pub fn open(capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        let channel = Self {
            id: ChannelId::new(),
            outbound,
            closed: CancellationToken::new(),
        };
        (channel, rx)
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Enqueue a liveness probe without waiting.
    pub fn probe(&self) -> Result<(), DeliveryError> {
        self.enqueue(Frame::Ping)
    }

    /// Enqueue a message without waiting. A device whose queue is full is
    /// not keeping up, and that counts as a failed delivery.
    pub fn deliver(&self, message: Arc<ChatMessage>) -> Result<(), DeliveryError> {
        self.enqueue(Frame::Message(message))
    }

    fn enqueue(&self, frame: Frame) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }
        self.outbound.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Signal both halves of the connection to shut down. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.outbound.is_closed()
    }

    /// Resolves once [`Channel::close`] has been called on any clone.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mymate_shared::{MessageId, UserId};

    fn message() -> Arc<ChatMessage> {
        Arc::new(ChatMessage {
            id: MessageId(1),
            sender_id: UserId::new(),
            receiver_id: UserId::new(),
            message: "hi".into(),
            created_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_probe_fills_queue() {
        let (channel, mut rx) = Channel::open(1);

        assert_eq!(channel.probe(), Ok(()));
        assert_eq!(channel.probe(), Err(DeliveryError::Full));

        assert_eq!(rx.recv().await, Some(Frame::Ping));
        assert_eq!(channel.probe(), Ok(()));
    }

    #[tokio::test]
    async fn test_dropped_receiver_means_closed() {
        let (channel, rx) = Channel::open(4);
        drop(rx);

        assert!(channel.is_closed());
        assert_eq!(channel.probe(), Err(DeliveryError::Closed));
        assert_eq!(channel.deliver(message()), Err(DeliveryError::Closed));
    }

    #[tokio::test]
    async fn test_deliver_to_full_queue_fails_without_waiting() {
        let (channel, mut rx) = Channel::open(1);
        channel.probe().unwrap();

        assert_eq!(channel.deliver(message()), Err(DeliveryError::Full));

        assert_eq!(rx.recv().await, Some(Frame::Ping));
        assert_eq!(channel.deliver(message()), Ok(()));
        assert!(matches!(rx.recv().await, Some(Frame::Message(_))));
    }

    #[tokio::test]
    async fn test_close_is_shared_between_clones() {
        let (channel, _rx) = Channel::open(4);
        let other = channel.clone();

        other.close();
        other.close();
        assert!(channel.is_closed());
        channel.closed().await;
        assert_eq!(channel.probe(), Err(DeliveryError::Closed));
    }
}
