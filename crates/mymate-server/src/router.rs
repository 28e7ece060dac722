//! Per-connection message routing.
//!
//! One [`MessageRouter::run`] future drives each open connection: it reads
//! inbound frames, persists each message, and fans the stored record out to
//! every open channel of the addressee. A malformed frame, a registry miss
//! or a persistence failure ends the connection; a failed delivery only
//! drops the channel it was aimed at.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::{Stream, StreamExt};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use mymate_shared::{ChatMessage, InboundFrame, ProtocolError};

use crate::channel::{Channel, ChannelId};
use crate::registry::{ConnectionRegistry, Visit};
use crate::store::{write_blocking, MessageStore, StoreUnavailable};

/// Transport-neutral view of what the socket reader produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Payload(Vec<u8>),
    /// Close frame from the client, or end of stream.
    Close,
    /// The transport failed while reading.
    Error(String),
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("undecodable frame: {0}")]
    Decode(#[from] ProtocolError),

    #[error("channel {0} has no registered owner")]
    UnknownSender(ChannelId),

    #[error("message not persisted: {0}")]
    Persistence(#[from] StoreUnavailable),
}

/// Why a connection's router loop ended.
#[derive(Debug)]
pub enum SessionEnd {
    ClientClosed,
    ReadFailed(String),
    /// Closed from outside, e.g. evicted by the liveness monitor.
    Closed,
    Failed(RouterError),
}

/// Result of fanning one message out.
#[derive(Debug, Clone)]
pub struct Routed {
    pub message: Arc<ChatMessage>,
    pub delivered: usize,
    pub dropped: usize,
}

#[derive(Clone)]
pub struct MessageRouter {
    registry: ConnectionRegistry,
    store: Arc<dyn MessageStore>,
    request_timeout: Duration,
}

impl MessageRouter {
    pub fn new(
        registry: ConnectionRegistry,
        store: Arc<dyn MessageStore>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            request_timeout,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Decode, persist and fan out one inbound payload from `channel`.
    pub async fn handle_payload(
        &self,
        channel: &Channel,
        payload: &[u8],
    ) -> Result<Routed, RouterError> {
        let frame = InboundFrame::decode(payload)?;
        let receiver = frame.receiver()?;

        let sender = self
            .registry
            .owner_of(channel.id())
            .await
            .ok_or(RouterError::UnknownSender(channel.id()))?;

        let created_at = Utc::now();
        let body = frame.message;
        let stored_body = body.clone();
        let id = write_blocking(&self.store, self.request_timeout, move |store, deadline| {
            store.append(sender, receiver, &stored_body, created_at, deadline)
        })
        .await?;

        let message = Arc::new(ChatMessage {
            id,
            sender_id: sender,
            receiver_id: receiver,
            message: body,
            created_at,
        });
        debug!(id = %id, from = %sender, to = %receiver, "Message persisted");

        Ok(self.fan_out(message).await)
    }

    /// Deliver a stored message to every open channel of its receiver. A
    /// receiver with no open channel is not an error; the message waits in
    /// the store for the next history query. Deliveries never wait on a
    /// slow device: a channel whose queue is full is dropped and the others
    /// are still served.
    pub async fn fan_out(&self, message: Arc<ChatMessage>) -> Routed {
        let traversal = self
            .registry
            .for_each_channel_of(message.receiver_id, |channel| {
                let outcome = channel.deliver(Arc::clone(&message));
                async move {
                    match outcome {
                        Ok(()) => Visit::Keep,
                        Err(e) => {
                            debug!(channel = %channel.id(), error = %e, "Delivery failed, dropping channel");
                            Visit::Remove
                        }
                    }
                }
            })
            .await;

        Routed {
            message,
            delivered: traversal.visited - traversal.removed,
            dropped: traversal.removed,
        }
    }

    /// Drive one connection until the client leaves, the transport fails,
    /// the channel is closed from outside, or a frame cannot be routed. The
    /// channel is unregistered on the way out.
    pub async fn run<S>(&self, channel: Channel, mut inbound: S) -> SessionEnd
    where
        S: Stream<Item = Inbound> + Unpin,
    {
        let end = loop {
            let next = tokio::select! {
                biased;
                _ = channel.closed() => break SessionEnd::Closed,
                next = inbound.next() => next,
            };

            match next.unwrap_or(Inbound::Close) {
                Inbound::Close => break SessionEnd::ClientClosed,
                Inbound::Error(e) => break SessionEnd::ReadFailed(e),
                Inbound::Payload(payload) => {
                    if let Err(e) = self.handle_payload(&channel, &payload).await {
                        break SessionEnd::Failed(e);
                    }
                }
            }
        };

        match &end {
            SessionEnd::ClientClosed | SessionEnd::Closed => {
                debug!(channel = %channel.id(), ?end, "Connection finished");
            }
            SessionEnd::ReadFailed(e) => {
                debug!(channel = %channel.id(), error = %e, "Connection read failed");
            }
            SessionEnd::Failed(e @ RouterError::Decode(_)) => {
                debug!(channel = %channel.id(), error = %e, "Closing connection on bad frame");
            }
            SessionEnd::Failed(e @ RouterError::UnknownSender(_)) => {
                error!(channel = %channel.id(), error = %e, "Registry inconsistency, closing connection");
            }
            SessionEnd::Failed(e @ RouterError::Persistence(_)) => {
                warn!(channel = %channel.id(), error = %e, "Store unavailable, closing connection");
            }
        }

        if self.registry.unregister(&channel).await {
            info!(channel = %channel.id(), "Connection closed");
        }
        end
    }
}
