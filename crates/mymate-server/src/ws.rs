//! One chat socket: authenticate, register, then run the router (reader
//! side) and the writer side until either ends.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::future;
use futures::sink::SinkExt;
use futures::stream::{SplitSink, Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

use mymate_shared::protocol::AuthFailureFrame;
use mymate_shared::Identity;

use crate::api::AppState;
use crate::auth::authenticate;
use crate::channel::{Channel, Frame};
use crate::router::Inbound;

pub async fn handle_socket(socket: WebSocket, state: AppState, token: String) {
    let deadline = state.config.request_timeout;
    let (mut sink, stream) = socket.split();

    let identity = match authenticate(&state.resolver, &token, deadline).await {
        Ok(identity) => identity,
        Err(e) => {
            debug!(error = %e, "Rejecting chat socket");
            reject(&mut sink, AuthFailureFrame::from(e.kind())).await;
            return;
        }
    };

    let (channel, outbound) = Channel::open(state.config.outbound_queue);
    state.registry.register(channel.clone(), identity.id).await;
    log_open(&identity, &channel);

    let reader = state.router.run(channel.clone(), inbound(stream));
    let writer = write_frames(sink, channel, outbound, deadline);
    let (end, ()) = tokio::join!(reader, writer);
    debug!(user = %identity.id, ?end, "Chat socket finished");
}

fn log_open(identity: &Identity, channel: &Channel) {
    info!(user = %identity.id, name = %identity.name, channel = %channel.id(), "Chat socket opened");
}

async fn reject(sink: &mut SplitSink<WebSocket, Message>, frame: AuthFailureFrame) {
    if let Ok(json) = serde_json::to_string(&frame) {
        let _ = sink.send(Message::Text(json.into())).await;
    }
    let _ = sink.send(Message::Close(None)).await;
}

/// Socket messages the router cares about. Transport pings and pongs are
/// answered by the WebSocket layer itself.
fn inbound<S>(stream: S) -> impl Stream<Item = Inbound> + Unpin
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    stream.filter_map(|msg| {
        future::ready(match msg {
            Ok(Message::Text(text)) => Some(Inbound::Payload(text.as_str().as_bytes().to_vec())),
            Ok(Message::Binary(bytes)) => Some(Inbound::Payload(bytes.to_vec())),
            Ok(Message::Close(_)) => Some(Inbound::Close),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
            Err(e) => Some(Inbound::Error(e.to_string())),
        })
    })
}

/// Drain the channel's outbound queue onto the socket. A failed or
/// overdue write closes the channel, which also stops the reader side.
async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    channel: Channel,
    mut outbound: mpsc::Receiver<Frame>,
    deadline: Duration,
) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = channel.closed() => break,
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let message = match frame {
            Frame::Ping => Message::Ping(Default::default()),
            Frame::Message(chat) => match serde_json::to_string(chat.as_ref()) {
                Ok(json) => Message::Text(json.into()),
                Err(e) => {
                    debug!(channel = %channel.id(), error = %e, "Skipping unserializable message");
                    continue;
                }
            },
        };

        match tokio::time::timeout(deadline, sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(channel = %channel.id(), error = %e, "Socket write failed");
                channel.close();
                break;
            }
            Err(_) => {
                debug!(channel = %channel.id(), "Socket write timed out");
                channel.close();
                break;
            }
        }
    }

    channel.close();
    let _ = sink.send(Message::Close(None)).await;
}
