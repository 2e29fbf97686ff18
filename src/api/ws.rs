//! Per-connection WebSocket loop.
//!
//! Every connection listens on its own `user.{id}` channel and on `presence`. Clients join
//! `chat-room.{id}` channels with `subscribe` frames; only room participants are admitted.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};

use super::presence::{record_heartbeat, record_offline};
use crate::auth::CurrentUser;
use crate::broadcast::{Channel, Envelope, Subscriptions};
use crate::manager::{chat_manager::ChatManager, RoomId, User};
use crate::AppState;

const QUEUE_SIZE: usize = 64;

#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Subscribe {
        room_id: RoomId,
    },
    Unsubscribe {
        room_id: RoomId,
    },
    Heartbeat {
        #[serde(default)]
        latitude: Option<f64>,
        #[serde(default)]
        longitude: Option<f64>,
    },
}

#[derive(Serialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame<'a> {
    Subscribed { channel: String },
    Unsubscribed { channel: String },
    Error { message: &'a str },
}

pub async fn connect(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Response {
    ws.on_upgrade(move |socket| run(socket, state, user))
}

#[tracing::instrument(skip_all, fields(user_id = user.id))]
async fn run(socket: WebSocket, state: Arc<AppState>, user: User) {
    let (mut sender, mut receiver) = socket.split();
    let (mut subscriptions, mut events) = Subscriptions::new(state.hub.clone(), QUEUE_SIZE);
    subscriptions.add(Channel::User(user.id));
    subscriptions.add(Channel::Presence);

    if let Err(e) = record_heartbeat(&state, user.id, None, None).await {
        tracing::warn!("initial heartbeat failed: {e}");
    }
    tracing::debug!("websocket connected");

    loop {
        tokio::select! {
            frame = receiver.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::debug!("websocket read failed: {e}");
                        break;
                    }
                };
                let reply = handle_frame(&state, &user, &mut subscriptions, &text).await;
                if let Some(reply) = reply {
                    if sender.send(Message::Text(reply)).await.is_err() {
                        break;
                    }
                }
            }
            Some(envelope) = events.recv() => {
                if send_envelope(&mut sender, &envelope).await.is_err() {
                    break;
                }
            }
        }
    }

    drop(subscriptions);
    if let Err(e) = record_offline(&state, user.id).await {
        tracing::warn!("marking user offline failed: {e}");
    }
    tracing::debug!("websocket closed");
}

async fn send_envelope<S>(sender: &mut S, envelope: &Envelope) -> Result<(), axum::Error>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    match serde_json::to_string(envelope) {
        Ok(text) => sender.send(Message::Text(text)).await,
        Err(e) => {
            tracing::error!("failed to encode event: {e}");
            Ok(())
        }
    }
}

async fn handle_frame(
    state: &AppState,
    user: &User,
    subscriptions: &mut Subscriptions,
    text: &str,
) -> Option<String> {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(_) => return reply(ServerFrame::Error { message: "Malformed frame" }),
    };

    match frame {
        ClientFrame::Subscribe { room_id } => {
            match ChatManager::new(&state.pool)
                .participant_room(room_id, user)
                .await
            {
                Ok(room) => {
                    let channel = Channel::Room(room.id);
                    subscriptions.add(channel);
                    reply(ServerFrame::Subscribed {
                        channel: channel.to_string(),
                    })
                }
                Err(e) => {
                    tracing::debug!(room_id, "subscribe refused: {e}");
                    reply(ServerFrame::Error {
                        message: "Not allowed to join this room",
                    })
                }
            }
        }
        ClientFrame::Unsubscribe { room_id } => {
            let channel = Channel::Room(room_id);
            subscriptions.remove(channel);
            reply(ServerFrame::Unsubscribed {
                channel: channel.to_string(),
            })
        }
        ClientFrame::Heartbeat {
            latitude,
            longitude,
        } => match record_heartbeat(state, user.id, latitude, longitude).await {
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("heartbeat failed: {e}");
                reply(ServerFrame::Error {
                    message: "Heartbeat failed",
                })
            }
        },
    }
}

fn reply(frame: ServerFrame<'_>) -> Option<String> {
    serde_json::to_string(&frame).ok()
}
