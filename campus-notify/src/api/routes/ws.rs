//! Notification push channel.
//!
//! Authenticates via `?token=<jwt>`, then streams JSON frames:
//! a full snapshot on connect and on client `refresh`, kind-scoped slices
//! when a feed signal concerns the viewer, and an application heartbeat
//! alongside a transport Ping every interval. A session that misses a Pong
//! is closed.

use std::sync::Arc;

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt, stream::SplitSink};
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::middleware::jwt_auth::authenticate;
use crate::api::routes::notifications::service;
use crate::api::server::AppState;
use crate::domain::{FeedKind, FeedQuery, Viewer};
use crate::notification::{ClientMessage, NotificationService, ServerMessage};
use crate::{Error, Result};

/// Query parameters for WebSocket connection (JWT token).
#[derive(Debug, Deserialize)]
pub struct WsAuthParams {
    pub token: String,
}

pub(crate) async fn notifications_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(auth): Query<WsAuthParams>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let viewer = authenticate(&state, &auth.token)?.viewer();
    let service = service(&state)?;
    let heartbeat = state.ws_heartbeat;

    Ok(ws.on_upgrade(move |socket| async move {
        let session_id = Uuid::new_v4();
        info!(%session_id, identity = %viewer.identity, role = %viewer.role, "Push session opened");
        let session = PushSession {
            service,
            viewer,
            heartbeat,
        };
        session.run(socket).await;
        info!(%session_id, identity = %session.viewer.identity, "Push session closed");
    }))
}

type WsSender = SplitSink<WebSocket, Message>;

struct PushSession {
    service: Arc<NotificationService>,
    viewer: Viewer,
    heartbeat: std::time::Duration,
}

impl PushSession {
    async fn run(&self, socket: WebSocket) {
        let (mut sender, mut receiver) = socket.split();

        // Subscribe before the first snapshot so no signal falls in the gap.
        let mut signals = self.service.subscribe();

        if self.send_snapshot(&mut sender).await.is_err() {
            debug!("Failed to send initial snapshot, client disconnected");
            return;
        }

        let mut heartbeat =
            tokio::time::interval_at(Instant::now() + self.heartbeat, self.heartbeat);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut awaiting_pong = false;

        loop {
            tokio::select! {
                msg = receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<ClientMessage>(text.as_str()) {
                                Ok(ClientMessage::Refresh) => {
                                    if self.send_snapshot(&mut sender).await.is_err() {
                                        break;
                                    }
                                }
                                // Any client frame proves liveness.
                                Ok(ClientMessage::Heartbeat) => awaiting_pong = false,
                                Err(e) => debug!("Ignoring malformed client frame: {}", e),
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if sender.send(Message::Pong(data)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Pong(_))) => awaiting_pong = false,
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            debug!("WebSocket error: {}", e);
                            break;
                        }
                        Some(Ok(Message::Binary(_))) => {}
                    }
                }

                signal = signals.recv() => {
                    match signal {
                        Ok(signal) if signal.concerns(&self.viewer) => {
                            if self.send_slice(&mut sender, signal.kind).await.is_err() {
                                break;
                            }
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, identity = %self.viewer.identity, "Push session lagged, resyncing");
                            if self.send_snapshot(&mut sender).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("Signal channel closed");
                            break;
                        }
                    }
                }

                _ = heartbeat.tick() => {
                    if awaiting_pong {
                        debug!(identity = %self.viewer.identity, "Client missed heartbeat, closing");
                        break;
                    }
                    let frame = match ServerMessage::heartbeat().to_json() {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(error = %e, "Failed to encode heartbeat");
                            break;
                        }
                    };
                    if sender.send(Message::Text(frame.into())).await.is_err()
                        || sender.send(Message::Ping(Bytes::new())).await.is_err()
                    {
                        break;
                    }
                    awaiting_pong = true;
                }
            }
        }

        let _ = sender.close().await;
    }

    async fn send_snapshot(&self, sender: &mut WsSender) -> Result<()> {
        let frame = match self.service.fetch(&self.viewer, &FeedQuery::default()).await {
            Ok(feed) => ServerMessage::snapshot(feed),
            Err(e) => error_frame(e),
        };
        send(sender, &frame).await
    }

    async fn send_slice(&self, sender: &mut WsSender, kind: FeedKind) -> Result<()> {
        let frame = match self.service.fetch_kind(&self.viewer, kind).await {
            Ok(feed) => ServerMessage::slice(kind, feed),
            Err(e) => error_frame(e),
        };
        send(sender, &frame).await
    }
}

/// A failed fetch becomes an error frame; the session stays open.
fn error_frame(err: Error) -> ServerMessage {
    match err {
        Error::AggregationFailed { .. } => {
            warn!(error = %err, "Push fetch failed");
            ServerMessage::error("AGGREGATION_FAILED", "No notification source could be reached")
        }
        other => {
            warn!(error = %other, "Push fetch failed");
            ServerMessage::error("FETCH_FAILED", other.to_string())
        }
    }
}

async fn send(sender: &mut WsSender, frame: &ServerMessage) -> Result<()> {
    let text = frame.to_json()?;
    sender
        .send(Message::Text(text.into()))
        .await
        .map_err(|e| Error::channel(e.to_string()))
}
