//! # Push channel endpoint
//!
//! `GET /ws?token=...` (or a bearer header). The credential is checked before
//! the upgrade, so an unauthenticated client never reaches a subscription.
//! Each session listens on its user channel and on any conversation it has
//! joined. An event that reaches it on both is written to the socket once.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::rejection::QueryRejection;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use domains::{AppError, ConversationId, UserId};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::hub::{encode_frame, Frame, Subscription};
use crate::error::{error_code, public_message, ApiError};
use crate::extract::bearer_token;
use crate::state::AppState;

pub const EVENT_SESSION_READY: &str = "session:ready";
pub const EVENT_JOINED: &str = "conversation:joined";
pub const EVENT_LEFT: &str = "conversation:left";
pub const EVENT_PONG: &str = "pong";
pub const EVENT_ERROR: &str = "error";

/// Frames queued for one socket before publishers start waiting.
const OUTBOUND_BUFFER: usize = 128;

/// Frames remembered per session for de-duplication.
const RECENT_FRAMES: usize = 64;

#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientFrame {
    Join {
        #[serde(rename = "conversationId")]
        conversation_id: ConversationId,
    },
    Leave {
        #[serde(rename = "conversationId")]
        conversation_id: ConversationId,
    },
    Ping,
}

/// GET /ws
pub async fn connect(
    State(state): State<AppState>,
    headers: HeaderMap,
    params: Result<Query<ConnectParams>, QueryRejection>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let query_token = params.ok().and_then(|Query(p)| p.token);
    let credential = query_token.as_deref().or_else(|| bearer_token(&headers));

    let user = match credential {
        Some(token) => match state.verifier.verify(token) {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!(error = %e, "push channel authentication failed");
                return ApiError(e).into_response();
            }
        },
        None => {
            return ApiError(AppError::AuthRequired("push channel requires a token".into())).into_response()
        }
    };

    match upgrade {
        Ok(upgrade) => upgrade.on_upgrade(move |socket| run(socket, state, user)),
        Err(rejection) => rejection.into_response(),
    }
}

async fn run(mut socket: WebSocket, state: AppState, user: UserId) {
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Frame>(OUTBOUND_BUFFER);
    let mut session = PushSession::open(state.clone(), user.clone(), outbound_tx);
    state.metrics.ws_sessions_active.inc();
    tracing::info!(user = %user, "push session opened");

    let ready = encode_frame(EVENT_SESSION_READY, json!({ "userId": user }));
    if socket.send(WsMessage::Text(ready.into())).await.is_ok() {
        loop {
            tokio::select! {
                Some(frame) = outbound_rx.recv() => {
                    if socket.send(WsMessage::Text(frame.to_string().into())).await.is_err() {
                        break;
                    }
                }
                incoming = socket.recv() => match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        let reply = session.handle_text(text.as_str()).await;
                        if socket.send(WsMessage::Text(reply.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(user = %user, error = %e, "push socket error");
                        break;
                    }
                },
            }
        }
    }

    drop(session);
    state.metrics.ws_sessions_active.dec();
    tracing::info!(user = %user, "push session closed");
}

/// Subscription bookkeeping for one connected socket. Dropping the session
/// stops every forwarder and releases its hub channels.
pub struct PushSession {
    state: AppState,
    user: UserId,
    outbound: mpsc::Sender<Frame>,
    recent: Arc<Mutex<RecentFrames>>,
    user_forwarder: JoinHandle<()>,
    viewing: HashMap<ConversationId, JoinHandle<()>>,
}

impl PushSession {
    pub fn open(state: AppState, user: UserId, outbound: mpsc::Sender<Frame>) -> Self {
        let recent = Arc::new(Mutex::new(RecentFrames::default()));
        let user_forwarder = forward(state.hub.subscribe_user(&user), outbound.clone(), recent.clone());
        Self {
            state,
            user,
            outbound,
            recent,
            user_forwarder,
            viewing: HashMap::new(),
        }
    }

    pub fn viewing(&self, conversation: &ConversationId) -> bool {
        self.viewing.contains_key(conversation)
    }

    /// Applies one client frame and returns the reply frame.
    pub async fn handle_text(&mut self, text: &str) -> String {
        let frame = match serde_json::from_str::<ClientFrame>(text) {
            Ok(frame) => frame,
            Err(e) => {
                return error_frame(&AppError::ValidationError(format!("unrecognised frame: {e}")));
            }
        };

        match frame {
            ClientFrame::Ping => encode_frame(EVENT_PONG, json!({})),
            ClientFrame::Join { conversation_id } => match self.join(conversation_id.clone()).await {
                Ok(()) => encode_frame(EVENT_JOINED, json!({ "conversationId": conversation_id })),
                Err(e) => error_frame(&e),
            },
            ClientFrame::Leave { conversation_id } => {
                if let Some(forwarder) = self.viewing.remove(&conversation_id) {
                    forwarder.abort();
                }
                encode_frame(EVENT_LEFT, json!({ "conversationId": conversation_id }))
            }
        }
    }

    async fn join(&mut self, conversation: ConversationId) -> Result<(), AppError> {
        if self.viewing.contains_key(&conversation) {
            return Ok(());
        }
        self.state.conversations.authorize(&conversation, &self.user).await?;
        let subscription = self.state.hub.subscribe_conversation(&conversation);
        tracing::debug!(user = %self.user, conversation_id = %conversation, "viewer joined");
        self.viewing
            .insert(conversation, forward(subscription, self.outbound.clone(), self.recent.clone()));
        Ok(())
    }
}

impl Drop for PushSession {
    fn drop(&mut self) {
        self.user_forwarder.abort();
        for (_, forwarder) in self.viewing.drain() {
            forwarder.abort();
        }
    }
}

/// Participants receive an event on their user channel and again on the
/// channel of a conversation they have joined. Both copies are encoded from
/// the same publish, so a session forwards a given frame only once.
#[derive(Debug, Default)]
struct RecentFrames {
    frames: VecDeque<Frame>,
}

impl RecentFrames {
    fn first_sighting(&mut self, frame: &Frame) -> bool {
        if self.frames.iter().any(|seen| seen == frame) {
            return false;
        }
        if self.frames.len() == RECENT_FRAMES {
            self.frames.pop_front();
        }
        self.frames.push_back(frame.clone());
        true
    }
}

fn forward(
    mut subscription: Subscription,
    outbound: mpsc::Sender<Frame>,
    recent: Arc<Mutex<RecentFrames>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = subscription.recv().await {
            let fresh = recent
                .lock()
                .map(|mut recent| recent.first_sighting(&frame))
                .unwrap_or(true);
            if fresh && outbound.send(frame).await.is_err() {
                break;
            }
        }
    })
}

fn error_frame(err: &AppError) -> String {
    encode_frame(
        EVENT_ERROR,
        json!({ "code": error_code(err), "message": public_message(err) }),
    )
}
