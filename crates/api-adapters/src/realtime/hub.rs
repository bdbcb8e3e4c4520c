//! # Session hub
//!
//! In-process [`PushTransport`]: one broadcast channel per `user:{id}` and per
//! `conversation:{id}` key. Channels are created on first subscribe and
//! dropped once their last subscriber goes away, so publishing to a key
//! nobody listens on costs a map lookup.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use domains::{ConversationId, PushTransport, UserId};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::metrics::{Metrics, CHANNEL_CONVERSATION, CHANNEL_USER};

/// Frames buffered per channel before slow receivers start lagging.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

pub type Frame = Arc<str>;

/// Server frame wire format: `{"event": ..., "payload": ...}`.
pub fn encode_frame(event: &str, payload: Value) -> String {
    json!({ "event": event, "payload": payload }).to_string()
}

fn user_key(user: &UserId) -> String {
    format!("{CHANNEL_USER}:{user}")
}

fn conversation_key(conversation: &ConversationId) -> String {
    format!("{CHANNEL_CONVERSATION}:{conversation}")
}

pub struct SessionHub {
    channels: DashMap<String, broadcast::Sender<Frame>>,
    capacity: usize,
    metrics: Arc<Metrics>,
}

impl SessionHub {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY, metrics)
    }

    pub fn with_capacity(capacity: usize, metrics: Arc<Metrics>) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
            metrics,
        }
    }

    pub fn subscribe_user(self: &Arc<Self>, user: &UserId) -> Subscription {
        self.subscribe(user_key(user))
    }

    pub fn subscribe_conversation(self: &Arc<Self>, conversation: &ConversationId) -> Subscription {
        self.subscribe(conversation_key(conversation))
    }

    /// Number of keys with at least one live subscriber.
    pub fn active_channels(&self) -> usize {
        self.channels.len()
    }

    fn subscribe(self: &Arc<Self>, key: String) -> Subscription {
        let receiver = self
            .channels
            .entry(key.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        Subscription {
            hub: Arc::clone(self),
            key,
            receiver: Some(receiver),
        }
    }

    fn release(&self, key: &str) {
        self.channels.remove_if(key, |_, tx| tx.receiver_count() == 0);
    }

    fn publish(&self, key: &str, event: &str, payload: Value) -> usize {
        let receivers = match self.channels.get(key) {
            Some(tx) => tx.send(Arc::from(encode_frame(event, payload))).unwrap_or(0),
            None => return 0,
        };
        if receivers == 0 {
            self.release(key);
        }
        receivers
    }
}

#[async_trait]
impl PushTransport for SessionHub {
    async fn publish_to_user(&self, user: &UserId, event: &str, payload: Value) -> anyhow::Result<usize> {
        let receivers = self.publish(&user_key(user), event, payload);
        self.metrics.record_push(CHANNEL_USER, receivers);
        Ok(receivers)
    }

    async fn publish_to_conversation_viewers(
        &self,
        conversation: &ConversationId,
        event: &str,
        payload: Value,
    ) -> anyhow::Result<usize> {
        let receivers = self.publish(&conversation_key(conversation), event, payload);
        self.metrics.record_push(CHANNEL_CONVERSATION, receivers);
        Ok(receivers)
    }
}

/// A live subscription; dropping it unsubscribes.
pub struct Subscription {
    hub: Arc<SessionHub>,
    key: String,
    receiver: Option<broadcast::Receiver<Frame>>,
}

impl Subscription {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Next frame. Frames missed while lagging are skipped.
    pub async fn recv(&mut self) -> Option<Frame> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(frame) => return Some(frame),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(key = %self.key, skipped, "push subscriber lagged, frames dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        drop(self.receiver.take());
        self.hub.release(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub() -> Arc<SessionHub> {
        Arc::new(SessionHub::new(Arc::new(Metrics::new())))
    }

    fn decode(frame: &Frame) -> Value {
        serde_json::from_str(frame).unwrap()
    }

    #[tokio::test]
    async fn every_session_of_a_user_receives_the_frame() {
        let hub = hub();
        let user = UserId::new("u1");
        let mut tab_a = hub.subscribe_user(&user);
        let mut tab_b = hub.subscribe_user(&user);

        let delivered = hub
            .publish_to_user(&user, "message:new", json!({ "id": "m1" }))
            .await
            .unwrap();
        assert_eq!(delivered, 2);

        for tab in [&mut tab_a, &mut tab_b] {
            let frame = decode(&tab.recv().await.unwrap());
            assert_eq!(frame["event"], "message:new");
            assert_eq!(frame["payload"]["id"], "m1");
        }
    }

    #[tokio::test]
    async fn publishing_without_listeners_is_a_noop() {
        let hub = hub();
        let delivered = hub
            .publish_to_conversation_viewers(&ConversationId::new("c1"), "message:new", json!({}))
            .await
            .unwrap();
        assert_eq!(delivered, 0);
        assert_eq!(hub.active_channels(), 0);
    }

    #[tokio::test]
    async fn channels_are_released_with_their_last_subscriber() {
        let hub = hub();
        let conversation = ConversationId::new("c1");
        let first = hub.subscribe_conversation(&conversation);
        let second = hub.subscribe_conversation(&conversation);
        assert_eq!(first.key(), "conversation:c1");
        assert_eq!(hub.active_channels(), 1);

        drop(first);
        assert_eq!(hub.active_channels(), 1);
        drop(second);
        assert_eq!(hub.active_channels(), 0);
    }

    #[tokio::test]
    async fn user_and_conversation_channels_are_separate() {
        let hub = hub();
        let mut viewer = hub.subscribe_conversation(&ConversationId::new("c1"));
        hub.publish_to_user(&UserId::new("c1"), "message:new", json!({}))
            .await
            .unwrap();
        hub.publish_to_conversation_viewers(&ConversationId::new("c1"), "conversation:read", json!({}))
            .await
            .unwrap();

        let frame = decode(&viewer.recv().await.unwrap());
        assert_eq!(frame["event"], "conversation:read");
    }

    #[tokio::test]
    async fn recv_waits_until_something_is_published() {
        let hub = hub();
        let user = UserId::new("u1");
        let mut session = hub.subscribe_user(&user);

        let mut pending = tokio_test::task::spawn(session.recv());
        tokio_test::assert_pending!(pending.poll());

        hub.publish_to_user(&user, "message:new", json!({ "id": "m1" }))
            .await
            .unwrap();
        assert!(pending.is_woken());
        let frame = tokio_test::assert_ready!(pending.poll()).unwrap();
        assert_eq!(decode(&frame)["payload"]["id"], "m1");
    }
}
