//! Delivery fan-out.
//!
//! Pushes events to every live session of the conversation's participants
//! and to anyone viewing the conversation. The push channel is an optional
//! accelerator on top of the message store: failures are logged and dropped,
//! and clients catch up through the REST listing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use domains::{Conversation, ConversationId, Message, MessageId, PushTransport, UserId};
use serde::Serialize;
use serde_json::{json, Value};

pub const EVENT_MESSAGE_NEW: &str = "message:new";
pub const EVENT_CONVERSATION_READ: &str = "conversation:read";

/// Payload of [`EVENT_CONVERSATION_READ`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadNotice<'a> {
    pub conversation_id: &'a ConversationId,
    pub reader_id: &'a UserId,
    pub message_ids: &'a [MessageId],
    pub read_at: DateTime<Utc>,
}

pub struct DeliveryFanout {
    transport: Arc<dyn PushTransport>,
}

impl DeliveryFanout {
    pub fn new(transport: Arc<dyn PushTransport>) -> Self {
        Self { transport }
    }

    /// Announces a freshly stored message to all participants (including the
    /// sender's other sessions) and to the conversation's viewers.
    pub async fn message_created(&self, conversation: &Conversation, message: &Message) {
        let payload = match serde_json::to_value(message) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, message_id = %message.id, "failed to encode push payload");
                return;
            }
        };
        self.broadcast(conversation, conversation.participants.iter(), EVENT_MESSAGE_NEW, payload)
            .await;
    }

    /// Tells the other side which messages `reader` has just seen.
    pub async fn messages_read(
        &self,
        conversation: &Conversation,
        reader: &UserId,
        message_ids: &[MessageId],
        read_at: DateTime<Utc>,
    ) {
        if message_ids.is_empty() {
            return;
        }
        let payload = json!(ReadNotice {
            conversation_id: &conversation.id,
            reader_id: reader,
            message_ids,
            read_at,
        });
        let others = conversation.participants.iter().filter(|p| *p != reader);
        self.broadcast(conversation, others, EVENT_CONVERSATION_READ, payload)
            .await;
    }

    async fn broadcast<'a>(
        &self,
        conversation: &Conversation,
        users: impl Iterator<Item = &'a UserId>,
        event: &str,
        payload: Value,
    ) {
        let mut delivered = 0usize;

        for user in users {
            match self.transport.publish_to_user(user, event, payload.clone()).await {
                Ok(n) => delivered += n,
                Err(e) => tracing::warn!(error = %e, user = %user, event, "push to user failed"),
            }
        }

        match self
            .transport
            .publish_to_conversation_viewers(&conversation.id, event, payload)
            .await
        {
            Ok(n) => delivered += n,
            Err(e) => tracing::warn!(
                error = %e,
                conversation_id = %conversation.id,
                event,
                "push to conversation viewers failed"
            ),
        }

        tracing::debug!(conversation_id = %conversation.id, event, delivered, "fan-out complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domains::{ListingId, MockPushTransport, NewConversation, NewMessage, ReadReceipt, SenderRole};
    use mockall::predicate::*;

    fn conversation() -> Conversation {
        NewConversation {
            id: ConversationId::new("c1"),
            listing_id: ListingId::new("l1"),
            buyer_id: UserId::new("buyer"),
            seller_id: UserId::new("seller"),
            created_at: Utc::now(),
        }
        .into_conversation()
    }

    fn message() -> Message {
        let now = Utc::now();
        NewMessage {
            id: MessageId::new("m1"),
            conversation_id: ConversationId::new("c1"),
            sender_id: UserId::new("buyer"),
            sender_name: "Bea".into(),
            sender_role: SenderRole::Buyer,
            body: Some("hello".into()),
            attachment: None,
            created_at: now,
            read_by: vec![ReadReceipt { reader_id: UserId::new("buyer"), read_at: now }],
        }
        .with_seq(1)
    }

    #[tokio::test]
    async fn new_message_reaches_every_participant_and_viewers() {
        let mut transport = MockPushTransport::new();
        transport
            .expect_publish_to_user()
            .with(eq(UserId::new("buyer")), eq(EVENT_MESSAGE_NEW), always())
            .times(1)
            .returning(|_, _, _| Ok(2));
        transport
            .expect_publish_to_user()
            .with(eq(UserId::new("seller")), eq(EVENT_MESSAGE_NEW), always())
            .times(1)
            .returning(|_, _, _| Ok(1));
        transport
            .expect_publish_to_conversation_viewers()
            .with(eq(ConversationId::new("c1")), eq(EVENT_MESSAGE_NEW), always())
            .times(1)
            .returning(|_, _, _| Ok(0));

        DeliveryFanout::new(Arc::new(transport))
            .message_created(&conversation(), &message())
            .await;
    }

    #[tokio::test]
    async fn transport_failures_are_swallowed() {
        let mut transport = MockPushTransport::new();
        transport
            .expect_publish_to_user()
            .times(2)
            .returning(|_, _, _| Err(anyhow::anyhow!("socket closed")));
        transport
            .expect_publish_to_conversation_viewers()
            .times(1)
            .returning(|_, _, _| Err(anyhow::anyhow!("socket closed")));

        DeliveryFanout::new(Arc::new(transport))
            .message_created(&conversation(), &message())
            .await;
    }

    #[tokio::test]
    async fn read_notice_skips_the_reader() {
        let mut transport = MockPushTransport::new();
        transport
            .expect_publish_to_user()
            .withf(|user, event, payload| {
                user.as_str() == "buyer"
                    && event == EVENT_CONVERSATION_READ
                    && payload["readerId"] == "seller"
                    && payload["messageIds"][0] == "m1"
            })
            .times(1)
            .returning(|_, _, _| Ok(1));
        transport
            .expect_publish_to_conversation_viewers()
            .times(1)
            .returning(|_, _, _| Ok(1));

        DeliveryFanout::new(Arc::new(transport))
            .messages_read(&conversation(), &UserId::new("seller"), &[MessageId::new("m1")], Utc::now())
            .await;
    }

    #[tokio::test]
    async fn empty_read_notice_is_not_sent() {
        let transport = MockPushTransport::new();
        DeliveryFanout::new(Arc::new(transport))
            .messages_read(&conversation(), &UserId::new("seller"), &[], Utc::now())
            .await;
    }
}
