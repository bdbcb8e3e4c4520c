//! # Message service
//!
//! Append and page through conversation messages. Sending goes
//! participant check → validation → throttle → store → activity bump →
//! fan-out; only the store write can fail the request once the throttle
//! has admitted it.

use std::sync::Arc;

use domains::{
    Admission, AppError, Conversation, ConversationId, Message, MessageId, MessagePage,
    MessageRepository, NewMessage, PageCursor, PageQuery, ReadReceipt, ReadScope, Result,
    SendThrottle, UserId,
};

use crate::conversations::ConversationService;
use crate::fanout::DeliveryFanout;
use crate::sanitize::{normalize_attachment, sanitize_body};

/// Tunables for the message service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessagingPolicy {
    pub max_body_chars: usize,
    pub default_page_size: usize,
    pub max_page_size: usize,
    /// Listing a page also acknowledges it ("view implies read").
    pub list_marks_read: bool,
}

impl Default for MessagingPolicy {
    fn default() -> Self {
        Self {
            max_body_chars: 2000,
            default_page_size: 30,
            max_page_size: 100,
            list_marks_read: true,
        }
    }
}

impl MessagingPolicy {
    fn page_size(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size.max(1))
    }
}

/// Client input for a new message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendMessage {
    pub body: Option<String>,
    pub attachment: Option<String>,
}

pub struct MessageService {
    conversations: Arc<ConversationService>,
    messages: Arc<dyn MessageRepository>,
    throttle: Arc<dyn SendThrottle>,
    fanout: Arc<DeliveryFanout>,
    policy: MessagingPolicy,
}

impl MessageService {
    pub fn new(
        conversations: Arc<ConversationService>,
        messages: Arc<dyn MessageRepository>,
        throttle: Arc<dyn SendThrottle>,
        fanout: Arc<DeliveryFanout>,
        policy: MessagingPolicy,
    ) -> Self {
        Self {
            conversations,
            messages,
            throttle,
            fanout,
            policy,
        }
    }

    pub async fn append(
        &self,
        conversation_id: &ConversationId,
        sender: &UserId,
        input: SendMessage,
    ) -> Result<Message> {
        let conversation = self.conversations.authorize(conversation_id, sender).await?;

        let body = input
            .body
            .as_deref()
            .and_then(|raw| sanitize_body(raw, self.policy.max_body_chars));
        let attachment = normalize_attachment(input.attachment.as_deref())?;
        if body.is_none() && attachment.is_none() {
            return Err(AppError::ValidationError(
                "a message needs text or an attachment".into(),
            ));
        }

        if let Admission::Throttled { retry_after } = self.throttle.admit(sender).await {
            return Err(AppError::RateLimitExceeded { retry_after });
        }

        let sender_name = self.conversations.profile_or_unknown(sender).await?.display_name;
        let now = crate::stored_now();
        let draft = NewMessage {
            id: MessageId::generate(),
            conversation_id: conversation.id.clone(),
            sender_id: sender.clone(),
            sender_name,
            sender_role: conversation.role_of(sender),
            body,
            attachment,
            created_at: now,
            read_by: vec![ReadReceipt { reader_id: sender.clone(), read_at: now }],
        };
        let message = self.messages.insert(draft).await?;
        tracing::debug!(
            conversation_id = %conversation.id,
            message_id = %message.id,
            seq = message.seq,
            sender = %sender,
            "message stored"
        );

        if let Err(e) = self.conversations.touch(&conversation.id, message.created_at).await {
            tracing::warn!(error = %e, conversation_id = %conversation.id, "failed to bump conversation activity");
        }

        self.fanout.message_created(&conversation, &message).await;
        Ok(message)
    }

    /// Returns up to `limit` messages older than `before`, oldest first.
    pub async fn list(
        &self,
        conversation_id: &ConversationId,
        user: &UserId,
        limit: Option<usize>,
        before: Option<PageCursor>,
    ) -> Result<MessagePage> {
        let conversation = self.conversations.authorize(conversation_id, user).await?;
        let limit = self.policy.page_size(limit);

        // One extra row tells us whether an older page exists.
        let mut newest_first = self
            .messages
            .page(conversation_id, PageQuery { limit: limit + 1, before })
            .await?;
        let has_more = newest_first.len() > limit;
        newest_first.truncate(limit);

        if self.policy.list_marks_read {
            self.acknowledge(&conversation, user, &mut newest_first).await?;
        }

        newest_first.reverse();
        let oldest = newest_first.first();
        Ok(MessagePage {
            next_before: oldest.filter(|_| has_more).map(|m| m.created_at),
            next_before_seq: oldest.filter(|_| has_more).map(|m| m.seq),
            messages: newest_first,
            has_more,
        })
    }

    async fn acknowledge(
        &self,
        conversation: &Conversation,
        user: &UserId,
        page: &mut [Message],
    ) -> Result<()> {
        let unread: Vec<MessageId> = page
            .iter()
            .filter(|m| m.is_unread_for(user))
            .map(|m| m.id.clone())
            .collect();
        if unread.is_empty() {
            return Ok(());
        }

        let read_at = crate::stored_now();
        let marked = self
            .messages
            .mark_read(&conversation.id, user, ReadScope::Only(unread), read_at)
            .await?;

        for message in page.iter_mut().filter(|m| marked.contains(&m.id)) {
            message.read_by.push(ReadReceipt { reader_id: user.clone(), read_at });
        }
        self.fanout
            .messages_read(conversation, user, &marked, read_at)
            .await;
        Ok(())
    }
}
