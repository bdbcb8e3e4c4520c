//! Unread counters for inbox rows and the dashboard badge.

use std::collections::HashMap;
use std::sync::Arc;

use domains::{
    ConversationId, ConversationRepository, ConversationUnread, MessageRepository, Result,
    UnreadSummary, UserId,
};

pub struct UnreadAggregator {
    conversations: Arc<dyn ConversationRepository>,
    messages: Arc<dyn MessageRepository>,
}

impl UnreadAggregator {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        messages: Arc<dyn MessageRepository>,
    ) -> Self {
        Self { conversations, messages }
    }

    /// Messages in `conversation` sent by others and not yet read by `user`.
    pub async fn for_conversation(&self, conversation: &ConversationId, user: &UserId) -> Result<u64> {
        Ok(self.messages.count_unread(conversation, user).await?)
    }

    /// Counts for a batch of conversations; missing entries mean zero.
    pub async fn for_conversations(
        &self,
        conversations: Vec<ConversationId>,
        user: &UserId,
    ) -> Result<HashMap<ConversationId, u64>> {
        if conversations.is_empty() {
            return Ok(HashMap::new());
        }
        Ok(self.messages.count_unread_many(conversations, user).await?)
    }

    /// Dashboard-wide total plus the conversations that contribute to it,
    /// most recently active first.
    pub async fn summary(&self, user: &UserId) -> Result<UnreadSummary> {
        let conversations = self.conversations.list_for_participant(user).await?;
        let ids: Vec<ConversationId> = conversations.iter().map(|c| c.id.clone()).collect();
        let counts = self.for_conversations(ids, user).await?;

        let rows: Vec<ConversationUnread> = conversations
            .into_iter()
            .filter_map(|c| {
                let unread = counts.get(&c.id).copied().unwrap_or(0);
                (unread > 0).then_some(ConversationUnread { conversation_id: c.id, unread })
            })
            .collect();

        Ok(UnreadSummary {
            total: rows.iter().map(|r| r.unread).sum(),
            conversations: rows,
        })
    }
}
