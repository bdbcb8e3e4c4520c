//! # In-memory adapters
//!
//! `dashmap`-backed implementations of every storage port. Used by the
//! integration tests and by the binary when no database is configured.
//! Per-key atomicity comes from dashmap's shard locks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use domains::{
    Conversation, ConversationId, ConversationRepository, ListingDirectory, ListingId, ListingRecord,
    Message, MessageId, MessageRepository, NewConversation, NewMessage, PageQuery, ReadReceipt,
    ReadScope, UserDirectory, UserId, UserProfile,
};
use serde_json::Value;

type ConversationKey = (ListingId, UserId, UserId);

#[derive(Default)]
pub struct MemoryConversationRepository {
    by_id: DashMap<ConversationId, Conversation>,
    /// Unique `(listing, buyer, seller)` index.
    by_key: DashMap<ConversationKey, ConversationId>,
}

impl MemoryConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Adds a participant (e.g. staff joining a thread).
    pub fn add_participant(&self, id: &ConversationId, user: UserId) -> bool {
        match self.by_id.get_mut(id) {
            Some(mut conversation) if !conversation.is_participant(&user) => {
                conversation.participants.push(user);
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl ConversationRepository for MemoryConversationRepository {
    async fn find_or_insert(&self, draft: NewConversation) -> anyhow::Result<(Conversation, bool)> {
        let key = (draft.listing_id.clone(), draft.buyer_id.clone(), draft.seller_id.clone());

        // The key shard stays locked until the record is visible by id, so a
        // concurrent caller either inserts first or finds the finished record.
        match self.by_key.entry(key) {
            Entry::Occupied(existing) => {
                let id = existing.get().clone();
                let conversation = self
                    .by_id
                    .get(&id)
                    .map(|c| c.clone())
                    .ok_or_else(|| anyhow::anyhow!("conversation index points at missing record {id}"))?;
                Ok((conversation, false))
            }
            Entry::Vacant(slot) => {
                let conversation = draft.into_conversation();
                self.by_id.insert(conversation.id.clone(), conversation.clone());
                slot.insert(conversation.id.clone());
                Ok((conversation, true))
            }
        }
    }

    async fn get(&self, id: &ConversationId) -> anyhow::Result<Option<Conversation>> {
        Ok(self.by_id.get(id).map(|c| c.clone()))
    }

    async fn list_for_participant(&self, user: &UserId) -> anyhow::Result<Vec<Conversation>> {
        let mut conversations: Vec<Conversation> = self
            .by_id
            .iter()
            .filter(|c| c.is_participant(user))
            .map(|c| c.clone())
            .collect();
        conversations.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        Ok(conversations)
    }

    async fn touch(&self, id: &ConversationId, at: DateTime<Utc>) -> anyhow::Result<()> {
        let mut conversation = self
            .by_id
            .get_mut(id)
            .ok_or_else(|| anyhow::anyhow!("conversation {id} does not exist"))?;
        if at > conversation.last_activity_at {
            conversation.last_activity_at = at;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryMessageRepository {
    /// Messages per conversation in insertion (seq) order.
    threads: DashMap<ConversationId, Vec<Message>>,
    next_seq: AtomicI64,
}

impl MemoryMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, conversation: &ConversationId) -> usize {
        self.threads.get(conversation).map_or(0, |t| t.len())
    }
}

#[async_trait]
impl MessageRepository for MemoryMessageRepository {
    async fn insert(&self, message: NewMessage) -> anyhow::Result<Message> {
        let mut thread = self.threads.entry(message.conversation_id.clone()).or_default();
        // Assigned under the thread lock so seq order equals storage order.
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let message = message.with_seq(seq);
        thread.push(message.clone());
        Ok(message)
    }

    async fn page(&self, conversation: &ConversationId, query: PageQuery) -> anyhow::Result<Vec<Message>> {
        let Some(thread) = self.threads.get(conversation) else {
            return Ok(Vec::new());
        };
        let mut candidates: Vec<&Message> = thread
            .iter()
            .filter(|m| query.before.map_or(true, |c| c.admits(m.created_at, m.seq)))
            .collect();
        candidates.sort_by(|a, b| (b.created_at, b.seq).cmp(&(a.created_at, a.seq)));
        Ok(candidates.into_iter().take(query.limit).cloned().collect())
    }

    async fn latest(&self, conversation: &ConversationId) -> anyhow::Result<Option<Message>> {
        Ok(self.threads.get(conversation).and_then(|thread| {
            thread
                .iter()
                .max_by(|a, b| (a.created_at, a.seq).cmp(&(b.created_at, b.seq)))
                .cloned()
        }))
    }

    async fn mark_read(
        &self,
        conversation: &ConversationId,
        reader: &UserId,
        scope: ReadScope,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Vec<MessageId>> {
        let Some(mut thread) = self.threads.get_mut(conversation) else {
            return Ok(Vec::new());
        };
        let mut marked = Vec::new();
        for message in thread.iter_mut() {
            let in_scope = match &scope {
                ReadScope::All => true,
                ReadScope::Only(ids) => ids.contains(&message.id),
            };
            if in_scope && message.is_unread_for(reader) {
                message.read_by.push(ReadReceipt { reader_id: reader.clone(), read_at: at });
                marked.push(message.id.clone());
            }
        }
        Ok(marked)
    }

    async fn count_unread(&self, conversation: &ConversationId, reader: &UserId) -> anyhow::Result<u64> {
        Ok(self.threads.get(conversation).map_or(0, |thread| {
            thread.iter().filter(|m| m.is_unread_for(reader)).count() as u64
        }))
    }

    async fn count_unread_many(
        &self,
        conversations: Vec<ConversationId>,
        reader: &UserId,
    ) -> anyhow::Result<HashMap<ConversationId, u64>> {
        let mut counts = HashMap::with_capacity(conversations.len());
        for id in conversations {
            let unread = self.count_unread(&id, reader).await?;
            if unread > 0 {
                counts.insert(id, unread);
            }
        }
        Ok(counts)
    }
}

/// Listing documents keyed by id, parsed on read like the database adapter.
#[derive(Default)]
pub struct MemoryListingDirectory {
    documents: DashMap<ListingId, Value>,
}

impl MemoryListingDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_document(&self, id: impl Into<ListingId>, doc: Value) {
        self.documents.insert(id.into(), doc);
    }

    pub fn remove(&self, id: &ListingId) {
        self.documents.remove(id);
    }
}

#[async_trait]
impl ListingDirectory for MemoryListingDirectory {
    async fn get_listing(&self, id: &ListingId) -> anyhow::Result<Option<ListingRecord>> {
        Ok(self
            .documents
            .get(id)
            .map(|doc| ListingRecord::from_document(id.clone(), doc.value())))
    }
}

#[derive(Default)]
pub struct MemoryUserDirectory {
    profiles: DashMap<UserId, UserProfile>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, profile: UserProfile) {
        self.profiles.insert(profile.id.clone(), profile);
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn get_profile(&self, id: &UserId) -> anyhow::Result<Option<UserProfile>> {
        Ok(self.profiles.get(id).map(|p| p.clone()))
    }
}
