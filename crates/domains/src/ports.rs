//! # Ports
//!
//! Every adapter must implement these traits to be wired into the binary.
//! Repository ports return `anyhow::Result`; services translate failures into
//! [`AppError`](crate::error::AppError) at their boundary.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::AppError;
use crate::ids::{ConversationId, ListingId, MessageId, UserId};
use crate::models::{
    Admission, Conversation, ListingRecord, Message, NewConversation, NewMessage, PageQuery,
    ReadScope, UserProfile,
};

/// Persistence contract for conversations.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Inserts `draft` unless a conversation with the same
    /// `(listing, buyer, seller)` key exists. Concurrent calls with the same
    /// key must all observe one record. Returns the record and whether it
    /// was created by this call.
    async fn find_or_insert(&self, draft: NewConversation) -> anyhow::Result<(Conversation, bool)>;

    async fn get(&self, id: &ConversationId) -> anyhow::Result<Option<Conversation>>;

    /// Conversations where `user` is a participant, most recently active first.
    async fn list_for_participant(&self, user: &UserId) -> anyhow::Result<Vec<Conversation>>;

    /// Moves `last_activity_at` forward; never backwards.
    async fn touch(&self, id: &ConversationId, at: DateTime<Utc>) -> anyhow::Result<()>;
}

/// Persistence contract for messages and their read receipts.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Stores the message and assigns its sequence number.
    async fn insert(&self, message: NewMessage) -> anyhow::Result<Message>;

    /// Up to `query.limit` messages older than the cursor, newest first.
    async fn page(&self, conversation: &ConversationId, query: PageQuery) -> anyhow::Result<Vec<Message>>;

    async fn latest(&self, conversation: &ConversationId) -> anyhow::Result<Option<Message>>;

    /// Adds a receipt for `reader` to every message in scope that was sent by
    /// someone else and not yet read by them. Returns the ids that changed.
    async fn mark_read(
        &self,
        conversation: &ConversationId,
        reader: &UserId,
        scope: ReadScope,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Vec<MessageId>>;

    /// Count-only unread query for one conversation.
    async fn count_unread(&self, conversation: &ConversationId, reader: &UserId) -> anyhow::Result<u64>;

    /// Count-only unread query across many conversations. Conversations
    /// without unread messages may be absent from the map.
    async fn count_unread_many(
        &self,
        conversations: Vec<ConversationId>,
        reader: &UserId,
    ) -> anyhow::Result<HashMap<ConversationId, u64>>;
}

/// Read-only view of the listings subsystem.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ListingDirectory: Send + Sync {
    async fn get_listing(&self, id: &ListingId) -> anyhow::Result<Option<ListingRecord>>;
}

/// Read-only view of user profiles.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_profile(&self, id: &UserId) -> anyhow::Result<Option<UserProfile>>;
}

/// Per-sender send throttle.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait SendThrottle: Send + Sync {
    /// Admits and records one send, or reports how long to wait.
    async fn admit(&self, sender: &UserId) -> Admission;
}

/// The real-time transport collaborator. Delivery is best-effort: `Ok(n)`
/// reports how many live subscribers received the event (possibly zero).
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn publish_to_user(&self, user: &UserId, event: &str, payload: Value) -> anyhow::Result<usize>;

    async fn publish_to_conversation_viewers(
        &self,
        conversation: &ConversationId,
        event: &str,
        payload: Value,
    ) -> anyhow::Result<usize>;
}

/// Validates a previously issued identity credential.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait IdentityVerifier: Send + Sync {
    fn verify(&self, credential: &str) -> Result<UserId, AppError>;
}
