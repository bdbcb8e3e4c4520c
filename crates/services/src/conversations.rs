//! # Conversation service
//!
//! Owns the find-or-create flow, participant checks, inbox hydration and
//! explicit read acknowledgement.

use std::sync::Arc;

use chrono::Utc;
use domains::{
    AppError, Conversation, ConversationId, ConversationRepository, ConversationView, ListingDirectory,
    ListingId, MessageRepository, NewConversation, ReadScope, Result, UserDirectory, UserId,
    UserProfile,
};

use crate::fanout::DeliveryFanout;
use crate::identity::resolve_seller;
use crate::unread::UnreadAggregator;

/// Longest listing id accepted from clients.
const MAX_LISTING_ID_LEN: usize = 128;

/// Result of [`ConversationService::find_or_create`].
#[derive(Debug, Clone, PartialEq)]
pub struct FindOrCreate {
    pub conversation: Conversation,
    pub created: bool,
}

pub struct ConversationService {
    conversations: Arc<dyn ConversationRepository>,
    messages: Arc<dyn MessageRepository>,
    listings: Arc<dyn ListingDirectory>,
    users: Arc<dyn UserDirectory>,
    unread: Arc<UnreadAggregator>,
    fanout: Arc<DeliveryFanout>,
}

impl ConversationService {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        messages: Arc<dyn MessageRepository>,
        listings: Arc<dyn ListingDirectory>,
        users: Arc<dyn UserDirectory>,
        unread: Arc<UnreadAggregator>,
        fanout: Arc<DeliveryFanout>,
    ) -> Self {
        Self {
            conversations,
            messages,
            listings,
            users,
            unread,
            fanout,
        }
    }

    /// Returns the conversation between `buyer` and the seller of the
    /// listing, creating it on first contact. Safe to call concurrently: the
    /// store's unique key collapses duplicate attempts onto one record.
    pub async fn find_or_create(&self, listing_id: &str, buyer: &UserId) -> Result<FindOrCreate> {
        let listing_id = parse_listing_id(listing_id)?;
        let listing = self
            .listings
            .get_listing(&listing_id)
            .await?
            .ok_or_else(|| AppError::not_found("Listing", &listing_id))?;

        let seller = resolve_seller(&listing)?;
        if &seller == buyer {
            return Err(AppError::SelfConversation);
        }

        let draft = NewConversation {
            id: ConversationId::generate(),
            listing_id,
            buyer_id: buyer.clone(),
            seller_id: seller,
            created_at: crate::stored_now(),
        };
        let (conversation, created) = self.conversations.find_or_insert(draft).await?;

        if created {
            tracing::info!(
                conversation_id = %conversation.id,
                listing_id = %conversation.listing_id,
                buyer = %conversation.buyer_id,
                seller = %conversation.seller_id,
                "conversation created"
            );
        }
        Ok(FindOrCreate { conversation, created })
    }

    /// Loads a conversation and checks that `user` takes part in it.
    pub async fn authorize(&self, id: &ConversationId, user: &UserId) -> Result<Conversation> {
        let conversation = self
            .conversations
            .get(id)
            .await?
            .ok_or_else(|| AppError::not_found("Conversation", id))?;

        if !conversation.is_participant(user) {
            tracing::warn!(conversation_id = %id, user = %user, "non-participant access rejected");
            return Err(AppError::AccessDenied(format!(
                "not a participant of conversation {id}"
            )));
        }
        Ok(conversation)
    }

    /// The caller's inbox, most recently active first.
    pub async fn list_for_user(&self, user: &UserId) -> Result<Vec<ConversationView>> {
        let mut conversations = self.conversations.list_for_participant(user).await?;
        conversations.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));

        let ids = conversations.iter().map(|c| c.id.clone()).collect();
        let counts = self.unread.for_conversations(ids, user).await?;

        let mut views = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            let unread = counts.get(&conversation.id).copied().unwrap_or(0);
            views.push(self.hydrate(conversation, user, unread).await?);
        }
        Ok(views)
    }

    /// One inbox row.
    pub async fn view(&self, id: &ConversationId, user: &UserId) -> Result<ConversationView> {
        let conversation = self.authorize(id, user).await?;
        let unread = self.unread.for_conversation(id, user).await?;
        self.hydrate(conversation, user, unread).await
    }

    /// Acknowledges every message from the other side. Idempotent; returns
    /// how many messages were newly marked.
    pub async fn mark_read(&self, id: &ConversationId, user: &UserId) -> Result<usize> {
        let conversation = self.authorize(id, user).await?;
        let read_at = crate::stored_now();
        let marked = self
            .messages
            .mark_read(id, user, ReadScope::All, read_at)
            .await?;

        if !marked.is_empty() {
            tracing::debug!(conversation_id = %id, reader = %user, marked = marked.len(), "messages marked read");
            self.fanout
                .messages_read(&conversation, user, &marked, read_at)
                .await;
        }
        Ok(marked.len())
    }

    /// Bumps last activity. The message write is the durability boundary, so
    /// callers treat a failure here as non-fatal.
    pub async fn touch(&self, id: &ConversationId, at: chrono::DateTime<Utc>) -> Result<()> {
        Ok(self.conversations.touch(id, at).await?)
    }

    pub async fn profile_or_unknown(&self, user: &UserId) -> Result<UserProfile> {
        Ok(self
            .users
            .get_profile(user)
            .await?
            .unwrap_or_else(|| UserProfile::unknown(user.clone())))
    }

    async fn hydrate(
        &self,
        conversation: Conversation,
        user: &UserId,
        unread_count: u64,
    ) -> Result<ConversationView> {
        let listing = self
            .listings
            .get_listing(&conversation.listing_id)
            .await?
            .map(|record| record.summary);
        let counterpart = self.profile_or_unknown(conversation.counterpart(user)).await?;
        let last_message = self.messages.latest(&conversation.id).await?;

        Ok(ConversationView {
            conversation,
            listing,
            counterpart,
            last_message,
            unread_count,
        })
    }
}

fn parse_listing_id(raw: &str) -> Result<ListingId> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::ValidationError("listingId is required".into()));
    }
    if trimmed.len() > MAX_LISTING_ID_LEN || trimmed.chars().any(char::is_whitespace) {
        return Err(AppError::ValidationError(format!("invalid listingId: {trimmed:?}")));
    }
    Ok(ListingId::new(trimmed))
}
