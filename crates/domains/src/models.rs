//! # Domain Models
//!
//! These structs represent the messaging entities of Rusty-Estate.
//! Generated ids are UUID v7 for time-ordered, globally unique identification.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ConversationId, ListingId, MessageId, UserId};

/// The unique thread between one buyer and one seller about one listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub listing_id: ListingId,
    pub buyer_id: UserId,
    pub seller_id: UserId,
    /// Always contains buyer and seller; staff may be added later.
    pub participants: Vec<UserId>,
    pub created_at: DateTime<Utc>,
    /// Bumped on every accepted message; used to sort inboxes.
    pub last_activity_at: DateTime<Utc>,
}

impl Conversation {
    pub fn is_participant(&self, user: &UserId) -> bool {
        self.participants.iter().any(|p| p == user)
    }

    /// The other side of the thread from `user`'s point of view.
    pub fn counterpart(&self, user: &UserId) -> &UserId {
        if user == &self.buyer_id {
            &self.seller_id
        } else {
            &self.buyer_id
        }
    }

    pub fn role_of(&self, user: &UserId) -> SenderRole {
        if user == &self.buyer_id {
            SenderRole::Buyer
        } else if user == &self.seller_id {
            SenderRole::Seller
        } else {
            SenderRole::Admin
        }
    }
}

/// Insert payload for the find-or-create path. The unique key is
/// `(listing_id, buyer_id, seller_id)`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewConversation {
    pub id: ConversationId,
    pub listing_id: ListingId,
    pub buyer_id: UserId,
    pub seller_id: UserId,
    pub created_at: DateTime<Utc>,
}

impl NewConversation {
    pub fn into_conversation(self) -> Conversation {
        Conversation {
            participants: vec![self.buyer_id.clone(), self.seller_id.clone()],
            id: self.id,
            listing_id: self.listing_id,
            buyer_id: self.buyer_id,
            seller_id: self.seller_id,
            created_at: self.created_at,
            last_activity_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    Buyer,
    Seller,
    /// Staff writing on behalf of the marketplace.
    Admin,
}

impl SenderRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderRole::Buyer => "buyer",
            SenderRole::Seller => "seller",
            SenderRole::Admin => "admin",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "buyer" => Some(SenderRole::Buyer),
            "seller" => Some(SenderRole::Seller),
            "admin" => Some(SenderRole::Admin),
            _ => None,
        }
    }
}

/// Marker recording that `reader_id` has seen a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub reader_id: UserId,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    /// Store-assigned insertion order; breaks ties between equal timestamps.
    pub seq: i64,
    pub sender_id: UserId,
    pub sender_name: String,
    pub sender_role: SenderRole,
    pub body: Option<String>,
    pub attachment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub read_by: Vec<ReadReceipt>,
}

impl Message {
    pub fn is_read_by(&self, user: &UserId) -> bool {
        self.read_by.iter().any(|r| &r.reader_id == user)
    }

    /// Counts towards `user`'s unread badge.
    pub fn is_unread_for(&self, user: &UserId) -> bool {
        &self.sender_id != user && !self.is_read_by(user)
    }
}

/// A sanitized message ready for storage. The sender's own receipt is
/// already present in `read_by`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub sender_name: String,
    pub sender_role: SenderRole,
    pub body: Option<String>,
    pub attachment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub read_by: Vec<ReadReceipt>,
}

impl NewMessage {
    pub fn with_seq(self, seq: i64) -> Message {
        Message {
            id: self.id,
            conversation_id: self.conversation_id,
            seq,
            sender_id: self.sender_id,
            sender_name: self.sender_name,
            sender_role: self.sender_role,
            body: self.body,
            attachment: self.attachment,
            created_at: self.created_at,
            read_by: self.read_by,
        }
    }
}

/// Position to page backwards from. Without `seq` only the timestamp is
/// compared (strictly older); with it, `(created_at, seq)` is compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub created_at: DateTime<Utc>,
    pub seq: Option<i64>,
}

impl PageCursor {
    pub fn admits(&self, created_at: DateTime<Utc>, seq: i64) -> bool {
        match self.seq {
            Some(cursor_seq) => (created_at, seq) < (self.created_at, cursor_seq),
            None => created_at < self.created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageQuery {
    pub limit: usize,
    pub before: Option<PageCursor>,
}

/// A chronological (oldest-first) slice of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_before: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_before_seq: Option<i64>,
}

/// Which messages a read acknowledgement covers.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadScope {
    /// Everything in the conversation.
    All,
    /// Only the listed messages (e.g. the page just returned).
    Only(Vec<MessageId>),
}

/// Candidate owner references of a listing document, in priority order.
///
/// Listing documents were written by several generations of the listings
/// code, each with its own idea of where the owner lives.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OwnerFields {
    pub owner: Option<UserId>,
    pub seller: Option<UserId>,
    pub posted_by: Option<UserId>,
    pub user: Option<UserId>,
    pub created_by: Option<UserId>,
    pub owner_id: Option<UserId>,
    pub seller_id: Option<UserId>,
}

impl OwnerFields {
    /// Document keys matching the struct fields, highest priority first.
    pub const KEYS: [&'static str; 7] = [
        "owner", "seller", "postedBy", "user", "createdBy", "ownerId", "sellerId",
    ];

    pub fn from_document(doc: &Value) -> Self {
        let pick = |key: &str| doc.get(key).and_then(UserId::from_json);
        Self {
            owner: pick(Self::KEYS[0]),
            seller: pick(Self::KEYS[1]),
            posted_by: pick(Self::KEYS[2]),
            user: pick(Self::KEYS[3]),
            created_by: pick(Self::KEYS[4]),
            owner_id: pick(Self::KEYS[5]),
            seller_id: pick(Self::KEYS[6]),
        }
    }

    pub fn candidates(&self) -> [Option<&UserId>; 7] {
        [
            self.owner.as_ref(),
            self.seller.as_ref(),
            self.posted_by.as_ref(),
            self.user.as_ref(),
            self.created_by.as_ref(),
            self.owner_id.as_ref(),
            self.seller_id.as_ref(),
        ]
    }
}

/// Card shown next to a conversation in the inbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingSummary {
    pub id: ListingId,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// A listing as seen by the messaging core.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingRecord {
    pub summary: ListingSummary,
    pub ownership: OwnerFields,
}

impl ListingRecord {
    pub fn id(&self) -> &ListingId {
        &self.summary.id
    }

    /// Parses a stored listing document.
    pub fn from_document(id: ListingId, doc: &Value) -> Self {
        let text = |key: &str| doc.get(key).and_then(Value::as_str).map(str::to_owned);
        let thumbnail = text("thumbnail").or_else(|| {
            doc.get("images")
                .and_then(Value::as_array)
                .and_then(|images| images.first())
                .and_then(Value::as_str)
                .map(str::to_owned)
        });
        let location = text("location").or_else(|| text("city"));

        Self {
            summary: ListingSummary {
                id,
                title: text("title").unwrap_or_default(),
                price: doc.get("price").and_then(Value::as_f64),
                currency: text("currency"),
                thumbnail,
                location,
            },
            ownership: OwnerFields::from_document(doc),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl UserProfile {
    pub const UNKNOWN_NAME: &'static str = "Unknown user";

    /// Stand-in when the user directory has no entry.
    pub fn unknown(id: UserId) -> Self {
        Self {
            id,
            display_name: Self::UNKNOWN_NAME.to_owned(),
            avatar_url: None,
        }
    }
}

/// One inbox row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub listing: Option<ListingSummary>,
    pub counterpart: UserProfile,
    pub last_message: Option<Message>,
    pub unread_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationUnread {
    pub conversation_id: ConversationId,
    pub unread: u64,
}

/// Dashboard badge data.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadSummary {
    pub total: u64,
    pub conversations: Vec<ConversationUnread>,
}

/// Outcome of a throttle check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Throttled { retry_after: Duration },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}
