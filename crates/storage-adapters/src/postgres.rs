//! # Postgres adapters
//!
//! Maps the relational model onto the `domains` entities. Conversation
//! uniqueness is enforced by the `(listing_id, buyer_id, seller_id)`
//! constraint; read receipts live in `message_reads` keyed by
//! `(message_id, reader_id)`, so a receipt can never be duplicated.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domains::{
    Conversation, ConversationId, ConversationRepository, ListingDirectory, ListingId, ListingRecord,
    Message, MessageId, MessageRepository, NewConversation, NewMessage, PageCursor, PageQuery,
    ReadReceipt, ReadScope, SenderRole, UserDirectory, UserId, UserProfile,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;

pub use sqlx::postgres::PgPool;

/// Opens a pool and applies pending migrations.
pub async fn connect(url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await?;
    migrate(&pool).await?;
    Ok(pool)
}

pub async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("database migrations applied");
    Ok(())
}

const CONVERSATION_COLUMNS: &str =
    "id, listing_id, buyer_id, seller_id, participants, created_at, last_activity_at";

fn row_to_conversation(row: &PgRow) -> anyhow::Result<Conversation> {
    let participants: Vec<String> = row.try_get("participants")?;
    Ok(Conversation {
        id: ConversationId::new(row.try_get::<String, _>("id")?),
        listing_id: ListingId::new(row.try_get::<String, _>("listing_id")?),
        buyer_id: UserId::new(row.try_get::<String, _>("buyer_id")?),
        seller_id: UserId::new(row.try_get::<String, _>("seller_id")?),
        participants: participants.into_iter().map(UserId::new).collect(),
        created_at: row.try_get("created_at")?,
        last_activity_at: row.try_get("last_activity_at")?,
    })
}

pub struct PgConversationRepository {
    pool: PgPool,
}

impl PgConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationRepository for PgConversationRepository {
    /// Insert-or-ignore on the unique key, then read back whatever won.
    async fn find_or_insert(&self, draft: NewConversation) -> anyhow::Result<(Conversation, bool)> {
        let participants = vec![draft.buyer_id.to_string(), draft.seller_id.to_string()];
        let inserted = sqlx::query(
            "INSERT INTO conversations (id, listing_id, buyer_id, seller_id, participants, created_at, last_activity_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $6) \
             ON CONFLICT (listing_id, buyer_id, seller_id) DO NOTHING \
             RETURNING id",
        )
        .bind(draft.id.as_str())
        .bind(draft.listing_id.as_str())
        .bind(draft.buyer_id.as_str())
        .bind(draft.seller_id.as_str())
        .bind(&participants)
        .bind(draft.created_at)
        .fetch_optional(&self.pool)
        .await?;

        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE listing_id = $1 AND buyer_id = $2 AND seller_id = $3"
        ))
        .bind(draft.listing_id.as_str())
        .bind(draft.buyer_id.as_str())
        .bind(draft.seller_id.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok((row_to_conversation(&row)?, inserted.is_some()))
    }

    async fn get(&self, id: &ConversationId) -> anyhow::Result<Option<Conversation>> {
        let row = sqlx::query(&format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1"))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_conversation).transpose()
    }

    async fn list_for_participant(&self, user: &UserId) -> anyhow::Result<Vec<Conversation>> {
        let rows = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE participants @> ARRAY[$1]::TEXT[] \
             ORDER BY last_activity_at DESC"
        ))
        .bind(user.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_conversation).collect()
    }

    async fn touch(&self, id: &ConversationId, at: DateTime<Utc>) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE conversations SET last_activity_at = GREATEST(last_activity_at, $2) WHERE id = $1",
        )
        .bind(id.as_str())
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Messages with their receipts aggregated into one JSON column.
const MESSAGE_SELECT: &str = "\
    SELECT m.seq, m.id, m.conversation_id, m.sender_id, m.sender_name, m.sender_role, \
           m.body, m.attachment, m.created_at, \
           COALESCE( \
               json_agg(json_build_object('readerId', r.reader_id, 'readAt', r.read_at) ORDER BY r.read_at) \
                   FILTER (WHERE r.reader_id IS NOT NULL), \
               '[]'::json) AS read_by \
    FROM messages m \
    LEFT JOIN message_reads r ON r.message_id = m.id";

fn row_to_message(row: &PgRow) -> anyhow::Result<Message> {
    let role: String = row.try_get("sender_role")?;
    let Json(read_by): Json<Vec<ReadReceipt>> = row.try_get("read_by")?;
    Ok(Message {
        id: MessageId::new(row.try_get::<String, _>("id")?),
        conversation_id: ConversationId::new(row.try_get::<String, _>("conversation_id")?),
        seq: row.try_get("seq")?,
        sender_id: UserId::new(row.try_get::<String, _>("sender_id")?),
        sender_name: row.try_get("sender_name")?,
        sender_role: SenderRole::parse(&role)
            .ok_or_else(|| anyhow::anyhow!("unknown sender role {role:?}"))?,
        body: row.try_get("body")?,
        attachment: row.try_get("attachment")?,
        created_at: row.try_get("created_at")?,
        read_by,
    })
}

pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_page(
        &self,
        conversation: &ConversationId,
        before: Option<PageCursor>,
        limit: usize,
    ) -> anyhow::Result<Vec<Message>> {
        // Without a seq, `(created_at, seq) < (before, MIN)` reduces to `created_at < before`.
        let rows = sqlx::query(&format!(
            "{MESSAGE_SELECT} \
             WHERE m.conversation_id = $1 \
               AND ($2::TIMESTAMPTZ IS NULL OR (m.created_at, m.seq) < ($2, $3)) \
             GROUP BY m.seq \
             ORDER BY m.created_at DESC, m.seq DESC \
             LIMIT $4"
        ))
        .bind(conversation.as_str())
        .bind(before.map(|c| c.created_at))
        .bind(before.and_then(|c| c.seq).unwrap_or(i64::MIN))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_message).collect()
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    /// Message row and initial receipts go in one transaction so a message is
    /// never visible without its sender's receipt.
    async fn insert(&self, message: NewMessage) -> anyhow::Result<Message> {
        let mut tx = self.pool.begin().await?;

        let seq: i64 = sqlx::query_scalar(
            "INSERT INTO messages (id, conversation_id, sender_id, sender_name, sender_role, body, attachment, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING seq",
        )
        .bind(message.id.as_str())
        .bind(message.conversation_id.as_str())
        .bind(message.sender_id.as_str())
        .bind(&message.sender_name)
        .bind(message.sender_role.as_str())
        .bind(message.body.as_deref())
        .bind(message.attachment.as_deref())
        .bind(message.created_at)
        .fetch_one(&mut *tx)
        .await?;

        for receipt in &message.read_by {
            sqlx::query(
                "INSERT INTO message_reads (message_id, reader_id, read_at) VALUES ($1, $2, $3) \
                 ON CONFLICT (message_id, reader_id) DO NOTHING",
            )
            .bind(message.id.as_str())
            .bind(receipt.reader_id.as_str())
            .bind(receipt.read_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(message.with_seq(seq))
    }

    async fn page(&self, conversation: &ConversationId, query: PageQuery) -> anyhow::Result<Vec<Message>> {
        self.fetch_page(conversation, query.before, query.limit).await
    }

    async fn latest(&self, conversation: &ConversationId) -> anyhow::Result<Option<Message>> {
        Ok(self.fetch_page(conversation, None, 1).await?.into_iter().next())
    }

    async fn mark_read(
        &self,
        conversation: &ConversationId,
        reader: &UserId,
        scope: ReadScope,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Vec<MessageId>> {
        let only: Option<Vec<String>> = match scope {
            ReadScope::All => None,
            ReadScope::Only(ids) => Some(ids.into_iter().map(MessageId::into_inner).collect()),
        };
        let ids: Vec<String> = sqlx::query_scalar(
            "INSERT INTO message_reads (message_id, reader_id, read_at) \
             SELECT m.id, $2, $3 FROM messages m \
             WHERE m.conversation_id = $1 \
               AND m.sender_id <> $2 \
               AND ($4::TEXT[] IS NULL OR m.id = ANY($4)) \
             ON CONFLICT (message_id, reader_id) DO NOTHING \
             RETURNING message_id",
        )
        .bind(conversation.as_str())
        .bind(reader.as_str())
        .bind(at)
        .bind(only)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(MessageId::new).collect())
    }

    async fn count_unread(&self, conversation: &ConversationId, reader: &UserId) -> anyhow::Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages m \
             WHERE m.conversation_id = $1 AND m.sender_id <> $2 \
               AND NOT EXISTS ( \
                   SELECT 1 FROM message_reads r WHERE r.message_id = m.id AND r.reader_id = $2)",
        )
        .bind(conversation.as_str())
        .bind(reader.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn count_unread_many(
        &self,
        conversations: Vec<ConversationId>,
        reader: &UserId,
    ) -> anyhow::Result<HashMap<ConversationId, u64>> {
        let ids: Vec<String> = conversations.into_iter().map(ConversationId::into_inner).collect();
        let rows = sqlx::query(
            "SELECT m.conversation_id, COUNT(*) AS unread FROM messages m \
             WHERE m.conversation_id = ANY($1) AND m.sender_id <> $2 \
               AND NOT EXISTS ( \
                   SELECT 1 FROM message_reads r WHERE r.message_id = m.id AND r.reader_id = $2) \
             GROUP BY m.conversation_id",
        )
        .bind(&ids)
        .bind(reader.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let id: String = row.try_get("conversation_id")?;
                let unread: i64 = row.try_get("unread")?;
                Ok((ConversationId::new(id), u64::try_from(unread).unwrap_or(0)))
            })
            .collect()
    }
}

pub struct PgListingDirectory {
    pool: PgPool,
}

impl PgListingDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Used by the seed tool; the listings subsystem owns these rows in production.
    pub async fn upsert_document(&self, id: &ListingId, doc: &serde_json::Value) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO listings (id, doc) VALUES ($1, $2) \
             ON CONFLICT (id) DO UPDATE SET doc = EXCLUDED.doc, updated_at = now()",
        )
        .bind(id.as_str())
        .bind(Json(doc))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ListingDirectory for PgListingDirectory {
    async fn get_listing(&self, id: &ListingId) -> anyhow::Result<Option<ListingRecord>> {
        let doc: Option<Json<serde_json::Value>> =
            sqlx::query_scalar("SELECT doc FROM listings WHERE id = $1")
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(doc.map(|Json(doc)| ListingRecord::from_document(id.clone(), &doc)))
    }
}

pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, profile: &UserProfile) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO profiles (id, display_name, avatar_url) VALUES ($1, $2, $3) \
             ON CONFLICT (id) DO UPDATE SET display_name = EXCLUDED.display_name, avatar_url = EXCLUDED.avatar_url",
        )
        .bind(profile.id.as_str())
        .bind(&profile.display_name)
        .bind(profile.avatar_url.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn get_profile(&self, id: &UserId) -> anyhow::Result<Option<UserProfile>> {
        let row = sqlx::query("SELECT display_name, avatar_url FROM profiles WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            Ok(UserProfile {
                id: id.clone(),
                display_name: row.try_get("display_name")?,
                avatar_url: row.try_get("avatar_url")?,
            })
        })
        .transpose()
    }
}
