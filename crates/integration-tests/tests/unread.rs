mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{uid, World, BUYER, SELLER};
use domains::{ConversationId, MessageRepository, PageQuery, UserId};
use serde_json::json;
use services::{MessagingPolicy, SlidingWindowLimiter};

fn quiet_world() -> World {
    let policy = MessagingPolicy {
        list_marks_read: false,
        ..MessagingPolicy::default()
    };
    World::with(policy, Arc::new(SlidingWindowLimiter::new(1_000, Duration::from_secs(30))))
}

/// Counts straight from the stored messages.
async fn brute_force_unread(world: &World, conversation: &ConversationId, user: &UserId) -> u64 {
    let all = world
        .message_store
        .page(conversation, PageQuery { limit: usize::MAX, before: None })
        .await
        .unwrap();
    all.iter().filter(|m| m.is_unread_for(user)).count() as u64
}

#[tokio::test]
async fn counts_match_the_stored_receipts() {
    let world = quiet_world();
    let id = world.open_conversation().await;

    let script = [BUYER, BUYER, SELLER, BUYER, SELLER, SELLER, SELLER, BUYER];
    for (n, sender) in script.iter().enumerate() {
        world.say(&id, sender, &format!("line {n}")).await;

        for user in [BUYER, SELLER] {
            let expected = brute_force_unread(&world, &id, &uid(user)).await;
            let counted = world.unread.for_conversation(&id, &uid(user)).await.unwrap();
            assert_eq!(counted, expected, "after line {n} for {user}");
        }

        if n == 3 {
            world.conversations.mark_read(&id, &uid(SELLER)).await.unwrap();
        }
    }

    // Seller read through line 3, then the buyer wrote line 7.
    assert_eq!(world.unread.for_conversation(&id, &uid(SELLER)).await.unwrap(), 1);
    // The buyer never read anything the seller wrote.
    assert_eq!(world.unread.for_conversation(&id, &uid(BUYER)).await.unwrap(), 4);

    for user in [BUYER, SELLER] {
        world.conversations.mark_read(&id, &uid(user)).await.unwrap();
        assert_eq!(world.unread.for_conversation(&id, &uid(user)).await.unwrap(), 0);
        assert_eq!(brute_force_unread(&world, &id, &uid(user)).await, 0);
    }
}

#[tokio::test]
async fn dashboard_summary_lists_only_conversations_with_unread() {
    let world = quiet_world();
    world
        .listings
        .insert_document("listing-2", json!({ "title": "Cottage", "owner": SELLER }));
    world
        .listings
        .insert_document("listing-3", json!({ "title": "Studio", "owner": SELLER }));

    let loft = world.open_conversation().await;
    let cottage = world
        .conversations
        .find_or_create("listing-2", &uid(BUYER))
        .await
        .unwrap()
        .conversation
        .id;
    let studio = world
        .conversations
        .find_or_create("listing-3", &uid(BUYER))
        .await
        .unwrap()
        .conversation
        .id;

    world.say(&loft, BUYER, "loft?").await;
    world.say(&loft, BUYER, "still there?").await;
    world.say(&studio, BUYER, "studio?").await;
    world.say(&cottage, SELLER, "cottage open day on Sunday").await;

    let summary = world.unread.summary(&uid(SELLER)).await.unwrap();
    assert_eq!(summary.total, 3);
    let rows: Vec<_> = summary
        .conversations
        .iter()
        .map(|row| (row.conversation_id.clone(), row.unread))
        .collect();
    assert_eq!(rows, vec![(studio.clone(), 1), (loft.clone(), 2)]);

    let buyer = world.unread.summary(&uid(BUYER)).await.unwrap();
    assert_eq!(buyer.total, 1);
    assert_eq!(buyer.conversations[0].conversation_id, cottage);

    world.conversations.mark_read(&loft, &uid(SELLER)).await.unwrap();
    let summary = world.unread.summary(&uid(SELLER)).await.unwrap();
    assert_eq!(summary.total, 1);
    assert_eq!(summary.conversations.len(), 1);
}

#[tokio::test]
async fn users_without_conversations_have_an_empty_summary() {
    let world = World::new();
    let summary = world.unread.summary(&uid("newcomer")).await.unwrap();
    assert_eq!(summary.total, 0);
    assert!(summary.conversations.is_empty());
}
