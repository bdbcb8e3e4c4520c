//! Shared fixtures: memory-backed services, a recording push transport and,
//! with `web-axum`, a router driven through `tower::ServiceExt::oneshot`.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use domains::{
    ConversationId, ConversationRepository, ListingDirectory, MessageRepository, PushTransport,
    SendThrottle, UserDirectory, UserId, UserProfile,
};
use serde_json::{json, Value};
use services::{
    ConversationService, DeliveryFanout, MessageService, MessagingPolicy, SlidingWindowLimiter,
    UnreadAggregator,
};
use storage_adapters::{
    MemoryConversationRepository, MemoryListingDirectory, MemoryMessageRepository, MemoryUserDirectory,
};

pub const LISTING: &str = "listing-1";
pub const BUYER: &str = "buyer-1";
pub const SELLER: &str = "seller-1";
pub const STRANGER: &str = "stranger-1";
pub const JWT_SECRET: &str = "integration-secret";
pub const JWT_ISSUER: &str = "rusty-estate";

pub fn uid(raw: &str) -> UserId {
    UserId::new(raw)
}

/// Listing and profile documents every fixture starts with.
pub fn seed(listings: &MemoryListingDirectory, users: &MemoryUserDirectory) {
    listings.insert_document(
        LISTING,
        json!({
            "title": "Sunny loft near the river",
            "price": 350000,
            "currency": "EUR",
            "images": ["https://cdn.example/loft.jpg"],
            "city": "Lyon",
            "owner": { "$oid": SELLER },
        }),
    );
    users.upsert(UserProfile {
        id: uid(BUYER),
        display_name: "Bea Buyer".into(),
        avatar_url: None,
    });
    users.upsert(UserProfile {
        id: uid(SELLER),
        display_name: "Sam Seller".into(),
        avatar_url: Some("https://cdn.example/sam.png".into()),
    });
}

/// One push handed to the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Push {
    User { user: UserId, event: String, payload: Value },
    Viewers { conversation: ConversationId, event: String, payload: Value },
}

/// Transport that remembers what it was asked to deliver.
#[derive(Default)]
pub struct RecordingTransport {
    pushes: Mutex<Vec<Push>>,
}

impl RecordingTransport {
    pub fn pushes(&self) -> Vec<Push> {
        self.pushes.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn events_for_user(&self, user: &str) -> Vec<String> {
        self.pushes()
            .into_iter()
            .filter_map(|p| match p {
                Push::User { user: u, event, .. } if u.as_str() == user => Some(event),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut pushes) = self.pushes.lock() {
            pushes.clear();
        }
    }

    fn record(&self, push: Push) {
        if let Ok(mut pushes) = self.pushes.lock() {
            pushes.push(push);
        }
    }
}

#[async_trait]
impl PushTransport for RecordingTransport {
    async fn publish_to_user(&self, user: &UserId, event: &str, payload: Value) -> anyhow::Result<usize> {
        self.record(Push::User {
            user: user.clone(),
            event: event.to_string(),
            payload,
        });
        Ok(1)
    }

    async fn publish_to_conversation_viewers(
        &self,
        conversation: &ConversationId,
        event: &str,
        payload: Value,
    ) -> anyhow::Result<usize> {
        self.record(Push::Viewers {
            conversation: conversation.clone(),
            event: event.to_string(),
            payload,
        });
        Ok(1)
    }
}

/// Services wired over memory adapters, without any HTTP layer.
pub struct World {
    pub conversation_store: Arc<MemoryConversationRepository>,
    pub message_store: Arc<MemoryMessageRepository>,
    pub listings: Arc<MemoryListingDirectory>,
    pub users: Arc<MemoryUserDirectory>,
    pub transport: Arc<RecordingTransport>,
    pub conversations: Arc<ConversationService>,
    pub messages: Arc<MessageService>,
    pub unread: Arc<UnreadAggregator>,
}

impl World {
    pub fn new() -> Self {
        Self::with(MessagingPolicy::default(), Arc::new(SlidingWindowLimiter::default()))
    }

    pub fn with(policy: MessagingPolicy, throttle: Arc<dyn SendThrottle>) -> Self {
        let conversation_store = Arc::new(MemoryConversationRepository::new());
        let message_store = Arc::new(MemoryMessageRepository::new());
        let listings = Arc::new(MemoryListingDirectory::new());
        let users = Arc::new(MemoryUserDirectory::new());
        let transport = Arc::new(RecordingTransport::default());
        seed(&listings, &users);

        let conversation_port: Arc<dyn ConversationRepository> = conversation_store.clone();
        let message_port: Arc<dyn MessageRepository> = message_store.clone();
        let listing_port: Arc<dyn ListingDirectory> = listings.clone();
        let user_port: Arc<dyn UserDirectory> = users.clone();

        let fanout = Arc::new(DeliveryFanout::new(transport.clone()));
        let unread = Arc::new(UnreadAggregator::new(conversation_port.clone(), message_port.clone()));
        let conversations = Arc::new(ConversationService::new(
            conversation_port,
            message_port.clone(),
            listing_port,
            user_port,
            unread.clone(),
            fanout.clone(),
        ));
        let messages = Arc::new(MessageService::new(
            conversations.clone(),
            message_port,
            throttle,
            fanout,
            policy,
        ));

        Self {
            conversation_store,
            message_store,
            listings,
            users,
            transport,
            conversations,
            messages,
            unread,
        }
    }

    /// Opens the buyer/seller conversation on the seeded listing.
    pub async fn open_conversation(&self) -> ConversationId {
        self.conversations
            .find_or_create(LISTING, &uid(BUYER))
            .await
            .expect("find_or_create")
            .conversation
            .id
    }

    pub async fn say(&self, conversation: &ConversationId, sender: &str, text: &str) -> domains::Message {
        self.messages
            .append(
                conversation,
                &uid(sender),
                services::SendMessage {
                    body: Some(text.into()),
                    attachment: None,
                },
            )
            .await
            .expect("append")
    }
}

#[cfg(feature = "web-axum")]
pub mod http {
    use super::*;

    use api_adapters::{build_router, AppState, Backends};
    use auth_adapters::JwtIdentity;
    use axum::body::{to_bytes, Body};
    use axum::http::{HeaderMap, Method, Request, StatusCode};
    use axum::Router;
    use tower::ServiceExt;

    pub struct TestResponse {
        pub status: StatusCode,
        pub headers: HeaderMap,
        pub body: Value,
    }

    pub struct TestApp {
        pub router: Router,
        pub state: AppState,
        pub jwt: Arc<JwtIdentity>,
        pub listings: Arc<MemoryListingDirectory>,
        pub users: Arc<MemoryUserDirectory>,
    }

    impl TestApp {
        pub fn new() -> Self {
            Self::with_policy(MessagingPolicy::default())
        }

        pub fn with_policy(policy: MessagingPolicy) -> Self {
            let listings = Arc::new(MemoryListingDirectory::new());
            let users = Arc::new(MemoryUserDirectory::new());
            seed(&listings, &users);

            let jwt = Arc::new(JwtIdentity::new(JWT_SECRET, JWT_ISSUER, 3600).expect("jwt"));
            let state = AppState::assemble(
                Backends {
                    conversations: Arc::new(MemoryConversationRepository::new()),
                    messages: Arc::new(MemoryMessageRepository::new()),
                    listings: listings.clone(),
                    users: users.clone(),
                    throttle: Arc::new(SlidingWindowLimiter::default()),
                },
                policy,
                jwt.clone(),
            );
            let router = build_router(state.clone(), &[]);

            Self {
                router,
                state,
                jwt,
                listings,
                users,
            }
        }

        pub fn token(&self, user: &str) -> String {
            self.jwt.issue(&uid(user)).expect("issue token")
        }

        pub async fn call(&self, method: Method, uri: &str, user: Option<&str>, body: Option<Value>) -> TestResponse {
            let mut request = Request::builder().method(method).uri(uri);
            if let Some(user) = user {
                request = request.header("authorization", format!("Bearer {}", self.token(user)));
            }
            let request = match body {
                Some(body) => request
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string())),
                None => request.body(Body::empty()),
            }
            .expect("request");

            self.send(request).await
        }

        pub async fn send(&self, request: Request<Body>) -> TestResponse {
            let response = self.router.clone().oneshot(request).await.expect("infallible");
            let status = response.status();
            let headers = response.headers().clone();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
            let body = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes)
                    .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
            };
            TestResponse { status, headers, body }
        }

        pub async fn get(&self, uri: &str, user: &str) -> TestResponse {
            self.call(Method::GET, uri, Some(user), None).await
        }

        pub async fn post(&self, uri: &str, user: &str, body: Value) -> TestResponse {
            self.call(Method::POST, uri, Some(user), Some(body)).await
        }

        /// Opens the seeded conversation as the buyer and returns its id.
        pub async fn open_conversation(&self) -> String {
            let response = self
                .post("/conversations/find-or-create", BUYER, json!({ "listingId": LISTING }))
                .await;
            response.body["conversationId"]
                .as_str()
                .expect("conversationId")
                .to_string()
        }
    }
}
