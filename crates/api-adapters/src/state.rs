use std::sync::Arc;

use domains::{
    ConversationRepository, IdentityVerifier, ListingDirectory, MessageRepository, SendThrottle,
    UserDirectory,
};
use services::{ConversationService, DeliveryFanout, MessageService, MessagingPolicy, UnreadAggregator};

use crate::metrics::Metrics;
use crate::realtime::SessionHub;

/// The adapters a deployment chooses; everything else is wired here.
pub struct Backends {
    pub conversations: Arc<dyn ConversationRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub listings: Arc<dyn ListingDirectory>,
    pub users: Arc<dyn UserDirectory>,
    pub throttle: Arc<dyn SendThrottle>,
}

#[derive(Clone)]
pub struct AppState {
    pub conversations: Arc<ConversationService>,
    pub messages: Arc<MessageService>,
    pub unread: Arc<UnreadAggregator>,
    pub verifier: Arc<dyn IdentityVerifier>,
    pub hub: Arc<SessionHub>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn assemble(backends: Backends, policy: MessagingPolicy, verifier: Arc<dyn IdentityVerifier>) -> Self {
        let metrics = Arc::new(Metrics::new());
        let hub = Arc::new(SessionHub::new(Arc::clone(&metrics)));
        let fanout = Arc::new(DeliveryFanout::new(hub.clone()));
        let unread = Arc::new(UnreadAggregator::new(
            backends.conversations.clone(),
            backends.messages.clone(),
        ));
        let conversations = Arc::new(ConversationService::new(
            backends.conversations,
            backends.messages.clone(),
            backends.listings,
            backends.users,
            unread.clone(),
            fanout.clone(),
        ));
        let messages = Arc::new(MessageService::new(
            conversations.clone(),
            backends.messages,
            backends.throttle,
            fanout,
            policy,
        ));

        Self {
            conversations,
            messages,
            unread,
            verifier,
            hub,
            metrics,
        }
    }
}
