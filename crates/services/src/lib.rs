//! # services
//!
//! The buyer/seller messaging core: conversation lifecycle, message storage
//! rules, send throttling, real-time fan-out and unread counters. Everything
//! here talks to the outside world through the ports in `domains`.

pub mod conversations;
pub mod fanout;
pub mod identity;
pub mod messages;
pub mod rate_limit;
pub mod sanitize;
pub mod unread;

use chrono::{DateTime, SubsecRound, Utc};

pub use conversations::{ConversationService, FindOrCreate};
pub use fanout::{DeliveryFanout, EVENT_CONVERSATION_READ, EVENT_MESSAGE_NEW};
pub use identity::resolve_seller;
pub use messages::{MessageService, MessagingPolicy, SendMessage};
pub use rate_limit::SlidingWindowLimiter;
pub use unread::UnreadAggregator;

/// Current time at the precision the stores keep, so a timestamp returned to
/// a caller equals the one read back later and works as a page cursor.
pub(crate) fn stored_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
