pub mod hub;
#[cfg(feature = "web-axum")]
pub mod socket;

pub use hub::{encode_frame, SessionHub, Subscription};
#[cfg(feature = "web-axum")]
pub use socket::PushSession;
