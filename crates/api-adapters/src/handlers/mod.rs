//! REST handlers. Each one authenticates through [`crate::extract::AuthUser`]
//! and delegates to the services; errors leave as [`crate::error::ApiError`].

pub mod conversations;
pub mod health;
pub mod messages;
