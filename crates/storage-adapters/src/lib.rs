//! Storage adapters for the messaging ports.
//!
//! `memory` is always available and backs tests and single-node demos.
//! Postgres and Redis adapters are behind the `db-postgres` and `redis`
//! features.

pub mod memory;

#[cfg(feature = "db-postgres")]
pub mod postgres;

#[cfg(feature = "redis")]
pub mod redis;

pub use memory::{
    MemoryConversationRepository, MemoryListingDirectory, MemoryMessageRepository, MemoryUserDirectory,
};

#[cfg(feature = "db-postgres")]
pub use postgres::{PgConversationRepository, PgListingDirectory, PgMessageRepository, PgUserDirectory};

#[cfg(feature = "redis")]
pub use redis::RedisSendThrottle;
