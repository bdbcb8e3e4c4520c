//! rusty-estate/crates/domains/src/lib.rs
//!
//! Entities, identifiers, the error taxonomy and the port traits of the
//! buyer/seller messaging core.

pub mod error;
pub mod ids;
pub mod models;
pub mod ports;

// Re-exporting for easier access in other crates
pub use error::*;
pub use ids::*;
pub use models::*;
pub use ports::*;
