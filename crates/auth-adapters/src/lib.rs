//! Identity adapters implementing [`domains::IdentityVerifier`].

#[cfg(feature = "auth-jwt")]
pub mod jwt;

#[cfg(feature = "auth-jwt")]
pub use jwt::{Claims, JwtError, JwtIdentity};
