//! HS256 bearer tokens. The messaging core only needs the subject; issuing
//! lives here too so the seed tool and tests can mint credentials.

use chrono::{Duration, Utc};
use domains::{AppError, IdentityVerifier, UserId};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub jti: String,
    pub exp: i64,
    pub iat: i64,
    pub iss: String,
}

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("jwt secret must not be empty")]
    EmptySecret,

    #[error("failed to encode token: {0}")]
    Encode(#[from] jsonwebtoken::errors::Error),
}

pub struct JwtIdentity {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    ttl: Duration,
}

impl JwtIdentity {
    pub fn new(secret: &str, issuer: impl Into<String>, ttl_secs: u64) -> Result<Self, JwtError> {
        if secret.trim().is_empty() {
            return Err(JwtError::EmptySecret);
        }
        let issuer = issuer.into();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            issuer,
            ttl: Duration::seconds(i64::try_from(ttl_secs).unwrap_or(i64::MAX / 1000)),
        })
    }

    /// Mints an access token for `user`.
    pub fn issue(&self, user: &UserId) -> Result<String, JwtError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.to_string(),
            jti: uuid::Uuid::new_v4().to_string(),
            exp: (now + self.ttl).timestamp(),
            iat: now.timestamp(),
            iss: self.issuer.clone(),
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?)
    }
}

impl IdentityVerifier for JwtIdentity {
    fn verify(&self, credential: &str) -> Result<UserId, AppError> {
        let data = decode::<Claims>(credential, &self.decoding_key, &self.validation).map_err(|e| {
            tracing::debug!(error = %e, "rejected bearer token");
            AppError::AuthRequired("invalid or expired token".into())
        })?;

        let subject = data.claims.sub.trim();
        if subject.is_empty() {
            return Err(AppError::AuthRequired("token has no subject".into()));
        }
        Ok(UserId::new(subject))
    }
}
