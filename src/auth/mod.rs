//! Bearer token authentication
//!
//! The dispatcher only consumes the narrow [`Authenticator`] trait: give it a
//! request context, get back a subject id or nothing. Verification failures
//! of any kind (missing header, wrong scheme, bad signature, expired token)
//! collapse to `None`; no error detail crosses the seam.

use crate::context::RequestContext;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::warn;

const BEARER_PREFIX: &str = "Bearer ";

/// Verifies bearer credentials and yields subject identifiers
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Verify a raw token, returning the subject id on success
    async fn verify_token(&self, token: &str) -> Option<String>;

    /// Extract and verify the bearer credential from the request context.
    ///
    /// The `authorization` header must start with the literal `"Bearer "`
    /// (case-sensitive scheme).
    async fn authenticate(&self, context: &RequestContext) -> Option<String> {
        let header = context.header("authorization")?;
        let token = header.strip_prefix(BEARER_PREFIX)?;
        self.verify_token(token).await
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: i64,
    exp: i64,
}

/// HS256 JWT authenticator
pub struct JwtAuthenticator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtAuthenticator {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Mint a token for a user id, valid for 7 days
    pub fn generate_token(&self, user_id: &str) -> anyhow::Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::days(7)).timestamp(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding_key)?;
        Ok(token)
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn verify_token(&self, token: &str) -> Option<String> {
        match decode::<Claims>(token, &self.decoding_key, &Validation::default()) {
            Ok(data) => Some(data.claims.sub),
            Err(e) => {
                warn!("Token verification failed: {}", e);
                None
            }
        }
    }
}
