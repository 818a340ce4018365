//! The identity collaborator: maps a presented token to a member, or to
//! nothing. Token issuance lives outside this service; the engine only ever
//! asks "who is this?".

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::instrument;
use uuid::Uuid;

use super::thread_store::StoreResult;

/// An authenticated dashboard user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberIdentity {
    pub member_id: Uuid,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolves a session token to a member, `None` for anything invalid,
    /// expired, or unknown.
    async fn authenticate(&self, token: &str) -> StoreResult<Option<MemberIdentity>>;
}

/// Production provider: hashed-token lookup against the sessions table.
/// Only the SHA-256 digest of a token is ever stored.
#[derive(Debug, Clone)]
pub struct PgSessionIdentity {
    pool: PgPool,
}

impl PgSessionIdentity {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn digest_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

#[async_trait]
impl IdentityProvider for PgSessionIdentity {
    #[instrument(name = "identity.authenticate", skip_all, err)]
    async fn authenticate(&self, token: &str) -> StoreResult<Option<MemberIdentity>> {
        #[derive(sqlx::FromRow)]
        struct SessionRow {
            member_id: Uuid,
            expires_at: chrono::DateTime<Utc>,
        }

        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT member_id, expires_at FROM sessions WHERE token_digest = $1",
        )
        .bind(digest_token(token))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .filter(|session| session.expires_at > Utc::now())
            .map(|session| MemberIdentity {
                member_id: session.member_id,
            }))
    }
}

/// Fixed token table for the memory profile and tests.
#[derive(Debug, Default)]
pub struct StaticIdentity {
    tokens: HashMap<String, Uuid>,
}

impl StaticIdentity {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>, member_id: Uuid) -> Self {
        self.tokens.insert(token.into(), member_id);
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn authenticate(&self, token: &str) -> StoreResult<Option<MemberIdentity>> {
        Ok(self
            .tokens
            .get(token)
            .map(|member_id| MemberIdentity {
                member_id: *member_id,
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_identity_resolves_known_tokens() {
        let member_id = Uuid::new_v4();
        let identity = StaticIdentity::new().with_token("good", member_id);

        let resolved = identity.authenticate("good").await.unwrap();
        assert_eq!(resolved, Some(MemberIdentity { member_id }));
        assert_eq!(identity.authenticate("bad").await.unwrap(), None);
    }

    #[test]
    fn token_digest_is_stable_and_opaque() {
        let a = digest_token("token-1");
        let b = digest_token("token-1");
        let c = digest_token("token-2");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(!a.contains("token"));
    }
}
