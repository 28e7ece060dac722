//! Credential validation for socket upgrades and chat queries.
//!
//! Tokens are HS256 JWTs issued by the account service with the claims
//! `{ user_id, version, exp }`. A token is accepted only while `version`
//! matches the user's current `jwt_version`, so bumping that counter
//! revokes every token issued before.

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use mymate_shared::protocol::AuthFailureKind;
use mymate_shared::{Identity, UserId};
use mymate_store::StoreError;

use crate::store::{call_blocking, StoreUnavailable, UserDirectory};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token expired")]
    Expired,

    #[error("invalid token")]
    Invalid,

    #[error("token revoked")]
    Revoked,

    #[error("identity lookup unavailable: {0}")]
    Unavailable(String),
}

impl AuthError {
    pub fn kind(&self) -> AuthFailureKind {
        match self {
            AuthError::Expired => AuthFailureKind::Expired,
            AuthError::Invalid => AuthFailureKind::Invalid,
            AuthError::Revoked => AuthFailureKind::Revoked,
            AuthError::Unavailable(_) => AuthFailureKind::Unavailable,
        }
    }
}

/// Turns a bearer credential into the identity it was issued for.
pub trait IdentityResolver: Send + Sync + 'static {
    fn resolve(&self, credential: &str) -> Result<Identity, AuthError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: UserId,
    pub version: u32,
    /// Expiration time (Unix timestamp, seconds)
    pub exp: u64,
}

pub struct JwtIdentityResolver {
    key: DecodingKey,
    validation: Validation,
    directory: Arc<dyn UserDirectory>,
}

impl JwtIdentityResolver {
    pub fn new(secret: &[u8], directory: Arc<dyn UserDirectory>) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
            directory,
        }
    }

    fn claims(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => {
                    debug!(error = %e, "Rejected token");
                    AuthError::Invalid
                }
            })
    }
}

impl IdentityResolver for JwtIdentityResolver {
    fn resolve(&self, credential: &str) -> Result<Identity, AuthError> {
        let claims = self.claims(credential.trim())?;

        let user = self.directory.user(claims.user_id).map_err(|e| match e {
            StoreError::NotFound => AuthError::Revoked,
            other => AuthError::Unavailable(other.to_string()),
        })?;

        if user.jwt_version != claims.version {
            return Err(AuthError::Revoked);
        }
        Ok(user.identity())
    }
}

/// Resolve a credential off the async runtime, bounded by `deadline`.
pub async fn authenticate(
    resolver: &Arc<dyn IdentityResolver>,
    credential: &str,
    deadline: Duration,
) -> Result<Identity, AuthError> {
    let credential = credential.to_string();
    call_blocking(resolver, deadline, move |resolver| {
        Ok(resolver.resolve(&credential))
    })
    .await
    .map_err(|e: StoreUnavailable| AuthError::Unavailable(e.to_string()))?
}

/// Token from an `Authorization` header, with or without the `Bearer`
/// scheme.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get("authorization")?.to_str().ok()?.trim();
    let token = value.strip_prefix("Bearer ").unwrap_or(value).trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
pub(crate) fn issue_test_token(secret: &[u8], user_id: UserId, version: u32, ttl_secs: i64) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let exp = (chrono::Utc::now().timestamp() + ttl_secs).max(0) as u64;
    let claims = Claims {
        user_id,
        version,
        exp,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret)).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::MemoryStore;
    use axum::http::HeaderValue;

    const SECRET: &[u8] = b"test-secret";

    fn resolver(store: &Arc<MemoryStore>) -> JwtIdentityResolver {
        JwtIdentityResolver::new(SECRET, store.clone())
    }

    #[test]
    fn test_valid_token_resolves_identity() {
        let store = MemoryStore::new();
        let user = store.add_user("Anna");
        let token = issue_test_token(SECRET, user.id, 0, 3600);

        let identity = resolver(&store).resolve(&token).unwrap();
        assert_eq!(identity.id, user.id);
        assert_eq!(identity.name, "Anna");
    }

    #[test]
    fn test_expired_token() {
        let store = MemoryStore::new();
        let user = store.add_user("Anna");
        let token = issue_test_token(SECRET, user.id, 0, -3600);

        assert!(matches!(resolver(&store).resolve(&token), Err(AuthError::Expired)));
    }

    #[test]
    fn test_wrong_secret_is_invalid() {
        let store = MemoryStore::new();
        let user = store.add_user("Anna");
        let token = issue_test_token(b"other-secret", user.id, 0, 3600);

        assert!(matches!(resolver(&store).resolve(&token), Err(AuthError::Invalid)));
        assert!(matches!(resolver(&store).resolve("garbage"), Err(AuthError::Invalid)));
    }

    #[test]
    fn test_version_mismatch_or_unknown_user_is_revoked() {
        let store = MemoryStore::new();
        let user = store.add_user("Anna");

        let stale = issue_test_token(SECRET, user.id, 3, 3600);
        assert!(matches!(resolver(&store).resolve(&stale), Err(AuthError::Revoked)));

        let ghost = issue_test_token(SECRET, UserId::new(), 0, 3600);
        assert!(matches!(resolver(&store).resolve(&ghost), Err(AuthError::Revoked)));
    }

    #[test]
    fn test_directory_outage_is_unavailable() {
        let store = MemoryStore::new();
        let user = store.add_user("Anna");
        store.set_failing(true);
        let token = issue_test_token(SECRET, user.id, 0, 3600);

        let err = resolver(&store).resolve(&token).unwrap_err();
        assert_eq!(err.kind(), AuthFailureKind::Unavailable);
    }

    #[tokio::test]
    async fn test_authenticate_off_runtime() {
        let store = MemoryStore::new();
        let user = store.add_user("Ivan");
        let token = issue_test_token(SECRET, user.id, 0, 3600);
        let resolver: Arc<dyn IdentityResolver> = Arc::new(resolver(&store));

        let identity = authenticate(&resolver, &token, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(identity.id, user.id);
    }

    #[test]
    fn test_bearer_token_forms() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers), Some("abc.def"));

        headers.insert("authorization", HeaderValue::from_static("abc.def"));
        assert_eq!(bearer_token(&headers), Some("abc.def"));

        headers.insert("authorization", HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }
}
