use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use super::principal::Principal;

/// Resolves an opaque session token to the calling principal.
#[async_trait]
pub trait TokenManager: Send + Sync {
    async fn principal(&self, token: &str) -> Option<Principal>;
}

/// Sessions issued and held in process memory.
#[derive(Default)]
pub struct SessionTokenManager {
    sessions: RwLock<HashMap<String, Principal>>,
}

impl SessionTokenManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self, principal: Principal) -> String {
        let token = Uuid::new_v4().to_string();
        self.sessions.write().insert(token.clone(), principal);
        token
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.sessions.write().remove(token).is_some()
    }
}

#[async_trait]
impl TokenManager for SessionTokenManager {
    async fn principal(&self, token: &str) -> Option<Principal> {
        self.sessions.read().get(token).cloned()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Claims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

/// HS256 bearer tokens whose `sub` claim names a user.
pub struct JwtTokenManager {
    decoding: DecodingKey,
    encoding: EncodingKey,
}

impl JwtTokenManager {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            encoding: EncodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue(&self, user: &str, ttl: Duration) -> anyhow::Result<String> {
        let claims = Claims {
            sub: user.to_string(),
            exp: Some(Utc::now().timestamp() as u64 + ttl.as_secs()),
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }
}

#[async_trait]
impl TokenManager for JwtTokenManager {
    async fn principal(&self, token: &str) -> Option<Principal> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["sub"]);
        decode::<Claims>(token, &self.decoding, &validation)
            .ok()
            .map(|d| Principal::user(d.claims.sub))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn session_tokens_resolve_until_revoked() {
        let tm = SessionTokenManager::new();
        let token = tm.issue(Principal::user("alice"));
        assert_eq!(tm.principal(&token).await, Some(Principal::user("alice")));
        assert!(tm.revoke(&token));
        assert_eq!(tm.principal(&token).await, None);
        assert_eq!(tm.principal("bogus").await, None);
    }

    #[tokio::test]
    async fn jwt_tokens_carry_the_user() {
        let tm = JwtTokenManager::new("secret");
        let token = tm.issue("bob", Duration::from_secs(60)).unwrap();
        assert_eq!(tm.principal(&token).await, Some(Principal::user("bob")));

        let other = JwtTokenManager::new("another-secret");
        assert_eq!(other.principal(&token).await, None);
    }

    #[tokio::test]
    async fn expired_jwt_is_rejected() {
        let tm = JwtTokenManager::new("secret");
        let claims = Claims {
            sub: "carol".to_string(),
            exp: Some(1_000),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &tm.encoding).unwrap();
        assert_eq!(tm.principal(&token).await, None);
    }
}
