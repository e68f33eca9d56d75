//! JWT verification for the bearer-token surface.
//!
//! Token issuance belongs to the gateway; this service only verifies HS256
//! tokens and extracts the caller's identity from the `user_id` claim.

use chrono::Utc;
use common::UserId;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Claims carried by gateway-issued tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

/// Verifies (and, for tests, issues) HS256 tokens.
pub struct JwtManager {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl JwtManager {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Verifies a token and returns the caller's user ID.
    pub fn verify(&self, token: &str) -> Result<UserId, jsonwebtoken::errors::Error> {
        let data = jsonwebtoken::decode::<Claims>(
            token,
            &self.decoding,
            &Validation::new(Algorithm::HS256),
        )?;
        Ok(UserId::new(data.claims.user_id))
    }

    /// Issues a token for the given user, valid for 24 hours.
    ///
    /// Production tokens come from the gateway; this exists for local
    /// development and tests.
    pub fn issue(&self, user_id: UserId) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            user_id: user_id.as_i64(),
            name: String::new(),
            email: String::new(),
            role: "user".to_string(),
            iat: now,
            exp: now + 24 * 3600,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_then_verify_roundtrips() {
        let manager = JwtManager::new("test-secret");
        let token = manager.issue(UserId::new(7)).unwrap();
        let user_id = manager.verify(&token).unwrap();
        assert_eq!(user_id, UserId::new(7));
    }

    #[test]
    fn verify_rejects_the_wrong_secret() {
        let issuer = JwtManager::new("one-secret");
        let verifier = JwtManager::new("another-secret");

        let token = issuer.issue(UserId::new(7)).unwrap();
        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn verify_rejects_garbage() {
        let manager = JwtManager::new("test-secret");
        assert!(manager.verify("not-a-token").is_err());
    }
}
