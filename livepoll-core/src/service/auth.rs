//! Voter identity tokens
//!
//! Anyone can request an anonymous identity; the signed token is the only
//! thing tying retried vote requests to one voter. HS256 with a shared
//! secret: every replica can verify what any replica issued.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{models::VoterId, Error, Result};

/// JWT claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Voter ID
    pub sub: String,
    /// Display name shown next to comments
    pub name: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

impl Claims {
    #[must_use]
    pub fn voter_id(&self) -> VoterId {
        VoterId::from_string(self.sub.clone())
    }
}

/// Token service for signing and verifying voter tokens
#[derive(Clone)]
pub struct TokenService {
    encoding_key: Arc<EncodingKey>,
    decoding_key: Arc<DecodingKey>,
    token_duration: Duration,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService").finish()
    }
}

impl TokenService {
    #[must_use]
    pub fn new(secret: &str, token_duration_hours: i64) -> Self {
        Self {
            encoding_key: Arc::new(EncodingKey::from_secret(secret.as_bytes())),
            decoding_key: Arc::new(DecodingKey::from_secret(secret.as_bytes())),
            token_duration: Duration::hours(token_duration_hours),
        }
    }

    /// Issue a token for a voter
    pub fn issue(&self, voter_id: &VoterId, name: &str) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: voter_id.as_str().to_string(),
            name: name.to_string(),
            iat: now.timestamp(),
            exp: (now + self.token_duration).timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| Error::Internal(format!("Failed to sign token: {e}")))
    }

    /// Verify a token and return its claims
    pub fn verify(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(token, &self.decoding_key, &Validation::new(Algorithm::HS256))
            .map(|data| data.claims)
            .map_err(|e| Error::Authentication(format!("Invalid token: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService::new("test-secret", 2)
    }

    #[test]
    fn test_issue_and_verify() {
        let svc = service();
        let voter_id = VoterId::new();

        let token = svc.issue(&voter_id, "anon-12345678").unwrap();
        let claims = svc.verify(&token).unwrap();

        assert_eq!(claims.sub, voter_id.as_str());
        assert_eq!(claims.name, "anon-12345678");
        assert_eq!(claims.exp, claims.iat + 2 * 3600);
    }

    #[test]
    fn test_rejects_tampered_token() {
        let svc = service();
        let token = svc.issue(&VoterId::new(), "anon").unwrap();

        let parts: Vec<&str> = token.split('.').collect();
        let tampered = format!("{}.{}.tampered", parts[0], parts[1]);

        assert!(matches!(
            svc.verify(&tampered),
            Err(Error::Authentication(_))
        ));
    }

    #[test]
    fn test_rejects_token_from_other_secret() {
        let token = TokenService::new("other-secret", 2)
            .issue(&VoterId::new(), "anon")
            .unwrap();
        assert!(service().verify(&token).is_err());
    }
}
