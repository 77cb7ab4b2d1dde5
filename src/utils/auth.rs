use crate::models::user::{Caller, Claims, Role};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand_core::OsRng;
use thiserror::Error;

pub const TOKEN_TTL_DAYS: i64 = 7;

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(password_hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, password_hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(password_hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    let argon2 = Argon2::default();

    argon2
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid or expired token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),

    #[error("token subject is not a user id")]
    BadSubject,
}

/// Issues and verifies signed identity tokens.
///
/// The secret is fixed at construction and shared by every worker.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenService {
    pub fn new(secret: &[u8]) -> Self {
        TokenService {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl: Duration::days(TOKEN_TTL_DAYS),
        }
    }

    pub fn issue(&self, user_id: u64, role: Role) -> Result<String, jsonwebtoken::errors::Error> {
        self.issue_at(user_id, role, Utc::now())
    }

    pub fn issue_at(
        &self,
        user_id: u64,
        role: Role,
        issued_at: DateTime<Utc>,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = Claims {
            sub: user_id.to_string(),
            role,
            exp: (issued_at + self.ttl).timestamp().max(0) as usize,
            iat: issued_at.timestamp().max(0) as usize,
        };

        encode(&Header::default(), &claims, &self.encoding)
    }

    /// Decode and validate a token. Expiry is checked against the wall clock.
    pub fn verify(&self, token: &str) -> Result<Caller, TokenError> {
        let token_data = decode::<Claims>(token, &self.decoding, &Validation::default())?;
        let user_id = token_data
            .claims
            .sub
            .parse::<u64>()
            .map_err(|_| TokenError::BadSubject)?;

        Ok(Caller {
            user_id,
            role: token_data.claims.role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens() -> TokenService {
        TokenService::new(b"test-secret-key")
    }

    #[test]
    fn test_hash_password_returns_hash() {
        let password = "test_password_123";
        let result = hash_password(password);

        assert!(result.is_ok());
        let hash = result.unwrap();
        assert!(!hash.is_empty());
        assert_ne!(hash, password);
    }

    #[test]
    fn test_hash_password_different_each_time() {
        let password = "test_password_123";
        let hash1 = hash_password(password).unwrap();
        let hash2 = hash_password(password).unwrap();

        // Even with same password, hashes should differ due to salt
        assert_ne!(hash1, hash2);
    }

    #[test]
    fn test_verify_password_correct() {
        let password = "correct_password";
        let hash = hash_password(password).unwrap();

        assert!(verify_password(password, &hash));
    }

    #[test]
    fn test_verify_password_incorrect() {
        let hash = hash_password("correct_password").unwrap();

        assert!(!verify_password("wrong_password", &hash));
    }

    #[test]
    fn test_verify_password_garbage_hash() {
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[test]
    fn test_issue_returns_token() {
        let token = tokens().issue(42, Role::User).unwrap();
        assert!(!token.is_empty());
        assert_eq!(token.matches('.').count(), 2);
    }

    #[test]
    fn test_verify_valid_token() {
        let tokens = tokens();
        let token = tokens.issue(42, Role::Admin).unwrap();

        let caller = tokens.verify(&token).unwrap();
        assert_eq!(caller.user_id, 42);
        assert_eq!(caller.role, Role::Admin);
    }

    #[test]
    fn test_verify_invalid_token() {
        assert!(tokens().verify("invalid.token.here").is_err());
    }

    #[test]
    fn test_verify_wrong_secret() {
        let token = TokenService::new(b"secret1").issue(1, Role::User).unwrap();

        let result = TokenService::new(b"secret2").verify(&token);
        assert!(matches!(result, Err(TokenError::Invalid(_))));
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let tokens = tokens();
        let issued_at = Utc::now() - Duration::days(TOKEN_TTL_DAYS + 1);
        let token = tokens.issue_at(1, Role::User, issued_at).unwrap();

        assert!(tokens.verify(&token).is_err());
    }

    #[test]
    fn test_token_lives_seven_days() {
        let tokens = tokens();
        let token = tokens.issue(1, Role::User).unwrap();
        let claims = decode::<Claims>(&token, &tokens.decoding, &Validation::default())
            .unwrap()
            .claims;

        assert_eq!(claims.exp - claims.iat, 7 * 24 * 60 * 60);
        let now = Utc::now().timestamp() as usize;
        assert!(claims.iat <= now);
    }

    #[test]
    fn test_non_numeric_subject_is_rejected() {
        let tokens = tokens();
        let claims = Claims {
            sub: "alice".to_string(),
            role: Role::User,
            exp: (Utc::now() + Duration::hours(1)).timestamp() as usize,
            iat: Utc::now().timestamp() as usize,
        };
        let token = encode(&Header::default(), &claims, &tokens.encoding).unwrap();

        assert!(matches!(tokens.verify(&token), Err(TokenError::BadSubject)));
    }
}
