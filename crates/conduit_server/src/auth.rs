//! Account token authentication.
//!
//! Tokens are HMAC-SHA256 signed strings of the form
//! `<account id>.<issued at, unix millis>.<hex signature>`, where the
//! signature covers everything before the last dot.

use crate::error::{ServerError, ServerResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt::Write;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

/// Issues and validates account tokens.
#[derive(Clone)]
pub struct TokenValidator {
    secret: Vec<u8>,
    expiry: Duration,
}

impl TokenValidator {
    /// Creates a validator.
    pub fn new(secret: Vec<u8>, expiry: Duration) -> Self {
        Self { secret, expiry }
    }

    /// Issues a token for `account_id`.
    pub fn create_token(&self, account_id: &str) -> ServerResult<String> {
        self.create_token_at(account_id, now_millis())
    }

    fn create_token_at(&self, account_id: &str, issued_at: u64) -> ServerResult<String> {
        let payload = format!("{account_id}.{issued_at}");
        let signature = self.sign(payload.as_bytes())?;
        Ok(format!("{payload}.{}", to_hex(&signature)))
    }

    /// Validates `token` and returns the account id it was issued to.
    pub fn validate_token(&self, token: &str) -> ServerResult<String> {
        let (payload, signature) = token
            .rsplit_once('.')
            .ok_or_else(|| ServerError::NotAuthorized("malformed token".into()))?;
        let (account_id, issued_at) = payload
            .rsplit_once('.')
            .ok_or_else(|| ServerError::NotAuthorized("malformed token".into()))?;
        let issued_at: u64 = issued_at
            .parse()
            .map_err(|_| ServerError::NotAuthorized("malformed token".into()))?;

        let expected = to_hex(&self.sign(payload.as_bytes())?);
        if expected != signature {
            return Err(ServerError::NotAuthorized("invalid signature".into()));
        }

        let expiry_millis = self.expiry.as_millis() as u64;
        if now_millis() > issued_at.saturating_add(expiry_millis) {
            return Err(ServerError::NotAuthorized("token expired".into()));
        }
        Ok(account_id.to_string())
    }

    fn sign(&self, data: &[u8]) -> ServerResult<[u8; 32]> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| ServerError::Internal(format!("hmac key: {e}")))?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().into())
    }
}

impl std::fmt::Debug for TokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenValidator")
            .field("expiry", &self.expiry)
            .finish_non_exhaustive()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> TokenValidator {
        TokenValidator::new(
            b"test-secret-key-32-bytes-long!!".to_vec(),
            Duration::from_secs(3600),
        )
    }

    #[test]
    fn create_and_validate_token() {
        let validator = validator();
        let token = validator.create_token("alice@example.com").unwrap();
        assert_eq!(validator.validate_token(&token).unwrap(), "alice@example.com");
    }

    #[test]
    fn account_ids_may_contain_dots() {
        let validator = validator();
        let token = validator.create_token("a.b.c").unwrap();
        assert_eq!(validator.validate_token(&token).unwrap(), "a.b.c");
    }

    #[test]
    fn reject_tampered_token() {
        let validator = validator();
        let token = validator.create_token("alice").unwrap();
        let tampered = token.replacen("alice", "mallory", 1);
        assert!(matches!(
            validator.validate_token(&tampered),
            Err(ServerError::NotAuthorized(_))
        ));
    }

    #[test]
    fn reject_other_secret() {
        let token = validator().create_token("alice").unwrap();
        let other = TokenValidator::new(b"another-secret".to_vec(), Duration::from_secs(3600));
        assert!(other.validate_token(&token).is_err());
    }

    #[test]
    fn reject_expired_token() {
        let validator = validator();
        let token = validator.create_token_at("alice", 0).unwrap();
        assert!(matches!(
            validator.validate_token(&token),
            Err(ServerError::NotAuthorized(msg)) if msg == "token expired"
        ));
    }

    #[test]
    fn reject_malformed_token() {
        assert!(validator().validate_token("garbage").is_err());
        assert!(validator().validate_token("a.notanumber.ff").is_err());
    }
}
