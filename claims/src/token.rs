use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::customer::normalize_email;
use crate::error::ClaimError;

type HmacSha256 = Hmac<Sha256>;

/// Default claim-token lifetime.
pub const DEFAULT_TTL_MINUTES: i64 = 15;

/// Self-encoding claim token: `base64(payload "|" hex(hmac))` where the
/// payload is the JSON-serialized claims. No server-side storage is needed
/// to verify one; single-use is enforced separately by the store's burned
/// token ledger.
pub struct TokenIssuer {
    secret: Vec<u8>,
    ttl: Duration,
}

#[derive(Serialize, Deserialize)]
struct TokenClaims {
    email: String,
    expires_at: i64,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            secret: secret.to_vec(),
            ttl,
        }
    }

    pub fn issue(&self, email: &str) -> Result<String, ClaimError> {
        self.issue_at(email, Utc::now())
    }

    pub(crate) fn issue_at(&self, email: &str, now: DateTime<Utc>) -> Result<String, ClaimError> {
        let claims = TokenClaims {
            email: normalize_email(email),
            expires_at: (now + self.ttl).timestamp(),
        };
        let payload = serde_json::to_vec(&claims)?;
        let tag = self.mac(&payload)?;
        let mut raw = payload;
        raw.push(b'|');
        raw.extend_from_slice(hex::encode(tag).as_bytes());
        Ok(BASE64.encode(raw))
    }

    /// Validates the token's MAC and expiry, returning the bound email.
    /// A token valid at issuance time T is accepted during [T, T+ttl).
    pub fn verify(&self, token: &str) -> Result<String, ClaimError> {
        self.verify_at(token, Utc::now())
    }

    pub(crate) fn verify_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<String, ClaimError> {
        let raw = BASE64
            .decode(token.trim())
            .map_err(|_| ClaimError::invalid_token())?;
        let split = raw
            .iter()
            .rposition(|&b| b == b'|')
            .ok_or_else(ClaimError::invalid_token)?;
        let (payload, tag_hex) = (&raw[..split], &raw[split + 1..]);
        let tag = hex::decode(tag_hex).map_err(|_| ClaimError::invalid_token())?;

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| ClaimError::Config("invalid token secret"))?;
        mac.update(payload);
        mac.verify_slice(&tag)
            .map_err(|_| ClaimError::invalid_token())?;

        let claims: TokenClaims =
            serde_json::from_slice(payload).map_err(|_| ClaimError::invalid_token())?;
        if now.timestamp() >= claims.expires_at {
            return Err(ClaimError::invalid_token());
        }
        Ok(claims.email)
    }

    fn mac(&self, payload: &[u8]) -> Result<Vec<u8>, ClaimError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| ClaimError::Config("invalid token secret"))?;
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(b"test-token-secret", Duration::minutes(DEFAULT_TTL_MINUTES))
    }

    #[test]
    fn round_trips_within_ttl() {
        let issuer = issuer();
        let token = issuer.issue("User@Test.com").unwrap();
        assert_eq!(issuer.verify(&token).unwrap(), "user@test.com");
    }

    #[test]
    fn rejects_after_expiry() {
        let issuer = issuer();
        let issued = Utc::now() - Duration::minutes(16);
        let token = issuer.issue_at("user@test.com", issued).unwrap();
        let err = issuer.verify(&token).unwrap_err();
        assert_eq!(
            err.to_string(),
            ClaimError::invalid_token().to_string(),
            "expired tokens must be indistinguishable from invalid ones"
        );
    }

    #[test]
    fn accepts_just_before_expiry() {
        let issuer = issuer();
        let issued = Utc::now() - Duration::minutes(14);
        let token = issuer.issue_at("user@test.com", issued).unwrap();
        assert!(issuer.verify(&token).is_ok());
    }

    #[test]
    fn rejects_tampered_payload() {
        let issuer = issuer();
        let token = issuer.issue("user@test.com").unwrap();
        let mut raw = BASE64.decode(&token).unwrap();
        raw[2] ^= 0x01;
        let forged = BASE64.encode(raw);
        let err = issuer.verify(&forged).unwrap_err();
        assert_eq!(err.to_string(), ClaimError::invalid_token().to_string());
    }

    #[test]
    fn rejects_wrong_secret() {
        let token = issuer().issue("user@test.com").unwrap();
        let other = TokenIssuer::new(b"other-secret", Duration::minutes(15));
        assert!(other.verify(&token).is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(issuer().verify("not-a-token").is_err());
        assert!(issuer().verify("").is_err());
    }
}
