//! Signed bearer tokens.
//!
//! A token is a compact two-part artifact: `base64url(claims JSON)` followed
//! by `.` and `base64url(HMAC-SHA256(claims bytes))`, keyed by the gateway
//! token secret. Tokens are immutable once issued and carry a fixed 24h TTL;
//! they cannot be individually revoked. Revocation is emulated by the request
//! gate and channel authenticator re-checking live account state on every use.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::accounts::Role;

type HmacSha256 = Hmac<Sha256>;

/// Token lifetime: 24 hours.
pub const TOKEN_TTL_SECS: i64 = 24 * 60 * 60;

/// Claims embedded in a bearer token. Timestamps are unix seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub account_id: String,
    pub role: Role,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// Token verification failures.
///
/// Callers at the HTTP/WS boundary must report all variants uniformly so a
/// forger cannot distinguish "expired" from "tampered"; the variants exist
/// for logging only.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("signature mismatch")]
    BadSignature,
    #[error("token expired")]
    Expired,
}

/// Sign claims into a compact token string.
pub fn sign(claims: &TokenClaims, secret: &[u8]) -> String {
    let payload = serde_json::to_vec(claims).unwrap_or_default();
    let encoded = URL_SAFE_NO_PAD.encode(&payload);
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC-SHA256 accepts any key length");
    mac.update(encoded.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    format!("{encoded}.{signature}")
}

/// Issue a fresh token for an account with the standard TTL.
pub fn issue(account_id: &str, role: Role, now: DateTime<Utc>, secret: &[u8]) -> String {
    let issued_at = now.timestamp();
    let claims = TokenClaims {
        account_id: account_id.to_string(),
        role,
        issued_at,
        expires_at: issued_at + TOKEN_TTL_SECS,
    };
    sign(&claims, secret)
}

/// Verify a token's signature and expiry and return its claims.
pub fn verify(token: &str, secret: &[u8], now: DateTime<Utc>) -> Result<TokenClaims, TokenError> {
    let (encoded, signature) = token.split_once('.').ok_or(TokenError::Malformed)?;
    let provided = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| TokenError::Malformed)?;

    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC-SHA256 accepts any key length");
    mac.update(encoded.as_bytes());
    let expected = mac.finalize().into_bytes();
    if !crate::crypto::timing_safe_eq(&expected, &provided) {
        return Err(TokenError::BadSignature);
    }

    let payload = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|_| TokenError::Malformed)?;
    let claims: TokenClaims =
        serde_json::from_slice(&payload).map_err(|_| TokenError::Malformed)?;

    if claims.expires_at <= now.timestamp() {
        return Err(TokenError::Expired);
    }
    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const SECRET: &[u8] = b"test-token-secret";

    #[test]
    fn test_sign_verify_roundtrip() {
        let now = Utc::now();
        let token = issue("acct-1", Role::Agent, now, SECRET);
        let claims = verify(&token, SECRET, now).unwrap();
        assert_eq!(claims.account_id, "acct-1");
        assert_eq!(claims.role, Role::Agent);
        assert_eq!(claims.expires_at, claims.issued_at + TOKEN_TTL_SECS);
    }

    #[test]
    fn test_verify_rejects_wrong_secret() {
        let now = Utc::now();
        let token = issue("acct-1", Role::Agent, now, SECRET);
        assert_eq!(
            verify(&token, b"other-secret", now).unwrap_err(),
            TokenError::BadSignature
        );
    }

    #[test]
    fn test_verify_rejects_tampered_claims() {
        let now = Utc::now();
        let token = issue("acct-1", Role::Agent, now, SECRET);
        let (_, signature) = token.split_once('.').unwrap();
        let forged_claims = TokenClaims {
            account_id: "acct-1".to_string(),
            role: Role::Admin,
            issued_at: now.timestamp(),
            expires_at: now.timestamp() + TOKEN_TTL_SECS,
        };
        let forged_payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(serde_json::to_vec(&forged_claims).unwrap());
        let forged = format!("{forged_payload}.{signature}");
        assert_eq!(
            verify(&forged, SECRET, now).unwrap_err(),
            TokenError::BadSignature
        );
    }

    #[test]
    fn test_verify_rejects_expired() {
        let issued = Utc::now() - Duration::hours(25);
        let token = issue("acct-1", Role::Agent, issued, SECRET);
        assert_eq!(
            verify(&token, SECRET, Utc::now()).unwrap_err(),
            TokenError::Expired
        );
    }

    #[test]
    fn test_verify_accepts_just_before_expiry() {
        let issued = Utc::now();
        let token = issue("acct-1", Role::Agent, issued, SECRET);
        let almost = issued + Duration::seconds(TOKEN_TTL_SECS - 1);
        assert!(verify(&token, SECRET, almost).is_ok());
    }

    #[test]
    fn test_verify_rejects_garbage() {
        let now = Utc::now();
        assert_eq!(verify("", SECRET, now).unwrap_err(), TokenError::Malformed);
        assert_eq!(
            verify("no-dot-here", SECRET, now).unwrap_err(),
            TokenError::Malformed
        );
        assert_eq!(
            verify("a.b.c", SECRET, now).unwrap_err(),
            TokenError::Malformed
        );
    }
}
