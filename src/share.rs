//! HMAC-signed share URLs.
//!
//! A share grant turns one Zarr token into a short-lived URL that can be
//! fetched without an Authorization header. Grants are stateless: the
//! signature is an HMAC-SHA256 over `method|token|expires` under the
//! server's signing key, so verification is a pure function of the secret,
//! the URL components and the clock.

use crate::error::FrevaRestError;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use validator::Validate;

type HmacSha256 = Hmac<Sha256>;

/// Shortest acceptable grant lifetime.
pub const MIN_TTL_SECONDS: u64 = 60;

/// Longest acceptable grant lifetime (five days).
pub const MAX_TTL_SECONDS: u64 = 432_000;

/// The string the signature covers.
fn signing_payload(method: &str, token: &str, expires: i64) -> String {
    format!("{method}|{token}|{expires}")
}

/// Sign a grant for `method` on `token` until `expires`.
pub fn sign_share(secret: &str, method: &str, token: &str, expires: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(signing_payload(method, token, expires).as_bytes());
    URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
}

/// Verify a grant: recompute the HMAC (compared in constant time) and check
/// the expiry. Any tampering with `sig`, `token` or `expires` fails.
pub fn verify_share(
    secret: &str,
    method: &str,
    token: &str,
    expires: i64,
    sig: &str,
) -> Result<(), FrevaRestError> {
    let provided = URL_SAFE_NO_PAD
        .decode(sig)
        .map_err(|_| FrevaRestError::Forbidden("invalid share signature".to_string()))?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(signing_payload(method, token, expires).as_bytes());
    mac.verify_slice(&provided)
        .map_err(|_| FrevaRestError::Forbidden("invalid share signature".to_string()))?;
    if Utc::now().timestamp() >= expires {
        return Err(FrevaRestError::Unauthenticated(
            "share link has expired".to_string(),
        ));
    }
    Ok(())
}

/// Extract the conversion token from a Zarr store path under the
/// data-portal namespace.
pub fn token_from_path(path: &str) -> Result<String, FrevaRestError> {
    let invalid = || {
        FrevaRestError::InvalidInput(
            "only paths under /data-portal/zarr/ can be shared".to_string(),
        )
    };
    if path.contains("..") {
        return Err(invalid());
    }
    let (_, after) = path.split_once("/data-portal/zarr/").ok_or_else(invalid)?;
    let store = after.split('/').next().ok_or_else(invalid)?;
    let token = store.strip_suffix(".zarr").unwrap_or(store);
    if token.is_empty() {
        return Err(invalid());
    }
    Ok(token.to_string())
}

/// Request body for creating a share grant.
#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ShareRequest {
    /// Path of the Zarr store to share, relative to this API.
    pub path: String,
    #[serde(default = "default_share_ttl")]
    #[validate(range(
        min = 60,
        max = 432_000,
        message = "ttl_seconds must be between one minute and five days"
    ))]
    pub ttl_seconds: u64,
}

fn default_share_ttl() -> u64 {
    600
}

/// A granted share URL.
#[derive(Debug, Serialize)]
pub struct ShareGrant {
    pub url: String,
    pub sig: String,
    pub token: String,
    pub expires: i64,
    pub method: String,
}

/// Issue a grant for one token.
pub fn issue_grant(secret: &str, proxy: &str, token: &str, ttl_seconds: u64) -> ShareGrant {
    let ttl = ttl_seconds.clamp(MIN_TTL_SECONDS, MAX_TTL_SECONDS);
    let expires = Utc::now().timestamp() + ttl as i64;
    let sig = sign_share(secret, "GET", token, expires);
    ShareGrant {
        url: format!(
            "{proxy}/api/freva-nextgen/data-portal/share/{sig}/{token}.zarr?expires={expires}"
        ),
        sig,
        token: token.to_string(),
        expires,
        method: "GET".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grants_verify_within_their_lifetime() {
        let expires = Utc::now().timestamp() + 60;
        let sig = sign_share("secret", "GET", "abc", expires);
        assert!(verify_share("secret", "GET", "abc", expires, &sig).is_ok());
    }

    #[test]
    fn any_tampering_is_rejected() {
        let expires = Utc::now().timestamp() + 60;
        let sig = sign_share("secret", "GET", "abc", expires);
        // Token swapped.
        assert!(verify_share("secret", "GET", "abd", expires, &sig).is_err());
        // Expiry extended.
        assert!(verify_share("secret", "GET", "abc", expires + 1, &sig).is_err());
        // Method changed.
        assert!(verify_share("secret", "PUT", "abc", expires, &sig).is_err());
        // Signature bytes flipped.
        let mut tampered = sig.clone().into_bytes();
        tampered[0] = if tampered[0] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(tampered).unwrap();
        assert!(verify_share("secret", "GET", "abc", expires, &tampered).is_err());
        // Different key.
        assert!(verify_share("other", "GET", "abc", expires, &sig).is_err());
    }

    #[test]
    fn expired_grants_are_unauthenticated() {
        let expires = Utc::now().timestamp() - 1;
        let sig = sign_share("secret", "GET", "abc", expires);
        assert!(matches!(
            verify_share("secret", "GET", "abc", expires, &sig),
            Err(FrevaRestError::Unauthenticated(_))
        ));
    }

    #[test]
    fn tokens_come_from_store_paths() {
        assert_eq!(
            token_from_path("/api/freva-nextgen/data-portal/zarr/abc-123.zarr").unwrap(),
            "abc-123"
        );
        assert_eq!(
            token_from_path("https://host/api/freva-nextgen/data-portal/zarr/abc.zarr/.zmetadata")
                .unwrap(),
            "abc"
        );
        assert!(token_from_path("/api/freva-nextgen/databrowser/overview").is_err());
        assert!(token_from_path("/api/freva-nextgen/data-portal/zarr/../etc").is_err());
    }

    #[test]
    fn grant_ttl_is_clamped() {
        let grant = issue_grant("secret", "https://host", "abc", 10);
        let now = Utc::now().timestamp();
        assert!(grant.expires >= now + MIN_TTL_SECONDS as i64 - 1);
        assert!(grant.url.contains(&grant.sig));
        assert!(grant.url.contains("/data-portal/share/"));
        assert_eq!(grant.method, "GET");
    }
}
