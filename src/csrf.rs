//! CSRF token helpers
//!
//! Double-submit scheme: the client receives an opaque token while the
//! server keeps only its SHA-256 hash in a cookie. Validation hashes the
//! presented token and compares in constant time.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{Result, TidepoolError};

pub const CSRF_TOKEN_BYTES: usize = 32;
pub const CSRF_TOKEN_TTL_SECONDS: u64 = 60 * 60;
pub const CSRF_COOKIE_NAME: &str = "tp-auth-csrf";
pub const CSRF_HEADER: &str = "x-csrf-token";
pub const CSRF_ALT_HEADER: &str = "x-xsrf-token";

/// A freshly issued token pair: the value handed to the client and the
/// hashed value for the server-side cookie.
#[derive(Debug, Clone)]
pub struct IssuedCsrfToken {
    pub token: String,
    pub cookie_value: String,
}

pub fn issue_csrf_token() -> IssuedCsrfToken {
    let mut bytes = [0u8; CSRF_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    let token = URL_SAFE_NO_PAD.encode(bytes);
    IssuedCsrfToken {
        cookie_value: hash_csrf_token(&token),
        token,
    }
}

/// Base64url-encoded SHA-256 of the token, the only form the server stores.
pub fn hash_csrf_token(token: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(token.as_bytes()))
}

/// Validate a client-presented token against the stored cookie value.
///
/// Missing or undecodable inputs fail closed; the comparison itself is
/// constant time.
pub fn validate_csrf_token(provided: Option<&str>, cookie_value: Option<&str>) -> bool {
    let (Some(token), Some(cookie)) = (provided, cookie_value) else {
        return false;
    };
    if token.is_empty() || cookie.is_empty() {
        return false;
    }

    let Ok(expected) = URL_SAFE_NO_PAD.decode(cookie) else {
        return false;
    };
    let received = Sha256::digest(token.as_bytes());

    if expected.len() != received.len() {
        return false;
    }
    expected.ct_eq(&received).into()
}

/// Extract the token from request headers (`x-csrf-token`, then
/// `x-xsrf-token`).
pub fn csrf_token_from_headers(headers: &axum::http::HeaderMap) -> Option<String> {
    for name in [CSRF_HEADER, CSRF_ALT_HEADER] {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            return Some(value.to_string());
        }
    }
    None
}

/// Fallible counterpart of [`validate_csrf_token`].
pub fn require_valid_csrf_token(provided: Option<&str>, cookie_value: Option<&str>) -> Result<()> {
    if validate_csrf_token(provided, cookie_value) {
        Ok(())
    } else {
        Err(TidepoolError::InvalidCsrf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;

    #[test]
    fn test_issue_and_validate_round_trip() {
        let issued = issue_csrf_token();
        assert!(validate_csrf_token(
            Some(&issued.token),
            Some(&issued.cookie_value)
        ));
    }

    #[test]
    fn test_tokens_are_unique_and_unpadded() {
        let a = issue_csrf_token();
        let b = issue_csrf_token();
        assert_ne!(a.token, b.token);
        assert!(!a.token.contains('='));
        // 32 bytes base64url without padding.
        assert_eq!(a.token.len(), 43);
    }

    #[test]
    fn test_wrong_token_rejected() {
        let issued = issue_csrf_token();
        let other = issue_csrf_token();
        assert!(!validate_csrf_token(
            Some(&other.token),
            Some(&issued.cookie_value)
        ));
    }

    #[test]
    fn test_missing_or_empty_inputs_fail_closed() {
        let issued = issue_csrf_token();
        assert!(!validate_csrf_token(None, Some(&issued.cookie_value)));
        assert!(!validate_csrf_token(Some(&issued.token), None));
        assert!(!validate_csrf_token(Some(""), Some(&issued.cookie_value)));
        assert!(!validate_csrf_token(Some(&issued.token), Some("")));
    }

    #[test]
    fn test_undecodable_cookie_rejected() {
        let issued = issue_csrf_token();
        assert!(!validate_csrf_token(
            Some(&issued.token),
            Some("not base64url!!!")
        ));
    }

    #[test]
    fn test_header_extraction_prefers_primary() {
        let mut headers = HeaderMap::new();
        headers.insert(CSRF_ALT_HEADER, "alt-token".parse().unwrap());
        assert_eq!(
            csrf_token_from_headers(&headers).as_deref(),
            Some("alt-token")
        );

        headers.insert(CSRF_HEADER, "primary-token".parse().unwrap());
        assert_eq!(
            csrf_token_from_headers(&headers).as_deref(),
            Some("primary-token")
        );
    }

    #[test]
    fn test_require_valid_maps_to_error() {
        let issued = issue_csrf_token();
        assert!(require_valid_csrf_token(Some(&issued.token), Some(&issued.cookie_value)).is_ok());
        assert!(matches!(
            require_valid_csrf_token(None, Some(&issued.cookie_value)),
            Err(TidepoolError::InvalidCsrf)
        ));
    }
}
