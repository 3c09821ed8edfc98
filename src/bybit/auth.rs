//! Authentication utilities for the Bybit V5 API
//!
//! Signed requests carry an HMAC-SHA256 hex digest of
//! `timestamp + api_key + recv_window + payload`, where the payload is the
//! query string for GET and the JSON body for POST.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::ConfigError;

type HmacSha256 = Hmac<Sha256>;

pub const HEADER_API_KEY: &str = "X-BAPI-API-KEY";
pub const HEADER_SIGN: &str = "X-BAPI-SIGN";
pub const HEADER_TIMESTAMP: &str = "X-BAPI-TIMESTAMP";
pub const HEADER_RECV_WINDOW: &str = "X-BAPI-RECV-WINDOW";

/// Hex HMAC-SHA256 of `message` keyed by `secret`
pub fn hmac_hex(message: &str, secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Signature for a V5 request
///
/// # Example
///
/// ```
/// use regime_trader::bybit::auth::sign_request;
///
/// let sig = sign_request(1_700_000_000_000, "key", 5000, "category=linear", "secret");
/// assert_eq!(sig.len(), 64);
/// ```
pub fn sign_request(
    timestamp_ms: i64,
    api_key: &str,
    recv_window_ms: u64,
    payload: &str,
    secret: &str,
) -> String {
    let message = format!("{}{}{}{}", timestamp_ms, api_key, recv_window_ms, payload);
    hmac_hex(&message, secret)
}

/// Constant-time byte comparison to prevent timing attacks
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// API credentials container
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    api_secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"***")
            .finish()
    }
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    /// Environment variable names for an account, e.g. `BYBIT_API_KEY_MAIN`
    pub fn env_vars(account: &str) -> (String, String) {
        let suffix = account.to_uppercase().replace(['-', ' '], "_");
        (
            format!("BYBIT_API_KEY_{}", suffix),
            format!("BYBIT_API_SECRET_{}", suffix),
        )
    }

    /// Load credentials for `account` from the environment
    pub fn from_env(account: &str) -> Result<Self, ConfigError> {
        let (key_var, secret_var) = Self::env_vars(account);
        match (std::env::var(&key_var), std::env::var(&secret_var)) {
            (Ok(key), Ok(secret)) if !key.is_empty() && !secret.is_empty() => {
                Ok(Self::new(key, secret))
            }
            _ => Err(ConfigError::MissingCredentials {
                account: account.to_string(),
                key_var,
                secret_var,
            }),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Sign a payload at `timestamp_ms`
    pub fn sign(&self, timestamp_ms: i64, recv_window_ms: u64, payload: &str) -> String {
        sign_request(
            timestamp_ms,
            &self.api_key,
            recv_window_ms,
            payload,
            &self.api_secret,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_known_vector() {
        // RFC 4231 test case 2
        assert_eq!(
            hmac_hex("what do ya want for nothing?", "Jefe"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_signature_covers_every_part() {
        let base = sign_request(1, "key", 5000, "a=1", "secret");
        assert_eq!(base.len(), 64);
        assert!(base.chars().all(|c| c.is_ascii_hexdigit()));

        assert_ne!(base, sign_request(2, "key", 5000, "a=1", "secret"));
        assert_ne!(base, sign_request(1, "other", 5000, "a=1", "secret"));
        assert_ne!(base, sign_request(1, "key", 6000, "a=1", "secret"));
        assert_ne!(base, sign_request(1, "key", 5000, "a=2", "secret"));
        assert_eq!(base, hmac_hex("1key5000a=1", "secret"));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }

    #[test]
    fn test_env_var_names() {
        let (k, s) = Credentials::env_vars("sub-1");
        assert_eq!(k, "BYBIT_API_KEY_SUB_1");
        assert_eq!(s, "BYBIT_API_SECRET_SUB_1");
    }

    #[test]
    fn test_debug_hides_secret() {
        let c = Credentials::new("k", "very-secret");
        assert!(!format!("{:?}", c).contains("very-secret"));
    }
}
