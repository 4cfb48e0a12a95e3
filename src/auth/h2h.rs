//! Host-to-host request verification
//!
//! Headers: `X-Client-ID`, `X-API-Key`, `X-Timestamp` (RFC3339 or
//! unix-seconds), `X-Signature` = lowercase hex
//! HMAC-SHA256(secret, timestamp || body). Replay window is +/- 5 minutes.

use chrono::{DateTime, Duration, TimeZone, Utc};
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;

use crate::domain::ApiClient;
use crate::store::{ApiClientStore, StoreError};

type HmacSha256 = Hmac<Sha256>;

/// Replay tolerance either side of server time.
const REPLAY_WINDOW_MINUTES: i64 = 5;

#[derive(Debug, Error)]
pub enum H2hError {
    #[error("missing required H2H headers")]
    MissingHeaders,
    #[error("unknown client")]
    UnknownClient,
    #[error("client is disabled")]
    ClientDisabled,
    #[error("invalid API key")]
    InvalidApiKey,
    #[error("source address not allowed")]
    IpNotAllowed,
    #[error("invalid timestamp format")]
    InvalidTimestamp,
    #[error("timestamp outside the replay window")]
    TimestampOutOfWindow,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("request rate limit exceeded")]
    RateLimited,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The four mandatory headers of a signed request.
#[derive(Debug, Clone)]
pub struct H2hHeaders {
    pub client_id: String,
    pub api_key: String,
    pub timestamp: String,
    pub signature: String,
}

/// Compute the request signature for `timestamp || body`.
pub fn sign(secret: &str, timestamp: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(timestamp.as_bytes());
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time signature check.
pub fn verify_signature(
    secret: &str,
    timestamp: &str,
    signature: &str,
    body: &[u8],
) -> Result<(), H2hError> {
    let provided = hex::decode(signature.trim().to_lowercase())
        .map_err(|_| H2hError::InvalidSignature)?;
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(timestamp.as_bytes());
    mac.update(body);
    mac.verify_slice(&provided)
        .map_err(|_| H2hError::InvalidSignature)
}

/// Accepts RFC3339 (`2026-03-14T09:26:53Z`) or unix seconds (`1773480413`).
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, H2hError> {
    let raw = raw.trim();
    if let Ok(ts) = raw.parse::<i64>() {
        return Utc
            .timestamp_opt(ts, 0)
            .single()
            .ok_or(H2hError::InvalidTimestamp);
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| H2hError::InvalidTimestamp)
}

fn check_window(ts: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), H2hError> {
    let drift = now - ts;
    let window = Duration::minutes(REPLAY_WINDOW_MINUTES);
    if drift > window || -drift > window {
        return Err(H2hError::TimestampOutOfWindow);
    }
    Ok(())
}

/// Fixed-window per-client request counter.
struct RateLimiter {
    windows: DashMap<String, (i64, i32)>,
}

impl RateLimiter {
    fn new() -> Self {
        Self {
            windows: DashMap::new(),
        }
    }

    /// Count one request in the client's current minute window. Returns
    /// false once the window exceeds `limit`; `limit <= 0` disables the
    /// check.
    fn admit(&self, key: &str, limit: i32, minute: i64) -> bool {
        if limit <= 0 {
            return true;
        }
        let mut entry = self.windows.entry(key.to_string()).or_insert((minute, 0));
        if entry.0 != minute {
            *entry = (minute, 0);
        }
        entry.1 += 1;
        entry.1 <= limit
    }
}

/// Full verification pipeline against the client registry.
pub struct H2hVerifier {
    clients: Arc<dyn ApiClientStore>,
    limiter: RateLimiter,
}

impl H2hVerifier {
    pub fn new(clients: Arc<dyn ApiClientStore>) -> Self {
        Self {
            clients,
            limiter: RateLimiter::new(),
        }
    }

    /// Verify a signed request end to end and return the matched client.
    pub async fn verify(
        &self,
        headers: &H2hHeaders,
        source_ip: IpAddr,
        body: &[u8],
    ) -> Result<ApiClient, H2hError> {
        if headers.client_id.is_empty()
            || headers.api_key.is_empty()
            || headers.timestamp.is_empty()
            || headers.signature.is_empty()
        {
            return Err(H2hError::MissingHeaders);
        }

        let client = match self.clients.get_by_client_id(&headers.client_id).await {
            Ok(client) => client,
            Err(StoreError::ApiClientNotFound) => return Err(H2hError::UnknownClient),
            Err(e) => return Err(e.into()),
        };

        if !client.is_active {
            return Err(H2hError::ClientDisabled);
        }
        if client.api_key != headers.api_key {
            return Err(H2hError::InvalidApiKey);
        }
        if !client.is_ip_allowed(source_ip) {
            return Err(H2hError::IpNotAllowed);
        }

        let ts = parse_timestamp(&headers.timestamp)?;
        check_window(ts, Utc::now())?;

        verify_signature(&client.secret, &headers.timestamp, &headers.signature, body)?;

        // Only authenticated requests consume the client's budget.
        let minute = Utc::now().timestamp() / 60;
        if !self
            .limiter
            .admit(&client.client_id, client.max_requests_per_minute, minute)
        {
            return Err(H2hError::RateLimited);
        }

        Ok(client)
    }

    /// Best-effort activity stamp, fired after successful verification.
    pub async fn touch(&self, client_id: &str) {
        if let Err(e) = self.clients.touch_last_used(client_id).await {
            tracing::warn!(client_id, error = %e, "failed to stamp client activity");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryBackend;
    use uuid::Uuid;

    fn client(secret: &str) -> ApiClient {
        ApiClient {
            id: Uuid::new_v4(),
            client_id: "partner-01".into(),
            api_key: "AK-123".into(),
            secret: secret.into(),
            user_id: None,
            ip_whitelist: vec!["203.0.113.0/24".into()],
            is_active: true,
            max_requests_per_minute: 60,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_used_at: None,
        }
    }

    fn headers(secret: &str, timestamp: String, body: &[u8]) -> H2hHeaders {
        let signature = sign(secret, &timestamp, body);
        H2hHeaders {
            client_id: "partner-01".into(),
            api_key: "AK-123".into(),
            timestamp,
            signature,
        }
    }

    #[test]
    fn test_sign_is_lowercase_hex() {
        let sig = sign("secret", "1773480413", b"{}");
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_verify_signature_roundtrip() {
        let sig = sign("secret", "1773480413", b"payload");
        assert!(verify_signature("secret", "1773480413", &sig, b"payload").is_ok());
        assert!(verify_signature("secret", "1773480413", &sig, b"tampered").is_err());
        assert!(verify_signature("other", "1773480413", &sig, b"payload").is_err());
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert!(parse_timestamp("1773480413").is_ok());
        assert!(parse_timestamp("2026-03-14T09:26:53Z").is_ok());
        assert!(parse_timestamp("2026-03-14T09:26:53+07:00").is_ok());
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_rate_limiter_window() {
        let limiter = RateLimiter::new();
        for _ in 0..3 {
            assert!(limiter.admit("partner-01", 3, 100));
        }
        assert!(!limiter.admit("partner-01", 3, 100));
        // Fresh window resets the count.
        assert!(limiter.admit("partner-01", 3, 101));
        // Zero disables the check.
        for _ in 0..10 {
            assert!(limiter.admit("partner-02", 0, 100));
        }
    }

    #[test]
    fn test_replay_window() {
        let now = Utc::now();
        assert!(check_window(now - Duration::minutes(4), now).is_ok());
        assert!(check_window(now + Duration::minutes(4), now).is_ok());
        assert!(check_window(now - Duration::minutes(6), now).is_err());
        assert!(check_window(now + Duration::minutes(6), now).is_err());
    }

    #[tokio::test]
    async fn test_verifier_end_to_end() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert_api_client(client("topsecret"));
        let verifier = H2hVerifier::new(backend);

        let body = br#"{"product_code":"T10"}"#;
        let ts = Utc::now().timestamp().to_string();
        let ip: IpAddr = "203.0.113.7".parse().unwrap();

        let ok = verifier
            .verify(&headers("topsecret", ts.clone(), body), ip, body)
            .await;
        assert!(ok.is_ok());

        // Wrong secret used to sign.
        let bad = verifier
            .verify(&headers("wrong", ts.clone(), body), ip, body)
            .await;
        assert!(matches!(bad, Err(H2hError::InvalidSignature)));

        // Source outside the whitelist.
        let outside: IpAddr = "198.51.100.1".parse().unwrap();
        let bad_ip = verifier
            .verify(&headers("topsecret", ts.clone(), body), outside, body)
            .await;
        assert!(matches!(bad_ip, Err(H2hError::IpNotAllowed)));

        // Stale timestamp.
        let old_ts = (Utc::now() - Duration::minutes(10)).timestamp().to_string();
        let stale = verifier
            .verify(&headers("topsecret", old_ts, body), ip, body)
            .await;
        assert!(matches!(stale, Err(H2hError::TimestampOutOfWindow)));
    }
}
