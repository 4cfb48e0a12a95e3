//! Host-to-host API clients
//!
//! Credentials for signed, IP-restricted upstream integrators. Signature
//! verification itself lives in [`crate::auth::h2h`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

/// A registered H2H peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiClient {
    pub id: Uuid,
    pub client_id: String,
    pub api_key: String,
    /// Shared HMAC secret. Never serialized outward.
    #[serde(skip_serializing)]
    pub secret: String,
    /// Platform user this peer transacts as. Required for purchase
    /// submission; status lookups work without it.
    pub user_id: Option<Uuid>,
    /// CIDR blocks or exact addresses. Empty means unrestricted.
    pub ip_whitelist: Vec<String>,
    pub is_active: bool,
    pub max_requests_per_minute: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ApiClient {
    /// Check a source address against the whitelist. Entries may be exact
    /// addresses (`203.0.113.7`) or CIDR blocks (`203.0.113.0/24`).
    pub fn is_ip_allowed(&self, ip: IpAddr) -> bool {
        if self.ip_whitelist.is_empty() {
            return true;
        }
        self.ip_whitelist
            .iter()
            .any(|entry| entry_matches(entry.trim(), ip))
    }
}

fn entry_matches(entry: &str, ip: IpAddr) -> bool {
    match entry.split_once('/') {
        None => entry.parse::<IpAddr>().map(|e| e == ip).unwrap_or(false),
        Some((base, prefix)) => {
            let (Ok(base), Ok(prefix)) = (base.parse::<IpAddr>(), prefix.parse::<u32>()) else {
                return false;
            };
            cidr_contains(base, prefix, ip)
        }
    }
}

fn cidr_contains(base: IpAddr, prefix: u32, ip: IpAddr) -> bool {
    match (base, ip) {
        (IpAddr::V4(base), IpAddr::V4(ip)) => {
            if prefix > 32 {
                return false;
            }
            let mask = if prefix == 0 {
                0
            } else {
                u32::MAX << (32 - prefix)
            };
            u32::from(base) & mask == u32::from(ip) & mask
        }
        (IpAddr::V6(base), IpAddr::V6(ip)) => {
            if prefix > 128 {
                return false;
            }
            let mask = if prefix == 0 {
                0
            } else {
                u128::MAX << (128 - prefix)
            };
            u128::from(base) & mask == u128::from(ip) & mask
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(whitelist: Vec<&str>) -> ApiClient {
        ApiClient {
            id: Uuid::new_v4(),
            client_id: "partner-01".into(),
            api_key: "key".into(),
            secret: "secret".into(),
            user_id: None,
            ip_whitelist: whitelist.into_iter().map(String::from).collect(),
            is_active: true,
            max_requests_per_minute: 60,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_used_at: None,
        }
    }

    #[test]
    fn test_empty_whitelist_allows_all() {
        assert!(client(vec![]).is_ip_allowed("198.51.100.1".parse().unwrap()));
    }

    #[test]
    fn test_exact_match() {
        let c = client(vec!["203.0.113.7"]);
        assert!(c.is_ip_allowed("203.0.113.7".parse().unwrap()));
        assert!(!c.is_ip_allowed("203.0.113.8".parse().unwrap()));
    }

    #[test]
    fn test_cidr_match() {
        let c = client(vec!["203.0.113.0/24"]);
        assert!(c.is_ip_allowed("203.0.113.200".parse().unwrap()));
        assert!(!c.is_ip_allowed("203.0.114.1".parse().unwrap()));
    }

    #[test]
    fn test_malformed_entry_never_matches() {
        let c = client(vec!["not-an-ip", "203.0.113.0/99"]);
        assert!(!c.is_ip_allowed("203.0.113.1".parse().unwrap()));
    }
}
