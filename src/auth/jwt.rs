//! JWT bearer tokens
//!
//! HS256 access tokens: subject is the user id, the role claim mirrors the
//! user level. Issuer/audience/TTL come from configuration.

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::User;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JwtError {
    #[error("invalid token")]
    InvalidToken,
    #[error("token expired")]
    Expired,
    #[error("failed to sign token")]
    Signing,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    role: String,
    iss: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    aud: Option<String>,
    iat: i64,
    exp: i64,
    jti: String,
}

/// Validated identity extracted from a bearer token.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthClaims {
    pub user_id: Uuid,
    pub role: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

pub struct JwtService {
    secret: String,
    ttl: chrono::Duration,
    issuer: String,
    audience: Option<String>,
}

impl JwtService {
    pub fn new(secret: &str, ttl_hours: i64, issuer: &str, audience: &str) -> Self {
        let ttl_hours = if ttl_hours <= 0 { 24 } else { ttl_hours };
        Self {
            secret: secret.to_string(),
            ttl: chrono::Duration::hours(ttl_hours),
            issuer: issuer.to_string(),
            audience: if audience.trim().is_empty() {
                None
            } else {
                Some(audience.trim().to_string())
            },
        }
    }

    /// Sign an access token for the user.
    pub fn issue(&self, user: &User) -> Result<String, JwtError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id.to_string(),
            role: user.level.role().to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
            jti: format!("{}-{}", user.id, now.timestamp_nanos_opt().unwrap_or_default()),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|_| JwtError::Signing)
    }

    /// Parse and validate a token, returning the embedded identity.
    pub fn verify(&self, token: &str) -> Result<AuthClaims, JwtError> {
        if token.is_empty() {
            return Err(JwtError::InvalidToken);
        }

        let mut validation = Validation::default();
        validation.set_issuer(&[&self.issuer]);
        match &self.audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }

        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::Expired,
            _ => JwtError::InvalidToken,
        })?;

        let user_id = data
            .claims
            .sub
            .parse::<Uuid>()
            .map_err(|_| JwtError::InvalidToken)?;

        Ok(AuthClaims {
            user_id,
            role: data.claims.role,
            issued_at: Utc
                .timestamp_opt(data.claims.iat, 0)
                .single()
                .unwrap_or_else(Utc::now),
            expires_at: Utc
                .timestamp_opt(data.claims.exp, 0)
                .single()
                .unwrap_or_else(Utc::now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::UserLevel;
    use rust_decimal::Decimal;

    fn service() -> JwtService {
        JwtService::new("test-secret", 24, "pulsagate", "pulsagate-api")
    }

    fn user() -> User {
        User {
            id: Uuid::new_v4(),
            username: "agen01".into(),
            email: "agen01@example.com".into(),
            full_name: None,
            phone: None,
            upline_id: None,
            level: UserLevel::Agent,
            is_active: true,
            balance: Decimal::ZERO,
            credit_limit: Decimal::ZERO,
            markup_percentage: Decimal::ZERO,
            allow_debt: false,
            max_daily_transaction: Decimal::ZERO,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_issue_and_verify_roundtrip() {
        let svc = service();
        let u = user();
        let token = svc.issue(&u).unwrap();
        let claims = svc.verify(&token).unwrap();
        assert_eq!(claims.user_id, u.id);
        assert_eq!(claims.role, "AGENT");
        assert!(claims.expires_at > claims.issued_at);
    }

    #[test]
    fn test_verify_rejects_wrong_secret() {
        let token = service().issue(&user()).unwrap();
        let other = JwtService::new("other-secret", 24, "pulsagate", "pulsagate-api");
        assert_eq!(other.verify(&token), Err(JwtError::InvalidToken));
    }

    #[test]
    fn test_verify_rejects_wrong_issuer() {
        let token = service().issue(&user()).unwrap();
        let other = JwtService::new("test-secret", 24, "someone-else", "pulsagate-api");
        assert_eq!(other.verify(&token), Err(JwtError::InvalidToken));
    }

    #[test]
    fn test_verify_rejects_garbage() {
        assert_eq!(service().verify(""), Err(JwtError::InvalidToken));
        assert_eq!(
            service().verify("not.a.token"),
            Err(JwtError::InvalidToken)
        );
    }
}
