//! Request authentication middleware
//!
//! Bearer middleware injects [`AuthClaims`] into request extensions; H2H
//! middleware buffers the body for signature verification and injects the
//! matched [`ApiClient`].

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use std::net::SocketAddr;

use super::error::ApiError;
use super::state::AppState;
use crate::auth::h2h::{H2hError, H2hHeaders};
use crate::auth::jwt::JwtError;

/// Largest H2H body buffered for signature verification.
const MAX_SIGNED_BODY_BYTES: usize = 1024 * 1024;

pub async fn jwt_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(request.headers())
        .ok_or_else(|| ApiError::unauthorized("missing bearer token"))?;

    let claims = state.jwt.verify(token).map_err(|e| match e {
        JwtError::Expired => ApiError::unauthorized("token expired"),
        _ => ApiError::unauthorized("invalid token"),
    })?;

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

pub async fn h2h_auth(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let headers = extract_h2h_headers(request.headers());

    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_SIGNED_BODY_BYTES)
        .await
        .map_err(|_| ApiError::bad_request("request body too large"))?;

    let client = state
        .h2h
        .verify(&headers, addr.ip(), &bytes)
        .await
        .map_err(map_h2h_error)?;

    // Activity stamp must not delay the request.
    let verifier = state.h2h.clone();
    let client_id = client.client_id.clone();
    tokio::spawn(async move { verifier.touch(&client_id).await });

    let mut request = Request::from_parts(parts, Body::from(bytes));
    request.extensions_mut().insert(client);
    Ok(next.run(request).await)
}

fn extract_h2h_headers(headers: &HeaderMap) -> H2hHeaders {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    H2hHeaders {
        client_id: get("X-Client-ID"),
        api_key: get("X-API-Key"),
        timestamp: get("X-Timestamp"),
        signature: get("X-Signature"),
    }
}

fn map_h2h_error(err: H2hError) -> ApiError {
    match err {
        H2hError::MissingHeaders => ApiError::unauthorized("missing required H2H headers"),
        H2hError::UnknownClient | H2hError::InvalidApiKey => {
            ApiError::unauthorized("invalid client credentials")
        }
        H2hError::ClientDisabled => ApiError::forbidden("client is disabled"),
        H2hError::IpNotAllowed => ApiError::forbidden("source address not allowed"),
        H2hError::InvalidTimestamp | H2hError::TimestampOutOfWindow => {
            ApiError::unauthorized("timestamp rejected")
        }
        H2hError::InvalidSignature => ApiError::unauthorized("invalid signature"),
        H2hError::RateLimited => ApiError::new(
            axum::http::StatusCode::TOO_MANY_REQUESTS,
            super::error::error_codes::RATE_LIMIT_EXCEEDED,
            "request rate limit exceeded",
        ),
        H2hError::Store(e) => {
            tracing::error!(error = %e, "h2h verification storage error");
            ApiError::internal("internal error")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::AUTHORIZATION;

    #[test]
    fn test_bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer abc.def.ghi".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc.def.ghi"));

        headers.insert(AUTHORIZATION, "Basic dXNlcg==".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, "Bearer ".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_h2h_header_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Client-ID", "partner-01".parse().unwrap());
        headers.insert("X-API-Key", "AK-123".parse().unwrap());
        headers.insert("X-Timestamp", "1773480413".parse().unwrap());
        headers.insert("X-Signature", "deadbeef".parse().unwrap());

        let extracted = extract_h2h_headers(&headers);
        assert_eq!(extracted.client_id, "partner-01");
        assert_eq!(extracted.api_key, "AK-123");
        assert_eq!(extracted.timestamp, "1773480413");
        assert_eq!(extracted.signature, "deadbeef");
    }
}
