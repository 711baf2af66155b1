use super::http_errors::map_account_error;
use super::state::AppState;
use crate::infrastructure::AuthUser;
use axum::{
    http::{header, header::HeaderMap, StatusCode},
    Json,
};

pub(super) fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
}

/// Verify the request's bearer token with the auth provider.
pub(super) async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<AuthUser, (StatusCode, Json<serde_json::Value>)> {
    state
        .accounts
        .authenticate(extract_bearer_token(headers))
        .await
        .map_err(|e| {
            let (status, body) = map_account_error(&e);
            (status, Json(body))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn with_auth(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn session_token_is_taken_from_bearer_header() {
        let headers = with_auth("Bearer eyJhbGciOiJIUzI1NiJ9.session");
        assert_eq!(extract_bearer_token(&headers), Some("eyJhbGciOiJIUzI1NiJ9.session"));
    }

    #[test]
    fn missing_or_blank_token_is_anonymous() {
        assert_eq!(extract_bearer_token(&HeaderMap::new()), None);
        assert_eq!(extract_bearer_token(&with_auth("Bearer ")), None);
    }

    #[test]
    fn other_schemes_are_ignored() {
        assert_eq!(extract_bearer_token(&with_auth("Basic dXNlcjpwYXNz")), None);
        assert_eq!(extract_bearer_token(&with_auth("bearer lowercase")), None);
    }
}
