use crate::application::{AccountError, BillingError, ChatError};
use crate::infrastructure::{PaymentEventError, WebhookSignatureError};
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use tracing::{debug, error};

pub(super) fn map_chat_error(err: &ChatError) -> (StatusCode, serde_json::Value) {
    match err {
        ChatError::ValidationFailed(msg) => {
            (StatusCode::BAD_REQUEST, serde_json::json!({ "error": msg }))
        }
        ChatError::PaymentRequired { balance } => (
            StatusCode::PAYMENT_REQUIRED,
            serde_json::json!({
                "error": "Not enough tokens, upgrade to keep chatting",
                "code": "payment_required",
                "tokens": balance
            }),
        ),
        ChatError::UpstreamUnavailable(e) => {
            error!(error = %e, "Inference unavailable");
            (
                StatusCode::BAD_GATEWAY,
                serde_json::json!({ "error": "Reply service unavailable, please retry" }),
            )
        }
        ChatError::Internal(e) => {
            error!(error = %e, "Chat request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": "Failed to process message" }),
            )
        }
    }
}

pub(super) fn map_account_error(err: &AccountError) -> (StatusCode, serde_json::Value) {
    match err {
        AccountError::Unauthenticated => (
            StatusCode::UNAUTHORIZED,
            serde_json::json!({ "error": "Missing or invalid authorization token" }),
        ),
        AccountError::InvalidCredentials => (
            StatusCode::UNAUTHORIZED,
            serde_json::json!({ "error": "Invalid email or password" }),
        ),
        AccountError::Rejected(msg) => {
            (StatusCode::BAD_REQUEST, serde_json::json!({ "error": msg }))
        }
        AccountError::Provider(e) => {
            error!(error = %e, "Auth provider failure");
            (
                StatusCode::BAD_GATEWAY,
                serde_json::json!({ "error": "Authentication service unavailable" }),
            )
        }
        AccountError::Repository(e) => {
            error!(error = %e, "Account request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": "Failed to process account request" }),
            )
        }
    }
}

/// Unreadable bodies and missing or mistyped fields are client errors, never 422.
pub(super) fn map_json_rejection(rejection: &JsonRejection) -> (StatusCode, serde_json::Value) {
    debug!(error = %rejection.body_text(), "Rejected request body");
    (
        StatusCode::BAD_REQUEST,
        serde_json::json!({
            "error": "Invalid request",
            "code": "validation_failed",
            "details": rejection.body_text(),
        }),
    )
}

pub(super) fn map_signature_error(err: &WebhookSignatureError) -> (StatusCode, serde_json::Value) {
    (
        StatusCode::BAD_REQUEST,
        serde_json::json!({ "error": format!("Webhook signature verification failed: {}", err) }),
    )
}

pub(super) fn map_payment_event_error(err: &PaymentEventError) -> (StatusCode, serde_json::Value) {
    (
        StatusCode::BAD_REQUEST,
        serde_json::json!({ "error": err.to_string() }),
    )
}

/// Processing failures answer 500 so the processor redelivers the event.
pub(super) fn map_billing_error(err: &BillingError) -> (StatusCode, serde_json::Value) {
    error!(error = %err, "Webhook processing failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        serde_json::json!({ "error": "Webhook processing failed" }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::{InferenceError, RepositoryError};

    #[test]
    fn chat_errors_map_to_distinct_statuses() {
        let cases = [
            (ChatError::ValidationFailed("empty".to_string()), StatusCode::BAD_REQUEST),
            (ChatError::PaymentRequired { balance: 0 }, StatusCode::PAYMENT_REQUIRED),
            (ChatError::UpstreamUnavailable(InferenceError::Timeout), StatusCode::BAD_GATEWAY),
            (
                ChatError::Internal(RepositoryError::InvalidData("x".to_string())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(map_chat_error(&err).0, expected);
        }
        assert_eq!(map_account_error(&AccountError::Unauthenticated).0, StatusCode::UNAUTHORIZED);
    }

    async fn extract_send_request(body: &'static str) -> Result<(), JsonRejection> {
        use crate::server::http_types::SendMessageRequest;
        use axum::{body::Body, extract::FromRequest, http::header, http::Request, Json};

        let request = Request::builder()
            .method("POST")
            .uri("/messages")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap();
        Json::<SendMessageRequest>::from_request(request, &()).await.map(|_| ())
    }

    #[tokio::test]
    async fn missing_influencer_id_is_bad_request() {
        let rejection = extract_send_request(r#"{"content":"hi"}"#).await.unwrap_err();
        let (status, body) = map_json_rejection(&rejection);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "validation_failed");
        assert!(body["details"].as_str().unwrap().contains("influencerId"));
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let rejection = extract_send_request("{not json").await.unwrap_err();
        assert_eq!(map_json_rejection(&rejection).0, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn payment_required_carries_code() {
        let (_, body) = map_chat_error(&ChatError::PaymentRequired { balance: 0 });
        assert_eq!(body["code"], "payment_required");
    }
}
