//! Payment-processor webhook plumbing: signature verification and event decoding.
//!
//! The signature header has the form `t=<unix seconds>,v1=<hex>[,v1=<hex>...]`, where each
//! `v1` is `HMAC-SHA256(secret, "<t>.<raw body>")`.

use crate::domain::{SubscriptionPeriod, SubscriptionStatus};
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Error, Debug, PartialEq)]
pub enum WebhookSignatureError {
    #[error("Missing signature header")]
    MissingHeader,
    #[error("Malformed signature header")]
    Malformed,
    #[error("Signature timestamp outside tolerance")]
    Expired,
    #[error("Signature mismatch")]
    Mismatch,
}

#[derive(Error, Debug)]
pub enum PaymentEventError {
    #[error("Invalid event payload: {0}")]
    InvalidPayload(String),
    #[error("Event {event_type} is missing {field}")]
    MissingField { event_type: String, field: &'static str },
}

pub fn verify_signature(
    secret: &str,
    header: Option<&str>,
    body: &[u8],
    tolerance_secs: i64,
    now: DateTime<Utc>,
) -> Result<(), WebhookSignatureError> {
    let header = header.ok_or(WebhookSignatureError::MissingHeader)?;

    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<Vec<u8>> = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = Some(value.parse().map_err(|_| WebhookSignatureError::Malformed)?)
            }
            Some(("v1", value)) => {
                if let Ok(bytes) = hex::decode(value) {
                    candidates.push(bytes);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(WebhookSignatureError::Malformed)?;
    if candidates.is_empty() {
        return Err(WebhookSignatureError::Malformed);
    }
    // The header is untrusted; an unrepresentable skew counts as expired.
    let skew = now.timestamp().checked_sub(timestamp).map(i64::unsigned_abs);
    match skew {
        Some(skew) if skew <= tolerance_secs.max(0).unsigned_abs() => {}
        _ => return Err(WebhookSignatureError::Expired),
    }

    for candidate in &candidates {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| WebhookSignatureError::Malformed)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(body);
        if mac.verify_slice(candidate).is_ok() {
            return Ok(());
        }
    }

    Err(WebhookSignatureError::Mismatch)
}

/// Builds a header value the way the processor does. Used by tests and local tooling.
pub fn sign_payload(secret: &str, timestamp: i64, body: &[u8]) -> Result<String, WebhookSignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| WebhookSignatureError::Malformed)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes())))
}

/// Subscription object fields the billing flow cares about.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionSnapshot {
    pub external_id: String,
    pub user_id: Option<Uuid>,
    pub influencer_id: Option<Uuid>,
    pub price_id: Option<String>,
    pub period: SubscriptionPeriod,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PaymentEvent {
    SubscriptionCreated(SubscriptionSnapshot),
    SubscriptionUpdated(SubscriptionSnapshot),
    SubscriptionDeleted { external_id: String },
    InvoicePaymentSucceeded {
        external_subscription_id: String,
        billing_reason: Option<String>,
    },
    InvoicePaymentFailed { external_subscription_id: String },
    Ignored,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentEventEnvelope {
    pub id: String,
    pub event_type: String,
    pub event: PaymentEvent,
}

#[derive(Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: RawEventData,
}

#[derive(Deserialize)]
struct RawEventData {
    object: serde_json::Value,
}

#[derive(Deserialize)]
struct RawSubscription {
    id: String,
    status: String,
    #[serde(default)]
    current_period_start: Option<i64>,
    #[serde(default)]
    current_period_end: Option<i64>,
    #[serde(default)]
    cancel_at_period_end: bool,
    #[serde(default)]
    metadata: std::collections::HashMap<String, String>,
    #[serde(default)]
    items: Option<RawItems>,
}

#[derive(Deserialize)]
struct RawItems {
    data: Vec<RawItem>,
}

#[derive(Deserialize)]
struct RawItem {
    price: RawPrice,
}

#[derive(Deserialize)]
struct RawPrice {
    id: String,
}

#[derive(Deserialize)]
struct RawInvoice {
    #[serde(default)]
    subscription: Option<String>,
    #[serde(default)]
    billing_reason: Option<String>,
}

pub fn parse_event(body: &[u8]) -> Result<PaymentEventEnvelope, PaymentEventError> {
    let raw: RawEvent =
        serde_json::from_slice(body).map_err(|e| PaymentEventError::InvalidPayload(e.to_string()))?;

    let event = match raw.event_type.as_str() {
        "customer.subscription.created" | "subscription.created" => {
            PaymentEvent::SubscriptionCreated(parse_subscription(raw.data.object)?)
        }
        "customer.subscription.updated" | "subscription.updated" => {
            PaymentEvent::SubscriptionUpdated(parse_subscription(raw.data.object)?)
        }
        "customer.subscription.deleted" | "subscription.deleted" => {
            let sub = parse_subscription(raw.data.object)?;
            PaymentEvent::SubscriptionDeleted {
                external_id: sub.external_id,
            }
        }
        "invoice.payment_succeeded" => {
            let invoice = parse_invoice(raw.data.object)?;
            PaymentEvent::InvoicePaymentSucceeded {
                external_subscription_id: invoice.subscription.ok_or_else(|| {
                    PaymentEventError::MissingField {
                        event_type: raw.event_type.clone(),
                        field: "subscription",
                    }
                })?,
                billing_reason: invoice.billing_reason,
            }
        }
        "invoice.payment_failed" => {
            let invoice = parse_invoice(raw.data.object)?;
            PaymentEvent::InvoicePaymentFailed {
                external_subscription_id: invoice.subscription.ok_or_else(|| {
                    PaymentEventError::MissingField {
                        event_type: raw.event_type.clone(),
                        field: "subscription",
                    }
                })?,
            }
        }
        _ => PaymentEvent::Ignored,
    };

    Ok(PaymentEventEnvelope {
        id: raw.id,
        event_type: raw.event_type,
        event,
    })
}

fn parse_subscription(object: serde_json::Value) -> Result<SubscriptionSnapshot, PaymentEventError> {
    let raw: RawSubscription = serde_json::from_value(object)
        .map_err(|e| PaymentEventError::InvalidPayload(e.to_string()))?;

    let metadata_uuid = |key: &str| raw.metadata.get(key).and_then(|v| Uuid::parse_str(v).ok());

    Ok(SubscriptionSnapshot {
        user_id: metadata_uuid("user_id"),
        influencer_id: metadata_uuid("influencer_id"),
        price_id: raw
            .items
            .as_ref()
            .and_then(|items| items.data.first())
            .map(|item| item.price.id.clone()),
        period: SubscriptionPeriod {
            status: SubscriptionStatus::from_processor(&raw.status),
            current_period_start: raw.current_period_start.and_then(unix_to_utc),
            current_period_end: raw.current_period_end.and_then(unix_to_utc),
            cancel_at_period_end: raw.cancel_at_period_end,
        },
        external_id: raw.id,
    })
}

fn parse_invoice(object: serde_json::Value) -> Result<RawInvoice, PaymentEventError> {
    serde_json::from_value(object).map_err(|e| PaymentEventError::InvalidPayload(e.to_string()))
}

fn unix_to_utc(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &str = "whsec_test";

    #[test]
    fn valid_signature_verifies() {
        let body = br#"{"id":"evt_1"}"#;
        let now = Utc::now();
        let header = sign_payload(SECRET, now.timestamp(), body).unwrap();
        assert_eq!(verify_signature(SECRET, Some(&header), body, 300, now), Ok(()));
    }

    #[test]
    fn tampered_body_is_rejected() {
        let now = Utc::now();
        let header = sign_payload(SECRET, now.timestamp(), b"original").unwrap();
        assert_eq!(
            verify_signature(SECRET, Some(&header), b"tampered", 300, now),
            Err(WebhookSignatureError::Mismatch)
        );
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let now = Utc::now();
        let header = sign_payload(SECRET, now.timestamp() - 3600, b"body").unwrap();
        assert_eq!(
            verify_signature(SECRET, Some(&header), b"body", 300, now),
            Err(WebhookSignatureError::Expired)
        );
    }

    #[test]
    fn extreme_timestamps_are_expired() {
        let now = Utc::now();
        for header in ["t=-9223372036854775808,v1=00", "t=9223372036854775807,v1=00"] {
            assert_eq!(
                verify_signature(SECRET, Some(header), b"body", 300, now),
                Err(WebhookSignatureError::Expired)
            );
        }
    }

    #[test]
    fn missing_or_malformed_header_is_rejected() {
        let now = Utc::now();
        assert_eq!(
            verify_signature(SECRET, None, b"body", 300, now),
            Err(WebhookSignatureError::MissingHeader)
        );
        assert_eq!(
            verify_signature(SECRET, Some("v1=abcd"), b"body", 300, now),
            Err(WebhookSignatureError::Malformed)
        );
    }

    #[test]
    fn subscription_created_is_decoded() {
        let user_id = Uuid::new_v4();
        let body = json!({
            "id": "evt_1",
            "type": "customer.subscription.created",
            "data": { "object": {
                "id": "sub_1",
                "status": "active",
                "current_period_start": 1_700_000_000,
                "current_period_end": 1_702_592_000,
                "metadata": { "user_id": user_id.to_string() },
                "items": { "data": [ { "price": { "id": "price_basic" } } ] }
            }}
        });

        let envelope = parse_event(body.to_string().as_bytes()).unwrap();
        match envelope.event {
            PaymentEvent::SubscriptionCreated(snapshot) => {
                assert_eq!(snapshot.external_id, "sub_1");
                assert_eq!(snapshot.user_id, Some(user_id));
                assert_eq!(snapshot.influencer_id, None);
                assert_eq!(snapshot.price_id.as_deref(), Some("price_basic"));
                assert_eq!(snapshot.period.status, SubscriptionStatus::Active);
                assert!(snapshot.period.current_period_end.is_some());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn unknown_event_type_is_ignored() {
        let body = json!({ "id": "evt_2", "type": "charge.refunded", "data": { "object": {} } });
        let envelope = parse_event(body.to_string().as_bytes()).unwrap();
        assert_eq!(envelope.event, PaymentEvent::Ignored);
        assert_eq!(envelope.event_type, "charge.refunded");
    }
}
