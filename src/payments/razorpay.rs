//! Razorpay gateway
//!
//! Orders are created through the REST API with basic auth. Checkout
//! callbacks are verified with `HMAC_SHA256(order_id|payment_id, key_secret)`;
//! webhooks with `HMAC_SHA256(body, webhook_secret)`.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::{
    CallbackPayload, OrderRequest, OrderResponse, PaymentGateway, PaymentOutcome,
    PaymentProvider, PaymentVerification,
};
use crate::types::{AppError, Result};

type HmacSha256 = Hmac<Sha256>;

pub struct RazorpayGateway {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
    webhook_secret: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateOrderBody<'a> {
    amount: i64,
    currency: &'a str,
    receipt: &'a str,
    notes: &'a BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct OrderEntity {
    id: String,
    amount: i64,
    currency: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct ErrorReply {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    event: String,
    #[serde(default)]
    payload: WebhookPayload,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookPayload {
    payment: Option<Wrapped<PaymentEntity>>,
    order: Option<Wrapped<OrderEntity>>,
}

#[derive(Debug, Deserialize)]
struct Wrapped<T> {
    entity: T,
}

#[derive(Debug, Deserialize)]
struct PaymentEntity {
    id: String,
    order_id: Option<String>,
    amount: Option<i64>,
    error_description: Option<String>,
}

impl RazorpayGateway {
    pub fn new(
        base_url: &str,
        key_id: &str,
        key_secret: &str,
        webhook_secret: Option<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build Razorpay client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            key_id: key_id.to_string(),
            key_secret: key_secret.to_string(),
            webhook_secret,
        })
    }

    /// Check an HMAC-SHA256 hex signature in constant time
    fn hmac_matches(secret: &str, message: &[u8], signature_hex: &str) -> bool {
        let Ok(expected) = hex::decode(signature_hex.trim()) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(message);
        mac.verify_slice(&expected).is_ok()
    }

    /// Verify the signature the checkout widget hands to the browser
    pub fn verify_checkout_signature(&self, order_id: &str, payment_id: &str, signature: &str) -> bool {
        let message = format!("{order_id}|{payment_id}");
        Self::hmac_matches(&self.key_secret, message.as_bytes(), signature)
    }

    fn verify_webhook(&self, body: &[u8], signature: &str) -> Result<PaymentVerification> {
        let secret = self
            .webhook_secret
            .as_deref()
            .ok_or_else(|| AppError::Gateway("Razorpay webhook secret not configured".into()))?;

        if !Self::hmac_matches(secret, body, signature) {
            warn!("Razorpay webhook signature mismatch");
            return Err(AppError::Unauthorized("Invalid webhook signature".into()));
        }

        let event: WebhookEvent = serde_json::from_slice(body)?;
        let payment = event.payload.payment.map(|w| w.entity);
        let order_id = event
            .payload
            .order
            .as_ref()
            .map(|w| w.entity.id.clone())
            .or_else(|| payment.as_ref().and_then(|p| p.order_id.clone()))
            .ok_or_else(|| AppError::BadRequest("Webhook has no order id".into()))?;

        let outcome = match event.event.as_str() {
            "payment.captured" | "order.paid" => PaymentOutcome::Paid,
            "payment.failed" => PaymentOutcome::Failed {
                reason: payment
                    .as_ref()
                    .and_then(|p| p.error_description.clone())
                    .unwrap_or_else(|| "Payment failed".to_string()),
            },
            "payment.authorized" => PaymentOutcome::Pending,
            other => {
                debug!(event = other, "Ignoring Razorpay webhook event");
                PaymentOutcome::Ignored
            }
        };

        Ok(PaymentVerification {
            provider: PaymentProvider::Razorpay,
            order_id,
            amount_paise: payment.as_ref().and_then(|p| p.amount),
            payment_id: payment.map(|p| p.id),
            outcome,
        })
    }

    async fn error_message(response: reqwest::Response) -> String {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<ErrorReply>(&body)
            .map(|e| e.error.description)
            .unwrap_or(body);
        format!("Razorpay returned {}: {}", status, detail)
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Razorpay
    }

    async fn create_order(&self, order: &OrderRequest) -> Result<OrderResponse> {
        let body = CreateOrderBody {
            amount: order.amount_paise,
            currency: &order.currency,
            receipt: &order.receipt,
            notes: &order.notes,
        };

        let response = self
            .client
            .post(format!("{}/v1/orders", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::Gateway(Self::error_message(response).await));
        }

        let created: OrderEntity = response.json().await?;
        debug!(order_id = %created.id, amount = created.amount, "Razorpay order created");

        Ok(OrderResponse {
            provider: PaymentProvider::Razorpay,
            order_id: created.id,
            amount_paise: created.amount,
            currency: created.currency,
            redirect_url: None,
            key_id: Some(self.key_id.clone()),
        })
    }

    fn verify_callback(&self, payload: &CallbackPayload) -> Result<PaymentVerification> {
        match payload {
            CallbackPayload::RazorpayCheckout {
                order_id,
                payment_id,
                signature,
            } => {
                if !self.verify_checkout_signature(order_id, payment_id, signature) {
                    warn!(order_id = %order_id, "Razorpay checkout signature mismatch");
                    return Err(AppError::Unauthorized("Invalid payment signature".into()));
                }
                Ok(PaymentVerification {
                    provider: PaymentProvider::Razorpay,
                    order_id: order_id.clone(),
                    payment_id: Some(payment_id.clone()),
                    amount_paise: None,
                    outcome: PaymentOutcome::Paid,
                })
            }
            CallbackPayload::RazorpayWebhook { body, signature } => {
                self.verify_webhook(body, signature)
            }
            CallbackPayload::PhonePe { .. } => Err(AppError::BadRequest(
                "PhonePe payload sent to Razorpay".into(),
            )),
        }
    }

    async fn fetch_status(&self, order_id: &str) -> Result<PaymentVerification> {
        let response = self
            .client
            .get(format!(
                "{}/v1/orders/{}",
                self.base_url,
                urlencoding::encode(order_id)
            ))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::Gateway(Self::error_message(response).await));
        }

        let order: OrderEntity = response.json().await?;
        let outcome = match order.status.as_str() {
            "paid" => PaymentOutcome::Paid,
            _ => PaymentOutcome::Pending,
        };

        Ok(PaymentVerification {
            provider: PaymentProvider::Razorpay,
            order_id: order.id,
            payment_id: None,
            amount_paise: Some(order.amount),
            outcome,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::json;
    use wiremock::matchers::{basic_auth, body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sign(secret: &str, message: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(message);
        hex::encode(mac.finalize().into_bytes())
    }

    fn gateway(base_url: &str) -> RazorpayGateway {
        RazorpayGateway::new(base_url, "rzp_test_key", "key_secret", Some("hook_secret".into()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_order_sends_amount_and_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/orders"))
            .and(basic_auth("rzp_test_key", "key_secret"))
            .and(body_json(json!({
                "amount": 450000,
                "currency": "INR",
                "receipt": "rcpt_42",
                "notes": {"enrollment_id": "e42"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "order_Abc123",
                "entity": "order",
                "amount": 450000,
                "currency": "INR",
                "receipt": "rcpt_42",
                "status": "created"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut notes = BTreeMap::new();
        notes.insert("enrollment_id".to_string(), "e42".to_string());
        let order = OrderRequest {
            receipt: "rcpt_42".into(),
            amount_paise: 450000,
            currency: "INR".into(),
            customer_id: "s1".into(),
            customer_phone: None,
            notes,
        };

        let created = gateway(&server.uri()).create_order(&order).await.unwrap();
        assert_eq!(created.order_id, "order_Abc123");
        assert_eq!(created.amount_paise, 450000);
        assert_eq!(created.key_id.as_deref(), Some("rzp_test_key"));
    }

    #[tokio::test]
    async fn test_create_order_surfaces_gateway_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/orders"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"code": "BAD_REQUEST_ERROR", "description": "Authentication failed"}
            })))
            .mount(&server)
            .await;

        let order = OrderRequest {
            receipt: "r".into(),
            amount_paise: 100,
            currency: "INR".into(),
            customer_id: "s".into(),
            customer_phone: None,
            notes: BTreeMap::new(),
        };
        let err = gateway(&server.uri()).create_order(&order).await.unwrap_err();
        assert!(matches!(err, AppError::Gateway(ref m) if m.contains("Authentication failed")));
    }

    #[test]
    fn test_checkout_signature() {
        let gw = gateway("http://unused");
        let signature = sign("key_secret", b"order_1|pay_1");

        let ok = gw
            .verify_callback(&CallbackPayload::RazorpayCheckout {
                order_id: "order_1".into(),
                payment_id: "pay_1".into(),
                signature: signature.clone(),
            })
            .unwrap();
        assert_eq!(ok.outcome, PaymentOutcome::Paid);
        assert_eq!(ok.payment_id.as_deref(), Some("pay_1"));

        // Same signature, different payment id
        let err = gw
            .verify_callback(&CallbackPayload::RazorpayCheckout {
                order_id: "order_1".into(),
                payment_id: "pay_2".into(),
                signature,
            })
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[test]
    fn test_webhook_captured_and_tampered() {
        let gw = gateway("http://unused");
        let body = json!({
            "event": "payment.captured",
            "payload": {"payment": {"entity": {"id": "pay_9", "order_id": "order_9", "amount": 150000}}}
        })
        .to_string();
        let signature = sign("hook_secret", body.as_bytes());

        let v = gw
            .verify_callback(&CallbackPayload::RazorpayWebhook {
                body: Bytes::from(body.clone()),
                signature: signature.clone(),
            })
            .unwrap();
        assert_eq!(v.order_id, "order_9");
        assert_eq!(v.amount_paise, Some(150000));
        assert_eq!(v.outcome, PaymentOutcome::Paid);

        let tampered = body.replace("150000", "100");
        let err = gw
            .verify_callback(&CallbackPayload::RazorpayWebhook {
                body: Bytes::from(tampered),
                signature,
            })
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[test]
    fn test_webhook_failed_event() {
        let gw = gateway("http://unused");
        let body = json!({
            "event": "payment.failed",
            "payload": {"payment": {"entity": {
                "id": "pay_3", "order_id": "order_3", "error_description": "Card declined"
            }}}
        })
        .to_string();
        let signature = sign("hook_secret", body.as_bytes());

        let v = gw
            .verify_callback(&CallbackPayload::RazorpayWebhook {
                body: Bytes::from(body),
                signature,
            })
            .unwrap();
        assert_eq!(
            v.outcome,
            PaymentOutcome::Failed { reason: "Card declined".into() }
        );
    }

    #[tokio::test]
    async fn test_fetch_status_paid() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/orders/order_7"))
            .and(basic_auth("rzp_test_key", "key_secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "order_7", "amount": 5000, "currency": "INR", "status": "paid"
            })))
            .mount(&server)
            .await;

        let v = gateway(&server.uri()).fetch_status("order_7").await.unwrap();
        assert_eq!(v.outcome, PaymentOutcome::Paid);
        assert_eq!(v.amount_paise, Some(5000));
    }
}
