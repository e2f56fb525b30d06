//! PhonePe gateway (PG v1 "pay page" flow)
//!
//! Every request and callback is authenticated with an `X-VERIFY` checksum:
//! `sha256(payload + salt_key) + "###" + salt_index`, where the payload is the
//! base64 body followed by the API path (for requests) or the base64
//! response alone (for callbacks).

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{
    constant_time_eq, sha256_hex, CallbackPayload, OrderRequest, OrderResponse, PaymentGateway,
    PaymentOutcome, PaymentProvider, PaymentVerification,
};
use crate::types::{AppError, Result};

const PAY_PATH: &str = "/pg/v1/pay";

pub struct PhonePeGateway {
    client: reqwest::Client,
    base_url: String,
    merchant_id: String,
    salt_key: String,
    salt_index: u32,
    /// Public site URL used to build redirect and callback URLs
    public_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PayPayload<'a> {
    merchant_id: &'a str,
    merchant_transaction_id: &'a str,
    merchant_user_id: &'a str,
    amount: i64,
    redirect_url: String,
    redirect_mode: &'static str,
    callback_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    mobile_number: Option<&'a str>,
    payment_instrument: PaymentInstrument,
}

#[derive(Debug, Serialize)]
struct PaymentInstrument {
    #[serde(rename = "type")]
    kind: &'static str,
}

/// Envelope shared by pay, status and callback replies
#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
    data: Option<ReplyData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplyData {
    merchant_transaction_id: Option<String>,
    transaction_id: Option<String>,
    amount: Option<i64>,
    instrument_response: Option<InstrumentResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstrumentResponse {
    redirect_info: Option<RedirectInfo>,
}

#[derive(Debug, Deserialize)]
struct RedirectInfo {
    url: String,
}

impl PhonePeGateway {
    pub fn new(
        base_url: &str,
        merchant_id: &str,
        salt_key: &str,
        salt_index: u32,
        public_url: &str,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build PhonePe client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            merchant_id: merchant_id.to_string(),
            salt_key: salt_key.to_string(),
            salt_index,
            public_url: public_url.trim_end_matches('/').to_string(),
        })
    }

    /// `X-VERIFY` value for `payload`
    pub fn checksum(&self, payload: &str) -> String {
        format!(
            "{}###{}",
            sha256_hex(&format!("{}{}", payload, self.salt_key)),
            self.salt_index
        )
    }

    pub(crate) fn pay_payload<'a>(&'a self, order: &'a OrderRequest) -> PayPayload<'a> {
        PayPayload {
            merchant_id: &self.merchant_id,
            merchant_transaction_id: &order.receipt,
            merchant_user_id: &order.customer_id,
            amount: order.amount_paise,
            redirect_url: format!(
                "{}/payment/status?provider=phonepe&txn={}",
                self.public_url,
                urlencoding::encode(&order.receipt)
            ),
            redirect_mode: "POST",
            callback_url: format!("{}/api/payments/phonepe/callback", self.public_url),
            mobile_number: order.customer_phone.as_deref(),
            payment_instrument: PaymentInstrument { kind: "PAY_PAGE" },
        }
    }

    fn verification_from(&self, reply: Reply, fallback_txn: Option<&str>) -> Result<PaymentVerification> {
        let data = reply.data;
        let order_id = data
            .as_ref()
            .and_then(|d| d.merchant_transaction_id.clone())
            .or_else(|| fallback_txn.map(str::to_string))
            .ok_or_else(|| AppError::BadRequest("PhonePe reply has no transaction id".into()))?;

        let outcome = match reply.code.as_str() {
            "PAYMENT_SUCCESS" => PaymentOutcome::Paid,
            "PAYMENT_PENDING" => PaymentOutcome::Pending,
            _ => PaymentOutcome::Failed {
                reason: if reply.message.is_empty() {
                    reply.code.clone()
                } else {
                    reply.message.clone()
                },
            },
        };

        Ok(PaymentVerification {
            provider: PaymentProvider::Phonepe,
            order_id,
            payment_id: data.as_ref().and_then(|d| d.transaction_id.clone()),
            amount_paise: data.as_ref().and_then(|d| d.amount),
            outcome,
        })
    }
}

#[async_trait]
impl PaymentGateway for PhonePeGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Phonepe
    }

    async fn create_order(&self, order: &OrderRequest) -> Result<OrderResponse> {
        let payload = serde_json::to_vec(&self.pay_payload(order))
            .map_err(|e| AppError::Internal(format!("Failed to encode PhonePe payload: {}", e)))?;
        let encoded = STANDARD.encode(payload);
        let x_verify = self.checksum(&format!("{encoded}{PAY_PATH}"));

        let response = self
            .client
            .post(format!("{}{}", self.base_url, PAY_PATH))
            .header("X-VERIFY", x_verify)
            .json(&serde_json::json!({ "request": encoded }))
            .send()
            .await?;

        let status = response.status();
        let reply: Reply = response.json().await?;
        if !status.is_success() || !reply.success {
            return Err(AppError::Gateway(format!(
                "PhonePe returned {}: {} {}",
                status, reply.code, reply.message
            )));
        }

        let redirect_url = reply
            .data
            .and_then(|d| d.instrument_response)
            .and_then(|i| i.redirect_info)
            .map(|r| r.url)
            .ok_or_else(|| AppError::Gateway("PhonePe reply has no redirect URL".into()))?;

        debug!(txn = %order.receipt, "PhonePe payment initiated");

        Ok(OrderResponse {
            provider: PaymentProvider::Phonepe,
            order_id: order.receipt.clone(),
            amount_paise: order.amount_paise,
            currency: order.currency.clone(),
            redirect_url: Some(redirect_url),
            key_id: None,
        })
    }

    fn verify_callback(&self, payload: &CallbackPayload) -> Result<PaymentVerification> {
        let CallbackPayload::PhonePe { response, x_verify } = payload else {
            return Err(AppError::BadRequest("Razorpay payload sent to PhonePe".into()));
        };

        let expected = self.checksum(response);
        if !constant_time_eq(expected.as_bytes(), x_verify.trim().as_bytes()) {
            warn!("PhonePe callback checksum mismatch");
            return Err(AppError::Unauthorized("Invalid callback checksum".into()));
        }

        let decoded = STANDARD
            .decode(response.trim())
            .map_err(|_| AppError::BadRequest("Callback response is not base64".into()))?;
        let reply: Reply = serde_json::from_slice(&decoded)?;
        self.verification_from(reply, None)
    }

    async fn fetch_status(&self, order_id: &str) -> Result<PaymentVerification> {
        let status_path = format!(
            "/pg/v1/status/{}/{}",
            self.merchant_id,
            urlencoding::encode(order_id)
        );

        let response = self
            .client
            .get(format!("{}{}", self.base_url, status_path))
            .header("X-VERIFY", self.checksum(&status_path))
            .header("X-MERCHANT-ID", &self.merchant_id)
            .send()
            .await?;

        let status = response.status();
        let reply: Reply = response.json().await?;
        if status.is_server_error() {
            return Err(AppError::Gateway(format!("PhonePe returned {}", status)));
        }
        self.verification_from(reply, Some(order_id))
    }
}
