//! Payment gateway abstraction
//!
//! [`PaymentGateway`] is implemented once per provider. [`PaymentService`]
//! holds whichever gateways have credentials and dispatches on
//! [`PaymentProvider`]. Amounts are integer paise throughout.

pub mod phonepe;
pub mod razorpay;

pub use phonepe::PhonePeGateway;
pub use razorpay::RazorpayGateway;

pub use crate::db::schemas::PaymentProvider;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::info;

use crate::config::PaymentArgs;
use crate::types::{AppError, Result};

/// Order to create at the gateway
#[derive(Debug, Clone)]
pub struct OrderRequest {
    /// Our reference for the order (unique per attempt)
    pub receipt: String,
    pub amount_paise: i64,
    pub currency: String,
    /// Stable customer reference (student id)
    pub customer_id: String,
    pub customer_phone: Option<String>,
    /// Free-form notes echoed back by the gateway
    pub notes: BTreeMap<String, String>,
}

/// Gateway order, returned to the browser to start checkout
#[derive(Debug, Clone, Serialize)]
pub struct OrderResponse {
    pub provider: PaymentProvider,
    /// Gateway order id / merchant transaction id
    pub order_id: String,
    pub amount_paise: i64,
    pub currency: String,
    /// Hosted payment page (PhonePe)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    /// Public key for the embedded checkout (Razorpay)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
}

/// Data a gateway sends back to prove a payment happened
#[derive(Debug, Clone)]
pub enum CallbackPayload {
    /// Fields posted by the Razorpay checkout handler
    RazorpayCheckout {
        order_id: String,
        payment_id: String,
        signature: String,
    },
    /// Raw Razorpay webhook body and its `X-Razorpay-Signature`
    RazorpayWebhook { body: Bytes, signature: String },
    /// PhonePe server-to-server callback: base64 `response` and `X-VERIFY`
    PhonePe { response: String, x_verify: String },
}

/// What the gateway says happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PaymentOutcome {
    Paid,
    Pending,
    Failed { reason: String },
    /// Event that does not change payment state
    Ignored,
}

/// Verified result of a callback or status check
#[derive(Debug, Clone, Serialize)]
pub struct PaymentVerification {
    pub provider: PaymentProvider,
    pub order_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
    /// Amount the gateway reports, when it reports one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_paise: Option<i64>,
    #[serde(flatten)]
    pub outcome: PaymentOutcome,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> PaymentProvider;

    async fn create_order(&self, order: &OrderRequest) -> Result<OrderResponse>;

    /// Verify a callback's signature and decode its outcome.
    /// Tampered payloads return `Unauthorized`.
    fn verify_callback(&self, payload: &CallbackPayload) -> Result<PaymentVerification>;

    /// Ask the gateway for the current state of an order
    async fn fetch_status(&self, order_id: &str) -> Result<PaymentVerification>;
}

/// Dispatches to the configured gateways
#[derive(Clone, Default)]
pub struct PaymentService {
    gateways: HashMap<PaymentProvider, Arc<dyn PaymentGateway>>,
}

impl PaymentService {
    /// Build from configuration; gateways without credentials are skipped
    pub fn from_args(args: &PaymentArgs, public_url: &str) -> Result<Self> {
        let mut service = Self::default();

        if let (Some(key_id), Some(key_secret)) =
            (&args.razorpay_key_id, &args.razorpay_key_secret)
        {
            service.register(Arc::new(RazorpayGateway::new(
                &args.razorpay_base_url,
                key_id,
                key_secret,
                args.razorpay_webhook_secret.clone(),
            )?));
        }

        if let (Some(merchant_id), Some(salt_key)) =
            (&args.phonepe_merchant_id, &args.phonepe_salt_key)
        {
            service.register(Arc::new(PhonePeGateway::new(
                &args.phonepe_base_url,
                merchant_id,
                salt_key,
                args.phonepe_salt_index,
                public_url,
            )?));
        }

        Ok(service)
    }

    pub fn register(&mut self, gateway: Arc<dyn PaymentGateway>) {
        info!(provider = %gateway.provider(), "Payment gateway configured");
        self.gateways.insert(gateway.provider(), gateway);
    }

    fn gateway(&self, provider: PaymentProvider) -> Result<&Arc<dyn PaymentGateway>> {
        self.gateways
            .get(&provider)
            .ok_or_else(|| AppError::Gateway(format!("{provider} not configured")))
    }

    /// Providers with credentials, in a stable order
    pub fn configured(&self) -> Vec<PaymentProvider> {
        let mut providers: Vec<_> = self.gateways.keys().copied().collect();
        providers.sort_by_key(|p| p.as_str());
        providers
    }

    pub async fn create_order(
        &self,
        provider: PaymentProvider,
        order: &OrderRequest,
    ) -> Result<OrderResponse> {
        if order.amount_paise <= 0 {
            return Err(AppError::BadRequest("Amount must be positive".into()));
        }
        self.gateway(provider)?.create_order(order).await
    }

    pub fn verify_callback(
        &self,
        provider: PaymentProvider,
        payload: &CallbackPayload,
    ) -> Result<PaymentVerification> {
        self.gateway(provider)?.verify_callback(payload)
    }

    pub async fn fetch_status(
        &self,
        provider: PaymentProvider,
        order_id: &str,
    ) -> Result<PaymentVerification> {
        self.gateway(provider)?.fetch_status(order_id).await
    }
}

/// Lowercase hex SHA256
pub(crate) fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Compare two byte strings without short-circuiting on the first mismatch
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
