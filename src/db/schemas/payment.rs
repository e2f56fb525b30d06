//! Payment document schema
//!
//! One document per gateway order. The enrollment's `payment_status` is
//! flipped when the matching payment moves to `paid`.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for payments
pub const PAYMENT_COLLECTION: &str = "payments";

/// Payment gateway that handled an order
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PaymentProvider {
    #[default]
    Razorpay,
    Phonepe,
}

impl PaymentProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentProvider::Razorpay => "razorpay",
            PaymentProvider::Phonepe => "phonepe",
        }
    }
}

impl fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "razorpay" => Ok(PaymentProvider::Razorpay),
            "phonepe" => Ok(PaymentProvider::Phonepe),
            other => Err(format!("Unknown payment provider: {other}")),
        }
    }
}

/// State of a single gateway order
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    #[default]
    Created,
    Paid,
    Failed,
}

impl PaymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::Created => "created",
            PaymentState::Paid => "paid",
            PaymentState::Failed => "failed",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PaymentDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub enrollment_id: ObjectId,

    pub student_id: ObjectId,

    pub provider: PaymentProvider,

    /// Gateway order id (Razorpay order id or PhonePe merchant transaction id)
    pub order_id: String,

    pub amount_paise: i64,

    pub currency: String,

    #[serde(default)]
    pub status: PaymentState,

    /// Gateway payment / transaction id once paid
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_payment_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<DateTime>,
}

impl IntoIndexes for PaymentDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "order_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("order_id_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "enrollment_id": 1 },
                Some(IndexOptions::builder().name("enrollment_index".to_string()).build()),
            ),
            (
                doc! { "student_id": 1 },
                Some(IndexOptions::builder().name("student_index".to_string()).build()),
            ),
        ]
    }
}

impl MutMetadata for PaymentDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
