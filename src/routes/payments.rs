//! Payment orders and gateway callbacks
//!
//! A student opens an order against one of their unpaid enrollments; the
//! amount always comes from the enrollment. Checkout verification, webhooks,
//! PhonePe callbacks and status polls all funnel into [`apply_verification`],
//! which is idempotent: a payment that is already paid stays paid.

use bson::{doc, DateTime, Document};
use bytes::Bytes;
use hyper::Request;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use validator::Validate;

use crate::db::schemas::{
    CourseDoc, EnrollmentDoc, EnrollmentStatus, Metadata, PaymentDoc, PaymentProvider,
    PaymentState, PaymentStatus, StudentDoc, COURSE_COLLECTION, ENROLLMENT_COLLECTION,
    PAYMENT_COLLECTION, STUDENT_COLLECTION,
};
use crate::db::MongoClient;
use crate::mail::{self, templates};
use crate::metrics::Metrics;
use crate::payments::{CallbackPayload, OrderRequest, PaymentOutcome, PaymentVerification};
use crate::routes::common::{
    created, db, hex_id, ok, parse_id, parse_json, parse_valid, require_student, HandlerResult,
};
use crate::routes::students::current_student;
use crate::server::AppState;
use crate::types::{AppError, Result};

#[derive(Debug, Serialize)]
pub struct PaymentView {
    pub id: String,
    pub enrollment_id: String,
    pub provider: PaymentProvider,
    pub order_id: String,
    pub amount_paise: i64,
    pub amount: String,
    pub currency: String,
    pub status: PaymentState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_payment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl From<PaymentDoc> for PaymentView {
    fn from(payment: PaymentDoc) -> Self {
        Self {
            id: hex_id(&payment._id),
            enrollment_id: payment.enrollment_id.to_hex(),
            amount: templates::format_rupees(payment.amount_paise),
            paid_at: payment.paid_at.map(|d| d.to_chrono().to_rfc3339()),
            created_at: payment.metadata.created_rfc3339(),
            provider: payment.provider,
            order_id: payment.order_id,
            amount_paise: payment.amount_paise,
            currency: payment.currency,
            status: payment.status,
            gateway_payment_id: payment.gateway_payment_id,
            failure_reason: payment.failure_reason,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrderRequest {
    #[validate(length(equal = 24, message = "must be an enrollment id"))]
    pub enrollment_id: String,
    pub provider: PaymentProvider,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RazorpayVerifyRequest {
    #[validate(length(min = 1, message = "is required"))]
    pub razorpay_order_id: String,
    #[validate(length(min = 1, message = "is required"))]
    pub razorpay_payment_id: String,
    #[validate(length(min = 1, message = "is required"))]
    pub razorpay_signature: String,
}

#[derive(Debug, Deserialize)]
struct PhonePeCallbackBody {
    response: String,
}

#[derive(Debug, Serialize)]
struct VerificationReply {
    verified: bool,
    payment: PaymentView,
}

/// Receipt passed to the gateway: `rw_<enrollment>_<unix secs>` (38 chars,
/// inside PhonePe's merchantTransactionId limit)
fn receipt_for(enrollment_id: &bson::oid::ObjectId) -> String {
    format!("rw_{}_{}", enrollment_id.to_hex(), chrono::Utc::now().timestamp())
}

/// `POST /api/payments/order`
pub async fn create_order(req: &Request<Bytes>, state: &AppState) -> HandlerResult {
    let (_, student) = current_student(req, state).await?;
    let body: CreateOrderRequest = parse_valid(req)?;
    let enrollment_id = parse_id(&body.enrollment_id)?;
    let student_id = student
        ._id
        .ok_or_else(|| AppError::Internal("Student without id".into()))?;
    let mongo = db(state)?;

    let enrollment = mongo
        .collection::<EnrollmentDoc>(ENROLLMENT_COLLECTION)
        .await?
        .find_one(doc! { "_id": enrollment_id, "student_id": student_id })
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Enrollment {} not found", body.enrollment_id)))?;

    if enrollment.payment_status == PaymentStatus::Paid {
        return Err(AppError::Conflict("Enrollment is already paid".into()));
    }
    if enrollment.status == EnrollmentStatus::Cancelled {
        return Err(AppError::BadRequest("Enrollment is cancelled".into()));
    }

    let mut notes = BTreeMap::new();
    notes.insert("enrollment_id".to_string(), enrollment_id.to_hex());
    notes.insert("course_id".to_string(), enrollment.course_id.to_hex());
    notes.insert("student_name".to_string(), student.name.clone());

    let order = state
        .payments
        .create_order(
            body.provider,
            &OrderRequest {
                receipt: receipt_for(&enrollment_id),
                amount_paise: enrollment.amount_paise,
                currency: state.args.payments.currency.clone(),
                customer_id: student_id.to_hex(),
                customer_phone: Some(student.phone.clone()),
                notes,
            },
        )
        .await?;

    mongo
        .collection::<PaymentDoc>(PAYMENT_COLLECTION)
        .await?
        .insert_one(PaymentDoc {
            _id: None,
            metadata: Metadata::new(),
            enrollment_id,
            student_id,
            provider: body.provider,
            order_id: order.order_id.clone(),
            amount_paise: order.amount_paise,
            currency: order.currency.clone(),
            status: PaymentState::Created,
            gateway_payment_id: None,
            failure_reason: None,
            paid_at: None,
        })
        .await?;

    Metrics::incr(&state.metrics.payment_orders_created);
    info!(
        provider = %body.provider,
        order_id = %order.order_id,
        amount_paise = order.amount_paise,
        "Payment order created"
    );

    created(&order)
}

/// `POST /api/payments/razorpay/verify` - checkout handler callback
pub async fn razorpay_verify(req: &Request<Bytes>, state: &AppState) -> HandlerResult {
    require_student(req, state).await?;
    let body: RazorpayVerifyRequest = parse_valid(req)?;

    let verification = state.payments.verify_callback(
        PaymentProvider::Razorpay,
        &CallbackPayload::RazorpayCheckout {
            order_id: body.razorpay_order_id,
            payment_id: body.razorpay_payment_id,
            signature: body.razorpay_signature,
        },
    );
    let verification = count_rejection(state, verification)?;
    let payment = apply_verification(state, &verification).await?;

    ok(&VerificationReply {
        verified: payment.status == PaymentState::Paid,
        payment: PaymentView::from(payment),
    })
}

/// `POST /api/payments/razorpay/webhook` - signature over the raw body
pub async fn razorpay_webhook(req: &Request<Bytes>, state: &AppState) -> HandlerResult {
    let signature = header(req, "X-Razorpay-Signature")?;
    let verification = state.payments.verify_callback(
        PaymentProvider::Razorpay,
        &CallbackPayload::RazorpayWebhook {
            body: req.body().clone(),
            signature,
        },
    );
    let verification = count_rejection(state, verification)?;
    acknowledge(state, &verification).await
}

/// `POST /api/payments/phonepe/callback` - `{"response": base64}` + `X-VERIFY`
pub async fn phonepe_callback(req: &Request<Bytes>, state: &AppState) -> HandlerResult {
    let x_verify = header(req, "X-VERIFY")?;
    let body: PhonePeCallbackBody = parse_json(req)?;
    let verification = state.payments.verify_callback(
        PaymentProvider::Phonepe,
        &CallbackPayload::PhonePe {
            response: body.response,
            x_verify,
        },
    );
    let verification = count_rejection(state, verification)?;
    acknowledge(state, &verification).await
}

/// `GET /api/payments/phonepe/status/{txn_id}` - owner only
pub async fn phonepe_status(req: &Request<Bytes>, state: &AppState, txn_id: &str) -> HandlerResult {
    let (_, student) = current_student(req, state).await?;
    let payments = db(state)?.collection::<PaymentDoc>(PAYMENT_COLLECTION).await?;

    let payment = payments
        .find_one(doc! { "order_id": txn_id, "provider": PaymentProvider::Phonepe.as_str() })
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Transaction {} not found", txn_id)))?;
    if Some(payment.student_id) != student._id {
        return Err(AppError::Forbidden("Transaction belongs to another student".into()));
    }
    if payment.status == PaymentState::Paid {
        return ok(&PaymentView::from(payment));
    }

    let verification = state
        .payments
        .fetch_status(PaymentProvider::Phonepe, txn_id)
        .await?;
    let payment = apply_verification(state, &verification).await?;
    ok(&PaymentView::from(payment))
}

fn header(req: &Request<Bytes>, name: &str) -> Result<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Unauthorized(format!("Missing {} header", name)))
}

fn count_rejection(state: &AppState, verification: Result<PaymentVerification>) -> Result<PaymentVerification> {
    if let Err(AppError::Unauthorized(ref reason)) = verification {
        warn!(reason = %reason, "Payment callback rejected");
        Metrics::incr(&state.metrics.payments_failed);
    }
    verification
}

/// Server-to-server callbacks: apply and always answer 200 for orders we
/// do not know, so the gateway stops retrying
async fn acknowledge(state: &AppState, verification: &PaymentVerification) -> HandlerResult {
    if verification.outcome == PaymentOutcome::Ignored {
        debug!(order_id = %verification.order_id, "Ignoring gateway event");
        return ok(&serde_json::json!({ "received": true }));
    }
    match apply_verification(state, verification).await {
        Ok(payment) => ok(&serde_json::json!({ "received": true, "status": payment.status })),
        Err(AppError::NotFound(msg)) => {
            warn!(order_id = %verification.order_id, "{}", msg);
            ok(&serde_json::json!({ "received": true }))
        }
        Err(e) => Err(e),
    }
}

/// State change a verified gateway result asks for
#[derive(Debug, PartialEq, Eq)]
enum Transition {
    Paid,
    Failed(String),
    Unchanged,
}

fn transition(payment: &PaymentDoc, verification: &PaymentVerification) -> Result<Transition> {
    match &verification.outcome {
        PaymentOutcome::Paid if payment.status == PaymentState::Paid => Ok(Transition::Unchanged),
        PaymentOutcome::Paid => match verification.amount_paise {
            Some(amount) if amount != payment.amount_paise => Err(AppError::BadRequest(format!(
                "Amount mismatch for order {}: expected {}, gateway reported {}",
                payment.order_id, payment.amount_paise, amount
            ))),
            _ => Ok(Transition::Paid),
        },
        PaymentOutcome::Failed { reason } if payment.status == PaymentState::Created => {
            Ok(Transition::Failed(reason.clone()))
        }
        _ => Ok(Transition::Unchanged),
    }
}

/// Narrow `filter` so the update only lands while `step` is still allowed.
/// A paid payment never moves again and only a created one can fail.
fn guarded(filter: &Document, step: &Transition) -> Document {
    let mut guarded = filter.clone();
    match step {
        Transition::Paid => {
            guarded.insert("status", doc! { "$ne": PaymentState::Paid.as_str() });
        }
        Transition::Failed(_) => {
            guarded.insert("status", PaymentState::Created.as_str());
        }
        Transition::Unchanged => {}
    }
    guarded
}

/// Record a verified gateway result against the stored payment
pub(crate) async fn apply_verification(
    state: &AppState,
    verification: &PaymentVerification,
) -> Result<PaymentDoc> {
    let mongo = db(state)?;
    let payments = mongo.collection::<PaymentDoc>(PAYMENT_COLLECTION).await?;
    let filter = doc! {
        "order_id": &verification.order_id,
        "provider": verification.provider.as_str(),
    };
    let payment = payments
        .find_one(filter.clone())
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Payment order {} not found", verification.order_id)))?;

    let step = transition(&payment, verification).inspect_err(|e| {
        warn!(order_id = %payment.order_id, "{}", e);
        Metrics::incr(&state.metrics.payments_failed);
    })?;

    match &step {
        Transition::Unchanged => Ok(payment),
        Transition::Failed(reason) => {
            let mut fields = doc! { "status": PaymentState::Failed.as_str(), "failure_reason": reason.as_str() };
            if let Some(ref id) = verification.payment_id {
                fields.insert("gateway_payment_id", id.as_str());
            }
            // A concurrent success may have won since the read
            let Some(failed) = payments.set_fields_returning(guarded(&filter, &step), fields).await? else {
                return Ok(payments.find_one(filter).await?.unwrap_or(payment));
            };
            Metrics::incr(&state.metrics.payments_failed);
            info!(order_id = %failed.order_id, reason = %reason, "Payment failed");
            Ok(failed)
        }
        Transition::Paid => {
            let mut fields = doc! { "status": PaymentState::Paid.as_str(), "paid_at": DateTime::now() };
            if let Some(ref id) = verification.payment_id {
                fields.insert("gateway_payment_id", id.as_str());
            }
            // Concurrent callbacks mark it paid once
            let Some(paid) = payments.set_fields_returning(guarded(&filter, &step), fields).await? else {
                return Ok(payments.find_one(filter).await?.unwrap_or(payment));
            };

            let enrollments = mongo.collection::<EnrollmentDoc>(ENROLLMENT_COLLECTION).await?;
            enrollments
                .set_fields(
                    doc! { "_id": paid.enrollment_id },
                    doc! { "payment_status": PaymentStatus::Paid.as_str() },
                )
                .await?;
            enrollments
                .set_fields(
                    doc! { "_id": paid.enrollment_id, "status": EnrollmentStatus::PendingPayment.as_str() },
                    doc! { "status": EnrollmentStatus::Active.as_str() },
                )
                .await?;

            Metrics::incr(&state.metrics.payments_verified);
            info!(
                provider = %paid.provider,
                order_id = %paid.order_id,
                amount_paise = paid.amount_paise,
                "Payment verified"
            );
            send_receipt(state, mongo, &paid).await;
            Ok(paid)
        }
    }
}

async fn send_receipt(state: &AppState, mongo: &MongoClient, payment: &PaymentDoc) {
    let details = async {
        let student = mongo
            .collection::<StudentDoc>(STUDENT_COLLECTION)
            .await?
            .find_by_id(payment.student_id)
            .await?;
        let enrollment = mongo
            .collection::<EnrollmentDoc>(ENROLLMENT_COLLECTION)
            .await?
            .find_by_id(payment.enrollment_id)
            .await?;
        let course = match enrollment {
            Some(e) => mongo
                .collection::<CourseDoc>(COURSE_COLLECTION)
                .await?
                .find_by_id(e.course_id)
                .await?,
            None => None,
        };
        Ok::<_, AppError>((student, course))
    };

    match details.await {
        Ok((Some(student), course)) => {
            let title = course.map(|c| c.title).unwrap_or_else(|| "your course".to_string());
            let email = templates::payment_receipt(
                &state.args.school_name,
                &student.email,
                &student.name,
                &title,
                payment.amount_paise,
                &payment.order_id,
                payment.provider.as_str(),
            );
            mail::send_logged(state.mailer.as_ref(), &state.metrics, &email).await;
        }
        Ok((None, _)) => warn!(order_id = %payment.order_id, "Receipt skipped: student not found"),
        Err(e) => warn!(order_id = %payment.order_id, error = %e, "Receipt skipped"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::testing::{request, state};
    use bson::oid::ObjectId;
    use hyper::Method;

    fn payment(status: PaymentState) -> PaymentDoc {
        PaymentDoc {
            _id: Some(ObjectId::new()),
            metadata: Metadata::new(),
            enrollment_id: ObjectId::new(),
            student_id: ObjectId::new(),
            provider: PaymentProvider::Razorpay,
            order_id: "order_9A33XWu170gUtm".into(),
            amount_paise: 450_000,
            currency: "INR".into(),
            status,
            gateway_payment_id: None,
            failure_reason: None,
            paid_at: None,
        }
    }

    fn verification(outcome: PaymentOutcome, amount_paise: Option<i64>) -> PaymentVerification {
        PaymentVerification {
            provider: PaymentProvider::Razorpay,
            order_id: "order_9A33XWu170gUtm".into(),
            payment_id: Some("pay_29QQoUBi66xm2f".into()),
            amount_paise,
            outcome,
        }
    }

    #[test]
    fn test_paid_transition() {
        let created = payment(PaymentState::Created);
        assert_eq!(
            transition(&created, &verification(PaymentOutcome::Paid, Some(450_000))).unwrap(),
            Transition::Paid
        );
        assert_eq!(
            transition(&created, &verification(PaymentOutcome::Paid, None)).unwrap(),
            Transition::Paid
        );
    }

    #[test]
    fn test_already_paid_is_unchanged() {
        let paid = payment(PaymentState::Paid);
        assert_eq!(
            transition(&paid, &verification(PaymentOutcome::Paid, Some(450_000))).unwrap(),
            Transition::Unchanged
        );
        let failed = PaymentOutcome::Failed { reason: "late failure".into() };
        assert_eq!(transition(&paid, &verification(failed, None)).unwrap(), Transition::Unchanged);
    }

    #[test]
    fn test_late_failure_cannot_overwrite_paid() {
        let filter = doc! { "order_id": "order_9A33XWu170gUtm", "provider": "razorpay" };

        let fail = guarded(&filter, &Transition::Failed("card declined".into()));
        assert_eq!(fail.get_str("status").unwrap(), "created");
        assert_eq!(fail.get_str("order_id").unwrap(), "order_9A33XWu170gUtm");

        let pay = guarded(&filter, &Transition::Paid);
        assert_eq!(pay.get_document("status").unwrap(), &doc! { "$ne": "paid" });

        assert_eq!(guarded(&filter, &Transition::Unchanged), filter);
    }

    #[test]
    fn test_failure_after_failure_is_unchanged() {
        let failed = payment(PaymentState::Failed);
        let outcome = PaymentOutcome::Failed { reason: "retry declined".into() };
        assert_eq!(transition(&failed, &verification(outcome, None)).unwrap(), Transition::Unchanged);
    }

    #[test]
    fn test_failed_payment_can_still_be_paid() {
        let failed = payment(PaymentState::Failed);
        assert_eq!(
            transition(&failed, &verification(PaymentOutcome::Paid, Some(450_000))).unwrap(),
            Transition::Paid
        );
    }

    #[test]
    fn test_amount_mismatch_rejected() {
        let created = payment(PaymentState::Created);
        let err = transition(&created, &verification(PaymentOutcome::Paid, Some(100))).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(ref m) if m.contains("mismatch")));
    }

    #[test]
    fn test_receipt_fits_phonepe_limit() {
        let receipt = receipt_for(&ObjectId::new());
        assert!(receipt.starts_with("rw_"));
        assert!(receipt.len() <= 38);
    }

    #[test]
    fn test_payment_view_formats_amount() {
        let view = PaymentView::from(payment(PaymentState::Created));
        assert_eq!(view.amount, "₹4,500.00");
        assert!(view.paid_at.is_none());
    }

    #[tokio::test]
    async fn test_order_requires_session() {
        let state = state();
        let body = format!(r#"{{"enrollment_id":"{}","provider":"razorpay"}}"#, ObjectId::new().to_hex());
        let req = request(Method::POST, "/api/payments/order", &body, None);
        assert!(matches!(create_order(&req, &state).await, Err(AppError::Unauthorized(_))));
    }

    #[test]
    fn test_order_rejects_unknown_provider() {
        let body = format!(r#"{{"enrollment_id":"{}","provider":"paytm"}}"#, ObjectId::new().to_hex());
        assert!(serde_json::from_str::<CreateOrderRequest>(&body).is_err());
    }

    #[tokio::test]
    async fn test_webhook_without_signature_rejected() {
        let state = state();
        let req = request(Method::POST, "/api/payments/razorpay/webhook", "{}", None);
        assert!(matches!(razorpay_webhook(&req, &state).await, Err(AppError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_phonepe_callback_without_gateway_is_gateway_error() {
        let state = state();
        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/payments/phonepe/callback")
            .header("X-VERIFY", "abc###1")
            .body(Bytes::from(r#"{"response":"e30="}"#))
            .unwrap();
        assert!(matches!(phonepe_callback(&req, &state).await, Err(AppError::Gateway(_))));
    }
}
