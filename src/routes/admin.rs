//! Back office: dashboard stats, audit trail, cache control and roles

use bson::{doc, Bson, Document};
use bytes::Bytes;
use futures::TryStreamExt;
use hyper::Request;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::auth::Role;
use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::{
    AuditLogDoc, CertificateDoc, CourseDoc, EnrollmentDoc, EnrollmentStatus, InquiryDoc,
    InquiryStatus, InstructorDoc, PaymentDoc, PaymentState, StudentDoc, TestimonialDoc, UserDoc,
    AUDIT_LOG_COLLECTION, CERTIFICATE_COLLECTION, COURSE_COLLECTION, ENROLLMENT_COLLECTION,
    INQUIRY_COLLECTION, INSTRUCTOR_COLLECTION, PAYMENT_COLLECTION, STUDENT_COLLECTION,
    TESTIMONIAL_COLLECTION, USER_COLLECTION,
};
use crate::db::MongoClient;
use crate::logging::AuditEvent;
use crate::mail::templates::format_rupees;
use crate::routes::common::{
    db, hex_id, ok, parse_id, parse_json, parse_query, record_change, require_admin,
    HandlerResult, Page, Pagination,
};
use crate::server::AppState;
use crate::types::{AppError, Result};

#[derive(Debug, Default, Serialize)]
pub struct EnrollmentCounts {
    pub pending_payment: u64,
    pub active: u64,
    pub completed: u64,
    pub cancelled: u64,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub students: u64,
    pub courses: u64,
    pub active_courses: u64,
    pub instructors: u64,
    pub enrollments: EnrollmentCounts,
    pub new_inquiries: u64,
    pub pending_testimonials: u64,
    pub certificates_issued: u64,
    pub revenue_paise: i64,
    pub revenue: String,
}

#[derive(Debug, Serialize)]
pub struct AuditLogView {
    pub id: String,
    pub actor: String,
    pub action: String,
    pub entity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Document>,
    pub at: String,
}

impl From<AuditLogDoc> for AuditLogView {
    fn from(entry: AuditLogDoc) -> Self {
        Self {
            id: hex_id(&entry._id),
            at: entry.at.to_chrono().to_rfc3339(),
            actor: entry.actor,
            action: entry.action,
            entity: entry.entity,
            entity_id: entry.entity_id,
            details: entry.details,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    pub entity: Option<String>,
    pub actor: Option<String>,
    pub action: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl AuditQuery {
    fn filter(&self) -> Document {
        let mut filter = Document::new();
        for (field, value) in [("entity", &self.entity), ("actor", &self.actor), ("action", &self.action)] {
            if let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
                filter.insert(field, value.to_lowercase());
            }
        }
        filter
    }
}

#[derive(Debug, Deserialize)]
pub struct RoleUpdateRequest {
    pub role: Role,
}

async fn count<T>(mongo: &MongoClient, collection: &str, filter: Document) -> Result<u64>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata,
{
    mongo.collection::<T>(collection).await?.count(filter).await
}

/// Sum of paid payment amounts
async fn revenue(mongo: &MongoClient) -> Result<i64> {
    let payments = mongo.collection::<PaymentDoc>(PAYMENT_COLLECTION).await?;
    let pipeline = vec![
        doc! { "$match": {
            "status": PaymentState::Paid.as_str(),
            "metadata.is_deleted": { "$ne": true },
        } },
        doc! { "$group": { "_id": Bson::Null, "total": { "$sum": "$amount_paise" } } },
    ];
    let mut cursor = payments.inner().aggregate(pipeline).await?;
    let total = match cursor.try_next().await? {
        Some(row) => match row.get("total") {
            Some(Bson::Int64(v)) => *v,
            Some(Bson::Int32(v)) => i64::from(*v),
            Some(Bson::Double(v)) => *v as i64,
            _ => 0,
        },
        None => 0,
    };
    Ok(total)
}

/// `GET /api/admin/stats`
pub async fn stats(req: &Request<Bytes>, state: &AppState) -> HandlerResult {
    require_admin(req, state).await?;
    let mongo = db(state)?;
    let by_status = |status: EnrollmentStatus| doc! { "status": status.as_str() };

    let (students, courses, active_courses, instructors) = tokio::try_join!(
        count::<StudentDoc>(mongo, STUDENT_COLLECTION, Document::new()),
        count::<CourseDoc>(mongo, COURSE_COLLECTION, Document::new()),
        count::<CourseDoc>(mongo, COURSE_COLLECTION, doc! { "is_active": true }),
        count::<InstructorDoc>(mongo, INSTRUCTOR_COLLECTION, Document::new()),
    )?;
    let (pending_payment, active, completed, cancelled) = tokio::try_join!(
        count::<EnrollmentDoc>(mongo, ENROLLMENT_COLLECTION, by_status(EnrollmentStatus::PendingPayment)),
        count::<EnrollmentDoc>(mongo, ENROLLMENT_COLLECTION, by_status(EnrollmentStatus::Active)),
        count::<EnrollmentDoc>(mongo, ENROLLMENT_COLLECTION, by_status(EnrollmentStatus::Completed)),
        count::<EnrollmentDoc>(mongo, ENROLLMENT_COLLECTION, by_status(EnrollmentStatus::Cancelled)),
    )?;
    let (new_inquiries, pending_testimonials, certificates_issued, revenue_paise) = tokio::try_join!(
        count::<InquiryDoc>(mongo, INQUIRY_COLLECTION, doc! { "status": InquiryStatus::New.as_str() }),
        count::<TestimonialDoc>(mongo, TESTIMONIAL_COLLECTION, doc! { "is_approved": false }),
        count::<CertificateDoc>(mongo, CERTIFICATE_COLLECTION, doc! { "is_revoked": false }),
        revenue(mongo),
    )?;

    ok(&StatsResponse {
        students,
        courses,
        active_courses,
        instructors,
        enrollments: EnrollmentCounts {
            pending_payment,
            active,
            completed,
            cancelled,
        },
        new_inquiries,
        pending_testimonials,
        certificates_issued,
        revenue_paise,
        revenue: format_rupees(revenue_paise),
    })
}

/// `GET /api/admin/audit-logs` - newest first
pub async fn audit_logs(req: &Request<Bytes>, state: &AppState) -> HandlerResult {
    require_admin(req, state).await?;
    let query: AuditQuery = parse_query(req)?;
    let logs = db(state)?.collection::<AuditLogDoc>(AUDIT_LOG_COLLECTION).await?;

    let filter = query.filter();
    let (page, limit) = Pagination { page: query.page, limit: query.limit }.resolve();
    let total = logs.count(filter.clone()).await?;
    let items = logs.find_page(filter, doc! { "at": -1 }, page, limit).await?;
    ok(&Page::new(items, total, page, limit).map(AuditLogView::from))
}

/// `DELETE /api/admin/cache` - drop every cached listing and snapshot
pub async fn clear_cache(req: &Request<Bytes>, state: &AppState) -> HandlerResult {
    let claims = require_admin(req, state).await?;
    state.cache.clear().await;
    record_change(state, &claims, AuditEvent::new("clear", "cache"), None).await;
    ok(&serde_json::json!({ "cleared": true }))
}

/// `PUT /api/admin/users/{id}/role` - change the role claim and revoke
/// the user's sessions so the new role applies at next login
pub async fn update_role(req: &Request<Bytes>, state: &AppState, user_id: &str) -> HandlerResult {
    let claims = require_admin(req, state).await?;
    let oid = parse_id(user_id)?;
    let body: RoleUpdateRequest = parse_json(req)?;

    if claims.sub == oid.to_hex() && body.role < Role::Admin {
        return Err(AppError::BadRequest("Cannot remove your own admin role".into()));
    }

    let role = bson::to_bson(&body.role).map_err(|e| AppError::Internal(e.to_string()))?;
    let users = db(state)?.collection::<UserDoc>(USER_COLLECTION).await?;
    let result = users
        .update_one(
            doc! { "_id": oid },
            doc! {
                "$set": { "role": role, "metadata.updated_at": bson::DateTime::now() },
                "$inc": { "token_version": 1 },
            },
        )
        .await?;
    if result.matched_count == 0 {
        return Err(AppError::NotFound(format!("User {} not found", user_id)));
    }

    record_change(
        state,
        &claims,
        AuditEvent::new("update_role", "user")
            .with_id(oid)
            .with_details(doc! { "role": body.role.to_string() }),
        None,
    )
    .await;

    ok(&serde_json::json!({ "id": user_id, "role": body.role, "sessions_revoked": true }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenInput;
    use crate::server::testing::{request, session_cookie, state};
    use bson::oid::ObjectId;
    use hyper::{Method, StatusCode};

    #[test]
    fn test_audit_filter() {
        let query: AuditQuery = serde_urlencoded::from_str("entity=Course&actor=&action=delete").unwrap();
        let filter = query.filter();
        assert_eq!(filter.get_str("entity").unwrap(), "course");
        assert_eq!(filter.get_str("action").unwrap(), "delete");
        assert!(!filter.contains_key("actor"));
    }

    #[tokio::test]
    async fn test_stats_requires_admin() {
        let state = state();
        let req = request(Method::GET, "/api/admin/stats", "", None);
        assert!(matches!(stats(&req, &state).await, Err(AppError::Unauthorized(_))));

        let cookie = session_cookie(&state, Role::Student);
        let req = request(Method::GET, "/api/admin/stats", "", Some(&cookie));
        assert!(matches!(stats(&req, &state).await, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_clear_cache_empties_listings() {
        let state = state();
        state.cache.set_with_snapshot("courses:list", "[]".into()).await;

        let cookie = session_cookie(&state, Role::Admin);
        let req = request(Method::DELETE, "/api/admin/cache", "", Some(&cookie));
        let resp = clear_cache(&req, &state).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(state.cache.get("courses:list").await.is_none());
        assert!(state.cache.stale("courses:list").await.is_none());
    }

    #[tokio::test]
    async fn test_admin_cannot_demote_self() {
        let state = state();
        let me = ObjectId::new();
        let token = state
            .sessions
            .jwt()
            .generate_token(TokenInput {
                user_id: me.to_hex(),
                email: "owner@example.com".into(),
                role: Role::Admin,
                token_version: 1,
            })
            .unwrap();
        let cookie = format!("session={token}");
        let req = request(Method::PUT, "/api/admin/users/x/role", r#"{"role":"STUDENT"}"#, Some(&cookie));
        let err = update_role(&req, &state, &me.to_hex()).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
