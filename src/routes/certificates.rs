//! Course completion certificates
//!
//! Issued by admins for completed enrollments, verifiable by anyone through
//! the certificate number. Revocation keeps the record so verification can
//! report it.

use bson::{doc, DateTime, Document};
use bytes::Bytes;
use chrono::Datelike;
use hyper::Request;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use validator::Validate;

use crate::db::schemas::{
    generate_certificate_number, CertificateDoc, CourseDoc, EnrollmentDoc, EnrollmentStatus,
    Metadata, StudentDoc, CERTIFICATE_COLLECTION, COURSE_COLLECTION, ENROLLMENT_COLLECTION,
    STUDENT_COLLECTION,
};
use crate::logging::AuditEvent;
use crate::mail::{self, templates};
use crate::routes::common::{
    created, db, hex_id, ok, parse_id, parse_query, parse_valid, record_change, require_admin,
    HandlerResult, Page, Pagination,
};
use crate::server::AppState;
use crate::types::AppError;

/// Attempts at drawing an unused certificate number
const NUMBER_ATTEMPTS: usize = 3;

#[derive(Debug, Serialize)]
pub struct CertificateView {
    pub id: String,
    pub certificate_number: String,
    pub enrollment_id: String,
    pub student_id: String,
    pub course_id: String,
    pub student_name: String,
    pub course_title: String,
    pub issued_at: String,
    pub is_revoked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<String>,
}

impl From<CertificateDoc> for CertificateView {
    fn from(cert: CertificateDoc) -> Self {
        Self {
            id: hex_id(&cert._id),
            enrollment_id: cert.enrollment_id.to_hex(),
            student_id: cert.student_id.to_hex(),
            course_id: cert.course_id.to_hex(),
            issued_at: cert.issued_at.to_chrono().to_rfc3339(),
            revoked_at: cert.revoked_at.map(|d| d.to_chrono().to_rfc3339()),
            certificate_number: cert.certificate_number,
            student_name: cert.student_name,
            course_title: cert.course_title,
            is_revoked: cert.is_revoked,
        }
    }
}

/// Public verification reply
#[derive(Debug, Serialize)]
pub struct VerificationResponse {
    pub valid: bool,
    pub certificate_number: String,
    pub student_name: String,
    pub course_title: String,
    pub issued_at: String,
    pub revoked: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct IssueCertificateRequest {
    #[validate(length(equal = 24, message = "must be an enrollment id"))]
    pub enrollment_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CertificateQuery {
    pub revoked: Option<bool>,
    pub student_id: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// `GET /api/certificates/verify/{number}`
pub async fn verify(state: &AppState, number: &str) -> HandlerResult {
    let number = number.trim().to_uppercase();
    let certificates = db(state)?.collection::<CertificateDoc>(CERTIFICATE_COLLECTION).await?;

    let cert = certificates
        .find_one(doc! { "certificate_number": &number })
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Certificate {} not found", number)))?;

    ok(&VerificationResponse {
        valid: !cert.is_revoked,
        issued_at: cert.issued_at.to_chrono().to_rfc3339(),
        certificate_number: cert.certificate_number,
        student_name: cert.student_name,
        course_title: cert.course_title,
        revoked: cert.is_revoked,
    })
}

/// `GET /api/admin/certificates`
pub async fn admin_list(req: &Request<Bytes>, state: &AppState) -> HandlerResult {
    require_admin(req, state).await?;
    let query: CertificateQuery = parse_query(req)?;
    let certificates = db(state)?.collection::<CertificateDoc>(CERTIFICATE_COLLECTION).await?;

    let mut filter = Document::new();
    if let Some(revoked) = query.revoked {
        filter.insert("is_revoked", revoked);
    }
    if let Some(id) = query.student_id.as_deref() {
        filter.insert("student_id", parse_id(id)?);
    }

    let (page, limit) = Pagination { page: query.page, limit: query.limit }.resolve();
    let total = certificates.count(filter.clone()).await?;
    let items = certificates
        .find_page(filter, doc! { "issued_at": -1 }, page, limit)
        .await?;
    ok(&Page::new(items, total, page, limit).map(CertificateView::from))
}

fn already_issued() -> AppError {
    AppError::Conflict("A certificate was already issued for this enrollment".into())
}

/// `POST /api/admin/certificates` - issue for a completed enrollment
pub async fn issue(req: &Request<Bytes>, state: &AppState) -> HandlerResult {
    let claims = require_admin(req, state).await?;
    let body: IssueCertificateRequest = parse_valid(req)?;
    let enrollment_id = parse_id(&body.enrollment_id)?;
    let mongo = db(state)?;

    let enrollment = mongo
        .collection::<EnrollmentDoc>(ENROLLMENT_COLLECTION)
        .await?
        .find_by_id(enrollment_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Enrollment {} not found", body.enrollment_id)))?;
    if enrollment.status != EnrollmentStatus::Completed {
        return Err(AppError::BadRequest(format!(
            "Enrollment is {}, certificates are issued only for completed enrollments",
            enrollment.status
        )));
    }

    let certificates = mongo.collection::<CertificateDoc>(CERTIFICATE_COLLECTION).await?;
    let live = doc! { "enrollment_id": enrollment_id, "is_revoked": false };
    if certificates.count(live.clone()).await? > 0 {
        return Err(already_issued());
    }

    let student = mongo
        .collection::<StudentDoc>(STUDENT_COLLECTION)
        .await?
        .find_by_id(enrollment.student_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Student not found".into()))?;
    let course = mongo
        .collection::<CourseDoc>(COURSE_COLLECTION)
        .await?
        .find_by_id(enrollment.course_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Course not found".into()))?;

    let year = chrono::Utc::now().year();
    let mut cert = CertificateDoc {
        _id: None,
        metadata: Metadata::new(),
        certificate_number: String::new(),
        enrollment_id,
        student_id: enrollment.student_id,
        course_id: enrollment.course_id,
        student_name: student.name.clone(),
        course_title: course.title.clone(),
        issued_at: DateTime::now(),
        is_revoked: false,
        revoked_at: None,
    };

    let mut inserted = None;
    for attempt in 1..=NUMBER_ATTEMPTS {
        cert.certificate_number = generate_certificate_number(year);
        match certificates.insert_one(cert.clone()).await {
            Ok(id) => {
                inserted = Some(id);
                break;
            }
            Err(AppError::Conflict(_)) => {
                // The live-per-enrollment index rejects a concurrent issue too
                if certificates.count(live.clone()).await? > 0 {
                    return Err(already_issued());
                }
                warn!(attempt, number = %cert.certificate_number, "Certificate number collision");
            }
            Err(e) => return Err(e),
        }
    }
    let id = inserted.ok_or_else(|| AppError::Internal("Could not allocate a certificate number".into()))?;
    cert._id = Some(id);

    info!(certificate = %cert.certificate_number, enrollment_id = %enrollment_id, "Certificate issued");

    let verify_url = format!(
        "{}/certificates/verify/{}",
        state.args.public_url.trim_end_matches('/'),
        cert.certificate_number
    );
    let email = templates::certificate_issued(
        &state.args.school_name,
        &student.email,
        &student.name,
        &course.title,
        &cert.certificate_number,
        &verify_url,
    );
    mail::send_logged(state.mailer.as_ref(), &state.metrics, &email).await;

    record_change(
        state,
        &claims,
        AuditEvent::new("issue", "certificate")
            .with_id(id)
            .with_details(doc! { "certificate_number": &cert.certificate_number }),
        None,
    )
    .await;

    created(&CertificateView::from(cert))
}

/// `DELETE /api/admin/certificates/{id}` - revoke
pub async fn revoke(req: &Request<Bytes>, state: &AppState, id: &str) -> HandlerResult {
    let claims = require_admin(req, state).await?;
    let oid = parse_id(id)?;
    let certificates = db(state)?.collection::<CertificateDoc>(CERTIFICATE_COLLECTION).await?;

    let cert = certificates
        .set_fields_returning(
            doc! { "_id": oid, "is_revoked": false },
            doc! { "is_revoked": true, "revoked_at": DateTime::now() },
        )
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Certificate {} not found or already revoked", id)))?;

    record_change(
        state,
        &claims,
        AuditEvent::new("revoke", "certificate")
            .with_id(oid)
            .with_details(doc! { "certificate_number": &cert.certificate_number }),
        None,
    )
    .await;

    ok(&CertificateView::from(cert))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::server::testing::{request, session_cookie, state};
    use bson::oid::ObjectId;
    use hyper::Method;

    #[test]
    fn test_view_reports_revocation() {
        let cert = CertificateDoc {
            _id: Some(ObjectId::new()),
            metadata: Metadata::new(),
            certificate_number: "RW-2026-ABC234".into(),
            enrollment_id: ObjectId::new(),
            student_id: ObjectId::new(),
            course_id: ObjectId::new(),
            student_name: "Asha Rao".into(),
            course_title: "Car Basics".into(),
            issued_at: DateTime::now(),
            is_revoked: true,
            revoked_at: Some(DateTime::now()),
        };
        let view = CertificateView::from(cert);
        assert!(view.is_revoked);
        assert!(view.revoked_at.is_some());
        assert_eq!(view.certificate_number, "RW-2026-ABC234");
    }

    #[tokio::test]
    async fn test_issue_validates_enrollment_id() {
        let state = state();
        let cookie = session_cookie(&state, Role::Admin);
        let req = request(Method::POST, "/api/admin/certificates", r#"{"enrollment_id":"42"}"#, Some(&cookie));
        assert!(matches!(issue(&req, &state).await, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_verify_without_database_is_503() {
        assert!(matches!(
            verify(&state(), "RW-2026-ABC234").await,
            Err(AppError::DatabaseUnavailable)
        ));
    }
}
