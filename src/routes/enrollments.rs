//! Enrollments
//!
//! A student enrolls in an active course; the fee is copied from the course
//! at that moment and later charged through the payment gateways.

use bson::{doc, oid::ObjectId, Document};
use bytes::Bytes;
use hyper::Request;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;
use validator::Validate;

use crate::db::schemas::{
    CourseDoc, EnrollmentDoc, EnrollmentStatus, InstructorDoc, Metadata, PaymentStatus,
    COURSE_COLLECTION, ENROLLMENT_COLLECTION, INSTRUCTOR_COLLECTION,
};
use crate::logging::AuditEvent;
use crate::mail::{self, templates};
use crate::routes::common::{
    created, db, hex_id, ok, parse_id, parse_query, parse_valid, record_change, require_admin,
    validate_date, HandlerResult, Page, Pagination,
};
use crate::routes::students::current_student;
use crate::server::AppState;
use crate::types::AppError;

#[derive(Debug, Serialize)]
pub struct EnrollmentView {
    pub id: String,
    pub student_id: String,
    pub course_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructor_id: Option<String>,
    pub status: EnrollmentStatus,
    pub payment_status: PaymentStatus,
    pub amount_paise: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_start_date: Option<String>,
    pub sessions_completed: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl EnrollmentView {
    pub fn new(enrollment: EnrollmentDoc, course_title: Option<String>) -> Self {
        Self {
            id: hex_id(&enrollment._id),
            student_id: enrollment.student_id.to_hex(),
            course_id: enrollment.course_id.to_hex(),
            course_title,
            instructor_id: enrollment.instructor_id.map(|id| id.to_hex()),
            status: enrollment.status,
            payment_status: enrollment.payment_status,
            amount_paise: enrollment.amount_paise,
            created_at: enrollment.metadata.created_rfc3339(),
            preferred_start_date: enrollment.preferred_start_date,
            sessions_completed: enrollment.sessions_completed,
            notes: enrollment.notes,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateEnrollmentRequest {
    #[validate(length(equal = 24, message = "must be a course id"))]
    pub course_id: String,
    #[validate(custom(function = "validate_date"))]
    pub preferred_start_date: Option<String>,
    #[validate(length(max = 500, message = "at most 500 characters"))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateEnrollmentRequest {
    pub status: Option<EnrollmentStatus>,
    /// Instructor id; an empty string unassigns
    pub instructor_id: Option<String>,
    #[validate(range(min = 0, max = 500, message = "must be 0-500"))]
    pub sessions_completed: Option<i32>,
    #[validate(length(max = 500, message = "at most 500 characters"))]
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EnrollmentQuery {
    pub status: Option<String>,
    pub student_id: Option<String>,
    pub course_id: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl EnrollmentQuery {
    fn filter(&self) -> Result<Document, AppError> {
        let mut filter = Document::new();
        if let Some(status) = self.status.as_deref().filter(|s| !s.is_empty()) {
            let status: EnrollmentStatus = status.parse().map_err(AppError::BadRequest)?;
            filter.insert("status", status.as_str());
        }
        if let Some(id) = self.student_id.as_deref() {
            filter.insert("student_id", parse_id(id)?);
        }
        if let Some(id) = self.course_id.as_deref() {
            filter.insert("course_id", parse_id(id)?);
        }
        Ok(filter)
    }
}

fn already_enrolled() -> AppError {
    AppError::Conflict("Already enrolled in this course".into())
}

/// `POST /api/enrollments`
pub async fn create(req: &Request<Bytes>, state: &AppState) -> HandlerResult {
    let (_, student) = current_student(req, state).await?;
    let body: CreateEnrollmentRequest = parse_valid(req)?;
    let course_id = parse_id(&body.course_id)?;
    let student_id = student
        ._id
        .ok_or_else(|| AppError::Internal("Student without id".into()))?;
    let mongo = db(state)?;

    let course = mongo
        .collection::<CourseDoc>(COURSE_COLLECTION)
        .await?
        .find_one(doc! { "_id": course_id, "is_active": true })
        .await?
        .ok_or_else(|| AppError::NotFound("Course not found or no longer offered".into()))?;

    let enrollments = mongo.collection::<EnrollmentDoc>(ENROLLMENT_COLLECTION).await?;
    let existing = enrollments
        .count(doc! {
            "student_id": student_id,
            "course_id": course_id,
            "status": { "$ne": EnrollmentStatus::Cancelled.as_str() },
        })
        .await?;
    if existing > 0 {
        return Err(already_enrolled());
    }

    // Free courses need no payment step
    let free = course.price_paise == 0;
    let mut enrollment = EnrollmentDoc {
        _id: None,
        metadata: Metadata::new(),
        student_id,
        course_id,
        instructor_id: None,
        status: if free { EnrollmentStatus::Active } else { EnrollmentStatus::PendingPayment },
        payment_status: if free { PaymentStatus::Paid } else { PaymentStatus::Unpaid },
        amount_paise: course.price_paise,
        preferred_start_date: body.preferred_start_date,
        sessions_completed: 0,
        notes: body.notes,
    };
    // A concurrent request can still win the unique student/course index
    let id = enrollments
        .insert_one(enrollment.clone())
        .await
        .map_err(|e| match e {
            AppError::Conflict(_) => already_enrolled(),
            other => other,
        })?;
    enrollment._id = Some(id);

    info!(enrollment_id = %id, course = %course.slug, "Enrollment created");

    let email = templates::enrollment_confirmation(
        &state.args.school_name,
        &student.email,
        &student.name,
        &course.title,
        course.price_paise,
    );
    mail::send_logged(state.mailer.as_ref(), &state.metrics, &email).await;

    created(&EnrollmentView::new(enrollment, Some(course.title)))
}

/// `GET /api/admin/enrollments`
pub async fn admin_list(req: &Request<Bytes>, state: &AppState) -> HandlerResult {
    require_admin(req, state).await?;
    let query: EnrollmentQuery = parse_query(req)?;
    let filter = query.filter()?;
    let mongo = db(state)?;
    let enrollments = mongo.collection::<EnrollmentDoc>(ENROLLMENT_COLLECTION).await?;

    let (page, limit) = Pagination { page: query.page, limit: query.limit }.resolve();
    let total = enrollments.count(filter.clone()).await?;
    let items = enrollments
        .find_page(filter, doc! { "metadata.created_at": -1 }, page, limit)
        .await?;

    let course_ids: Vec<ObjectId> = items.iter().map(|e| e.course_id).collect();
    let titles: HashMap<ObjectId, String> = if course_ids.is_empty() {
        HashMap::new()
    } else {
        mongo
            .collection::<CourseDoc>(COURSE_COLLECTION)
            .await?
            .find_many(doc! { "_id": { "$in": course_ids } }, None)
            .await?
            .into_iter()
            .filter_map(|c| c._id.map(|id| (id, c.title)))
            .collect()
    };

    ok(&Page::new(items, total, page, limit).map(|e| {
        let title = titles.get(&e.course_id).cloned();
        EnrollmentView::new(e, title)
    }))
}

/// `PUT /api/admin/enrollments/{id}` - status, instructor, sessions, notes
pub async fn admin_update(req: &Request<Bytes>, state: &AppState, id: &str) -> HandlerResult {
    let claims = require_admin(req, state).await?;
    let oid = parse_id(id)?;
    let body: UpdateEnrollmentRequest = parse_valid(req)?;
    let mongo = db(state)?;

    let mut fields = Document::new();
    if let Some(status) = body.status {
        fields.insert("status", status.as_str());
    }
    if let Some(sessions) = body.sessions_completed {
        fields.insert("sessions_completed", sessions);
    }
    if let Some(notes) = body.notes {
        fields.insert("notes", notes);
    }
    match body.instructor_id.as_deref() {
        Some("") => {
            fields.insert("instructor_id", bson::Bson::Null);
        }
        Some(instructor) => {
            let instructor_id = parse_id(instructor)?;
            let exists = mongo
                .collection::<InstructorDoc>(INSTRUCTOR_COLLECTION)
                .await?
                .count(doc! { "_id": instructor_id, "is_active": true })
                .await?;
            if exists == 0 {
                return Err(AppError::NotFound(format!("Instructor {} not found", instructor)));
            }
            fields.insert("instructor_id", instructor_id);
        }
        None => {}
    }
    if fields.is_empty() {
        return Err(AppError::BadRequest("No fields to update".into()));
    }

    let enrollment = mongo
        .collection::<EnrollmentDoc>(ENROLLMENT_COLLECTION)
        .await?
        .set_fields_returning(doc! { "_id": oid }, fields.clone())
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Enrollment {} not found", id)))?;

    record_change(
        state,
        &claims,
        AuditEvent::new("update", "enrollment").with_id(oid).with_details(fields),
        None,
    )
    .await;

    ok(&EnrollmentView::new(enrollment, None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::server::testing::{request, session_cookie, state};
    use hyper::Method;

    #[test]
    fn test_query_filter() {
        let student = ObjectId::new();
        let query = EnrollmentQuery {
            status: Some("completed".into()),
            student_id: Some(student.to_hex()),
            ..Default::default()
        };
        let filter = query.filter().unwrap();
        assert_eq!(filter.get_str("status").unwrap(), "completed");
        assert_eq!(filter.get_object_id("student_id").unwrap(), student);
    }

    #[test]
    fn test_query_rejects_unknown_status() {
        let query = EnrollmentQuery {
            status: Some("paused".into()),
            ..Default::default()
        };
        assert!(matches!(query.filter(), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_create_request_validation() {
        let body: CreateEnrollmentRequest =
            serde_json::from_str(r#"{"course_id":"abc","preferred_start_date":"tomorrow"}"#).unwrap();
        let errors = body.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("course_id"));
        assert!(fields.contains_key("preferred_start_date"));
    }

    #[tokio::test]
    async fn test_create_requires_session() {
        let state = state();
        let req = request(Method::POST, "/api/enrollments", "{}", None);
        assert!(matches!(create(&req, &state).await, Err(AppError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_admin_update_rejects_bad_status() {
        let state = state();
        let cookie = session_cookie(&state, Role::Admin);
        let req = request(Method::PUT, "/api/admin/enrollments/x", r#"{"status":"paused"}"#, Some(&cookie));
        assert!(matches!(
            admin_update(&req, &state, &ObjectId::new().to_hex()).await,
            Err(AppError::BadRequest(_))
        ));
    }
}
