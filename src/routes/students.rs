//! Student dashboard, profile and admin student management

use bson::{doc, oid::ObjectId, DateTime, Document};
use bytes::Bytes;
use hyper::Request;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use validator::Validate;

use crate::auth::Claims;
use crate::db::schemas::{
    CertificateDoc, CourseDoc, EnrollmentDoc, PaymentDoc, StudentDoc, UserDoc, CERTIFICATE_COLLECTION,
    COURSE_COLLECTION, ENROLLMENT_COLLECTION, PAYMENT_COLLECTION, STUDENT_COLLECTION, USER_COLLECTION,
};
use crate::db::MongoClient;
use crate::logging::AuditEvent;
use crate::routes::certificates::CertificateView;
use crate::routes::common::{
    db, hex_id, normalize_phone, ok, parse_id, parse_query, parse_valid, record_change,
    require_admin, require_student, search_regex, update_fields, validate_date, validate_phone,
    HandlerResult, Page, Pagination,
};
use crate::routes::enrollments::EnrollmentView;
use crate::routes::payments::PaymentView;
use crate::server::AppState;
use crate::types::{AppError, Result};

#[derive(Debug, Serialize)]
pub struct StudentView {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub learner_license_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl From<StudentDoc> for StudentView {
    fn from(student: StudentDoc) -> Self {
        Self {
            id: hex_id(&student._id),
            user_id: student.user_id.to_hex(),
            created_at: student.metadata.created_rfc3339(),
            name: student.name,
            email: student.email,
            phone: student.phone,
            address: student.address,
            date_of_birth: student.date_of_birth,
            learner_license_number: student.learner_license_number,
        }
    }
}

/// Profile with everything attached to it
#[derive(Debug, Serialize)]
pub struct StudentOverview {
    pub profile: StudentView,
    pub enrollments: Vec<EnrollmentView>,
    pub certificates: Vec<CertificateView>,
    pub payments: Vec<PaymentView>,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct UpdateProfileRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 2, max = 100, message = "must be 2-100 characters"))]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = "validate_phone"))]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 500, message = "at most 500 characters"))]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = "validate_date"))]
    pub date_of_birth: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 5, max = 32, message = "must be 5-32 characters"))]
    pub learner_license_number: Option<String>,
}

impl UpdateProfileRequest {
    fn into_fields(mut self) -> Result<Document> {
        self.phone = self.phone.as_deref().map(normalize_phone);
        self.name = self.name.map(|n| n.trim().to_string());
        update_fields(&self)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StudentQuery {
    /// Matches name, email or phone
    pub q: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// The signed-in student's claims and profile
pub async fn current_student(req: &Request<Bytes>, state: &AppState) -> Result<(Claims, StudentDoc)> {
    let claims = require_student(req, state).await?;
    let mongo = db(state)?;
    let user_id = ObjectId::parse_str(&claims.sub)
        .map_err(|_| AppError::Unauthorized("Invalid session subject".into()))?;

    let students = mongo.collection::<StudentDoc>(STUDENT_COLLECTION).await?;
    let student = students
        .find_one(doc! { "user_id": user_id })
        .await?
        .ok_or_else(|| AppError::NotFound("Student profile not found".into()))?;
    Ok((claims, student))
}

/// Load a student's enrollments (with course titles), certificates and payments
pub async fn overview(mongo: &MongoClient, student: StudentDoc) -> Result<StudentOverview> {
    let student_id = student
        ._id
        .ok_or_else(|| AppError::Internal("Student without id".into()))?;
    let newest_first = Some(doc! { "metadata.created_at": -1 });

    let enrollments = mongo
        .collection::<EnrollmentDoc>(ENROLLMENT_COLLECTION)
        .await?
        .find_many(doc! { "student_id": student_id }, newest_first.clone())
        .await?;

    let course_ids: Vec<ObjectId> = enrollments.iter().map(|e| e.course_id).collect();
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

    let certificates = mongo
        .collection::<CertificateDoc>(CERTIFICATE_COLLECTION)
        .await?
        .find_many(doc! { "student_id": student_id, "is_revoked": false }, Some(doc! { "issued_at": -1 }))
        .await?;

    let payments = mongo
        .collection::<PaymentDoc>(PAYMENT_COLLECTION)
        .await?
        .find_many(doc! { "student_id": student_id }, newest_first)
        .await?;

    Ok(StudentOverview {
        profile: StudentView::from(student),
        enrollments: enrollments
            .into_iter()
            .map(|e| {
                let title = titles.get(&e.course_id).cloned();
                EnrollmentView::new(e, title)
            })
            .collect(),
        certificates: certificates.into_iter().map(CertificateView::from).collect(),
        payments: payments.into_iter().map(PaymentView::from).collect(),
    })
}

/// `GET /api/student/dashboard`
pub async fn dashboard(req: &Request<Bytes>, state: &AppState) -> HandlerResult {
    let (_, student) = current_student(req, state).await?;
    ok(&overview(db(state)?, student).await?)
}

/// `GET /api/student/profile`
pub async fn profile(req: &Request<Bytes>, state: &AppState) -> HandlerResult {
    let (_, student) = current_student(req, state).await?;
    ok(&StudentView::from(student))
}

/// `PUT /api/student/profile`
pub async fn update_profile(req: &Request<Bytes>, state: &AppState) -> HandlerResult {
    let body: UpdateProfileRequest = parse_valid(req)?;
    let (_, student) = current_student(req, state).await?;
    let fields = body.into_fields()?;

    let students = db(state)?.collection::<StudentDoc>(STUDENT_COLLECTION).await?;
    let updated = students
        .set_fields_returning(doc! { "_id": student._id }, fields)
        .await?
        .ok_or_else(|| AppError::NotFound("Student profile not found".into()))?;
    ok(&StudentView::from(updated))
}

/// `GET /api/admin/students`
pub async fn admin_list(req: &Request<Bytes>, state: &AppState) -> HandlerResult {
    require_admin(req, state).await?;
    let query: StudentQuery = parse_query(req)?;
    let students = db(state)?.collection::<StudentDoc>(STUDENT_COLLECTION).await?;

    let mut filter = Document::new();
    if let Some(q) = query.q.as_deref().filter(|q| !q.trim().is_empty()) {
        let pattern = search_regex(q);
        filter.insert(
            "$or",
            vec![
                doc! { "name": pattern.clone() },
                doc! { "email": pattern.clone() },
                doc! { "phone": pattern },
            ],
        );
    }

    let (page, limit) = Pagination { page: query.page, limit: query.limit }.resolve();
    let total = students.count(filter.clone()).await?;
    let items = students
        .find_page(filter, doc! { "metadata.created_at": -1 }, page, limit)
        .await?;
    ok(&Page::new(items, total, page, limit).map(StudentView::from))
}

/// `GET /api/admin/students/{id}`
pub async fn admin_get(req: &Request<Bytes>, state: &AppState, id: &str) -> HandlerResult {
    require_admin(req, state).await?;
    let oid = parse_id(id)?;
    let mongo = db(state)?;
    let student = mongo
        .collection::<StudentDoc>(STUDENT_COLLECTION)
        .await?
        .find_by_id(oid)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Student {} not found", id)))?;
    ok(&overview(mongo, student).await?)
}

/// `PUT /api/admin/students/{id}`
pub async fn admin_update(req: &Request<Bytes>, state: &AppState, id: &str) -> HandlerResult {
    let claims = require_admin(req, state).await?;
    let oid = parse_id(id)?;
    let body: UpdateProfileRequest = parse_valid(req)?;
    let fields = body.into_fields()?;
    let students = db(state)?.collection::<StudentDoc>(STUDENT_COLLECTION).await?;

    let student = students
        .set_fields_returning(doc! { "_id": oid }, fields.clone())
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Student {} not found", id)))?;

    let changed: Vec<&str> = fields.keys().map(String::as_str).collect();
    record_change(
        state,
        &claims,
        AuditEvent::new("update", "student").with_id(oid).with_details(doc! { "fields": changed }),
        None,
    )
    .await;

    ok(&StudentView::from(student))
}

/// `DELETE /api/admin/students/{id}` - soft delete the profile and disable the login
pub async fn admin_delete(req: &Request<Bytes>, state: &AppState, id: &str) -> HandlerResult {
    let claims = require_admin(req, state).await?;
    let oid = parse_id(id)?;
    let mongo = db(state)?;
    let students = mongo.collection::<StudentDoc>(STUDENT_COLLECTION).await?;

    let student = students
        .find_by_id(oid)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Student {} not found", id)))?;
    students.soft_delete(doc! { "_id": oid }).await?;

    // Disabling the account and bumping the version ends open sessions
    mongo
        .collection::<UserDoc>(USER_COLLECTION)
        .await?
        .update_one(
            doc! { "_id": student.user_id },
            doc! {
                "$set": { "is_active": false, "metadata.updated_at": DateTime::now() },
                "$inc": { "token_version": 1 },
            },
        )
        .await?;

    record_change(
        state,
        &claims,
        AuditEvent::new("delete", "student")
            .with_id(oid)
            .with_details(doc! { "user_id": student.user_id.to_hex() }),
        None,
    )
    .await;

    ok(&serde_json::json!({ "deleted": true, "id": id }))
}
