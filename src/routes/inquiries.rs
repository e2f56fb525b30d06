//! Contact inquiries from the public site

use bson::{doc, Document};
use bytes::Bytes;
use hyper::Request;
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use crate::db::schemas::{InquiryDoc, InquiryStatus, Metadata, INQUIRY_COLLECTION};
use crate::logging::AuditEvent;
use crate::mail::{self, templates};
use crate::routes::common::{
    created, db, hex_id, normalize_phone, ok, parse_id, parse_query, parse_valid, record_change,
    require_admin, search_regex, update_fields, validate_phone, HandlerResult, Page, Pagination,
};
use crate::server::AppState;
use crate::types::AppError;

#[derive(Debug, Serialize)]
pub struct InquiryView {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course_id: Option<String>,
    pub status: InquiryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl From<InquiryDoc> for InquiryView {
    fn from(inquiry: InquiryDoc) -> Self {
        Self {
            id: hex_id(&inquiry._id),
            course_id: inquiry.course_id.map(|id| id.to_hex()),
            created_at: inquiry.metadata.created_rfc3339(),
            name: inquiry.name,
            email: inquiry.email,
            phone: inquiry.phone,
            message: inquiry.message,
            status: inquiry.status,
            admin_notes: inquiry.admin_notes,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateInquiryRequest {
    #[validate(length(min = 2, max = 100, message = "must be 2-100 characters"))]
    pub name: String,
    #[validate(email(message = "must be a valid email"))]
    pub email: String,
    #[validate(custom(function = "validate_phone"))]
    pub phone: String,
    #[validate(length(min = 10, max = 2000, message = "must be 10-2000 characters"))]
    pub message: String,
    #[validate(length(equal = 24, message = "must be a course id"))]
    pub course_id: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct UpdateInquiryRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<InquiryStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 2000, message = "at most 2000 characters"))]
    pub admin_notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InquiryQuery {
    pub status: Option<String>,
    pub q: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// `POST /api/inquiries` - store, notify the office, acknowledge the sender
pub async fn create(req: &Request<Bytes>, state: &AppState) -> HandlerResult {
    let body: CreateInquiryRequest = parse_valid(req)?;
    let course_id = body.course_id.as_deref().map(parse_id).transpose()?;
    let inquiries = db(state)?.collection::<InquiryDoc>(INQUIRY_COLLECTION).await?;

    let mut inquiry = InquiryDoc {
        _id: None,
        metadata: Metadata::new(),
        name: body.name.trim().to_string(),
        email: body.email.trim().to_lowercase(),
        phone: normalize_phone(&body.phone),
        message: body.message.trim().to_string(),
        course_id,
        status: InquiryStatus::New,
        admin_notes: None,
    };
    let id = inquiries.insert_one(inquiry.clone()).await?;
    inquiry._id = Some(id);
    info!(inquiry_id = %id, "Inquiry received");

    let school = &state.args.school_name;
    if let Some(admin) = state.args.smtp.admin_email.as_deref() {
        let notice = templates::admin_inquiry_notification(
            school,
            admin,
            &inquiry.name,
            &inquiry.email,
            &inquiry.phone,
            &inquiry.message,
        );
        mail::send_logged(state.mailer.as_ref(), &state.metrics, &notice).await;
    }
    let ack = templates::inquiry_acknowledgement(school, &inquiry.email, &inquiry.name);
    mail::send_logged(state.mailer.as_ref(), &state.metrics, &ack).await;

    created(&serde_json::json!({ "id": id.to_hex(), "status": InquiryStatus::New }))
}

/// `GET /api/admin/inquiries`
pub async fn admin_list(req: &Request<Bytes>, state: &AppState) -> HandlerResult {
    require_admin(req, state).await?;
    let query: InquiryQuery = parse_query(req)?;
    let inquiries = db(state)?.collection::<InquiryDoc>(INQUIRY_COLLECTION).await?;

    let mut filter = Document::new();
    if let Some(status) = query.status.as_deref().filter(|s| !s.is_empty()) {
        let status: InquiryStatus = status.parse().map_err(AppError::BadRequest)?;
        filter.insert("status", status.as_str());
    }
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
    let total = inquiries.count(filter.clone()).await?;
    let items = inquiries
        .find_page(filter, doc! { "metadata.created_at": -1 }, page, limit)
        .await?;
    ok(&Page::new(items, total, page, limit).map(InquiryView::from))
}

/// `PUT /api/admin/inquiries/{id}` - status and notes
pub async fn admin_update(req: &Request<Bytes>, state: &AppState, id: &str) -> HandlerResult {
    let claims = require_admin(req, state).await?;
    let oid = parse_id(id)?;
    let body: UpdateInquiryRequest = parse_valid(req)?;
    let fields = update_fields(&body)?;
    let inquiries = db(state)?.collection::<InquiryDoc>(INQUIRY_COLLECTION).await?;

    let inquiry = inquiries
        .set_fields_returning(doc! { "_id": oid }, fields)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Inquiry {} not found", id)))?;

    record_change(
        state,
        &claims,
        AuditEvent::new("update", "inquiry")
            .with_id(oid)
            .with_details(doc! { "status": inquiry.status.as_str() }),
        None,
    )
    .await;

    ok(&InquiryView::from(inquiry))
}

/// `DELETE /api/admin/inquiries/{id}` - soft delete
pub async fn admin_delete(req: &Request<Bytes>, state: &AppState, id: &str) -> HandlerResult {
    let claims = require_admin(req, state).await?;
    let oid = parse_id(id)?;
    let inquiries = db(state)?.collection::<InquiryDoc>(INQUIRY_COLLECTION).await?;

    if inquiries.soft_delete(doc! { "_id": oid }).await?.matched_count == 0 {
        return Err(AppError::NotFound(format!("Inquiry {} not found", id)));
    }
    record_change(state, &claims, AuditEvent::new("delete", "inquiry").with_id(oid), None).await;

    ok(&serde_json::json!({ "deleted": true, "id": id }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::testing::{request, state};
    use hyper::Method;

    #[tokio::test]
    async fn test_create_reports_field_errors() {
        let state = state();
        let body = r#"{"name":"A","email":"a@","phone":"0000000000","message":"hi"}"#;
        let req = request(Method::POST, "/api/inquiries", body, None);
        match create(&req, &state).await.unwrap_err() {
            AppError::Validation(fields) => {
                assert_eq!(fields.len(), 4);
                assert!(fields.contains_key("message"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_valid_inquiry_without_database_is_503() {
        let state = state();
        let body = r#"{"name":"Asha","email":"asha@example.com","phone":"9876543210","message":"Do you offer weekend classes?"}"#;
        let req = request(Method::POST, "/api/inquiries", body, None);
        assert!(matches!(create(&req, &state).await, Err(AppError::DatabaseUnavailable)));
    }

    #[test]
    fn test_update_accepts_status() {
        let body: UpdateInquiryRequest = serde_json::from_str(r#"{"status":"contacted"}"#).unwrap();
        let fields = update_fields(&body).unwrap();
        assert_eq!(fields.get_str("status").unwrap(), "contacted");
    }
}
