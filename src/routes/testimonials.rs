//! Testimonials: public submission, moderation, approved listing

use bson::{doc, Document};
use bytes::Bytes;
use hyper::Request;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::cache::{keys, page_key};
use crate::db::schemas::{Metadata, TestimonialDoc, TESTIMONIAL_COLLECTION};
use crate::logging::AuditEvent;
use crate::routes::common::{
    cached_listing, created, db, hex_id, ok, parse_id, parse_query, parse_valid, record_change,
    require_admin, update_fields, HandlerResult, Page, Pagination,
};
use crate::server::AppState;
use crate::types::AppError;

#[derive(Debug, Serialize)]
pub struct TestimonialView {
    pub id: String,
    pub name: String,
    pub rating: i32,
    pub message: String,
    pub is_approved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl TestimonialView {
    /// Public shape: no link back to the student record
    fn public(doc: TestimonialDoc) -> Self {
        Self {
            student_id: None,
            ..Self::admin(doc)
        }
    }

    fn admin(doc: TestimonialDoc) -> Self {
        Self {
            id: hex_id(&doc._id),
            student_id: doc.student_id.map(|id| id.to_hex()),
            created_at: doc.metadata.created_rfc3339(),
            name: doc.name,
            rating: doc.rating,
            message: doc.message,
            is_approved: doc.is_approved,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitTestimonialRequest {
    #[validate(length(min = 2, max = 100, message = "must be 2-100 characters"))]
    pub name: String,
    #[validate(range(min = 1, max = 5, message = "must be 1-5"))]
    pub rating: i32,
    #[validate(length(min = 10, max = 1000, message = "must be 10-1000 characters"))]
    pub message: String,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct UpdateTestimonialRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_approved: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 10, max = 1000, message = "must be 10-1000 characters"))]
    pub message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TestimonialQuery {
    /// Approval filter (admin only)
    pub approved: Option<bool>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// `GET /api/testimonials` - approved only, cached
pub async fn list(req: &Request<Bytes>, state: &AppState) -> HandlerResult {
    let query: TestimonialQuery = parse_query(req)?;
    let (page, limit) = Pagination { page: query.page, limit: query.limit }.resolve();
    let key = page_key(keys::TESTIMONIALS, &[], page, limit);

    cached_listing(state, req, key, move || async move {
        let testimonials = db(state)?
            .collection::<TestimonialDoc>(TESTIMONIAL_COLLECTION)
            .await?;
        let filter = doc! { "is_approved": true };
        let total = testimonials.count(filter.clone()).await?;
        let items = testimonials
            .find_page(filter, doc! { "metadata.created_at": -1 }, page, limit)
            .await?;
        Ok(Page::new(items, total, page, limit).map(TestimonialView::public))
    })
    .await
}

/// `POST /api/testimonials` - stored pending moderation
///
/// A signed-in student's submission is linked to their account.
pub async fn submit(req: &Request<Bytes>, state: &AppState) -> HandlerResult {
    let body: SubmitTestimonialRequest = parse_valid(req)?;
    let testimonials = db(state)?
        .collection::<TestimonialDoc>(TESTIMONIAL_COLLECTION)
        .await?;

    let student_id = match state.sessions.verify(req).await {
        Ok(claims) => parse_id(&claims.sub).ok(),
        Err(_) => None,
    };

    let mut testimonial = TestimonialDoc {
        _id: None,
        metadata: Metadata::new(),
        name: body.name.trim().to_string(),
        rating: body.rating,
        message: body.message.trim().to_string(),
        student_id,
        is_approved: false,
    };
    let id = testimonials.insert_one(testimonial.clone()).await?;
    testimonial._id = Some(id);

    created(&TestimonialView::admin(testimonial))
}

/// `GET /api/admin/testimonials`
pub async fn admin_list(req: &Request<Bytes>, state: &AppState) -> HandlerResult {
    require_admin(req, state).await?;
    let query: TestimonialQuery = parse_query(req)?;
    let testimonials = db(state)?
        .collection::<TestimonialDoc>(TESTIMONIAL_COLLECTION)
        .await?;

    let mut filter = Document::new();
    if let Some(approved) = query.approved {
        filter.insert("is_approved", approved);
    }
    let (page, limit) = Pagination { page: query.page, limit: query.limit }.resolve();
    let total = testimonials.count(filter.clone()).await?;
    let items = testimonials
        .find_page(filter, doc! { "metadata.created_at": -1 }, page, limit)
        .await?;
    ok(&Page::new(items, total, page, limit).map(TestimonialView::admin))
}

/// `PUT /api/admin/testimonials/{id}` - approve or unapprove
pub async fn admin_update(req: &Request<Bytes>, state: &AppState, id: &str) -> HandlerResult {
    let claims = require_admin(req, state).await?;
    let oid = parse_id(id)?;
    let body: UpdateTestimonialRequest = parse_valid(req)?;
    let fields = update_fields(&body)?;
    let testimonials = db(state)?
        .collection::<TestimonialDoc>(TESTIMONIAL_COLLECTION)
        .await?;

    let testimonial = testimonials
        .set_fields_returning(doc! { "_id": oid }, fields)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Testimonial {} not found", id)))?;

    let action = match body.is_approved {
        Some(true) => "approve",
        Some(false) => "unapprove",
        None => "update",
    };
    record_change(
        state,
        &claims,
        AuditEvent::new(action, "testimonial").with_id(oid),
        Some(keys::TESTIMONIALS),
    )
    .await;

    ok(&TestimonialView::admin(testimonial))
}

/// `DELETE /api/admin/testimonials/{id}`
pub async fn admin_delete(req: &Request<Bytes>, state: &AppState, id: &str) -> HandlerResult {
    let claims = require_admin(req, state).await?;
    let oid = parse_id(id)?;
    let testimonials = db(state)?
        .collection::<TestimonialDoc>(TESTIMONIAL_COLLECTION)
        .await?;

    if testimonials.soft_delete(doc! { "_id": oid }).await?.matched_count == 0 {
        return Err(AppError::NotFound(format!("Testimonial {} not found", id)));
    }
    record_change(
        state,
        &claims,
        AuditEvent::new("delete", "testimonial").with_id(oid),
        Some(keys::TESTIMONIALS),
    )
    .await;

    ok(&serde_json::json!({ "deleted": true, "id": id }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::server::testing::{request, session_cookie, state};
    use bson::oid::ObjectId;
    use hyper::Method;

    #[test]
    fn test_public_view_hides_student() {
        let doc = TestimonialDoc {
            name: "Ravi".into(),
            rating: 5,
            student_id: Some(ObjectId::new()),
            is_approved: true,
            ..Default::default()
        };
        assert!(TestimonialView::public(doc.clone()).student_id.is_none());
        assert!(TestimonialView::admin(doc).student_id.is_some());
    }

    #[tokio::test]
    async fn test_rating_out_of_range_rejected() {
        let state = state();
        let body = r#"{"name":"Ravi","rating":6,"message":"Great instructors and patient"}"#;
        let req = request(Method::POST, "/api/testimonials", body, None);
        match submit(&req, &state).await.unwrap_err() {
            AppError::Validation(fields) => assert!(fields.contains_key("rating")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_moderation_requires_admin() {
        let state = state();
        let cookie = session_cookie(&state, Role::Student);
        let req = request(Method::PUT, "/api/admin/testimonials/x", r#"{"is_approved":true}"#, Some(&cookie));
        let err = admin_update(&req, &state, &ObjectId::new().to_hex()).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_public_list_serves_stale_snapshot() {
        let state = state();
        let key = page_key(keys::TESTIMONIALS, &[], 1, 20);
        state.cache.set_with_snapshot(&key, "[]".into()).await;
        state.cache.invalidate_prefix(keys::TESTIMONIALS).await;

        let req = request(Method::GET, "/api/testimonials", "", None);
        let resp = list(&req, &state).await.unwrap();
        assert_eq!(resp.headers()["X-Cache"], "STALE");
    }
}
