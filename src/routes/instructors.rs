//! Instructor profiles
//!
//! Public reads are cached under `instructors:`; admin writes invalidate it.

use bson::{doc, Document};
use bytes::Bytes;
use hyper::Request;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::cache::{keys, listing_key, page_key};
use crate::db::schemas::{InstructorDoc, Metadata, INSTRUCTOR_COLLECTION};
use crate::logging::AuditEvent;
use crate::routes::common::{
    cached_listing, created, db, hex_id, normalize_phone, ok, parse_id, parse_query, parse_valid,
    record_change, require_admin, search_regex, update_fields, validate_phone, HandlerResult, Page,
    Pagination,
};
use crate::server::AppState;
use crate::types::AppError;

/// Public view; contact details are only shown to admins
#[derive(Debug, Serialize)]
pub struct InstructorView {
    pub id: String,
    pub name: String,
    pub experience_years: i32,
    pub specializations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

impl InstructorView {
    fn public(doc: InstructorDoc) -> Self {
        Self {
            id: hex_id(&doc._id),
            name: doc.name,
            experience_years: doc.experience_years,
            specializations: doc.specializations,
            bio: doc.bio,
            photo_url: doc.photo_url,
            email: None,
            phone: None,
            is_active: None,
        }
    }

    fn admin(doc: InstructorDoc) -> Self {
        let (email, phone, active) = (doc.email.clone(), doc.phone.clone(), doc.is_active);
        Self {
            email: Some(email),
            phone: Some(phone),
            is_active: Some(active),
            ..Self::public(doc)
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct InstructorQuery {
    pub q: Option<String>,
    pub active: Option<bool>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateInstructorRequest {
    #[validate(length(min = 2, max = 100, message = "must be 2-100 characters"))]
    pub name: String,
    #[validate(email(message = "must be a valid email"))]
    pub email: String,
    #[validate(custom(function = "validate_phone"))]
    pub phone: String,
    #[validate(range(min = 0, max = 60, message = "must be 0-60 years"))]
    pub experience_years: i32,
    #[serde(default)]
    #[validate(length(max = 10, message = "at most 10 specializations"))]
    pub specializations: Vec<String>,
    #[validate(length(max = 2000, message = "at most 2000 characters"))]
    pub bio: Option<String>,
    #[validate(url(message = "must be a valid URL"))]
    pub photo_url: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct UpdateInstructorRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 2, max = 100, message = "must be 2-100 characters"))]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(email(message = "must be a valid email"))]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = "validate_phone"))]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0, max = 60, message = "must be 0-60 years"))]
    pub experience_years: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 10, message = "at most 10 specializations"))]
    pub specializations: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 2000, message = "at most 2000 characters"))]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(url(message = "must be a valid URL"))]
    pub photo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

/// `GET /api/instructors` - active instructors, cached
pub async fn list(req: &Request<Bytes>, state: &AppState) -> HandlerResult {
    let query: InstructorQuery = parse_query(req)?;
    let (page, limit) = Pagination { page: query.page, limit: query.limit }.resolve();
    let key = page_key(keys::INSTRUCTORS, &[], page, limit);

    cached_listing(state, req, key, move || async move {
        let mongo = db(state)?;
        let instructors = mongo.collection::<InstructorDoc>(INSTRUCTOR_COLLECTION).await?;
        let filter = doc! { "is_active": true };
        let total = instructors.count(filter.clone()).await?;
        let items = instructors
            .find_page(filter, doc! { "experience_years": -1, "name": 1 }, page, limit)
            .await?;
        Ok(Page::new(items, total, page, limit).map(InstructorView::public))
    })
    .await
}

/// `GET /api/instructors/{id}`
pub async fn get(req: &Request<Bytes>, state: &AppState, id: &str) -> HandlerResult {
    let oid = parse_id(id)?;
    let key = listing_key(keys::INSTRUCTORS, "item", Some(id));

    cached_listing(state, req, key, move || async move {
        let mongo = db(state)?;
        let instructors = mongo.collection::<InstructorDoc>(INSTRUCTOR_COLLECTION).await?;
        instructors
            .find_one(doc! { "_id": oid, "is_active": true })
            .await?
            .map(InstructorView::public)
            .ok_or_else(|| AppError::NotFound(format!("Instructor {} not found", id)))
    })
    .await
}

/// `GET /api/admin/instructors`
pub async fn admin_list(req: &Request<Bytes>, state: &AppState) -> HandlerResult {
    require_admin(req, state).await?;
    let query: InstructorQuery = parse_query(req)?;
    let mongo = db(state)?;
    let instructors = mongo.collection::<InstructorDoc>(INSTRUCTOR_COLLECTION).await?;

    let mut filter = Document::new();
    if let Some(active) = query.active {
        filter.insert("is_active", active);
    }
    if let Some(q) = query.q.as_deref().filter(|q| !q.trim().is_empty()) {
        filter.insert("name", search_regex(q));
    }

    let (page, limit) = Pagination { page: query.page, limit: query.limit }.resolve();
    let total = instructors.count(filter.clone()).await?;
    let items = instructors
        .find_page(filter, doc! { "name": 1 }, page, limit)
        .await?;
    ok(&Page::new(items, total, page, limit).map(InstructorView::admin))
}

/// `POST /api/admin/instructors`
pub async fn create(req: &Request<Bytes>, state: &AppState) -> HandlerResult {
    let claims = require_admin(req, state).await?;
    let body: CreateInstructorRequest = parse_valid(req)?;
    let mongo = db(state)?;
    let instructors = mongo.collection::<InstructorDoc>(INSTRUCTOR_COLLECTION).await?;

    let mut instructor = InstructorDoc {
        _id: None,
        metadata: Metadata::new(),
        name: body.name.trim().to_string(),
        email: body.email.trim().to_lowercase(),
        phone: normalize_phone(&body.phone),
        experience_years: body.experience_years,
        specializations: body.specializations,
        bio: body.bio,
        photo_url: body.photo_url,
        is_active: body.is_active.unwrap_or(true),
    };
    let id = instructors.insert_one(instructor.clone()).await.map_err(|e| match e {
        AppError::Conflict(_) => AppError::Conflict("An instructor with this email already exists".into()),
        other => other,
    })?;
    instructor._id = Some(id);

    record_change(
        state,
        &claims,
        AuditEvent::new("create", "instructor").with_id(id),
        Some(keys::INSTRUCTORS),
    )
    .await;

    created(&InstructorView::admin(instructor))
}

/// `PUT /api/admin/instructors/{id}`
pub async fn update(req: &Request<Bytes>, state: &AppState, id: &str) -> HandlerResult {
    let claims = require_admin(req, state).await?;
    let oid = parse_id(id)?;
    let mut body: UpdateInstructorRequest = parse_valid(req)?;
    body.phone = body.phone.as_deref().map(normalize_phone);
    body.email = body.email.as_deref().map(|e| e.trim().to_lowercase());
    let fields = update_fields(&body)?;
    let mongo = db(state)?;
    let instructors = mongo.collection::<InstructorDoc>(INSTRUCTOR_COLLECTION).await?;

    let instructor = instructors
        .set_fields_returning(doc! { "_id": oid }, fields.clone())
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Instructor {} not found", id)))?;

    let changed: Vec<&str> = fields.keys().map(String::as_str).collect();
    record_change(
        state,
        &claims,
        AuditEvent::new("update", "instructor").with_id(oid).with_details(doc! { "fields": changed }),
        Some(keys::INSTRUCTORS),
    )
    .await;

    ok(&InstructorView::admin(instructor))
}

/// `DELETE /api/admin/instructors/{id}` - soft delete
pub async fn delete(req: &Request<Bytes>, state: &AppState, id: &str) -> HandlerResult {
    let claims = require_admin(req, state).await?;
    let oid = parse_id(id)?;
    let mongo = db(state)?;
    let instructors = mongo.collection::<InstructorDoc>(INSTRUCTOR_COLLECTION).await?;

    if instructors.soft_delete(doc! { "_id": oid }).await?.matched_count == 0 {
        return Err(AppError::NotFound(format!("Instructor {} not found", id)));
    }

    record_change(
        state,
        &claims,
        AuditEvent::new("delete", "instructor").with_id(oid),
        Some(keys::INSTRUCTORS),
    )
    .await;

    ok(&serde_json::json!({ "deleted": true, "id": id }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::server::testing::{request, session_cookie, state};
    use hyper::Method;

    fn sample() -> InstructorDoc {
        InstructorDoc {
            name: "Ravi Kumar".into(),
            email: "ravi@example.com".into(),
            phone: "9876543210".into(),
            experience_years: 12,
            is_active: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_public_view_hides_contact_details() {
        let json = serde_json::to_value(InstructorView::public(sample())).unwrap();
        assert!(json.get("email").is_none());
        assert!(json.get("phone").is_none());
        assert_eq!(json["experience_years"], 12);
    }

    #[test]
    fn test_admin_view_includes_contact_details() {
        let json = serde_json::to_value(InstructorView::admin(sample())).unwrap();
        assert_eq!(json["email"], "ravi@example.com");
        assert_eq!(json["is_active"], true);
    }

    #[tokio::test]
    async fn test_get_rejects_malformed_id() {
        let state = state();
        let req = request(Method::GET, "/api/instructors/xyz", "", None);
        assert!(matches!(get(&req, &state, "xyz").await, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_create_rejects_bad_phone() {
        let state = state();
        let cookie = session_cookie(&state, Role::Admin);
        let body = r#"{"name":"Ravi","email":"ravi@example.com","phone":"12345","experience_years":5}"#;
        let req = request(Method::POST, "/api/admin/instructors", body, Some(&cookie));
        match create(&req, &state).await.unwrap_err() {
            AppError::Validation(fields) => assert!(fields.contains_key("phone")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
