//! Course catalogue
//!
//! Public reads go through the two-tier cache under the `courses:` prefix;
//! every admin write invalidates that prefix.

use bson::{doc, oid::ObjectId, Document};
use bytes::Bytes;
use hyper::{Request, StatusCode};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::cache::{keys, listing_key, page_key};
use crate::chat::CourseSummary;
use crate::db::schemas::{slugify, CourseDoc, Metadata, VehicleType, COURSE_COLLECTION};
use crate::logging::AuditEvent;
use crate::mail::templates::format_rupees;
use crate::routes::common::{
    cached_listing, created, db, hex_id, json_response, ok, parse_id, parse_query, parse_valid,
    record_change, require_admin, search_regex, update_fields, validate_slug, HandlerResult, Page,
    Pagination,
};
use crate::server::AppState;
use crate::types::{AppError, Result};

#[derive(Debug, Serialize)]
pub struct CourseView {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub description: String,
    pub vehicle_type: VehicleType,
    pub vehicle_label: &'static str,
    pub duration_days: i32,
    pub session_count: i32,
    pub price_paise: i64,
    /// Display price, e.g. "₹4,500.00"
    pub price: String,
    pub features: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl From<CourseDoc> for CourseView {
    fn from(course: CourseDoc) -> Self {
        Self {
            id: hex_id(&course._id),
            created_at: course.metadata.created_rfc3339(),
            updated_at: course.metadata.updated_rfc3339(),
            vehicle_label: course.vehicle_type.label(),
            price: format_rupees(course.price_paise),
            title: course.title,
            slug: course.slug,
            description: course.description,
            vehicle_type: course.vehicle_type,
            duration_days: course.duration_days,
            session_count: course.session_count,
            price_paise: course.price_paise,
            features: course.features,
            image_url: course.image_url,
            is_active: course.is_active,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CourseQuery {
    pub vehicle_type: Option<VehicleType>,
    /// Title search (admin only)
    pub q: Option<String>,
    /// Active filter (admin only)
    pub active: Option<bool>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl CourseQuery {
    fn pagination(&self) -> (u32, u32) {
        Pagination { page: self.page, limit: self.limit }.resolve()
    }

    /// Cache key for the public listing; admin-only fields are ignored
    fn list_key(&self) -> String {
        let filters: Vec<_> = self
            .vehicle_type
            .map(|v| ("vehicle_type", format!("{v:?}")))
            .into_iter()
            .collect();
        let (page, limit) = self.pagination();
        page_key(keys::COURSES, &filters, page, limit)
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCourseRequest {
    #[validate(length(min = 3, max = 120, message = "must be 3-120 characters"))]
    pub title: String,
    #[validate(custom(function = "validate_slug"))]
    pub slug: Option<String>,
    #[validate(length(min = 10, max = 5000, message = "must be 10-5000 characters"))]
    pub description: String,
    #[serde(default)]
    pub vehicle_type: VehicleType,
    #[validate(range(min = 1, max = 365, message = "must be 1-365 days"))]
    pub duration_days: i32,
    #[validate(range(min = 1, max = 200, message = "must be 1-200 sessions"))]
    pub session_count: i32,
    #[validate(range(min = 0, max = 10_000_000, message = "must be 0-10000000 paise"))]
    pub price_paise: i64,
    #[serde(default)]
    #[validate(length(max = 20, message = "at most 20 features"))]
    pub features: Vec<String>,
    #[validate(url(message = "must be a valid URL"))]
    pub image_url: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct UpdateCourseRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 3, max = 120, message = "must be 3-120 characters"))]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = "validate_slug"))]
    pub slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 10, max = 5000, message = "must be 10-5000 characters"))]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vehicle_type: Option<VehicleType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1, max = 365, message = "must be 1-365 days"))]
    pub duration_days: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1, max = 200, message = "must be 1-200 sessions"))]
    pub session_count: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0, max = 10_000_000, message = "must be 0-10000000 paise"))]
    pub price_paise: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 20, message = "at most 20 features"))]
    pub features: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(url(message = "must be a valid URL"))]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

/// Filter matching a course by id or slug
fn id_or_slug(key: &str) -> Document {
    match ObjectId::parse_str(key) {
        Ok(oid) => doc! { "_id": oid },
        Err(_) => doc! { "slug": key },
    }
}

/// `GET /api/courses` - active courses, cached
pub async fn list(req: &Request<Bytes>, state: &AppState) -> HandlerResult {
    let query: CourseQuery = parse_query(req)?;
    let key = query.list_key();

    cached_listing(state, req, key, move || async move {
        let mongo = db(state)?;
        let courses = mongo.collection::<CourseDoc>(COURSE_COLLECTION).await?;

        let mut filter = doc! { "is_active": true };
        if let Some(vehicle) = query.vehicle_type {
            filter.insert("vehicle_type", bson::to_bson(&vehicle).map_err(|e| AppError::Internal(e.to_string()))?);
        }
        let (page, limit) = query.pagination();
        let total = courses.count(filter.clone()).await?;
        let items = courses
            .find_page(filter, doc! { "price_paise": 1, "title": 1 }, page, limit)
            .await?;
        Ok(Page::new(items, total, page, limit).map(CourseView::from))
    })
    .await
}

/// `GET /api/courses/{id|slug}` - one active course, cached
pub async fn get(req: &Request<Bytes>, state: &AppState, key: &str) -> HandlerResult {
    let cache_key = listing_key(keys::COURSES, "item", Some(key));

    cached_listing(state, req, cache_key, move || async move {
        let mongo = db(state)?;
        let courses = mongo.collection::<CourseDoc>(COURSE_COLLECTION).await?;
        let mut filter = id_or_slug(key);
        filter.insert("is_active", true);
        courses
            .find_one(filter)
            .await?
            .map(CourseView::from)
            .ok_or_else(|| AppError::NotFound(format!("Course {} not found", key)))
    })
    .await
}

/// Active catalogue for the chatbot prompt, cached with the listings
pub async fn summaries(state: &AppState) -> Result<Vec<CourseSummary>> {
    let key = listing_key(keys::COURSES, "summaries", None);
    if let Some(hit) = state.cache.get(&key).await {
        if let Ok(rows) = serde_json::from_str::<Vec<(String, i64, i32, i32)>>(&hit.data) {
            return Ok(rows.into_iter().map(summary_from_row).collect());
        }
    }

    let mongo = db(state)?;
    let courses = mongo.collection::<CourseDoc>(COURSE_COLLECTION).await?;
    let rows: Vec<(String, i64, i32, i32)> = courses
        .find_many(doc! { "is_active": true }, Some(doc! { "price_paise": 1 }))
        .await?
        .into_iter()
        .map(|c| (c.title, c.price_paise, c.duration_days, c.session_count))
        .collect();

    if let Ok(json) = serde_json::to_string(&rows) {
        state.cache.set(&key, json, state.cache.config().list_ttl).await;
    }
    Ok(rows.into_iter().map(summary_from_row).collect())
}

fn summary_from_row((title, price_paise, duration_days, session_count): (String, i64, i32, i32)) -> CourseSummary {
    CourseSummary {
        title,
        price_paise,
        duration_days,
        session_count,
    }
}

/// `GET /api/admin/courses`
pub async fn admin_list(req: &Request<Bytes>, state: &AppState) -> HandlerResult {
    require_admin(req, state).await?;
    let query: CourseQuery = parse_query(req)?;
    let mongo = db(state)?;
    let courses = mongo.collection::<CourseDoc>(COURSE_COLLECTION).await?;

    let mut filter = Document::new();
    if let Some(vehicle) = query.vehicle_type {
        filter.insert("vehicle_type", bson::to_bson(&vehicle).map_err(|e| AppError::Internal(e.to_string()))?);
    }
    if let Some(active) = query.active {
        filter.insert("is_active", active);
    }
    if let Some(q) = query.q.as_deref().filter(|q| !q.trim().is_empty()) {
        filter.insert("title", search_regex(q));
    }

    let (page, limit) = query.pagination();
    let total = courses.count(filter.clone()).await?;
    let items = courses
        .find_page(filter, doc! { "metadata.created_at": -1 }, page, limit)
        .await?;
    ok(&Page::new(items, total, page, limit).map(CourseView::from))
}

/// `POST /api/admin/courses`
pub async fn create(req: &Request<Bytes>, state: &AppState) -> HandlerResult {
    let claims = require_admin(req, state).await?;
    let body: CreateCourseRequest = parse_valid(req)?;
    let mongo = db(state)?;
    let courses = mongo.collection::<CourseDoc>(COURSE_COLLECTION).await?;

    let slug = body.slug.clone().unwrap_or_else(|| slugify(&body.title));
    if slug.is_empty() {
        return Err(AppError::BadRequest("Cannot derive a slug from the title".into()));
    }

    let mut course = CourseDoc {
        _id: None,
        metadata: Metadata::new(),
        title: body.title.trim().to_string(),
        slug: slug.clone(),
        description: body.description,
        vehicle_type: body.vehicle_type,
        duration_days: body.duration_days,
        session_count: body.session_count,
        price_paise: body.price_paise,
        features: body.features,
        image_url: body.image_url,
        is_active: body.is_active.unwrap_or(true),
    };
    let id = courses.insert_one(course.clone()).await.map_err(|e| match e {
        AppError::Conflict(_) => AppError::Conflict(format!("Slug '{}' is already used", slug)),
        other => other,
    })?;
    course._id = Some(id);

    record_change(
        state,
        &claims,
        AuditEvent::new("create", "course").with_id(id).with_details(doc! { "slug": &slug }),
        Some(keys::COURSES),
    )
    .await;

    created(&CourseView::from(course))
}

/// `PUT /api/admin/courses/{id}`
pub async fn update(req: &Request<Bytes>, state: &AppState, id: &str) -> HandlerResult {
    let claims = require_admin(req, state).await?;
    let oid = parse_id(id)?;
    let body: UpdateCourseRequest = parse_valid(req)?;
    let fields = update_fields(&body)?;
    let mongo = db(state)?;
    let courses = mongo.collection::<CourseDoc>(COURSE_COLLECTION).await?;

    let course = courses
        .set_fields_returning(doc! { "_id": oid }, fields.clone())
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Course {} not found", id)))?;

    let changed: Vec<&str> = fields.keys().map(String::as_str).collect();
    record_change(
        state,
        &claims,
        AuditEvent::new("update", "course").with_id(oid).with_details(doc! { "fields": changed }),
        Some(keys::COURSES),
    )
    .await;

    ok(&CourseView::from(course))
}

/// `DELETE /api/admin/courses/{id}` - soft delete
pub async fn delete(req: &Request<Bytes>, state: &AppState, id: &str) -> HandlerResult {
    let claims = require_admin(req, state).await?;
    let oid = parse_id(id)?;
    let mongo = db(state)?;
    let courses = mongo.collection::<CourseDoc>(COURSE_COLLECTION).await?;

    let result = courses.soft_delete(doc! { "_id": oid }).await?;
    if result.matched_count == 0 {
        return Err(AppError::NotFound(format!("Course {} not found", id)));
    }

    record_change(
        state,
        &claims,
        AuditEvent::new("delete", "course").with_id(oid),
        Some(keys::COURSES),
    )
    .await;

    Ok(json_response(StatusCode::OK, &serde_json::json!({ "deleted": true, "id": id })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::server::testing::{request, session_cookie, state};
    use hyper::Method;

    #[test]
    fn test_id_or_slug() {
        let oid = ObjectId::new();
        assert_eq!(id_or_slug(&oid.to_hex()), doc! { "_id": oid });
        assert_eq!(id_or_slug("car-basics"), doc! { "slug": "car-basics" });
    }

    #[test]
    fn test_course_view_formats_price() {
        let view = CourseView::from(CourseDoc {
            title: "Car Basics".into(),
            slug: "car-basics".into(),
            price_paise: 450_000,
            ..Default::default()
        });
        assert_eq!(view.price, "₹4,500.00");
        assert_eq!(view.vehicle_label, "Four-wheeler");
        assert!(view.id.is_empty());
    }

    #[test]
    fn test_update_serializes_only_present_fields() {
        let update: UpdateCourseRequest =
            serde_json::from_str(r#"{"price_paise": 500000, "vehicle_type": "two_wheeler"}"#).unwrap();
        let fields = update_fields(&update).unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields.get_str("vehicle_type").unwrap(), "two_wheeler");
    }

    #[tokio::test]
    async fn test_create_validates_before_database() {
        let state = state();
        let cookie = session_cookie(&state, Role::Admin);
        let body = r#"{"title":"Ca","description":"short","duration_days":0,"session_count":5,"price_paise":-1,"slug":"Bad Slug"}"#;
        let req = request(Method::POST, "/api/admin/courses", body, Some(&cookie));
        match create(&req, &state).await.unwrap_err() {
            AppError::Validation(fields) => {
                for field in ["title", "description", "duration_days", "price_paise", "slug"] {
                    assert!(fields.contains_key(field), "missing {field}");
                }
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_update_rejected() {
        let state = state();
        let cookie = session_cookie(&state, Role::Admin);
        let req = request(Method::PUT, "/api/admin/courses/x", "{}", Some(&cookie));
        assert!(matches!(
            update(&req, &state, &ObjectId::new().to_hex()).await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn test_list_key_ignores_unknown_parameters() {
        let parse = |q: &str| serde_urlencoded::from_str::<CourseQuery>(q).unwrap().list_key();
        assert_eq!(parse(""), parse("page=1&x=8f14e45f"));
        assert_eq!(parse("limit=20&vehicle_type=two_wheeler"), parse("vehicle_type=two_wheeler&utm=ad"));
        assert_ne!(parse(""), parse("vehicle_type=two_wheeler"));
        assert_ne!(parse(""), parse("page=2"));
    }

    #[tokio::test]
    async fn test_public_list_without_database_is_503() {
        let state = state();
        let req = request(Method::GET, "/api/courses", "", None);
        assert!(matches!(list(&req, &state).await, Err(AppError::DatabaseUnavailable)));
    }

    #[tokio::test]
    async fn test_public_list_serves_stale_snapshot_when_database_down() {
        let state = state();
        let key = CourseQuery::default().list_key();
        state
            .cache
            .set_with_snapshot(&key, r#"{"items":[],"total":0,"page":1,"limit":20,"total_pages":0}"#.into())
            .await;
        state.cache.invalidate_prefix(keys::COURSES).await;

        let req = request(Method::GET, "/api/courses", "", None);
        let resp = list(&req, &state).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["X-Cache"], "STALE");
    }

    #[tokio::test]
    async fn test_cached_listing_honours_if_none_match() {
        let state = state();
        let key = CourseQuery::default().list_key();
        let etag = state.cache.set_with_snapshot(&key, "[]".into()).await;

        let req = Request::builder()
            .uri("/api/courses")
            .header("If-None-Match", etag.as_str())
            .body(Bytes::new())
            .unwrap();
        let resp = list(&req, &state).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(resp.headers()["X-Cache"], "HIT");
    }
}
