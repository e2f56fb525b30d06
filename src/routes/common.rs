//! Shared helpers for route handlers
//!
//! JSON responses, body/query parsing with validation, id parsing,
//! pagination and the cached public listing path.

use bson::oid::ObjectId;
use bytes::Bytes;
use http_body_util::Full;
use hyper::{Request, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::borrow::Cow;
use std::future::Future;
use tracing::{debug, warn};
use validator::{Validate, ValidationError};

use crate::auth::{Claims, Role};
use crate::cache::CachedValue;
use crate::db::MongoClient;
use crate::logging::AuditEvent;
use crate::server::AppState;
use crate::types::{AppError, Result};

pub type FullBody = Full<Bytes>;
pub type HandlerResult = Result<Response<FullBody>>;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Serialize `body` as a JSON response
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<FullBody> {
    let json = serde_json::to_string(body)
        .unwrap_or_else(|_| r#"{"error":"Serialization failed"}"#.to_string());

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(json)))
        .unwrap()
}

pub fn ok<T: Serialize>(body: &T) -> HandlerResult {
    Ok(json_response(StatusCode::OK, body))
}

pub fn created<T: Serialize>(body: &T) -> HandlerResult {
    Ok(json_response(StatusCode::CREATED, body))
}

/// JSON response carrying a Set-Cookie header
pub fn with_cookie(mut response: Response<FullBody>, cookie: &str) -> HandlerResult {
    let value = cookie
        .parse()
        .map_err(|_| AppError::Internal("Invalid cookie header".into()))?;
    response.headers_mut().insert(hyper::header::SET_COOKIE, value);
    Ok(response)
}

/// Database handle, or 503 when running without one
pub fn db(state: &AppState) -> Result<&MongoClient> {
    state.mongo.as_ref().ok_or(AppError::DatabaseUnavailable)
}

pub async fn require_admin(req: &Request<Bytes>, state: &AppState) -> Result<Claims> {
    state.sessions.require(req, Role::Admin).await
}

pub async fn require_student(req: &Request<Bytes>, state: &AppState) -> Result<Claims> {
    state.sessions.require(req, Role::Student).await
}

/// Parse the JSON body
pub fn parse_json<T: DeserializeOwned>(req: &Request<Bytes>) -> Result<T> {
    if req.body().is_empty() {
        return Err(AppError::BadRequest("Request body is required".into()));
    }
    Ok(serde_json::from_slice(req.body())?)
}

/// Parse the JSON body and run its field validation
pub fn parse_valid<T: DeserializeOwned + Validate>(req: &Request<Bytes>) -> Result<T> {
    let value: T = parse_json(req)?;
    value.validate()?;
    Ok(value)
}

/// Parse the query string; missing query yields the default
pub fn parse_query<T: DeserializeOwned + Default>(req: &Request<Bytes>) -> Result<T> {
    match req.uri().query() {
        Some(q) if !q.is_empty() => serde_urlencoded::from_str(q)
            .map_err(|e| AppError::BadRequest(format!("Invalid query: {}", e))),
        _ => Ok(T::default()),
    }
}

pub fn parse_id(id: &str) -> Result<ObjectId> {
    ObjectId::parse_str(id).map_err(|_| AppError::BadRequest(format!("Invalid id: {}", id)))
}

/// The single path segment after `prefix`, if that is all that follows
pub fn item<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    path.strip_prefix(prefix)
        .map(|rest| rest.trim_end_matches('/'))
        .filter(|rest| !rest.is_empty() && !rest.contains('/'))
}

pub fn is_item(path: &str, prefix: &str) -> bool {
    item(path, prefix).is_some()
}

/// Hex id of a stored document
pub fn hex_id(id: &Option<ObjectId>) -> String {
    id.map(|oid| oid.to_hex()).unwrap_or_default()
}

/// `page` / `limit` query parameters
#[derive(Debug, Default, Deserialize)]
pub struct Pagination {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl Pagination {
    /// (page, limit) with page >= 1 and 1 <= limit <= 100
    pub fn resolve(&self) -> (u32, u32) {
        let page = self.page.unwrap_or(1).max(1);
        let limit = self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        (page, limit)
    }
}

/// One page of a list reply
#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, page: u32, limit: u32) -> Self {
        Self {
            items,
            total,
            page,
            limit,
            total_pages: total.div_ceil(limit.max(1) as u64),
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            limit: self.limit,
            total_pages: self.total_pages,
        }
    }
}

/// Record an admin mutation and drop the public listings it affects
pub async fn record_change(state: &AppState, actor: &Claims, event: AuditEvent, cache_prefix: Option<&str>) {
    state.audit.record(actor, event).await;
    if let Some(prefix) = cache_prefix {
        let removed = state.cache.invalidate_prefix(prefix).await;
        debug!(prefix, removed, "Invalidated cached listings");
    }
}

/// Case-insensitive substring match for a user-supplied search term
pub fn search_regex(term: &str) -> bson::Document {
    let mut escaped = String::with_capacity(term.len());
    for c in term.trim().chars() {
        if "\\^$.|?*+()[]{}".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    bson::doc! { "$regex": escaped, "$options": "i" }
}

/// Serialize a partial update, rejecting an empty one
pub fn update_fields<T: Serialize>(update: &T) -> Result<bson::Document> {
    let fields = bson::to_document(update)
        .map_err(|e| AppError::BadRequest(format!("Invalid update: {}", e)))?;
    if fields.is_empty() {
        return Err(AppError::BadRequest("No fields to update".into()));
    }
    Ok(fields)
}

/// Serve a public listing through the two-tier cache.
///
/// On a miss `load` runs and its result is cached with a stale snapshot.
/// If `load` fails with a database error the stale snapshot is served.
pub async fn cached_listing<T, F, Fut>(
    state: &AppState,
    req: &Request<Bytes>,
    key: String,
    load: F,
) -> HandlerResult
where
    T: Serialize,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if let Some(hit) = state.cache.get(&key).await {
        return Ok(cached_response(req, hit.data, &hit.etag, "HIT"));
    }

    match load().await {
        Ok(value) => {
            let json = serde_json::to_string(&value)
                .map_err(|e| AppError::Internal(format!("Serialization failed: {}", e)))?;
            let etag = state.cache.set_with_snapshot(&key, json.clone()).await;
            Ok(cached_response(req, json, &etag, "MISS"))
        }
        Err(e @ (AppError::Database(_) | AppError::DatabaseUnavailable)) => {
            match state.cache.stale(&key).await {
                Some(CachedValue { data, etag, .. }) => {
                    warn!(key = %key, error = %e, "Serving stale listing");
                    Ok(cached_response(req, data, &etag, "STALE"))
                }
                None => Err(e),
            }
        }
        Err(e) => Err(e),
    }
}

fn cached_response(req: &Request<Bytes>, data: String, etag: &str, source: &str) -> Response<FullBody> {
    let not_modified = req
        .headers()
        .get(hyper::header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').any(|tag| tag.trim() == etag))
        .unwrap_or(false);

    let builder = Response::builder()
        .header("Access-Control-Allow-Origin", "*")
        .header("ETag", etag)
        .header("X-Cache", source)
        .header("Cache-Control", "public, max-age=60");

    if not_modified {
        return builder
            .status(StatusCode::NOT_MODIFIED)
            .body(Full::new(Bytes::new()))
            .unwrap();
    }

    builder
        .status(StatusCode::OK)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(data)))
        .unwrap()
}

fn validation_error(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(Cow::Borrowed(message));
    err
}

/// Strip spaces, dashes and an optional +91 / 91 prefix
pub fn normalize_phone(phone: &str) -> String {
    let digits: String = phone
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect();
    let digits = digits.strip_prefix("+91").unwrap_or(&digits);
    if digits.len() == 12 {
        digits.strip_prefix("91").unwrap_or(digits).to_string()
    } else {
        digits.to_string()
    }
}

/// Indian mobile number: 10 digits starting 6-9, optional +91
pub fn validate_phone(phone: &str) -> std::result::Result<(), ValidationError> {
    let digits = normalize_phone(phone);
    let valid = digits.len() == 10
        && digits.chars().all(|c| c.is_ascii_digit())
        && matches!(digits.as_bytes()[0], b'6'..=b'9');
    if valid {
        Ok(())
    } else {
        Err(validation_error("phone", "must be a 10-digit Indian mobile number"))
    }
}

/// ISO calendar date, YYYY-MM-DD
pub fn validate_date(date: &str) -> std::result::Result<(), ValidationError> {
    chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map(|_| ())
        .map_err(|_| validation_error("date", "must be a date in YYYY-MM-DD format"))
}

/// Lowercase slug of ASCII letters, digits and single dashes
pub fn validate_slug(slug: &str) -> std::result::Result<(), ValidationError> {
    let valid = !slug.is_empty()
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && !slug.contains("--")
        && slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(validation_error("slug", "must be lowercase letters, digits and dashes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_resolve() {
        assert_eq!(Pagination::default().resolve(), (1, 20));
        let p = Pagination { page: Some(0), limit: Some(1000) };
        assert_eq!(p.resolve(), (1, 100));
        let p = Pagination { page: Some(3), limit: Some(0) };
        assert_eq!(p.resolve(), (3, 1));
    }

    #[test]
    fn test_page_total_pages() {
        assert_eq!(Page::new(vec![1, 2], 41, 1, 20).total_pages, 3);
        assert_eq!(Page::<i32>::new(vec![], 0, 1, 20).total_pages, 0);
        assert_eq!(Page::new(vec![1], 20, 1, 20).map(|x| x * 2).items, vec![2]);
    }

    #[test]
    fn test_item() {
        assert_eq!(item("/api/courses/two-wheeler", "/api/courses/"), Some("two-wheeler"));
        assert_eq!(item("/api/courses/abc/", "/api/courses/"), Some("abc"));
        assert_eq!(item("/api/courses/", "/api/courses/"), None);
        assert_eq!(item("/api/courses/a/b", "/api/courses/"), None);
        assert_eq!(item("/api/other/a", "/api/courses/"), None);
    }

    #[test]
    fn test_search_regex_escapes() {
        let filter = search_regex(" a.b(c) ");
        assert_eq!(filter.get_str("$regex").unwrap(), "a\\.b\\(c\\)");
        assert_eq!(filter.get_str("$options").unwrap(), "i");
    }

    #[test]
    fn test_phone_validation() {
        assert!(validate_phone("9876543210").is_ok());
        assert!(validate_phone("+91 98765-43210").is_ok());
        assert!(validate_phone("919876543210").is_ok());
        assert!(validate_phone("5876543210").is_err());
        assert!(validate_phone("98765").is_err());
        assert!(validate_phone("98765abcde").is_err());
        assert_eq!(normalize_phone("+91 98765 43210"), "9876543210");
    }

    #[test]
    fn test_date_validation() {
        assert!(validate_date("2026-03-01").is_ok());
        assert!(validate_date("2026-02-30").is_err());
        assert!(validate_date("01/03/2026").is_err());
    }

    #[test]
    fn test_slug_validation() {
        assert!(validate_slug("car-basics-2").is_ok());
        assert!(validate_slug("Car").is_err());
        assert!(validate_slug("-car").is_err());
        assert!(validate_slug("car--basics").is_err());
    }

    #[test]
    fn test_parse_json_requires_body() {
        let req = Request::builder().body(Bytes::new()).unwrap();
        let err = parse_json::<serde_json::Value>(&req).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let req = Request::builder().body(Bytes::from("{not json")).unwrap();
        assert!(matches!(parse_json::<serde_json::Value>(&req), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_parse_query() {
        let req = Request::builder()
            .uri("/api/admin/students?page=2&limit=5")
            .body(Bytes::new())
            .unwrap();
        let p: Pagination = parse_query(&req).unwrap();
        assert_eq!(p.resolve(), (2, 5));

        let req = Request::builder()
            .uri("/api/admin/students?page=abc")
            .body(Bytes::new())
            .unwrap();
        assert!(parse_query::<Pagination>(&req).is_err());
    }
}
