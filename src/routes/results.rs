//! Exam results wall (learner licence and driving tests)

use bson::{doc, Document};
use bytes::Bytes;
use hyper::Request;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::cache::{keys, page_key};
use crate::db::schemas::{Metadata, ResultDoc, TestType, RESULT_COLLECTION};
use crate::logging::AuditEvent;
use crate::routes::common::{
    cached_listing, created, db, hex_id, ok, parse_id, parse_query, parse_valid, record_change,
    require_admin, update_fields, validate_date, HandlerResult, Page, Pagination,
};
use crate::server::AppState;
use crate::types::{AppError, Result};

#[derive(Debug, Serialize)]
pub struct ResultView {
    pub id: String,
    pub student_name: String,
    pub test_type: TestType,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<i32>,
    pub test_date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course_id: Option<String>,
}

impl From<ResultDoc> for ResultView {
    fn from(result: ResultDoc) -> Self {
        Self {
            id: hex_id(&result._id),
            course_id: result.course_id.map(|id| id.to_hex()),
            student_name: result.student_name,
            test_type: result.test_type,
            passed: result.passed,
            score: result.score,
            test_date: result.test_date,
            photo_url: result.photo_url,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateResultRequest {
    #[validate(length(min = 2, max = 100, message = "must be 2-100 characters"))]
    pub student_name: String,
    #[serde(default)]
    pub test_type: TestType,
    pub passed: bool,
    #[validate(range(min = 0, max = 100, message = "must be 0-100"))]
    pub score: Option<i32>,
    #[validate(custom(function = "validate_date"))]
    pub test_date: String,
    #[validate(url(message = "must be a valid URL"))]
    pub photo_url: Option<String>,
    #[validate(length(equal = 24, message = "must be a course id"))]
    pub course_id: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct UpdateResultRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 2, max = 100, message = "must be 2-100 characters"))]
    pub student_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_type: Option<TestType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0, max = 100, message = "must be 0-100"))]
    pub score: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = "validate_date"))]
    pub test_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(url(message = "must be a valid URL"))]
    pub photo_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResultQuery {
    pub test_type: Option<TestType>,
    pub passed: Option<bool>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl ResultQuery {
    fn filter(&self) -> Result<Document> {
        let mut filter = Document::new();
        if let Some(test_type) = self.test_type {
            let value = bson::to_bson(&test_type).map_err(|e| AppError::Internal(e.to_string()))?;
            filter.insert("test_type", value);
        }
        if let Some(passed) = self.passed {
            filter.insert("passed", passed);
        }
        Ok(filter)
    }

    fn list_key(&self) -> String {
        let mut filters = Vec::new();
        if let Some(test_type) = self.test_type {
            filters.push(("test_type", format!("{test_type:?}")));
        }
        if let Some(passed) = self.passed {
            filters.push(("passed", passed.to_string()));
        }
        let (page, limit) = Pagination { page: self.page, limit: self.limit }.resolve();
        page_key(keys::RESULTS, &filters, page, limit)
    }
}

/// `GET /api/results` - newest first, cached
pub async fn list(req: &Request<Bytes>, state: &AppState) -> HandlerResult {
    let query: ResultQuery = parse_query(req)?;
    let key = query.list_key();

    cached_listing(state, req, key, move || async move {
        let results = db(state)?.collection::<ResultDoc>(RESULT_COLLECTION).await?;
        let filter = query.filter()?;
        let (page, limit) = Pagination { page: query.page, limit: query.limit }.resolve();
        let total = results.count(filter.clone()).await?;
        let items = results
            .find_page(filter, doc! { "test_date": -1 }, page, limit)
            .await?;
        Ok(Page::new(items, total, page, limit).map(ResultView::from))
    })
    .await
}

/// `GET /api/admin/results`
pub async fn admin_list(req: &Request<Bytes>, state: &AppState) -> HandlerResult {
    require_admin(req, state).await?;
    let query: ResultQuery = parse_query(req)?;
    let results = db(state)?.collection::<ResultDoc>(RESULT_COLLECTION).await?;

    let filter = query.filter()?;
    let (page, limit) = Pagination { page: query.page, limit: query.limit }.resolve();
    let total = results.count(filter.clone()).await?;
    let items = results
        .find_page(filter, doc! { "test_date": -1 }, page, limit)
        .await?;
    ok(&Page::new(items, total, page, limit).map(ResultView::from))
}

/// `POST /api/admin/results`
pub async fn create(req: &Request<Bytes>, state: &AppState) -> HandlerResult {
    let claims = require_admin(req, state).await?;
    let body: CreateResultRequest = parse_valid(req)?;
    let course_id = body.course_id.as_deref().map(parse_id).transpose()?;
    let results = db(state)?.collection::<ResultDoc>(RESULT_COLLECTION).await?;

    let mut result = ResultDoc {
        _id: None,
        metadata: Metadata::new(),
        student_name: body.student_name.trim().to_string(),
        test_type: body.test_type,
        passed: body.passed,
        score: body.score,
        test_date: body.test_date,
        photo_url: body.photo_url,
        course_id,
    };
    let id = results.insert_one(result.clone()).await?;
    result._id = Some(id);

    record_change(
        state,
        &claims,
        AuditEvent::new("create", "result").with_id(id),
        Some(keys::RESULTS),
    )
    .await;

    created(&ResultView::from(result))
}

/// `PUT /api/admin/results/{id}`
pub async fn update(req: &Request<Bytes>, state: &AppState, id: &str) -> HandlerResult {
    let claims = require_admin(req, state).await?;
    let oid = parse_id(id)?;
    let body: UpdateResultRequest = parse_valid(req)?;
    let fields = update_fields(&body)?;
    let results = db(state)?.collection::<ResultDoc>(RESULT_COLLECTION).await?;

    let result = results
        .set_fields_returning(doc! { "_id": oid }, fields)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Result {} not found", id)))?;

    record_change(
        state,
        &claims,
        AuditEvent::new("update", "result").with_id(oid),
        Some(keys::RESULTS),
    )
    .await;

    ok(&ResultView::from(result))
}

/// `DELETE /api/admin/results/{id}`
pub async fn delete(req: &Request<Bytes>, state: &AppState, id: &str) -> HandlerResult {
    let claims = require_admin(req, state).await?;
    let oid = parse_id(id)?;
    let results = db(state)?.collection::<ResultDoc>(RESULT_COLLECTION).await?;

    if results.soft_delete(doc! { "_id": oid }).await?.matched_count == 0 {
        return Err(AppError::NotFound(format!("Result {} not found", id)));
    }
    record_change(
        state,
        &claims,
        AuditEvent::new("delete", "result").with_id(oid),
        Some(keys::RESULTS),
    )
    .await;

    ok(&serde_json::json!({ "deleted": true, "id": id }))
}
