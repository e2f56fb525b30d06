//! Authentication routes
//!
//! - `POST /api/auth/register` - create a STUDENT account and profile
//! - `POST /api/auth/login` - email + password, sets the session cookie
//! - `POST /api/auth/logout` - clears the session cookie
//! - `GET /api/auth/me` - current user and student profile
//! - `GET /api/auth/session` - verify the session and report role flags
//!
//! Sessions are HS256 tokens carried in an HttpOnly cookie; API clients
//! may send the same token as `Authorization: Bearer`.

use bson::{doc, oid::ObjectId, DateTime};
use bytes::Bytes;
use hyper::{Request, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use validator::Validate;

use crate::auth::{hash_password, verify_password, Role, TokenInput};
use crate::db::schemas::{Metadata, StudentDoc, UserDoc, STUDENT_COLLECTION, USER_COLLECTION};
use crate::routes::common::{
    db, hex_id, json_response, normalize_phone, ok, parse_valid, validate_phone, with_cookie,
    HandlerResult,
};
use crate::routes::students::StudentView;
use crate::server::AppState;
use crate::types::AppError;

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 2, max = 100, message = "must be 2-100 characters"))]
    pub name: String,
    #[validate(email(message = "must be a valid email"))]
    pub email: String,
    #[validate(length(min = 8, max = 128, message = "must be 8-128 characters"))]
    pub password: String,
    #[validate(custom(function = "validate_phone"))]
    pub phone: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "must be a valid email"))]
    pub email: String,
    #[validate(length(min = 1, message = "is required"))]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct UserView {
    pub id: String,
    pub email: String,
    pub role: Role,
}

impl From<&UserDoc> for UserView {
    fn from(user: &UserDoc) -> Self {
        Self {
            id: hex_id(&user._id),
            email: user.email.clone(),
            role: user.role,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: UserView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student: Option<StudentView>,
    /// Seconds until the session expires
    pub expires_in: u64,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub authenticated: bool,
    pub user_id: String,
    pub email: String,
    pub role: Role,
    pub is_admin: bool,
    pub is_student: bool,
    pub expires_at: u64,
}

fn issue_token(state: &AppState, user: &UserDoc, user_id: ObjectId) -> Result<String, AppError> {
    state.sessions.jwt().generate_token(TokenInput {
        user_id: user_id.to_hex(),
        email: user.email.clone(),
        role: user.role,
        token_version: user.token_version,
    })
}

pub async fn register(req: &Request<Bytes>, state: &AppState) -> HandlerResult {
    let body: RegisterRequest = parse_valid(req)?;
    let mongo = db(state)?;

    let users = mongo.collection::<UserDoc>(USER_COLLECTION).await?;
    let students = mongo.collection::<StudentDoc>(STUDENT_COLLECTION).await?;
    let mut user = UserDoc::new(&body.email, hash_password(&body.password)?, Role::Student);
    let user_id = users.insert_one(user.clone()).await.map_err(|e| match e {
        AppError::Conflict(_) => AppError::Conflict("Email already registered".into()),
        other => other,
    })?;
    user._id = Some(user_id);

    let student = StudentDoc {
        _id: None,
        metadata: Metadata::new(),
        user_id,
        name: body.name.trim().to_string(),
        email: user.email.clone(),
        phone: normalize_phone(&body.phone),
        address: None,
        date_of_birth: None,
        learner_license_number: None,
    };
    let student_id = match students.insert_one(student.clone()).await {
        Ok(id) => id,
        Err(e) => {
            // Leave no login without a profile. A soft-deleted user would
            // still hold the unique email and block a retry.
            if let Err(cleanup) = users.hard_delete(doc! { "_id": user_id }).await {
                warn!(error = %cleanup, "Failed to roll back user after profile insert failure");
            }
            return Err(e);
        }
    };

    info!(user_id = %user_id, "Student registered");

    let token = issue_token(state, &user, user_id)?;
    let response = AuthResponse {
        user: UserView::from(&user),
        student: Some(StudentView::from(StudentDoc {
            _id: Some(student_id),
            ..student
        })),
        expires_in: state.sessions.jwt().expiry_seconds(),
    };
    with_cookie(
        json_response(StatusCode::CREATED, &response),
        &state.sessions.issue_cookie(&token),
    )
}

pub async fn login(req: &Request<Bytes>, state: &AppState) -> HandlerResult {
    let body: LoginRequest = parse_valid(req)?;
    let mongo = db(state)?;

    let users = mongo.collection::<UserDoc>(USER_COLLECTION).await?;
    let email = body.email.trim().to_lowercase();
    let invalid = || AppError::Unauthorized("Invalid email or password".into());

    let user = users.find_one(doc! { "email": &email }).await?.ok_or_else(invalid)?;
    let user_id = user._id.ok_or_else(invalid)?;
    if !verify_password(&body.password, &user.password_hash)? {
        warn!(email = %email, "Failed login attempt");
        return Err(invalid());
    }
    if !user.is_active {
        return Err(AppError::Forbidden("Account disabled".into()));
    }

    users
        .set_fields(doc! { "_id": user_id }, doc! { "last_login_at": DateTime::now() })
        .await?;

    let students = mongo.collection::<StudentDoc>(STUDENT_COLLECTION).await?;
    let student = students.find_one(doc! { "user_id": user_id }).await?;

    info!(user_id = %user_id, role = %user.role, "User logged in");

    let token = issue_token(state, &user, user_id)?;
    let response = AuthResponse {
        user: UserView::from(&user),
        student: student.map(StudentView::from),
        expires_in: state.sessions.jwt().expiry_seconds(),
    };
    with_cookie(
        json_response(StatusCode::OK, &response),
        &state.sessions.issue_cookie(&token),
    )
}

pub fn logout(state: &AppState) -> HandlerResult {
    with_cookie(
        json_response(StatusCode::OK, &serde_json::json!({ "success": true })),
        &state.sessions.clear_cookie(),
    )
}

pub async fn me(req: &Request<Bytes>, state: &AppState) -> HandlerResult {
    let claims = state.sessions.verify(req).await?;
    let mongo = db(state)?;
    let user_id = ObjectId::parse_str(&claims.sub)
        .map_err(|_| AppError::Unauthorized("Invalid session subject".into()))?;

    let users = mongo.collection::<UserDoc>(USER_COLLECTION).await?;
    let user = users
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Account not found".into()))?;

    let students = mongo.collection::<StudentDoc>(STUDENT_COLLECTION).await?;
    let student = students.find_one(doc! { "user_id": user_id }).await?;

    ok(&AuthResponse {
        user: UserView::from(&user),
        student: student.map(StudentView::from),
        expires_in: claims.exp.saturating_sub(chrono::Utc::now().timestamp().max(0) as u64),
    })
}

pub async fn session(req: &Request<Bytes>, state: &AppState) -> HandlerResult {
    let claims = state.sessions.verify(req).await?;
    ok(&SessionResponse {
        authenticated: true,
        user_id: claims.sub.clone(),
        email: claims.email.clone(),
        role: claims.role,
        is_admin: claims.is_admin(),
        is_student: claims.role == Role::Student,
        expires_at: claims.exp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::testing::{request, session_cookie, state};
    use http_body_util::BodyExt;
    use hyper::Method;

    #[tokio::test]
    async fn test_register_validates_fields() {
        let state = state();
        let req = request(
            Method::POST,
            "/api/auth/register",
            r#"{"name":"A","email":"nope","password":"short","phone":"12345"}"#,
            None,
        );
        match register(&req, &state).await.unwrap_err() {
            AppError::Validation(fields) => {
                for field in ["name", "email", "password", "phone"] {
                    assert!(fields.contains_key(field), "missing {field}");
                }
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_register_without_database_is_503() {
        let state = state();
        let req = request(
            Method::POST,
            "/api/auth/register",
            r#"{"name":"Asha Rao","email":"asha@example.com","password":"clutch-control","phone":"+91 98765 43210"}"#,
            None,
        );
        let err = register(&req, &state).await.unwrap_err();
        assert!(matches!(err, AppError::DatabaseUnavailable));
    }

    #[tokio::test]
    async fn test_login_rejects_malformed_json() {
        let state = state();
        let req = request(Method::POST, "/api/auth/login", "{", None);
        assert!(matches!(login(&req, &state).await, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_logout_clears_cookie() {
        let resp = logout(&state()).unwrap();
        let cookie = resp.headers()["Set-Cookie"].to_str().unwrap();
        assert!(cookie.starts_with("session=;"));
        assert!(cookie.contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn test_session_reports_role_flags() {
        let state = state();
        let cookie = session_cookie(&state, Role::Admin);
        let req = request(Method::GET, "/api/auth/session", "", Some(&cookie));
        let resp = session(&req, &state).await.unwrap();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["authenticated"], true);
        assert_eq!(body["role"], "ADMIN");
        assert_eq!(body["is_admin"], true);
        assert_eq!(body["is_student"], false);
    }

    #[tokio::test]
    async fn test_session_without_cookie_is_401() {
        let state = state();
        let req = request(Method::GET, "/api/auth/session", "", None);
        assert!(matches!(session(&req, &state).await, Err(AppError::Unauthorized(_))));
    }
}
