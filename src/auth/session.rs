//! Session cookie handling and request authorization
//!
//! The admin flow is: read the session cookie (or bearer token), verify it,
//! then check the role claim. When the database is reachable the token
//! version is compared against the user's stored version so role changes
//! and forced logouts take effect immediately.

use bson::{doc, oid::ObjectId};
use bytes::Bytes;
use hyper::Request;
use tracing::{debug, warn};

use crate::auth::{extract_token_from_header, is_role_allowed, Claims, JwtValidator, Role};
use crate::db::schemas::{UserDoc, USER_COLLECTION};
use crate::db::MongoClient;
use crate::types::AppError;

/// Build the Set-Cookie value for a fresh session
pub fn session_cookie(name: &str, token: &str, max_age_secs: u64, secure: bool) -> String {
    let mut cookie = format!(
        "{name}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_secs}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Build the Set-Cookie value that clears the session
pub fn clear_session_cookie(name: &str, secure: bool) -> String {
    session_cookie(name, "", 0, secure)
}

/// Read a cookie value from the Cookie header
fn cookie_value<'a>(req: &'a Request<Bytes>, name: &str) -> Option<&'a str> {
    req.headers()
        .get_all(hyper::header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|header| header.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

/// Token from the session cookie, falling back to the Authorization header
pub fn token_from_request<'a>(req: &'a Request<Bytes>, cookie_name: &str) -> Option<&'a str> {
    cookie_value(req, cookie_name).or_else(|| {
        let auth_header = req
            .headers()
            .get(hyper::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        extract_token_from_header(auth_header)
    })
}

/// Verifies sessions and enforces role requirements
#[derive(Clone)]
pub struct SessionVerifier {
    jwt: JwtValidator,
    cookie_name: String,
    cookie_secure: bool,
    mongo: Option<MongoClient>,
}

impl SessionVerifier {
    pub fn new(
        jwt: JwtValidator,
        cookie_name: String,
        cookie_secure: bool,
        mongo: Option<MongoClient>,
    ) -> Self {
        Self {
            jwt,
            cookie_name,
            cookie_secure,
            mongo,
        }
    }

    pub fn jwt(&self) -> &JwtValidator {
        &self.jwt
    }

    /// Set-Cookie header value carrying `token`
    pub fn issue_cookie(&self, token: &str) -> String {
        session_cookie(&self.cookie_name, token, self.jwt.expiry_seconds(), self.cookie_secure)
    }

    /// Set-Cookie header value clearing the session
    pub fn clear_cookie(&self) -> String {
        clear_session_cookie(&self.cookie_name, self.cookie_secure)
    }

    /// Verify the request's session and return its claims
    pub async fn verify(&self, req: &Request<Bytes>) -> Result<Claims, AppError> {
        let token = token_from_request(req, &self.cookie_name)
            .ok_or_else(|| AppError::Unauthorized("No session".into()))?;

        let result = self.jwt.verify_token(token);
        if !result.valid {
            return Err(AppError::Unauthorized(
                result.error.unwrap_or_else(|| "Invalid session".into()),
            ));
        }
        let claims = result
            .claims
            .ok_or_else(|| AppError::Unauthorized("Invalid session".into()))?;

        self.check_token_version(&claims).await?;
        Ok(claims)
    }

    /// Verify the session and require at least `required` role
    pub async fn require(&self, req: &Request<Bytes>, required: Role) -> Result<Claims, AppError> {
        let claims = self.verify(req).await?;
        if !is_role_allowed(required, claims.role) {
            warn!(
                email = %claims.email,
                role = %claims.role,
                required = %required,
                path = %req.uri().path(),
                "Role check failed"
            );
            return Err(AppError::Forbidden(format!("{required} role required")));
        }
        Ok(claims)
    }

    /// Reject tokens issued before the user's current token version
    async fn check_token_version(&self, claims: &Claims) -> Result<(), AppError> {
        let Some(ref mongo) = self.mongo else {
            return Ok(());
        };
        let Ok(oid) = ObjectId::parse_str(&claims.sub) else {
            return Err(AppError::Unauthorized("Invalid session subject".into()));
        };

        let users = match mongo.collection::<UserDoc>(USER_COLLECTION).await {
            Ok(c) => c,
            Err(e) => {
                // Token signature already verified; tolerate a database outage here
                debug!("Skipping token version check: {}", e);
                return Ok(());
            }
        };

        match users.find_one(doc! { "_id": oid }).await {
            Ok(Some(user)) if !user.is_active => {
                Err(AppError::Unauthorized("Account disabled".into()))
            }
            Ok(Some(user)) if user.token_version > claims.token_version => {
                Err(AppError::Unauthorized("Session revoked".into()))
            }
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(AppError::Unauthorized("Account not found".into())),
            Err(e) => {
                debug!("Skipping token version check: {}", e);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenInput;

    fn verifier() -> SessionVerifier {
        SessionVerifier::new(JwtValidator::new_dev(), "session".into(), false, None)
    }

    fn token(role: Role) -> String {
        JwtValidator::new_dev()
            .generate_token(TokenInput {
                user_id: ObjectId::new().to_hex(),
                email: "staff@example.com".into(),
                role,
                token_version: 1,
            })
            .unwrap()
    }

    fn request_with(header: (&str, String)) -> Request<Bytes> {
        Request::builder()
            .uri("/api/admin/stats")
            .header(header.0, header.1)
            .body(Bytes::new())
            .unwrap()
    }

    #[test]
    fn test_cookie_format() {
        let cookie = session_cookie("session", "abc", 60, true);
        assert_eq!(cookie, "session=abc; Path=/; HttpOnly; SameSite=Lax; Max-Age=60; Secure");
        assert!(clear_session_cookie("session", false).contains("Max-Age=0"));
    }

    #[test]
    fn test_token_from_cookie_preferred() {
        let req = Request::builder()
            .header("Cookie", "theme=dark; session=from-cookie")
            .header("Authorization", "Bearer from-header")
            .body(Bytes::new())
            .unwrap();
        assert_eq!(token_from_request(&req, "session"), Some("from-cookie"));
    }

    #[test]
    fn test_token_from_header_fallback() {
        let req = request_with(("Authorization", "Bearer from-header".into()));
        assert_eq!(token_from_request(&req, "session"), Some("from-header"));
    }

    #[tokio::test]
    async fn test_missing_session_is_unauthorized() {
        let req = Request::builder().body(Bytes::new()).unwrap();
        let err = verifier().require(&req, Role::Admin).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_student_session_is_forbidden_for_admin() {
        let req = request_with(("Cookie", format!("session={}", token(Role::Student))));
        let err = verifier().require(&req, Role::Admin).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_admin_session_passes() {
        let req = request_with(("Cookie", format!("session={}", token(Role::Admin))));
        let claims = verifier().require(&req, Role::Admin).await.unwrap();
        assert!(claims.is_admin());
    }

    #[tokio::test]
    async fn test_tampered_token_is_unauthorized() {
        let mut t = token(Role::Admin);
        t.push('x');
        let req = request_with(("Authorization", format!("Bearer {t}")));
        let err = verifier().verify(&req).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }
}
