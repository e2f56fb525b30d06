//! Session token handling
//!
//! Tokens are HS256 JWTs signed with `JWT_SECRET`. They carry the user id,
//! email, role claim and the user's token version at issue time; bumping
//! the stored version invalidates every outstanding token for that user.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::auth::Role;
use crate::config::MIN_JWT_SECRET_LEN;
use crate::types::AppError;

/// Payload stored in the session token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User document id (hex ObjectId)
    pub sub: String,
    /// User email
    pub email: String,
    /// Role claim
    pub role: Role,
    /// User token version at issue time
    pub token_version: i32,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

impl Claims {
    pub fn is_admin(&self) -> bool {
        self.role >= Role::Admin
    }
}

/// Input for creating a new token
#[derive(Debug, Clone)]
pub struct TokenInput {
    pub user_id: String,
    pub email: String,
    pub role: Role,
    pub token_version: i32,
}

/// Result of token validation
#[derive(Debug)]
pub struct TokenValidationResult {
    pub valid: bool,
    pub claims: Option<Claims>,
    pub error: Option<String>,
}

impl TokenValidationResult {
    pub fn valid(claims: Claims) -> Self {
        Self {
            valid: true,
            claims: Some(claims),
            error: None,
        }
    }

    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            claims: None,
            error: Some(error.into()),
        }
    }
}

/// JWT validator and generator
#[derive(Clone)]
pub struct JwtValidator {
    secret: String,
    expiry_seconds: u64,
}

impl JwtValidator {
    /// Create a new JWT validator
    ///
    /// Returns an error if the secret is empty or too short
    pub fn new(secret: String, expiry_seconds: u64) -> Result<Self, AppError> {
        if secret.is_empty() {
            return Err(AppError::Config("JWT_SECRET is required".into()));
        }

        if secret.len() < MIN_JWT_SECRET_LEN {
            return Err(AppError::Config(format!(
                "JWT_SECRET must be at least {MIN_JWT_SECRET_LEN} characters"
            )));
        }

        Ok(Self {
            secret,
            expiry_seconds,
        })
    }

    /// Create a validator for dev mode
    pub fn new_dev() -> Self {
        Self {
            secret: "dev-mode-secret-not-for-production-use-123456".into(),
            expiry_seconds: 3600,
        }
    }

    pub fn expiry_seconds(&self) -> u64 {
        self.expiry_seconds
    }

    /// Generate a session token for an authenticated user
    pub fn generate_token(&self, input: TokenInput) -> Result<String, AppError> {
        let now = unix_now()?;

        let claims = Claims {
            sub: input.user_id,
            email: input.email,
            role: input.role,
            token_version: input.token_version,
            iat: now,
            exp: now + self.expiry_seconds,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| AppError::Internal(format!("Failed to generate token: {}", e)))
    }

    /// Verify and decode a session token
    pub fn verify_token(&self, token: &str) -> TokenValidationResult {
        match decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        ) {
            Ok(token_data) => TokenValidationResult::valid(token_data.claims),
            Err(err) => {
                use jsonwebtoken::errors::ErrorKind;
                let error_msg = match err.kind() {
                    ErrorKind::ExpiredSignature => "Session expired",
                    ErrorKind::InvalidToken => "Invalid session token",
                    ErrorKind::InvalidSignature => "Invalid session signature",
                    _ => "Session validation failed",
                };
                TokenValidationResult::invalid(error_msg)
            }
        }
    }
}

fn unix_now() -> Result<u64, AppError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| AppError::Internal(format!("System time error: {}", e)))
}

/// Extract token from Authorization header ("Bearer <token>")
pub fn extract_token_from_header(auth_header: Option<&str>) -> Option<&str> {
    let token = auth_header?.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_validator() -> JwtValidator {
        JwtValidator::new(
            "test-secret-that-is-at-least-32-characters-long".into(),
            3600,
        )
        .unwrap()
    }

    fn input(role: Role) -> TokenInput {
        TokenInput {
            user_id: "65f0c0ffee0000000000abcd".into(),
            email: "learner@example.com".into(),
            role,
            token_version: 1,
        }
    }

    #[test]
    fn test_generate_and_verify_token() {
        let validator = test_validator();
        let token = validator.generate_token(input(Role::Student)).unwrap();

        let result = validator.verify_token(&token);
        assert!(result.valid);

        let claims = result.claims.unwrap();
        assert_eq!(claims.email, "learner@example.com");
        assert_eq!(claims.role, Role::Student);
        assert!(!claims.is_admin());
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let other = JwtValidator::new(
            "different-secret-that-is-at-least-32-characters".into(),
            3600,
        )
        .unwrap();
        let token = test_validator().generate_token(input(Role::Admin)).unwrap();
        assert!(!other.verify_token(&token).valid);
    }

    #[test]
    fn test_garbage_token_rejected() {
        let result = test_validator().verify_token("not.a.token");
        assert!(!result.valid);
        assert!(result.error.is_some());
    }

    #[test]
    fn test_secret_validation() {
        assert!(JwtValidator::new("short".into(), 3600).is_err());
        assert!(JwtValidator::new("".into(), 3600).is_err());
        assert!(JwtValidator::new("this-secret-is-at-least-32-chars-long".into(), 3600).is_ok());
    }

    #[test]
    fn test_extract_token_from_header() {
        assert_eq!(extract_token_from_header(Some("Bearer abc123")), Some("abc123"));
        assert_eq!(extract_token_from_header(None), None);
        assert_eq!(extract_token_from_header(Some("Bearer ")), None);
        assert_eq!(extract_token_from_header(Some("Basic abc123")), None);
    }
}
