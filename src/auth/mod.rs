//! Authentication and authorization for roadwise
//!
//! Provides:
//! - Session tokens (HS256 JWT) carrying the role claim
//! - Session cookie issue/clear and token extraction
//! - Role levels for route authorization
//! - Password hashing with Argon2

pub mod jwt;
pub mod password;
pub mod roles;
pub mod session;

pub use jwt::{extract_token_from_header, Claims, JwtValidator, TokenInput, TokenValidationResult};
pub use password::{hash_password, verify_password};
pub use roles::{is_role_allowed, Role};
pub use session::{clear_session_cookie, session_cookie, token_from_request, SessionVerifier};
