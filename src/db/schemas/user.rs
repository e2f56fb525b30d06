//! User document schema
//!
//! Login credentials and the role claim. Student profile data lives in
//! `students`; this collection only answers "who is this and what may they do".

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::auth::Role;
use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for users
pub const USER_COLLECTION: &str = "users";

/// User document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct UserDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Login email, stored lowercase
    pub email: String,

    /// Argon2 password hash
    pub password_hash: String,

    /// Role claim copied into session tokens
    #[serde(default)]
    pub role: Role,

    /// Token version for invalidation (increment to invalidate all sessions)
    #[serde(default = "default_token_version")]
    pub token_version: i32,

    /// Whether the account may sign in
    #[serde(default = "default_true")]
    pub is_active: bool,

    /// Last successful login
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<DateTime>,
}

fn default_token_version() -> i32 {
    1
}

fn default_true() -> bool {
    true
}

impl UserDoc {
    /// Create a new user document
    pub fn new(email: &str, password_hash: String, role: Role) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            email: email.trim().to_lowercase(),
            password_hash,
            role,
            token_version: 1,
            is_active: true,
            last_login_at: None,
        }
    }
}

impl IntoIndexes for UserDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "email": 1 },
            Some(
                IndexOptions::builder()
                    .unique(true)
                    .name("email_unique".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for UserDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_user_normalizes_email() {
        let user = UserDoc::new("  Learner@Example.COM ", "hash".into(), Role::Student);
        assert_eq!(user.email, "learner@example.com");
        assert_eq!(user.token_version, 1);
        assert!(user.is_active);
    }

    #[test]
    fn test_role_stored_uppercase() {
        let user = UserDoc::new("a@b.co", "hash".into(), Role::Admin);
        let doc = bson::to_document(&user).unwrap();
        assert_eq!(doc.get_str("role").unwrap(), "ADMIN");
    }
}
