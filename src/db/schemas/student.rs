//! Student profile schema

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for student profiles
pub const STUDENT_COLLECTION: &str = "students";

/// Student profile, one per user account
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StudentDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    /// Owning user account
    pub user_id: ObjectId,

    pub name: String,

    pub email: String,

    pub phone: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// ISO date (YYYY-MM-DD)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<String>,

    /// Learner's licence number, once issued by the RTO
    #[serde(skip_serializing_if = "Option::is_none")]
    pub learner_license_number: Option<String>,
}

impl IntoIndexes for StudentDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "user_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("user_id_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "email": 1 },
                Some(IndexOptions::builder().name("email_index".to_string()).build()),
            ),
        ]
    }
}

impl MutMetadata for StudentDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
