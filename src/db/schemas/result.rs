//! Licence test result schema
//!
//! Published pass results shown on the public site.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for results
pub const RESULT_COLLECTION: &str = "results";

/// Which RTO test the result is for
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TestType {
    #[default]
    Learner,
    Driving,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ResultDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub student_name: String,

    #[serde(default)]
    pub test_type: TestType,

    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<i32>,

    /// ISO date (YYYY-MM-DD)
    pub test_date: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub course_id: Option<ObjectId>,
}

impl IntoIndexes for ResultDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "test_date": -1 },
            Some(IndexOptions::builder().name("test_date_index".to_string()).build()),
        )]
    }
}

impl MutMetadata for ResultDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
