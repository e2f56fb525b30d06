//! Testimonial document schema

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for testimonials
pub const TESTIMONIAL_COLLECTION: &str = "testimonials";

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct TestimonialDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub name: String,

    /// 1 to 5 stars
    pub rating: i32,

    pub message: String,

    /// Set when submitted from a signed-in student session
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_id: Option<ObjectId>,

    /// Only approved testimonials are public
    #[serde(default)]
    pub is_approved: bool,
}

impl IntoIndexes for TestimonialDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "is_approved": 1 },
            Some(IndexOptions::builder().name("approved_index".to_string()).build()),
        )]
    }
}

impl MutMetadata for TestimonialDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
