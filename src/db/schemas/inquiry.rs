//! Contact inquiry schema

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for inquiries
pub const INQUIRY_COLLECTION: &str = "inquiries";

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InquiryStatus {
    #[default]
    New,
    Contacted,
    Closed,
}

impl InquiryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InquiryStatus::New => "new",
            InquiryStatus::Contacted => "contacted",
            InquiryStatus::Closed => "closed",
        }
    }
}

impl FromStr for InquiryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(InquiryStatus::New),
            "contacted" => Ok(InquiryStatus::Contacted),
            "closed" => Ok(InquiryStatus::Closed),
            other => Err(format!("Unknown inquiry status: {other}")),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct InquiryDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub name: String,

    pub email: String,

    pub phone: String,

    pub message: String,

    /// Course the visitor asked about, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course_id: Option<ObjectId>,

    #[serde(default)]
    pub status: InquiryStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_notes: Option<String>,
}

impl IntoIndexes for InquiryDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "status": 1, "metadata.created_at": -1 },
            Some(IndexOptions::builder().name("status_created_index".to_string()).build()),
        )]
    }
}

impl MutMetadata for InquiryDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
