//! Course document schema

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for courses
pub const COURSE_COLLECTION: &str = "courses";

/// Vehicle class a course trains for
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VehicleType {
    TwoWheeler,
    #[default]
    FourWheeler,
    HeavyVehicle,
}

impl VehicleType {
    pub fn label(&self) -> &'static str {
        match self {
            VehicleType::TwoWheeler => "Two-wheeler",
            VehicleType::FourWheeler => "Four-wheeler",
            VehicleType::HeavyVehicle => "Heavy vehicle",
        }
    }
}

/// A course offered by the school
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct CourseDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub title: String,

    /// URL-safe unique name
    pub slug: String,

    pub description: String,

    #[serde(default)]
    pub vehicle_type: VehicleType,

    /// Course length in days
    pub duration_days: i32,

    /// Number of driving sessions included
    pub session_count: i32,

    /// Fee in paise
    pub price_paise: i64,

    #[serde(default)]
    pub features: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,

    /// Inactive courses are hidden from the public catalogue
    #[serde(default)]
    pub is_active: bool,
}

/// Derive a slug from a title: lowercase ASCII alphanumerics joined by '-'
pub fn slugify(title: &str) -> String {
    title
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| part.to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}

impl IntoIndexes for CourseDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "slug": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("slug_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "is_active": 1 },
                Some(IndexOptions::builder().name("active_index".to_string()).build()),
            ),
        ]
    }
}

impl MutMetadata for CourseDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Four-Wheeler Basic (15 days)"), "four-wheeler-basic-15-days");
        assert_eq!(slugify("  Two  Wheeler!! "), "two-wheeler");
        assert_eq!(slugify("???"), "");
    }

    #[test]
    fn test_vehicle_type_serde() {
        assert_eq!(
            serde_json::to_string(&VehicleType::HeavyVehicle).unwrap(),
            "\"heavy_vehicle\""
        );
    }
}
