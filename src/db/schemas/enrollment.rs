//! Enrollment document schema
//!
//! Links a student to a course. The fee is captured at enrollment time so a
//! later course price change never alters what the student is charged.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for enrollments
pub const ENROLLMENT_COLLECTION: &str = "enrollments";

/// Enrollment lifecycle
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    #[default]
    PendingPayment,
    Active,
    Completed,
    Cancelled,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::PendingPayment => "pending_payment",
            EnrollmentStatus::Active => "active",
            EnrollmentStatus::Completed => "completed",
            EnrollmentStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnrollmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_payment" => Ok(EnrollmentStatus::PendingPayment),
            "active" => Ok(EnrollmentStatus::Active),
            "completed" => Ok(EnrollmentStatus::Completed),
            "cancelled" => Ok(EnrollmentStatus::Cancelled),
            other => Err(format!("Unknown enrollment status: {other}")),
        }
    }
}

/// Whether the enrollment fee has been collected
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Unpaid,
    Paid,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct EnrollmentDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub student_id: ObjectId,

    pub course_id: ObjectId,

    /// Assigned by the back office once the enrollment is active
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructor_id: Option<ObjectId>,

    #[serde(default)]
    pub status: EnrollmentStatus,

    #[serde(default)]
    pub payment_status: PaymentStatus,

    /// Fee in paise, copied from the course at enrollment time
    pub amount_paise: i64,

    /// ISO date (YYYY-MM-DD)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_start_date: Option<String>,

    #[serde(default)]
    pub sessions_completed: i32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl IntoIndexes for EnrollmentDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // One live, non-cancelled enrollment per student and course
            (
                doc! { "student_id": 1, "course_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .partial_filter_expression(doc! {
                            "status": { "$in": [
                                EnrollmentStatus::PendingPayment.as_str(),
                                EnrollmentStatus::Active.as_str(),
                                EnrollmentStatus::Completed.as_str(),
                            ] },
                            "metadata.is_deleted": false,
                        })
                        .name("student_course_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "status": 1 },
                Some(IndexOptions::builder().name("status_index".to_string()).build()),
            ),
        ]
    }
}

impl MutMetadata for EnrollmentDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_and_display() {
        for status in [
            EnrollmentStatus::PendingPayment,
            EnrollmentStatus::Active,
            EnrollmentStatus::Completed,
            EnrollmentStatus::Cancelled,
        ] {
            assert_eq!(status.to_string().parse::<EnrollmentStatus>().unwrap(), status);
        }
        assert!("done".parse::<EnrollmentStatus>().is_err());
    }

    #[test]
    fn test_student_course_index_ignores_cancelled() {
        let (keys, options) = EnrollmentDoc::into_indices().remove(0);
        assert_eq!(keys, doc! { "student_id": 1, "course_id": 1 });
        let options = options.unwrap();
        assert_eq!(options.unique, Some(true));

        let partial = options.partial_filter_expression.unwrap();
        let statuses = partial.get_document("status").unwrap().get_array("$in").unwrap();
        assert_eq!(statuses.len(), 3);
        assert!(!statuses.iter().any(|s| s.as_str() == Some("cancelled")));
        assert!(!partial.get_bool("metadata.is_deleted").unwrap());
    }

    #[test]
    fn test_serde_matches_as_str() {
        let json = serde_json::to_string(&EnrollmentStatus::PendingPayment).unwrap();
        assert_eq!(json, "\"pending_payment\"");
        let json = serde_json::to_string(&PaymentStatus::Refunded).unwrap();
        assert_eq!(json, format!("\"{}\"", PaymentStatus::Refunded.as_str()));
    }
}
