//! Course completion certificate schema

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for certificates
pub const CERTIFICATE_COLLECTION: &str = "certificates";

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CertificateDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    /// Public verification number, e.g. `RW-2026-4F7K9Q`
    pub certificate_number: String,

    pub enrollment_id: ObjectId,

    pub student_id: ObjectId,

    pub course_id: ObjectId,

    /// Denormalized so verification needs a single read
    pub student_name: String,

    pub course_title: String,

    pub issued_at: DateTime,

    #[serde(default)]
    pub is_revoked: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime>,
}

const NUMBER_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Generate a certificate number: prefix, issue year, six unambiguous chars
pub fn generate_certificate_number(year: i32) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..6)
        .map(|_| NUMBER_ALPHABET[rng.gen_range(0..NUMBER_ALPHABET.len())] as char)
        .collect();
    format!("RW-{year}-{suffix}")
}

impl IntoIndexes for CertificateDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "certificate_number": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("certificate_number_unique".to_string())
                        .build(),
                ),
            ),
            // At most one live certificate per enrollment; revoked ones drop out
            (
                doc! { "enrollment_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .partial_filter_expression(doc! {
                            "is_revoked": false,
                            "metadata.is_deleted": false,
                        })
                        .name("enrollment_live_unique".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for CertificateDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_certificate_number_format() {
        let number = generate_certificate_number(2026);
        assert!(number.starts_with("RW-2026-"));
        let suffix = &number["RW-2026-".len()..];
        assert_eq!(suffix.len(), 6);
        assert!(suffix.bytes().all(|b| NUMBER_ALPHABET.contains(&b)));
    }

    #[test]
    fn test_enrollment_index_covers_live_certificates_only() {
        let (keys, options) = CertificateDoc::into_indices().remove(1);
        assert_eq!(keys, doc! { "enrollment_id": 1 });
        let options = options.unwrap();
        assert_eq!(options.unique, Some(true));
        assert_eq!(
            options.partial_filter_expression,
            Some(doc! { "is_revoked": false, "metadata.is_deleted": false })
        );
    }
}
