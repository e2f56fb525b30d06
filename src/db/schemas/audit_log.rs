//! Audit log schema
//!
//! Append-only record of back office mutations.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for audit logs
pub const AUDIT_LOG_COLLECTION: &str = "audit_logs";

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AuditLogDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    /// Email of the admin who made the change
    pub actor: String,

    /// Verb, e.g. `create`, `update`, `delete`, `issue`, `revoke`
    pub action: String,

    /// Entity kind, e.g. `course`
    pub entity: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Document>,

    pub at: DateTime,
}

impl IntoIndexes for AuditLogDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "at": -1 },
                Some(IndexOptions::builder().name("at_index".to_string()).build()),
            ),
            (
                doc! { "entity": 1, "entity_id": 1 },
                Some(IndexOptions::builder().name("entity_index".to_string()).build()),
            ),
        ]
    }
}

impl MutMetadata for AuditLogDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
