//! Audit trail for back office mutations
//!
//! Each admin write records who did what to which entity. Recording is best
//! effort: a failed insert is logged and never fails the admin request.

use bson::{DateTime, Document};
use tracing::{info, warn};

use crate::auth::Claims;
use crate::db::schemas::{AuditLogDoc, Metadata, AUDIT_LOG_COLLECTION};
use crate::db::MongoClient;

/// Builder for one audit entry
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub action: &'static str,
    pub entity: &'static str,
    pub entity_id: Option<String>,
    pub details: Option<Document>,
}

impl AuditEvent {
    pub fn new(action: &'static str, entity: &'static str) -> Self {
        Self {
            action,
            entity,
            entity_id: None,
            details: None,
        }
    }

    pub fn with_id(mut self, id: impl ToString) -> Self {
        self.entity_id = Some(id.to_string());
        self
    }

    pub fn with_details(mut self, details: Document) -> Self {
        self.details = Some(details);
        self
    }

    fn into_doc(self, actor: &str) -> AuditLogDoc {
        AuditLogDoc {
            _id: None,
            metadata: Metadata::new(),
            actor: actor.to_string(),
            action: self.action.to_string(),
            entity: self.entity.to_string(),
            entity_id: self.entity_id,
            details: self.details,
            at: DateTime::now(),
        }
    }
}

#[derive(Clone)]
pub struct AuditLogger {
    mongo: Option<MongoClient>,
}

impl AuditLogger {
    pub fn new(mongo: Option<MongoClient>) -> Self {
        Self { mongo }
    }

    /// Record an admin action
    pub async fn record(&self, actor: &Claims, event: AuditEvent) {
        info!(
            target: "audit",
            actor = %actor.email,
            action = event.action,
            entity = event.entity,
            entity_id = event.entity_id.as_deref().unwrap_or("-"),
            "Admin action"
        );

        let Some(ref mongo) = self.mongo else {
            return;
        };

        let doc = event.into_doc(&actor.email);
        let result = match mongo.collection::<AuditLogDoc>(AUDIT_LOG_COLLECTION).await {
            Ok(logs) => logs.insert_one(doc).await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(error = %e, "Failed to write audit log entry");
        }
    }
}
