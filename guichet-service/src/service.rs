//! Service facade coordinating the store, the queue, and the extractor.

mod extraction;
mod intake;

pub use extraction::{ExtractionHandler, JOB_TYPE_EXTRACT_FIELDS};
pub use intake::UploadedImage;

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use crate::config::StaticConfig;
use crate::db::{Database, Document, DocumentStatus};
use crate::error::{ServiceError, ServiceResult};
use crate::storage::ObjectStore;
use crate::vision::FieldExtractor;

/// Main service coordinator.
///
/// Collaborators are injected explicitly at startup; the service holds no
/// ambient global state. The worker side (`ExtractionHandler`) shares only
/// the database and extractor handles, never in-process state.
pub struct GuichetService {
    pub config: StaticConfig,
    pub db: Arc<Database>,
    pub store: Arc<dyn ObjectStore>,
    pub extractor: Arc<dyn FieldExtractor>,
}

impl GuichetService {
    pub fn new(
        config: StaticConfig,
        db: Arc<Database>,
        store: Arc<dyn ObjectStore>,
        extractor: Arc<dyn FieldExtractor>,
    ) -> Self {
        info!("Initializing Guichet service");
        Self {
            config,
            db,
            store,
            extractor,
        }
    }

    /// Look up a document by id
    pub fn get_document(&self, document_id: &str) -> ServiceResult<Document> {
        self.db
            .get_document(document_id)?
            .ok_or_else(|| ServiceError::DocumentNotFound {
                document_id: document_id.to_string(),
            })
    }

    /// List an owner's documents, newest first
    pub fn list_documents(&self, owner_id: &str) -> ServiceResult<Vec<Document>> {
        self.db.list_documents_for_owner(owner_id)
    }

    /// Confirm a completed document, attaching the owner-reviewed fields.
    ///
    /// Only a `completed` record may be confirmed; anything else is a
    /// precondition rejection, never a silent no-op.
    pub fn confirm_document(
        &self,
        document_id: &str,
        fields: &BTreeMap<String, String>,
    ) -> ServiceResult<Document> {
        let document = self.get_document(document_id)?;

        if document.status != DocumentStatus::Completed {
            return Err(ServiceError::StatusConflict {
                message: format!(
                    "Cannot confirm document with status {}",
                    document.status.as_str()
                ),
            });
        }

        if !self.db.confirm_document(document_id, fields)? {
            // The status moved between our read and the conditional update
            return Err(ServiceError::StatusConflict {
                message: "Document status changed concurrently".to_string(),
            });
        }

        info!(doc_id = %document_id, "Document confirmed by owner");

        self.get_document(document_id)
    }

    /// Extraction backend reachability, surfaced in /health
    pub async fn extraction_healthy(&self) -> bool {
        self.extractor.health_check().await
    }

    /// Jobs currently waiting for a worker, surfaced in /health
    pub fn queued_job_count(&self) -> ServiceResult<u64> {
        self.db.queued_job_count()
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::test_support::{
        StubExtractor, StubObjectStore, open_test_db, pending_document, sample_fields,
    };
    use super::*;
    use crate::config::StaticConfig;

    fn test_service(db: Arc<Database>) -> GuichetService {
        GuichetService::new(
            StaticConfig::default(),
            db,
            StubObjectStore::succeeding(),
            StubExtractor::succeeding(),
        )
    }

    #[test]
    fn test_get_document_not_found() {
        let (db, _dir) = open_test_db();
        let service = test_service(db);

        assert!(matches!(
            service.get_document("missing"),
            Err(ServiceError::DocumentNotFound { .. })
        ));
    }

    #[test]
    fn test_confirm_requires_completed_status() {
        let (db, _dir) = open_test_db();
        db.create_document_with_job(
            &pending_document("d1", "/objects/u1/cin/front.jpg"),
            "extract_fields",
        )
        .unwrap();
        let service = test_service(db.clone());

        // pending record: precondition rejection, status unchanged
        let err = service.confirm_document("d1", &sample_fields()).unwrap_err();
        assert!(matches!(err, ServiceError::StatusConflict { .. }));
        assert_eq!(
            service.get_document("d1").unwrap().status,
            DocumentStatus::Pending
        );

        db.begin_processing("d1").unwrap();
        db.complete_document("d1", &sample_fields()).unwrap();

        let confirmed = service.confirm_document("d1", &sample_fields()).unwrap();
        assert_eq!(confirmed.status, DocumentStatus::Confirmed);

        // confirmed is terminal
        assert!(matches!(
            service.confirm_document("d1", &sample_fields()),
            Err(ServiceError::StatusConflict { .. })
        ));
    }
}
