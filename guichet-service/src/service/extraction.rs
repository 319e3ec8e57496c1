//! The extraction job handler: drives one document record through
//! `processing -> completed | failed`.
//!
//! The queue delivers at-least-once, so this handler must tolerate seeing
//! the same document id twice, including from two workers at the same time.
//! Every transition goes through the conditional updates in the db layer;
//! a lost update means another delivery won and this one backs off.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::db::{Database, DocumentStatus};
use crate::error::ServiceResult;
use crate::jobs::JobHandler;
use crate::vision::FieldExtractor;

pub const JOB_TYPE_EXTRACT_FIELDS: &str = "extract_fields";

/// Worker logic for one extraction job
pub struct ExtractionHandler {
    db: Arc<Database>,
    extractor: Arc<dyn FieldExtractor>,
}

impl ExtractionHandler {
    pub fn new(db: Arc<Database>, extractor: Arc<dyn FieldExtractor>) -> Self {
        Self { db, extractor }
    }

    async fn run(&self, document_id: &str) -> ServiceResult<()> {
        let Some(mut document) = self.db.get_document(document_id)? else {
            // The record is gone; nothing to do and nothing to retry
            warn!(doc_id = %document_id, "Job references a missing document, discarding");
            return Ok(());
        };

        loop {
            match document.status {
                status if status.is_settled() => {
                    debug!(
                        doc_id = %document_id,
                        status = status.as_str(),
                        "Redelivery for a settled document is a no-op"
                    );
                    return Ok(());
                }
                DocumentStatus::Pending => {
                    if self.db.begin_processing(document_id)? {
                        break;
                    }
                    // Lost the pending->processing race; re-read and re-evaluate
                    match self.db.get_document(document_id)? {
                        Some(doc) => document = doc,
                        None => return Ok(()),
                    }
                }
                DocumentStatus::Processing => {
                    // A prior delivery crashed mid-run or its lease expired.
                    // Extraction re-runs; the terminal conditional update
                    // arbitrates if that delivery is in fact still alive.
                    info!(doc_id = %document_id, "Document already processing, resuming");
                    break;
                }
                _ => unreachable!("is_settled covers the remaining statuses"),
            }
        }

        if document.image_ref_primary.is_empty() {
            // Terminal data error, not retried
            warn!(doc_id = %document_id, "Document has no primary image reference");
            self.db
                .fail_document(document_id, "Missing primary image reference")?;
            return Ok(());
        }

        let extraction = self
            .extractor
            .extract(
                &document.image_ref_primary,
                document.image_ref_secondary.as_deref(),
                document.document_type,
            )
            .await;

        match extraction {
            Ok(fields) => {
                if self.db.complete_document(document_id, &fields)? {
                    info!(
                        doc_id = %document_id,
                        field_count = fields.len(),
                        "Document extraction completed"
                    );
                } else {
                    debug!(doc_id = %document_id, "Lost completion race to a concurrent delivery");
                }
            }
            Err(e) => {
                warn!(doc_id = %document_id, error = %e, "Document extraction failed");
                if !self
                    .db
                    .fail_document(document_id, &format!("Extraction failed: {e}"))?
                {
                    debug!(doc_id = %document_id, "Document already settled by a concurrent delivery");
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl JobHandler for ExtractionHandler {
    fn job_type(&self) -> &'static str {
        JOB_TYPE_EXTRACT_FIELDS
    }

    async fn execute(&self, document_id: &str) -> ServiceResult<()> {
        match self.run(document_id).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // Outer boundary: best-effort failure note on the record. If
                // even that write fails, propagate so the queue's bounded
                // redelivery gets another shot.
                error!(doc_id = %document_id, error = %e, "Unexpected error while processing document");
                match self
                    .db
                    .fail_document(document_id, &format!("System error: {e}"))
                {
                    Ok(_) => Ok(()),
                    Err(update_err) => {
                        warn!(
                            doc_id = %document_id,
                            original_error = %e,
                            update_error = %update_err,
                            "Failed to mark document as failed"
                        );
                        Err(e)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::test_support::{
        StubExtractor, open_test_db, pending_document, sample_fields,
    };

    #[tokio::test]
    async fn test_successful_extraction_completes_document() {
        let (db, _dir) = open_test_db();
        db.create_document_with_job(
            &pending_document("d1", "/objects/u1/cin/front.jpg"),
            JOB_TYPE_EXTRACT_FIELDS,
        )
        .unwrap();

        let extractor = StubExtractor::succeeding();
        let handler = ExtractionHandler::new(db.clone(), extractor.clone());
        handler.execute("d1").await.unwrap();

        let doc = db.get_document("d1").unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Completed);
        assert_eq!(doc.extracted_fields, sample_fields());
        assert!(doc.completed_at.is_some());
        assert!(doc.errors.is_empty());
        assert_eq!(extractor.call_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_document_is_discarded() {
        let (db, _dir) = open_test_db();
        let extractor = StubExtractor::succeeding();
        let handler = ExtractionHandler::new(db.clone(), extractor.clone());

        // Ok so the job is acked rather than redelivered
        handler.execute("missing").await.unwrap();
        assert_eq!(extractor.call_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_primary_ref_fails_without_extraction() {
        let (db, _dir) = open_test_db();
        db.create_document_with_job(&pending_document("d1", ""), JOB_TYPE_EXTRACT_FIELDS)
            .unwrap();

        let extractor = StubExtractor::succeeding();
        let handler = ExtractionHandler::new(db.clone(), extractor.clone());
        handler.execute("d1").await.unwrap();

        let doc = db.get_document("d1").unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Failed);
        assert_eq!(doc.errors, vec!["Missing primary image reference".to_string()]);
        assert!(doc.completed_at.is_none());
        assert_eq!(extractor.call_count(), 0);
    }

    #[tokio::test]
    async fn test_extraction_failure_records_error() {
        let (db, _dir) = open_test_db();
        db.create_document_with_job(
            &pending_document("d1", "/objects/u1/cin/front.jpg"),
            JOB_TYPE_EXTRACT_FIELDS,
        )
        .unwrap();

        let handler = ExtractionHandler::new(db.clone(), StubExtractor::failing());
        handler.execute("d1").await.unwrap();

        let doc = db.get_document("d1").unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Failed);
        assert_eq!(doc.errors.len(), 1);
        assert!(doc.errors[0].starts_with("Extraction failed:"));
        assert!(doc.extracted_fields.is_empty());
        assert!(doc.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_redelivery_of_settled_document_is_noop() {
        let (db, _dir) = open_test_db();
        db.create_document_with_job(
            &pending_document("d1", "/objects/u1/cin/front.jpg"),
            JOB_TYPE_EXTRACT_FIELDS,
        )
        .unwrap();

        let extractor = StubExtractor::succeeding();
        let handler = ExtractionHandler::new(db.clone(), extractor.clone());
        handler.execute("d1").await.unwrap();
        let first = db.get_document("d1").unwrap().unwrap();

        // Redelivered message: no second extraction, no state change
        handler.execute("d1").await.unwrap();
        let second = db.get_document("d1").unwrap().unwrap();

        assert_eq!(extractor.call_count(), 1);
        assert_eq!(second.status, DocumentStatus::Completed);
        assert_eq!(second.completed_at, first.completed_at);
        assert_eq!(second.extracted_fields, first.extracted_fields);
    }

    #[tokio::test]
    async fn test_concurrent_double_delivery_single_effective_transition() {
        let (db, _dir) = open_test_db();
        db.create_document_with_job(
            &pending_document("d1", "/objects/u1/cin/front.jpg"),
            JOB_TYPE_EXTRACT_FIELDS,
        )
        .unwrap();

        let extractor = StubExtractor::succeeding();
        let handler = Arc::new(ExtractionHandler::new(db.clone(), extractor.clone()));

        // Two workers receive the same message at once
        let h1 = handler.clone();
        let h2 = handler.clone();
        let (r1, r2) = tokio::join!(
            tokio::spawn(async move { h1.execute("d1").await }),
            tokio::spawn(async move { h2.execute("d1").await }),
        );
        r1.unwrap().unwrap();
        r2.unwrap().unwrap();

        // Exactly one completion took effect; the loser backed off cleanly
        let doc = db.get_document("d1").unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Completed);
        assert_eq!(doc.extracted_fields, sample_fields());
        assert!(doc.completed_at.is_some());
        assert!(doc.errors.is_empty());
        assert!(extractor.call_count() >= 1);
    }

    #[tokio::test]
    async fn test_resumes_document_stuck_in_processing() {
        let (db, _dir) = open_test_db();
        db.create_document_with_job(
            &pending_document("d1", "/objects/u1/cin/front.jpg"),
            JOB_TYPE_EXTRACT_FIELDS,
        )
        .unwrap();

        // A prior worker claimed the document and crashed before settling it
        db.begin_processing("d1").unwrap();

        let extractor = StubExtractor::succeeding();
        let handler = ExtractionHandler::new(db.clone(), extractor.clone());
        handler.execute("d1").await.unwrap();

        let doc = db.get_document("d1").unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Completed);
        assert_eq!(extractor.call_count(), 1);
    }
}
